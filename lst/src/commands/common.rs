//! Shared helpers: compiler discovery, source collection, invocation.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::{LstError, Result};

/// Locate the `lsc` compiler: a sibling of the running executable first,
/// then whatever `PATH` resolves.
pub fn find_compiler() -> Result<PathBuf> {
    if let Ok(current) = std::env::current_exe() {
        if let Some(dir) = current.parent() {
            for name in ["lsc", "lsc.exe"] {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }
    }
    // Fall back to PATH resolution at spawn time.
    let probe = Command::new("lsc").arg("--check").output();
    match probe {
        Ok(_) => Ok(PathBuf::from("lsc")),
        Err(_) => Err(LstError::CompilerNotFound(
            "`lsc` is neither next to lst nor on PATH".to_string(),
        )),
    }
}

/// All `.lsc` / `.ls` files directly inside `dir`, sorted for stable
/// compile order.
pub fn collect_sources(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut sources = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_source = path
            .extension()
            .map(|ext| ext == "lsc" || ext == "ls")
            .unwrap_or(false);
        if path.is_file() && is_source {
            sources.push(path);
        }
    }
    sources.sort();
    if sources.is_empty() {
        return Err(LstError::NoSources(dir.to_path_buf()));
    }
    Ok(sources)
}

/// Invoke the compiler and forward its exit code.
pub fn run_lsc(compiler: &Path, args: &[String]) -> Result<i32> {
    debug!(compiler = %compiler.display(), ?args, "invoking lsc");
    let status = Command::new(compiler).args(args).status()?;
    Ok(status.code().unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_collect_sources_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.lsc", "a.ls", "notes.txt"] {
            let mut file = std::fs::File::create(dir.path().join(name)).unwrap();
            writeln!(file, "println(1)").unwrap();
        }
        let sources = collect_sources(dir.path()).unwrap();
        let names: Vec<_> = sources
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.ls", "b.lsc"]);
    }

    #[test]
    fn test_collect_sources_empty_dir_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_sources(dir.path()).is_err());
    }
}
