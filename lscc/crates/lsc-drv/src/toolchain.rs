//! External toolchain invocation.
//!
//! The driver never goes through a shell: the validated `--cc` value is
//! spawned directly with an argument vector, its stderr is forwarded
//! verbatim, and the two failure classes are kept apart (spawn failure is
//! an invocation error, a nonzero status is a compilation error).

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use crate::config::Config;

/// How a toolchain step failed.
#[derive(Debug)]
pub enum ToolchainFailure {
    /// The process could not be started (maps to exit code 1)
    Invocation(String),
    /// The process ran and failed (maps to exit code 4)
    Compilation(String),
}

/// A resolved toolchain driver.
pub struct Toolchain {
    pub cc: String,
}

impl Toolchain {
    /// Use the configured driver, or probe `clang` then `gcc`.
    pub fn resolve(configured: Option<&str>) -> Self {
        if let Some(cc) = configured {
            return Self { cc: cc.to_string() };
        }
        for candidate in ["clang", "gcc", "cc"] {
            let found = Command::new(candidate)
                .arg("--version")
                .output()
                .map(|out| out.status.success())
                .unwrap_or(false);
            if found {
                return Self {
                    cc: candidate.to_string(),
                };
            }
        }
        // Nothing probed; let the compile step surface the failure.
        Self {
            cc: "cc".to_string(),
        }
    }

    /// Compile a C or assembly translation unit into a native binary.
    pub fn compile(
        &self,
        source: &Path,
        output: &Path,
        config: &Config,
        needs_openmp: bool,
    ) -> Result<(), ToolchainFailure> {
        let mut args: Vec<String> = vec![
            source.display().to_string(),
            "-o".to_string(),
            output.display().to_string(),
        ];

        if config.max_speed {
            args.extend(
                [
                    "-O3",
                    "-march=native",
                    "-fno-math-errno",
                    "-fno-exceptions",
                    "-fno-unwind-tables",
                ]
                .map(String::from),
            );
        } else {
            args.push("-O2".to_string());
        }
        if needs_openmp {
            args.push("-fopenmp".to_string());
        }
        if config.pgo_generate {
            args.push("-fprofile-generate".to_string());
        }
        if let Some(dir) = &config.pgo_use {
            args.push(format!("-fprofile-use={}", dir.display()));
        }
        args.push("-lm".to_string());

        debug!(cc = %self.cc, ?args, "invoking toolchain");
        let result = Command::new(&self.cc).args(&args).output();
        let output_data = match result {
            Ok(data) => data,
            Err(err) => {
                return Err(ToolchainFailure::Invocation(format!(
                    "failed to invoke `{}`: {}",
                    self.cc, err
                )))
            }
        };

        let stderr = String::from_utf8_lossy(&output_data.stderr);
        if !stderr.is_empty() {
            // Toolchain diagnostics pass through verbatim.
            eprint!("{}", stderr);
        }
        if !output_data.status.success() {
            return Err(ToolchainFailure::Compilation(format!(
                "`{}` exited with {}",
                self.cc,
                output_data
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string())
            )));
        }
        Ok(())
    }

    /// Post-link BOLT layout optimization; best-effort when the tool is
    /// present, a warning otherwise.
    pub fn bolt(&self, binary: &Path, fdata: &Path) -> Result<(), ToolchainFailure> {
        let bolted: PathBuf = binary.with_extension("bolt");
        let result = Command::new("llvm-bolt")
            .arg(binary)
            .arg("-data")
            .arg(fdata)
            .arg("-o")
            .arg(&bolted)
            .output();
        match result {
            Err(_) => {
                warn!("llvm-bolt not available; skipping post-link optimization");
                Ok(())
            }
            Ok(out) if !out.status.success() => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                eprint!("{}", stderr);
                Err(ToolchainFailure::Compilation(
                    "llvm-bolt failed".to_string(),
                ))
            }
            Ok(_) => {
                std::fs::rename(&bolted, binary).map_err(|err| {
                    ToolchainFailure::Compilation(format!(
                        "failed to install BOLT output: {}",
                        err
                    ))
                })
            }
        }
    }
}

/// Deletes an intermediate file on drop unless disarmed.
pub struct TempArtifact {
    path: PathBuf,
    keep: bool,
}

impl TempArtifact {
    pub fn new(path: PathBuf, keep: bool) -> Self {
        Self { path, keep }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if !self.keep {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_cc_is_used_verbatim() {
        let toolchain = Toolchain::resolve(Some("my-cc"));
        assert_eq!(toolchain.cc, "my-cc");
    }

    #[test]
    fn test_temp_artifact_removes_file() {
        let dir = std::env::temp_dir();
        let path = dir.join("lsc_temp_artifact_test.c");
        std::fs::write(&path, "int main(void){return 0;}").unwrap();
        {
            let _artifact = TempArtifact::new(path.clone(), false);
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_temp_artifact_keeps_file_when_asked() {
        let dir = std::env::temp_dir();
        let path = dir.join("lsc_temp_artifact_keep_test.c");
        std::fs::write(&path, "int main(void){return 0;}").unwrap();
        {
            let _artifact = TempArtifact::new(path.clone(), true);
        }
        assert!(path.exists());
        std::fs::remove_file(&path).unwrap();
    }
}
