//! Source map - Storage for loaded source files.

use std::path::{Path, PathBuf};

use super::FileId;

/// A single loaded source file.
#[derive(Clone, Debug)]
pub struct SourceFile {
    /// Identifier assigned by the owning [`SourceMap`]
    pub id: FileId,
    /// Path the file was loaded from
    pub path: PathBuf,
    /// Full file contents
    pub content: String,
}

impl SourceFile {
    /// Display name used in diagnostics.
    pub fn name(&self) -> String {
        self.path.display().to_string()
    }
}

/// Owns every source file of a compilation, in command-line order.
///
/// # Examples
///
/// ```
/// use lsc_util::span::SourceMap;
///
/// let mut map = SourceMap::new();
/// let id = map.add_file("main.lsc", "print(\"hi\")\n".to_string());
/// assert_eq!(map.get(id).unwrap().content.len(), 12);
/// ```
#[derive(Clone, Debug, Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

impl SourceMap {
    /// Create an empty source map.
    pub fn new() -> Self {
        Self { files: Vec::new() }
    }

    /// Add a file, returning its id.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: String) -> FileId {
        let id = FileId(self.files.len());
        self.files.push(SourceFile {
            id,
            path: path.as_ref().to_path_buf(),
            content,
        });
        id
    }

    /// Look up a file by id.
    pub fn get(&self, id: FileId) -> Option<&SourceFile> {
        self.files.get(id.0)
    }

    /// Display name for a file id, `<unknown>` for dummy ids.
    pub fn name_of(&self, id: FileId) -> String {
        self.get(id)
            .map(|f| f.name())
            .unwrap_or_else(|| "<unknown>".to_string())
    }

    /// Number of loaded files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True when no file has been loaded.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Iterate files in load order.
    pub fn iter(&self) -> impl Iterator<Item = &SourceFile> {
        self.files.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get() {
        let mut map = SourceMap::new();
        let a = map.add_file("a.lsc", "x".to_string());
        let b = map.add_file("b.lsc", "y".to_string());
        assert_ne!(a, b);
        assert_eq!(map.get(a).unwrap().content, "x");
        assert_eq!(map.get(b).unwrap().content, "y");
    }

    #[test]
    fn test_ids_follow_load_order() {
        let mut map = SourceMap::new();
        let a = map.add_file("a.lsc", String::new());
        let b = map.add_file("b.lsc", String::new());
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
    }

    #[test]
    fn test_name_of_unknown() {
        let map = SourceMap::new();
        assert_eq!(map.name_of(FileId::DUMMY), "<unknown>");
    }
}
