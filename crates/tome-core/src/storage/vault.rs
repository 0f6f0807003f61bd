//! Vault file access
//!
//! The host application owns the files; every component in this crate
//! reaches disk only through the [`Vault`] trait. Paths are relative to the
//! vault root (a book is `Library/Night Harbor`, not an absolute path).
//!
//! [`FsVault`] is the filesystem implementation. Writes are atomic:
//! write to a temp file, sync, rename over the target.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// One entry returned by [`Vault::list`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultEntry {
    /// Vault-relative path of the entry
    pub path: PathBuf,
    /// Whether the entry is a folder
    pub is_dir: bool,
}

impl VaultEntry {
    /// File name of the entry as UTF-8 (lossy)
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Host file-store API
pub trait Vault: Send + Sync {
    /// Whether a file or folder exists at `path`
    fn exists(&self, path: &Path) -> bool;

    /// Read a text file
    fn read(&self, path: &Path) -> io::Result<String>;

    /// Create or replace a text file, creating parent folders as needed
    fn write(&self, path: &Path, contents: &str) -> io::Result<()>;

    /// Create a folder and all of its parents
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Immediate children of a folder, sorted by name
    fn list(&self, path: &Path) -> io::Result<Vec<VaultEntry>>;

    /// Remove a file
    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Filesystem-backed vault rooted at a directory
#[derive(Debug, Clone)]
pub struct FsVault {
    root: PathBuf,
}

impl FsVault {
    /// Create a vault rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The vault root on disk
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

impl Vault for FsVault {
    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).exists()
    }

    fn read(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(self.resolve(path))
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        atomic_write(&self.resolve(path), contents.as_bytes())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(self.resolve(path))
    }

    fn list(&self, path: &Path) -> io::Result<Vec<VaultEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.resolve(path))? {
            let entry = entry?;
            entries.push(VaultEntry {
                path: path.join(entry.file_name()),
                is_dir: entry.file_type()?.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(self.resolve(path))
    }
}

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
///
/// The target file is never left in a partially-written state.
fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut temp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;

    fs::rename(&temp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let vault = FsVault::new(temp_dir.path());
        let path = Path::new("a/b/c/file.md");

        vault.write(path, "test data").unwrap();

        assert!(vault.exists(path));
        assert_eq!(vault.read(path).unwrap(), "test data");
    }

    #[test]
    fn test_write_leaves_no_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let vault = FsVault::new(temp_dir.path());

        vault.write(Path::new("book/001.md"), "one").unwrap();
        vault.write(Path::new("book/001.md"), "two").unwrap();

        let names: Vec<String> = vault
            .list(Path::new("book"))
            .unwrap()
            .iter()
            .map(|e| e.name())
            .collect();
        assert_eq!(names, vec!["001.md"]);
        assert_eq!(vault.read(Path::new("book/001.md")).unwrap(), "two");
    }

    #[test]
    fn test_list_is_sorted_and_relative() {
        let temp_dir = TempDir::new().unwrap();
        let vault = FsVault::new(temp_dir.path());

        vault.write(Path::new("lib/b.md"), "").unwrap();
        vault.write(Path::new("lib/a.md"), "").unwrap();
        vault.create_dir_all(Path::new("lib/sub")).unwrap();

        let entries = vault.list(Path::new("lib")).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].path, PathBuf::from("lib/a.md"));
        assert!(!entries[0].is_dir);
        assert_eq!(entries[2].path, PathBuf::from("lib/sub"));
        assert!(entries[2].is_dir);
    }

    #[test]
    fn test_read_missing_file_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let vault = FsVault::new(temp_dir.path());

        let err = vault.read(Path::new("missing.md")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_remove() {
        let temp_dir = TempDir::new().unwrap();
        let vault = FsVault::new(temp_dir.path());

        vault.write(Path::new("x.json"), "{}").unwrap();
        vault.remove(Path::new("x.json")).unwrap();
        assert!(!vault.exists(Path::new("x.json")));
    }
}
