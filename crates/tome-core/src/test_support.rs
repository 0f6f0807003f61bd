//! Shared fixtures for unit tests

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use crate::config::Config;
use crate::storage::{FsVault, Vault, VaultEntry};
use crate::store::RecordStore;

/// A temp vault plus a store over it
pub struct Fixture {
    pub dir: TempDir,
    pub vault: Arc<FsVault>,
    pub store: Arc<RecordStore>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let vault = Arc::new(FsVault::new(dir.path()));
        let store = Arc::new(RecordStore::new(vault.clone(), Config::default()));
        Self { dir, vault, store }
    }

    /// Write `count` chapter files `NNN Chapter N.md` into `book`
    pub fn write_chapters(&self, book: &Path, count: u32) {
        for n in 1..=count {
            let path = book.join(format!("{:03} Chapter {}.md", n, n));
            self.vault
                .write(&path, &format!("Text of chapter {}.\n", n))
                .unwrap();
        }
    }
}

/// Vault wrapper that fails writes or removals whose path matches a
/// configured suffix
pub struct FaultyVault {
    inner: FsVault,
    failing_suffixes: Mutex<Vec<String>>,
}

impl FaultyVault {
    pub fn new(root: &Path) -> Self {
        Self {
            inner: FsVault::new(root),
            failing_suffixes: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_writes_to(&self, suffix: &str) {
        self.failing_suffixes.lock().unwrap().push(suffix.to_string());
    }

    pub fn heal(&self) {
        self.failing_suffixes.lock().unwrap().clear();
    }

    fn should_fail(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.failing_suffixes
            .lock()
            .unwrap()
            .iter()
            .any(|suffix| path.ends_with(suffix.as_str()))
    }
}

impl Vault for FaultyVault {
    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn read(&self, path: &Path) -> io::Result<String> {
        self.inner.read(path)
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        if self.should_fail(path) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }
        self.inner.write(path, contents)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.inner.create_dir_all(path)
    }

    fn list(&self, path: &Path) -> io::Result<Vec<VaultEntry>> {
        self.inner.list(path)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        if self.should_fail(path) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected remove failure"));
        }
        self.inner.remove(path)
    }
}

pub fn book(name: &str) -> PathBuf {
    PathBuf::from("Library").join(name)
}
