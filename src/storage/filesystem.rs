//! Filesystem-backed document storage.
//!
//! The on-disk format is owned by the storage layer; the rest of the server
//! only sees the root pointer and a flat document namespace. Construction is
//! deliberately infallible: the root directory is created lazily so a
//! storage candidate built during a reload cannot disturb the running
//! backend.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Storage backend rooted at a directory on disk.
#[derive(Debug)]
pub struct FilesystemStorage {
    root: PathBuf,
}

impl FilesystemStorage {
    /// Create a backend for `root`. Nothing is touched on disk.
    pub fn new(root: impl Into<PathBuf>) -> FilesystemStorage {
        FilesystemStorage { root: root.into() }
    }

    /// Root of the document tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Make sure the root directory exists.
    pub fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    /// Absolute path of a named document.
    pub fn document_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Persist a document.
    pub fn write_document(&self, name: &str, content: &[u8]) -> io::Result<()> {
        self.ensure_root()?;
        fs::write(self.document_path(name), content)
    }

    /// Read a document back.
    pub fn read_document(&self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.document_path(name))
    }

    /// Names of all stored documents. An absent root is an empty tree.
    pub fn list_documents(&self) -> io::Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Ok(name) = entry.file_name().into_string() {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
