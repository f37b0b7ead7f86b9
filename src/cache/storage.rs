//! Durable byte storage beneath the cache store
//!
//! Backends only deal in opaque bytes per key and must replace a key's value
//! atomically: a reader sees either the old bytes or the new ones.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use directories::ProjectDirs;
use tempfile::NamedTempFile;

/// Key-value persistence, atomic at single-key granularity
pub trait Storage: Send + Sync {
    /// Reads the bytes stored under `key`, `Ok(None)` if absent
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// Replaces the bytes stored under `key`
    fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()>;

    /// Removes `key`; removing an absent key is not an error
    fn remove(&self, key: &str) -> io::Result<()>;
}

/// Stores each key as a JSON file in a directory
///
/// Uses `~/.cache/playcount/` on Linux by default. Writes go to a uniquely
/// named temporary file in the same directory which is then renamed over the
/// target, so a crash mid-write never leaves a truncated entry behind and two
/// processes writing the same key never share a temp file.
#[derive(Debug, Clone)]
pub struct FileStorage {
    /// Directory where cache files are stored
    dir: PathBuf,
}

impl FileStorage {
    /// Creates a FileStorage in the XDG-compliant cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "playcount")?;
        Some(Self {
            dir: project_dirs.cache_dir().to_path_buf(),
        })
    }

    /// Creates a FileStorage rooted at a custom directory
    pub fn with_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Directory holding the cache files
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl Storage for FileStorage {
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let target = self.path(key);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| e.error)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Process-local storage, nothing survives a restart
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory storage lock poisoned"))
    }
}

impl Storage for MemoryStorage {
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        self.lock()?.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}
