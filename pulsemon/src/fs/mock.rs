//! In-memory filesystem for exercising collectors without a live `/proc`.

use super::{FileSystem, FsCapacity};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[derive(Debug, Default)]
struct Inner {
    files: HashMap<PathBuf, String>,
    directories: HashSet<PathBuf>,
    owners: HashMap<PathBuf, u32>,
    capacities: HashMap<PathBuf, FsCapacity>,
}

/// Files, directories, owners and mount capacities held in memory.
///
/// Mutation goes through `&self` so a test can hand an `Arc<MockFs>` to a collector
/// and keep rewriting counters between samples.
#[derive(Debug, Default)]
pub struct MockFs {
    inner: RwLock<Inner>,
}

fn add_parents(dirs: &mut HashSet<PathBuf>, path: &Path) {
    let mut parent = path.parent();
    while let Some(p) = parent {
        if !p.as_os_str().is_empty() {
            dirs.insert(p.to_path_buf());
        }
        parent = p.parent();
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("not found: {}", path.display()))
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds or replaces a file; parent directories are created implicitly.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        let mut inner = self.write();
        add_parents(&mut inner.directories, &path);
        inner.files.insert(path, content.into());
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        let mut inner = self.write();
        add_parents(&mut inner.directories, &path);
        inner.directories.insert(path);
    }

    /// Removes a file or a whole directory subtree.
    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut inner = self.write();
        inner.files.retain(|p, _| !p.starts_with(path));
        inner.directories.retain(|p| !p.starts_with(path));
        inner.owners.retain(|p, _| !p.starts_with(path));
    }

    pub fn set_owner(&self, path: impl AsRef<Path>, uid: u32) {
        self.write().owners.insert(path.as_ref().to_path_buf(), uid);
    }

    pub fn set_capacity(&self, mountpoint: impl AsRef<Path>, total_bytes: u64, available_bytes: u64) {
        self.write().capacities.insert(
            mountpoint.as_ref().to_path_buf(),
            FsCapacity {
                total_bytes,
                available_bytes,
            },
        );
    }

    /// Adds `/proc/<pid>/{stat,statm,cmdline}` owned by `uid`.
    pub fn add_process(&self, pid: u32, stat: &str, statm: &str, cmdline: &str, uid: u32) {
        let base = PathBuf::from(format!("/proc/{pid}"));
        self.add_dir(&base);
        self.add_file(base.join("stat"), stat);
        self.add_file(base.join("statm"), statm);
        self.add_file(base.join("cmdline"), cmdline);
        self.set_owner(&base, uid);
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.read()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let inner = self.read();
        if !inner.directories.contains(path) {
            return Err(not_found(path));
        }
        let mut entries: HashSet<PathBuf> = HashSet::new();
        for p in inner.files.keys().chain(inner.directories.iter()) {
            if p.parent() == Some(path) && p != path {
                entries.insert(p.clone());
            }
        }
        Ok(entries.into_iter().collect())
    }

    fn owner_uid(&self, path: &Path) -> io::Result<u32> {
        let inner = self.read();
        if let Some(uid) = inner.owners.get(path) {
            return Ok(*uid);
        }
        if inner.files.contains_key(path) || inner.directories.contains(path) {
            return Ok(0);
        }
        Err(not_found(path))
    }

    fn capacity(&self, mountpoint: &Path) -> io::Result<FsCapacity> {
        self.read()
            .capacities
            .get(mountpoint)
            .copied()
            .ok_or_else(|| not_found(mountpoint))
    }
}
