//! Filesystem access behind a trait so collectors run against `/proc` or an in-memory fixture.

mod mock;

pub use mock::MockFs;

use crate::error::CollectError;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Raw capacity of a mounted filesystem, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsCapacity {
    pub total_bytes: u64,
    /// Space available to unprivileged users.
    pub available_bytes: u64,
}

/// Everything the collectors need from the host: file reads, directory listings,
/// ownership of a path, and filesystem capacity.
///
/// Implementations are shared across blocking worker threads, hence `Send + Sync`.
pub trait FileSystem: Send + Sync {
    /// Whole file as text. Bytes that are not valid UTF-8 (argv, mount paths) are replaced,
    /// never an error.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Paths of the direct children of `path`.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Numeric UID owning `path`.
    fn owner_uid(&self, path: &Path) -> io::Result<u32>;

    fn capacity(&self, mountpoint: &Path) -> io::Result<FsCapacity>;
}

/// The host's real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let bytes = std::fs::read(path)?;
        Ok(match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        // Entries can vanish mid-listing under /proc; skip them rather than fail the listing.
        Ok(std::fs::read_dir(path)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .collect())
    }

    fn owner_uid(&self, path: &Path) -> io::Result<u32> {
        use std::os::unix::fs::MetadataExt;
        Ok(std::fs::metadata(path)?.uid())
    }

    fn capacity(&self, mountpoint: &Path) -> io::Result<FsCapacity> {
        use std::os::unix::ffi::OsStrExt;

        let c_path = std::ffi::CString::new(mountpoint.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
        // SAFETY: c_path is NUL-terminated and st is a valid, writable statvfs.
        let ret = unsafe { libc::statvfs(c_path.as_ptr(), &mut st) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        let block = st.f_frsize as u64;
        Ok(FsCapacity {
            total_bytes: (st.f_blocks as u64).saturating_mul(block),
            available_bytes: (st.f_bavail as u64).saturating_mul(block),
        })
    }
}

/// Reads `path` on the blocking pool, so collectors joined on one task still overlap
/// their `/proc` reads.
pub(crate) async fn read_file<F: FileSystem + 'static>(
    fs: &Arc<F>,
    path: PathBuf,
) -> Result<String, CollectError> {
    let fs = Arc::clone(fs);
    let (res, path) = tokio::task::spawn_blocking(move || (fs.read_to_string(&path), path)).await?;
    res.map_err(|e| CollectError::io(path, e))
}
