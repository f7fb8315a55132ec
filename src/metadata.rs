//! File metadata snapshots.
//!
//! The cache never calls into this module. It exists for callers that key
//! cached artifacts by path and want to drop them when the file changes:
//! compare [`FileStat::fingerprint`] values and `erase` on mismatch.

use crate::error::{Error, Result};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::SystemTime;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileStat {
    pub file_type: fs::FileType,
    pub size: u64,
    pub modified: SystemTime,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub ino: u64,
    pub dev: u64,
}

impl FileStat {
    fn from_metadata(path: &Path, meta: &fs::Metadata) -> Result<Self> {
        let modified = meta.modified().map_err(|source| Error::Stat {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            file_type: meta.file_type(),
            size: meta.size(),
            modified,
            mode: meta.mode(),
            nlink: meta.nlink(),
            uid: meta.uid(),
            gid: meta.gid(),
            ino: meta.ino(),
            dev: meta.dev(),
        })
    }

    pub fn is_dir(&self) -> bool {
        self.file_type.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.file_type.is_file()
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type.is_symlink()
    }

    /// Permission bits only, e.g. `0o644`.
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    /// Size and modification time; a change in either marks a cached
    /// artifact derived from this file as stale.
    pub fn fingerprint(&self) -> (u64, SystemTime) {
        (self.size, self.modified)
    }

    /// Human-readable size in binary units, e.g. `1.50 KiB`.
    pub fn display_size(&self) -> String {
        humansize::format_size(self.size, humansize::BINARY)
    }
}

/// Metadata for `path`, following symlinks.
pub fn stat(path: impl AsRef<Path>) -> Result<FileStat> {
    let path = path.as_ref();
    let meta = fs::metadata(path).map_err(|source| Error::Stat {
        path: path.to_path_buf(),
        source,
    })?;
    let stat = FileStat::from_metadata(path, &meta)?;
    tracing::trace!(path = %path.display(), size = %stat.display_size(), "stat");
    Ok(stat)
}

/// Metadata for `path` itself; a symlink is not followed.
pub fn lstat(path: impl AsRef<Path>) -> Result<FileStat> {
    let path = path.as_ref();
    let meta = fs::symlink_metadata(path).map_err(|source| Error::Stat {
        path: path.to_path_buf(),
        source,
    })?;
    FileStat::from_metadata(path, &meta)
}
