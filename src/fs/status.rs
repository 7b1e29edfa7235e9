use std::fs::Metadata;
use std::time::UNIX_EPOCH;

use crate::error::{DfsError, Result};
use crate::path::DfsPath;
use crate::proto::FileStatusProto;

/// Metadata of one file or directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileStatus {
    pub path: DfsPath,
    pub is_dir: bool,
    /// Length in bytes, always 0 for directories.
    pub len: u64,
    /// Milliseconds since the unix epoch.
    pub modification_time: u64,
    /// Unix permission bits.
    pub permission: u32,
}

impl FileStatus {
    pub fn from_metadata(path: DfsPath, meta: &Metadata) -> Self {
        let modification_time = meta
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        Self {
            path,
            is_dir: meta.is_dir(),
            len: if meta.is_dir() { 0 } else { meta.len() },
            modification_time,
            permission: permission_bits(meta),
        }
    }

    /// `rwxr-xr-x` style rendering of the permission bits.
    pub fn permission_string(&self) -> String {
        const FLAGS: [char; 3] = ['r', 'w', 'x'];
        (0..9)
            .map(|bit| {
                if self.permission & (0o400 >> bit) != 0 {
                    FLAGS[bit % 3]
                } else {
                    '-'
                }
            })
            .collect()
    }
}

#[cfg(unix)]
fn permission_bits(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &Metadata) -> u32 {
    match (meta.is_dir(), meta.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}

impl From<FileStatus> for FileStatusProto {
    fn from(status: FileStatus) -> Self {
        FileStatusProto {
            path: status.path.to_string(),
            is_dir: status.is_dir,
            length: status.len,
            modification_time: status.modification_time,
            permission: status.permission,
        }
    }
}

impl TryFrom<FileStatusProto> for FileStatus {
    type Error = DfsError;

    fn try_from(proto: FileStatusProto) -> Result<Self> {
        Ok(FileStatus {
            path: DfsPath::new(&proto.path)?,
            is_dir: proto.is_dir,
            len: proto.length,
            modification_time: proto.modification_time,
            permission: proto.permission,
        })
    }
}
