use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::{Configuration, IO_FILE_BUFFER_SIZE_DEFAULT, IO_FILE_BUFFER_SIZE_KEY};
use crate::error::{DfsError, Result};
use crate::fs::remote::namenode_address;
use crate::fs::util::{bytes_stream, copy_from_local, copy_to_local};
use crate::fs::{self, ByteStream, FileStatus, FileSystem};
use crate::path::DfsPath;

/// Exclusive owner of one open filesystem.
///
/// Every operation fails with [`DfsError::Closed`] once [`close`] has run.
/// Paths registered with [`delete_on_exit`] are removed recursively when the
/// handle is closed.
///
/// [`close`]: FileSystemHandle::close
/// [`delete_on_exit`]: FileSystemHandle::delete_on_exit
pub struct FileSystemHandle {
    fs: Option<Box<dyn FileSystem>>,
    uri: DfsPath,
    buffer_size: usize,
    delete_on_exit: BTreeSet<DfsPath>,
}

impl FileSystemHandle {
    /// Opens the filesystem named by `fs.defaultFS`.
    pub async fn get(conf: &Configuration) -> Result<Self> {
        let fs = fs::get(conf).await?;
        let buffer_size = conf.get_u64(IO_FILE_BUFFER_SIZE_KEY, IO_FILE_BUFFER_SIZE_DEFAULT)?;
        Self::new(fs, buffer_size as usize)
    }

    pub fn new(fs: Box<dyn FileSystem>, buffer_size: usize) -> Result<Self> {
        if buffer_size == 0 {
            return Err(DfsError::InvalidConfig(format!(
                "{} must be positive",
                IO_FILE_BUFFER_SIZE_KEY
            )));
        }
        let uri = DfsPath::new(&fs.uri())?;
        info!("Opened filesystem {}", uri);
        Ok(Self {
            fs: Some(fs),
            uri,
            buffer_size,
            delete_on_exit: BTreeSet::new(),
        })
    }

    pub fn uri(&self) -> &DfsPath {
        &self.uri
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn is_closed(&self) -> bool {
        self.fs.is_none()
    }

    fn fs(&self) -> Result<&dyn FileSystem> {
        self.fs.as_deref().ok_or(DfsError::Closed)
    }

    /// Strips the scheme from a qualified path after checking that it
    /// belongs to this filesystem.
    fn check_path(&self, path: &DfsPath) -> Result<DfsPath> {
        if let Some(scheme) = path.scheme() {
            if Some(scheme) != self.uri.scheme() || !self.same_authority(path.authority()) {
                return Err(DfsError::InvalidPath(format!(
                    "Wrong FS: {}, expected: {}",
                    path, self.uri
                )));
            }
        }
        Ok(path.unqualified())
    }

    // A qualified path without authority means this filesystem; a namenode
    // authority without port means the default port.
    fn same_authority(&self, authority: Option<&str>) -> bool {
        match (authority, self.uri.authority()) {
            (None, _) => true,
            (Some(given), Some(own)) if self.uri.scheme() == Some("dfs") => {
                namenode_address(given) == namenode_address(own)
            }
            (given, own) => given == own,
        }
    }

    /// `path` qualified with this filesystem's scheme and authority.
    pub fn qualify(&self, path: &DfsPath) -> DfsPath {
        path.qualified_by(&self.uri)
    }

    pub async fn list_status(&self, path: &DfsPath) -> Result<Vec<FileStatus>> {
        let fs = self.fs()?;
        fs.list_status(&self.check_path(path)?).await
    }

    pub async fn get_file_status(&self, path: &DfsPath) -> Result<FileStatus> {
        let fs = self.fs()?;
        fs.get_file_status(&self.check_path(path)?).await
    }

    pub async fn exists(&self, path: &DfsPath) -> Result<bool> {
        let fs = self.fs()?;
        fs.exists(&self.check_path(path)?).await
    }

    pub async fn mkdirs(&self, path: &DfsPath) -> Result<bool> {
        let fs = self.fs()?;
        fs.mkdirs(&self.check_path(path)?).await
    }

    pub async fn delete(&self, path: &DfsPath, recursive: bool) -> Result<bool> {
        let fs = self.fs()?;
        fs.delete(&self.check_path(path)?, recursive).await
    }

    pub async fn open(&self, path: &DfsPath) -> Result<ByteStream> {
        let fs = self.fs()?;
        fs.open(&self.check_path(path)?, self.buffer_size).await
    }

    pub async fn create(&self, path: &DfsPath, overwrite: bool, data: ByteStream) -> Result<u64> {
        let fs = self.fs()?;
        fs.create(&self.check_path(path)?, overwrite, data).await
    }

    /// Writes `content` to `path`, replacing an existing file.
    pub async fn write_bytes(&self, path: &DfsPath, content: impl Into<bytes::Bytes>) -> Result<u64> {
        self.create(path, true, bytes_stream(content)).await
    }

    pub async fn copy_from_local_file(&self, src: &Path, dst: &DfsPath) -> Result<u64> {
        let fs = self.fs()?;
        copy_from_local(fs, src, &self.check_path(dst)?, true, self.buffer_size).await
    }

    pub async fn copy_to_local_file(&self, src: &DfsPath, dst: &Path) -> Result<u64> {
        let fs = self.fs()?;
        copy_to_local(fs, &self.check_path(src)?, dst, self.buffer_size).await
    }

    /// Schedules `path` for recursive deletion when the handle is closed.
    /// Returns `false` without scheduling anything if the path does not exist.
    pub async fn delete_on_exit(&mut self, path: &DfsPath) -> Result<bool> {
        let path = self.check_path(path)?;
        if !self.fs()?.exists(&path).await? {
            return Ok(false);
        }
        debug!("Scheduled {} for deletion on close", path);
        self.delete_on_exit.insert(path);
        Ok(true)
    }

    pub fn cancel_delete_on_exit(&mut self, path: &DfsPath) -> bool {
        self.delete_on_exit.remove(&path.unqualified())
    }

    /// Paths currently scheduled for deletion on close.
    pub fn pending_deletes(&self) -> impl Iterator<Item = &DfsPath> {
        self.delete_on_exit.iter()
    }

    /// Deletes scheduled paths, then releases the filesystem. A failed
    /// scheduled delete is logged and does not stop the close.
    pub async fn close(&mut self) -> Result<()> {
        let fs = self.fs.take().ok_or(DfsError::Closed)?;
        for path in std::mem::take(&mut self.delete_on_exit) {
            match fs.delete(&path, true).await {
                Ok(true) => info!("Deleted {} on close", path),
                Ok(false) => debug!("{} was already gone on close", path),
                Err(err) => warn!("Failed to delete {} on close: {}", path, err),
            }
        }
        fs.close().await?;
        info!("Closed filesystem {}", self.uri);
        Ok(())
    }
}

impl Drop for FileSystemHandle {
    fn drop(&mut self) {
        if self.fs.is_some() && !self.delete_on_exit.is_empty() {
            warn!(
                "Filesystem {} dropped without close; {} scheduled deletes skipped",
                self.uri,
                self.delete_on_exit.len()
            );
        }
    }
}
