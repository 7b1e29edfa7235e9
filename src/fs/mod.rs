//! Filesystem capability interface and its backends.
//!
//! Everything the client does goes through [`FileSystem`]; the backend is
//! picked from the scheme of `fs.defaultFS`:
//! - `file:///` the local disk
//! - `dfs://host:port` a namenode gateway over gRPC

pub mod handle;
pub mod local;
pub mod remote;
pub mod status;
pub mod util;

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use tracing::debug;

use crate::config::Configuration;
use crate::error::{DfsError, Result};
use crate::path::DfsPath;

pub use handle::FileSystemHandle;
pub use local::LocalFileSystem;
pub use remote::RemoteFileSystem;
pub use status::FileStatus;

/// File contents in transit, one chunk per item.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

#[tonic::async_trait]
pub trait FileSystem: Send + Sync {
    /// `scheme://authority/` of this filesystem.
    fn uri(&self) -> String;

    /// Entries of a directory sorted by name, or the status of a file.
    async fn list_status(&self, path: &DfsPath) -> Result<Vec<FileStatus>>;

    async fn get_file_status(&self, path: &DfsPath) -> Result<FileStatus>;

    async fn exists(&self, path: &DfsPath) -> Result<bool> {
        match self.get_file_status(path).await {
            Ok(_) => Ok(true),
            Err(DfsError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Creates a directory and any missing parents.
    async fn mkdirs(&self, path: &DfsPath) -> Result<bool>;

    /// Returns `false` when there was nothing to delete.
    async fn delete(&self, path: &DfsPath, recursive: bool) -> Result<bool>;

    async fn open(&self, path: &DfsPath, buffer_size: usize) -> Result<ByteStream>;

    /// Writes `data` to `path`, creating missing parents. The file only
    /// becomes visible once the stream has been consumed without error.
    async fn create(&self, path: &DfsPath, overwrite: bool, data: ByteStream) -> Result<u64>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Instantiates the backend named by `fs.defaultFS`.
pub async fn get(conf: &Configuration) -> Result<Box<dyn FileSystem>> {
    let default_fs = conf.default_fs();
    let uri = DfsPath::new(&default_fs)?;
    debug!("Resolving filesystem for {}", default_fs);
    match uri.scheme() {
        None | Some("file") => Ok(Box::new(LocalFileSystem::new())),
        Some("dfs") => {
            let authority = uri.authority().ok_or_else(|| {
                DfsError::InvalidConfig(format!("{} has no namenode address", default_fs))
            })?;
            Ok(Box::new(RemoteFileSystem::connect(authority, conf).await?))
        }
        Some(other) => Err(DfsError::UnsupportedScheme(other.to_string())),
    }
}
