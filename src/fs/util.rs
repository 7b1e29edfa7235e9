//! Copy helpers shared by every backend.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{stream, FutureExt, StreamExt};
use tokio::fs::{self, File};
use tracing::debug;

use crate::error::{DfsError, Result};
use crate::fs::local::{read_chunks, write_chunks};
use crate::fs::{ByteStream, FileSystem};
use crate::path::DfsPath;

/// A stream yielding `content` as a single chunk.
pub fn bytes_stream(content: impl Into<Bytes>) -> ByteStream {
    let content = content.into();
    Box::pin(stream::once(async move { Ok(content) }))
}

pub async fn read_to_end(mut data: ByteStream) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    while let Some(chunk) = data.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf)
}

fn local_not_found(path: &Path) -> impl Fn(std::io::Error) -> DfsError + '_ {
    move |err| match err.kind() {
        std::io::ErrorKind::NotFound => DfsError::NotFound(path.display().to_string()),
        _ => DfsError::Io(err),
    }
}

/// Copies a local file or directory tree into `fs`. An existing directory
/// at `dst` receives the source under its own name. Returns bytes copied.
pub async fn copy_from_local(
    dfs: &dyn FileSystem,
    src: &Path,
    dst: &DfsPath,
    overwrite: bool,
    buffer_size: usize,
) -> Result<u64> {
    let target = match dfs.get_file_status(dst).await {
        Ok(status) if status.is_dir => match src.file_name() {
            Some(name) => dst.join(&name.to_string_lossy()),
            None => dst.clone(),
        },
        Ok(_) | Err(DfsError::NotFound(_)) => dst.clone(),
        Err(err) => return Err(err),
    };
    copy_local_tree(dfs, src.to_path_buf(), target, overwrite, buffer_size).await
}

fn copy_local_tree(
    dfs: &dyn FileSystem,
    src: PathBuf,
    dst: DfsPath,
    overwrite: bool,
    buffer_size: usize,
) -> BoxFuture<'_, Result<u64>> {
    async move {
        let meta = fs::metadata(&src).await.map_err(local_not_found(&src))?;
        if !meta.is_dir() {
            let file = File::open(&src).await?;
            let copied = dfs
                .create(&dst, overwrite, read_chunks(file, buffer_size))
                .await?;
            debug!("Copied {} ({} bytes) to {}", src.display(), copied, dst);
            return Ok(copied);
        }

        dfs.mkdirs(&dst).await?;
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name());
        }
        names.sort();

        let mut copied = 0;
        for name in names {
            let child = dst.join(&name.to_string_lossy());
            copied += copy_local_tree(dfs, src.join(&name), child, overwrite, buffer_size).await?;
        }
        Ok(copied)
    }
    .boxed()
}

/// Copies a file or directory tree out of `fs` onto the local disk. An
/// existing local directory at `dst` receives the source under its own name.
pub async fn copy_to_local(
    dfs: &dyn FileSystem,
    src: &DfsPath,
    dst: &Path,
    buffer_size: usize,
) -> Result<u64> {
    let target = match fs::metadata(dst).await {
        Ok(meta) if meta.is_dir() && !src.is_root() => dst.join(src.name()),
        _ => dst.to_path_buf(),
    };
    copy_remote_tree(dfs, src.clone(), target, buffer_size).await
}

fn copy_remote_tree(
    dfs: &dyn FileSystem,
    src: DfsPath,
    dst: PathBuf,
    buffer_size: usize,
) -> BoxFuture<'_, Result<u64>> {
    async move {
        let status = dfs.get_file_status(&src).await?;
        if !status.is_dir {
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent).await?;
            }
            let data = dfs.open(&src, buffer_size).await?;
            let mut file = File::create(&dst).await?;
            let copied = write_chunks(&mut file, data).await?;
            debug!("Copied {} ({} bytes) to {}", src, copied, dst.display());
            return Ok(copied);
        }

        fs::create_dir_all(&dst).await?;
        let mut copied = 0;
        for entry in dfs.list_status(&src).await? {
            let name = entry.path.name().to_string();
            let child = entry.path.unqualified();
            copied += copy_remote_tree(dfs, child, dst.join(name), buffer_size).await?;
        }
        Ok(copied)
    }
    .boxed()
}
