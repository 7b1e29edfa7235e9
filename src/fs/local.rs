use std::io;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use futures::{stream, StreamExt};
use rand::Rng;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::{DfsError, Result};
use crate::fs::{ByteStream, FileStatus, FileSystem};
use crate::path::DfsPath;

/// Filesystem backed by a directory on the local disk, `/` by default.
#[derive(Clone, Debug)]
pub struct LocalFileSystem {
    root: PathBuf,
}

impl Default for LocalFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFileSystem {
    pub fn new() -> Self {
        Self::with_root("/")
    }

    /// Serves the namespace out of `root`; `/` in the namespace maps to it.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn to_local(&self, path: &DfsPath) -> PathBuf {
        self.root.join(path.relative())
    }

    async fn metadata(&self, path: &DfsPath) -> Result<std::fs::Metadata> {
        fs::metadata(self.to_local(path))
            .await
            .map_err(|err| map_io_error(err, path))
    }
}

pub(crate) fn map_io_error(err: io::Error, path: &DfsPath) -> DfsError {
    match err.kind() {
        io::ErrorKind::NotFound => DfsError::NotFound(path.to_string()),
        io::ErrorKind::AlreadyExists => DfsError::AlreadyExists(path.to_string()),
        _ => DfsError::Io(err),
    }
}

fn staging_name(name: &str, nonce: u64) -> String {
    format!(".{}.{:016x}.tmp", name, nonce)
}

// In-flight or abandoned writes, hidden from listings.
fn is_staging_name(name: &str) -> bool {
    let Some(stem) = name
        .strip_prefix('.')
        .and_then(|rest| rest.strip_suffix(".tmp"))
    else {
        return false;
    };
    match stem.rsplit_once('.') {
        Some((target, nonce)) => {
            !target.is_empty() && nonce.len() == 16 && nonce.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}

/// Streams a file in chunks of at most `buffer_size` bytes.
pub(crate) fn read_chunks(file: File, buffer_size: usize) -> ByteStream {
    let buffer_size = buffer_size.max(1);
    Box::pin(stream::try_unfold(file, move |file| {
        next_chunk(file, buffer_size)
    }))
}

async fn next_chunk(mut file: File, buffer_size: usize) -> Result<Option<(Bytes, File)>> {
    let mut buf = BytesMut::zeroed(buffer_size);
    let n = file.read(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    buf.truncate(n);
    Ok(Some((buf.freeze(), file)))
}

pub(crate) async fn write_chunks(file: &mut File, mut data: ByteStream) -> Result<u64> {
    let mut written = 0u64;
    while let Some(chunk) = data.next().await {
        let chunk: Bytes = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

#[tonic::async_trait]
impl FileSystem for LocalFileSystem {
    fn uri(&self) -> String {
        "file:///".to_string()
    }

    async fn list_status(&self, path: &DfsPath) -> Result<Vec<FileStatus>> {
        let meta = self.metadata(path).await?;
        if !meta.is_dir() {
            return Ok(vec![FileStatus::from_metadata(path.clone(), &meta)]);
        }

        let mut entries = fs::read_dir(self.to_local(path))
            .await
            .map_err(|err| map_io_error(err, path))?;
        let mut statuses = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_staging_name(&name) {
                continue;
            }
            let meta = match fs::metadata(entry.path()).await {
                Ok(meta) => meta,
                // dangling symlink
                Err(_) => entry.metadata().await?,
            };
            statuses.push(FileStatus::from_metadata(path.join(&name), &meta));
        }
        statuses.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(statuses)
    }

    async fn get_file_status(&self, path: &DfsPath) -> Result<FileStatus> {
        let meta = self.metadata(path).await?;
        Ok(FileStatus::from_metadata(path.clone(), &meta))
    }

    async fn mkdirs(&self, path: &DfsPath) -> Result<bool> {
        match self.metadata(path).await {
            Ok(meta) if meta.is_dir() => return Ok(true),
            Ok(_) => return Err(DfsError::AlreadyExists(path.to_string())),
            Err(DfsError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }
        fs::create_dir_all(self.to_local(path))
            .await
            .map_err(|err| map_io_error(err, path))?;
        debug!("Created directory {}", path);
        Ok(true)
    }

    async fn delete(&self, path: &DfsPath, recursive: bool) -> Result<bool> {
        if path.is_root() {
            warn!("Refusing to delete the root of {}", self.root.display());
            return Ok(false);
        }
        let meta = match self.metadata(path).await {
            Ok(meta) => meta,
            Err(DfsError::NotFound(_)) => return Ok(false),
            Err(err) => return Err(err),
        };

        let local = self.to_local(path);
        if !meta.is_dir() {
            fs::remove_file(&local).await?;
        } else if recursive {
            fs::remove_dir_all(&local).await?;
        } else {
            let mut entries = fs::read_dir(&local).await?;
            if entries.next_entry().await?.is_some() {
                return Err(DfsError::DirectoryNotEmpty(path.to_string()));
            }
            fs::remove_dir(&local).await?;
        }
        debug!("Deleted {}", path);
        Ok(true)
    }

    async fn open(&self, path: &DfsPath, buffer_size: usize) -> Result<ByteStream> {
        let meta = self.metadata(path).await?;
        if meta.is_dir() {
            return Err(DfsError::IsDirectory(path.to_string()));
        }
        let file = File::open(self.to_local(path))
            .await
            .map_err(|err| map_io_error(err, path))?;
        Ok(read_chunks(file, buffer_size))
    }

    async fn create(&self, path: &DfsPath, overwrite: bool, data: ByteStream) -> Result<u64> {
        let parent = path.parent().unwrap_or_else(DfsPath::root);
        match self.metadata(&parent).await {
            Ok(meta) if !meta.is_dir() => {
                return Err(DfsError::NotDirectory(parent.to_string()));
            }
            Ok(_) => {}
            Err(DfsError::NotFound(_)) => {
                fs::create_dir_all(self.to_local(&parent)).await?;
            }
            Err(err) => return Err(err),
        }
        match self.metadata(path).await {
            Ok(meta) if meta.is_dir() => return Err(DfsError::IsDirectory(path.to_string())),
            Ok(_) if !overwrite => return Err(DfsError::AlreadyExists(path.to_string())),
            Ok(_) | Err(DfsError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }

        // stage beside the target so the rename stays on one filesystem
        let target = self.to_local(path);
        let staging = self
            .to_local(&parent)
            .join(staging_name(path.name(), rand::thread_rng().gen()));
        let mut file = File::create(&staging).await?;
        let written = match write_chunks(&mut file, data).await {
            Ok(written) => written,
            Err(err) => {
                drop(file);
                if let Err(cleanup) = fs::remove_file(&staging).await {
                    warn!("Failed to remove {}: {}", staging.display(), cleanup);
                }
                return Err(err);
            }
        };
        file.sync_all().await?;
        drop(file);
        if overwrite {
            fs::rename(&staging, &target).await?;
        } else {
            // link fails on an existing target, unlike rename
            let linked = fs::hard_link(&staging, &target).await;
            if let Err(cleanup) = fs::remove_file(&staging).await {
                warn!("Failed to remove {}: {}", staging.display(), cleanup);
            }
            linked.map_err(|err| map_io_error(err, path))?;
        }
        debug!("Wrote {} bytes to {}", written, path);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::util::{bytes_stream, read_to_end};

    fn path(raw: &str) -> DfsPath {
        DfsPath::new(raw).unwrap()
    }

    #[tokio::test]
    async fn create_open_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::with_root(dir.path());

        let written = fs
            .create(&path("/a/b/file.txt"), false, bytes_stream("hello world"))
            .await
            .unwrap();
        assert_eq!(written, 11);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a/b/file.txt")).unwrap(),
            "hello world"
        );

        let data = read_to_end(fs.open(&path("/a/b/file.txt"), 4).await.unwrap())
            .await
            .unwrap();
        assert_eq!(data, b"hello world");

        let listing = fs.list_status(&path("/a/b")).await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].path.as_str(), "/a/b/file.txt");
        assert_eq!(listing[0].len, 11);
        assert!(!listing[0].is_dir);

        let root = fs.list_status(&DfsPath::root()).await.unwrap();
        assert_eq!(root.len(), 1);
        assert!(root[0].is_dir);
        assert_eq!(root[0].len, 0);

        // no staging files left behind
        assert_eq!(std::fs::read_dir(dir.path().join("a/b")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn create_respects_overwrite_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::with_root(dir.path());
        let file = path("/f");

        fs.create(&file, false, bytes_stream("one")).await.unwrap();
        assert!(matches!(
            fs.create(&file, false, bytes_stream("two")).await,
            Err(DfsError::AlreadyExists(_))
        ));
        fs.create(&file, true, bytes_stream("two")).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("f")).unwrap(), b"two");

        fs.mkdirs(&path("/d")).await.unwrap();
        assert!(matches!(
            fs.create(&path("/d"), true, bytes_stream("x")).await,
            Err(DfsError::IsDirectory(_))
        ));
        assert!(matches!(
            fs.create(&path("/f/child"), true, bytes_stream("x")).await,
            Err(DfsError::NotDirectory(_))
        ));
        assert!(matches!(
            fs.open(&path("/d"), 16).await,
            Err(DfsError::IsDirectory(_))
        ));
    }

    #[tokio::test]
    async fn failed_stream_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::with_root(dir.path());
        let broken: ByteStream = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(DfsError::Aborted("source went away".into())),
        ]));

        assert!(matches!(
            fs.create(&path("/broken"), true, broken).await,
            Err(DfsError::Aborted(_))
        ));
        assert!(!fs.exists(&path("/broken")).await.unwrap());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn concurrent_exclusive_creates_keep_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::with_root(dir.path());
        let file = path("/race");

        let (first, second) = tokio::join!(
            fs.create(&file, false, bytes_stream("first")),
            fs.create(&file, false, bytes_stream("second")),
        );
        let content = std::fs::read_to_string(dir.path().join("race")).unwrap();
        match (first, second) {
            (Ok(5), Err(DfsError::AlreadyExists(_))) => assert_eq!(content, "first"),
            (Err(DfsError::AlreadyExists(_)), Ok(6)) => assert_eq!(content, "second"),
            other => panic!("expected exactly one winner, got {:?}", other),
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn listings_hide_staging_files() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::with_root(dir.path());
        fs.create(&path("/kept"), false, bytes_stream("1")).await.unwrap();
        std::fs::write(dir.path().join(staging_name("kept", 0xdead_beef)), b"partial").unwrap();
        std::fs::write(dir.path().join(".hidden.tmp"), b"user file").unwrap();

        let names: Vec<_> = fs
            .list_status(&DfsPath::root())
            .await
            .unwrap()
            .into_iter()
            .map(|status| status.path.name().to_string())
            .collect();
        assert_eq!(names, [".hidden.tmp", "kept"]);
        assert!(is_staging_name(".a.0123456789abcdef.tmp"));
        assert!(!is_staging_name(".a.tmp"));
        assert!(!is_staging_name("a.0123456789abcdef.tmp"));
    }

    #[tokio::test]
    async fn mkdirs_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::with_root(dir.path());

        assert!(fs.mkdirs(&path("/x/y/z")).await.unwrap());
        assert!(fs.mkdirs(&path("/x/y/z")).await.unwrap());
        fs.create(&path("/x/file"), false, bytes_stream("1")).await.unwrap();
        assert!(matches!(
            fs.mkdirs(&path("/x/file")).await,
            Err(DfsError::AlreadyExists(_))
        ));

        assert!(matches!(
            fs.delete(&path("/x"), false).await,
            Err(DfsError::DirectoryNotEmpty(_))
        ));
        assert!(fs.delete(&path("/x/y/z"), false).await.unwrap());
        assert!(fs.delete(&path("/x"), true).await.unwrap());
        assert!(!fs.delete(&path("/x"), true).await.unwrap());
        assert!(!fs.delete(&DfsPath::root(), true).await.unwrap());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::with_root(dir.path());
        let missing = path("/nope");

        assert!(!fs.exists(&missing).await.unwrap());
        assert!(matches!(
            fs.list_status(&missing).await,
            Err(DfsError::NotFound(_))
        ));
        assert!(matches!(
            fs.open(&missing, 16).await,
            Err(DfsError::NotFound(_))
        ));
    }
}
