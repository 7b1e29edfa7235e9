use std::path::Path;

use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};
use tracing::debug;

use crate::config::Configuration;
use crate::error::Result;
use crate::fs::FileSystemHandle;
use crate::path::DfsPath;

const SEPARATOR: &str = "====================================================";

/// Shell-style front end over a [`FileSystemHandle`].
///
/// Each operation forwards to the handle and reports on the output sink,
/// standard output unless built with [`DfsClient::with_output`].
pub struct DfsClient<W = Stdout> {
    handle: FileSystemHandle,
    out: W,
}

impl DfsClient<Stdout> {
    pub async fn new(conf: &Configuration) -> Result<Self> {
        Self::with_output(conf, tokio::io::stdout()).await
    }
}

impl<W: AsyncWrite + Unpin + Send> DfsClient<W> {
    pub async fn with_output(conf: &Configuration, out: W) -> Result<Self> {
        let handle = FileSystemHandle::get(conf).await?;
        Ok(Self::from_handle(handle, out))
    }

    pub fn from_handle(handle: FileSystemHandle, out: W) -> Self {
        Self { handle, out }
    }

    pub fn handle(&self) -> &FileSystemHandle {
        &self.handle
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    async fn println(&mut self, line: &str) -> Result<()> {
        self.out.write_all(line.as_bytes()).await?;
        self.out.write_all(b"\n").await?;
        self.out.flush().await?;
        Ok(())
    }

    /// `dfs ls /chris`; entries are printed fully qualified.
    pub async fn ls(&mut self, folder: &str) -> Result<()> {
        let entries = self.handle.list_status(&DfsPath::new(folder)?).await?;
        self.println(SEPARATOR).await?;
        for entry in entries {
            let line = format!(
                "name: {} folder: {} size: {} permission: {}",
                self.handle.qualify(&entry.path),
                entry.is_dir,
                entry.len,
                entry.permission_string()
            );
            self.println(&line).await?;
        }
        self.println(SEPARATOR).await
    }

    /// `dfs mkdir /chris/client`, a no-op when the path already exists.
    pub async fn mkdir(&mut self, folder: &str) -> Result<()> {
        let path = DfsPath::new(folder)?;
        if !self.handle.exists(&path).await? {
            self.handle.mkdirs(&path).await?;
            self.println(&format!("Created {}", folder)).await?;
        }
        Ok(())
    }

    /// `dfs rmr /chris/client`; the delete happens when the client is closed.
    pub async fn rmr(&mut self, folder: &str) -> Result<()> {
        let path = DfsPath::new(folder)?;
        if !self.handle.delete_on_exit(&path).await? {
            debug!("{} does not exist, nothing scheduled", path);
        }
        self.println(&format!("Delete the {}", folder)).await
    }

    /// `dfs put /home/chris/test /chris/`
    pub async fn copy_file(&mut self, local: impl AsRef<Path>, remote: &str) -> Result<()> {
        let local = local.as_ref();
        self.handle
            .copy_from_local_file(local, &DfsPath::new(remote)?)
            .await?;
        self.println(&format!("Copy from {} to {}", local.display(), remote))
            .await
    }

    /// `dfs cat /chris/test`
    pub async fn cat(&mut self, file: &str) -> Result<()> {
        let mut data = self.handle.open(&DfsPath::new(file)?).await?;
        while let Some(chunk) = data.next().await {
            self.out.write_all(&chunk?).await?;
        }
        self.out.flush().await?;
        Ok(())
    }

    /// `dfs get /tmp/core-site.xml /home/chris`
    pub async fn download(&mut self, remote: &str, local: impl AsRef<Path>) -> Result<()> {
        let local = local.as_ref();
        self.handle
            .copy_to_local_file(&DfsPath::new(remote)?, local)
            .await?;
        self.println(&format!("Download from {} to {}", remote, local.display()))
            .await
    }

    /// Writes `content` to `file`, replacing any existing file.
    pub async fn create_file(&mut self, file: &str, content: &str) -> Result<()> {
        self.handle
            .write_bytes(&DfsPath::new(file)?, content.to_string())
            .await?;
        Ok(())
    }

    pub async fn close(&mut self) -> Result<()> {
        self.handle.close().await?;
        self.out.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DfsError;
    use crate::test_utils::spawn_namenode;

    fn local_conf() -> Configuration {
        let mut conf = Configuration::new();
        conf.set("fs.defaultFS", "file:///");
        conf
    }

    fn output(client: &DfsClient<Vec<u8>>) -> String {
        String::from_utf8(client.output().clone()).unwrap()
    }

    fn entry_lines(out: &str) -> Vec<&str> {
        out.lines().filter(|line| line.starts_with("name: ")).collect()
    }

    // Runs the forwarder properties against whichever filesystem `conf`
    // selects; `base` is a scratch directory inside that filesystem.
    async fn exercise(conf: &Configuration, base: &str, scratch: &Path) {
        let mut client = DfsClient::with_output(conf, Vec::new()).await.unwrap();

        // mkdir is idempotent
        let dir = format!("{}/chris/client", base);
        client.mkdir(&dir).await.unwrap();
        client.mkdir(&dir).await.unwrap();
        assert_eq!(output(&client), format!("Created {}\n", dir));

        // empty directory lists no entries, N entries list N lines
        client.ls(&dir).await.unwrap();
        assert!(entry_lines(&output(&client)).is_empty());
        for name in ["a", "b", "c"] {
            client
                .create_file(&format!("{}/{}", dir, name), name)
                .await
                .unwrap();
        }
        client.out.clear();
        client.ls(&dir).await.unwrap();
        let out = output(&client);
        let lines = entry_lines(&out);
        assert_eq!(lines.len(), 3);
        let first = client.handle().qualify(&DfsPath::new(&format!("{}/a", dir)).unwrap());
        assert!(first.to_string().contains("://"));
        assert!(lines[0].starts_with(&format!("name: {} folder: false size: 1", first)));

        // create then cat emits exactly the content
        let text = format!("{}/client.txt", dir);
        client.create_file(&text, "ddddddddd").await.unwrap();
        client.out.clear();
        client.cat(&text).await.unwrap();
        assert_eq!(output(&client), "ddddddddd");

        // upload then download round-trips the bytes
        let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let local = scratch.join("core-site.xml");
        std::fs::write(&local, &payload).unwrap();
        let tmp = format!("{}/tmp/", base);
        client.mkdir(&tmp).await.unwrap();
        client.copy_file(&local, &tmp).await.unwrap();
        let back = scratch.join("back.xml");
        client
            .download(&format!("{}/tmp/core-site.xml", base), &back)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&back).unwrap(), payload);

        // rmr is deferred to close
        client.out.clear();
        client.rmr(&dir).await.unwrap();
        assert_eq!(output(&client), format!("Delete the {}\n", dir));
        assert!(client
            .handle()
            .exists(&DfsPath::new(&dir).unwrap())
            .await
            .unwrap());
        client.close().await.unwrap();

        // closed handle rejects everything
        assert!(matches!(
            client.ls(&format!("{}/", base)).await,
            Err(DfsError::Closed)
        ));
        assert!(matches!(client.cat(&text).await, Err(DfsError::Closed)));
        assert!(matches!(client.close().await, Err(DfsError::Closed)));

        let client = DfsClient::with_output(conf, Vec::new()).await.unwrap();
        assert!(!client
            .handle()
            .exists(&DfsPath::new(&dir).unwrap())
            .await
            .unwrap());
        assert!(client
            .handle()
            .exists(&DfsPath::new(&format!("{}/chris", base)).unwrap())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn forwards_to_local_filesystem() {
        let remote = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let base = remote.path().to_string_lossy().into_owned();
        exercise(&local_conf(), &base, scratch.path()).await;
    }

    #[tokio::test]
    async fn forwards_to_namenode() {
        let namenode = spawn_namenode().await;
        let scratch = tempfile::tempdir().unwrap();
        exercise(&namenode.conf(), "", scratch.path()).await;
        assert!(namenode.root.path().join("tmp/core-site.xml").is_file());
        assert!(!namenode.root.path().join("chris/client").exists());
    }

    #[tokio::test]
    async fn missing_paths_propagate() {
        let remote = tempfile::tempdir().unwrap();
        let missing = remote.path().join("nope").to_string_lossy().into_owned();
        let mut client = DfsClient::with_output(&local_conf(), Vec::new()).await.unwrap();

        assert!(matches!(client.ls(&missing).await, Err(DfsError::NotFound(_))));
        assert!(matches!(client.cat(&missing).await, Err(DfsError::NotFound(_))));
        client.rmr(&missing).await.unwrap();
        assert_eq!(client.handle().pending_deletes().count(), 0);
        client.close().await.unwrap();
    }
}
