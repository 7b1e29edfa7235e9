use std::net::SocketAddr;

use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::config::{Configuration, FS_DEFAULT_NAME_KEY};
use crate::namenode::NameNodeServer;

/// An in-process namenode gateway exporting a fresh temp directory.
pub(crate) struct TestNameNode {
    pub address: SocketAddr,
    pub root: TempDir,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestNameNode {
    pub fn conf(&self) -> Configuration {
        let mut conf = Configuration::new();
        conf.set(FS_DEFAULT_NAME_KEY, format!("dfs://{}", self.address));
        conf
    }
}

impl Drop for TestNameNode {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

pub(crate) async fn spawn_namenode() -> TestNameNode {
    let root = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let (shutdown, stopped) = oneshot::channel::<()>();

    let server = NameNodeServer::new(address, root.path());
    tokio::spawn(async move {
        let _ = server
            .run_with_listener(listener, async {
                let _ = stopped.await;
            })
            .await;
    });

    TestNameNode {
        address,
        root,
        shutdown: Some(shutdown),
    }
}
