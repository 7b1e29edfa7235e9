use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures::future::Either;
use futures::{stream, Future, StreamExt};
use tokio::sync::mpsc;
use tokio::time;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Channel, Endpoint};
use tonic::{Response, Status, Streaming};
use tracing::{debug, info};

use crate::config::{
    Configuration, DFS_CLIENT_SOCKET_TIMEOUT_DEFAULT, DFS_CLIENT_SOCKET_TIMEOUT_KEY,
    IPC_CLIENT_CONNECT_TIMEOUT_DEFAULT, IPC_CLIENT_CONNECT_TIMEOUT_KEY,
};
use crate::error::{DfsError, Result};
use crate::fs::{ByteStream, FileStatus, FileSystem};
use crate::path::DfsPath;
use crate::proto::namespace_client::NamespaceClient;
use crate::proto::write_request::Payload;
use crate::proto::{
    DeleteRequest, PathRequest, ReadChunk, ReadRequest, WriteHeader, WriteRequest, WriteTrailer,
};

pub const DEFAULT_NAMENODE_PORT: u16 = 8020;

// chunks buffered between the local reader and the upload stream
const WRITE_QUEUE_DEPTH: usize = 4;

/// Largest data payload per message, well under tonic's 4 MiB decode limit.
pub const MAX_CHUNK_SIZE: usize = 1 << 20;

/// `host[:port]` with [`DEFAULT_NAMENODE_PORT`] filled in when no port is
/// given. Bracketed IPv6 hosts are understood.
pub fn namenode_address(authority: &str) -> String {
    let host_end = authority.rfind(']').map_or(0, |idx| idx + 1);
    if authority[host_end..].contains(':') {
        authority.to_string()
    } else {
        format!("{}:{}", authority, DEFAULT_NAMENODE_PORT)
    }
}

/// Filesystem served by a namenode gateway over gRPC.
///
/// `dfs.client.socket-timeout` bounds how long the connection may stay
/// silent: a unary reply, the gap between two read chunks, a stalled
/// upload, or the commit after the last upload chunk. A transfer that keeps
/// moving may take as long as it needs.
#[derive(Clone, Debug)]
pub struct RemoteFileSystem {
    address: String,
    client: NamespaceClient<Channel>,
    idle_timeout: Duration,
}

impl RemoteFileSystem {
    /// Connects to `host[:port]`.
    pub async fn connect(authority: &str, conf: &Configuration) -> Result<Self> {
        let address = namenode_address(authority);
        let connect_timeout =
            conf.get_u64(IPC_CLIENT_CONNECT_TIMEOUT_KEY, IPC_CLIENT_CONNECT_TIMEOUT_DEFAULT)?;
        let idle_timeout =
            conf.get_u64(DFS_CLIENT_SOCKET_TIMEOUT_KEY, DFS_CLIENT_SOCKET_TIMEOUT_DEFAULT)?;

        let endpoint = Endpoint::from_shared(format!("http://{}", address))
            .map_err(|err| DfsError::InvalidConfig(format!("bad namenode address: {}", err)))?
            .connect_timeout(Duration::from_millis(connect_timeout));
        let channel = endpoint.connect().await?;
        info!("Connected to namenode at {}", address);

        Ok(Self {
            address,
            client: NamespaceClient::new(channel),
            idle_timeout: Duration::from_millis(idle_timeout),
        })
    }

    fn request(path: &DfsPath) -> PathRequest {
        PathRequest {
            path: path.as_str().to_string(),
        }
    }

    fn timed_out(&self, waiting_for: &str) -> DfsError {
        DfsError::TimedOut(format!(
            "no {} from namenode {} within {:?}",
            waiting_for, self.address, self.idle_timeout
        ))
    }

    async fn reply<T>(
        &self,
        call: impl Future<Output = std::result::Result<Response<T>, Status>>,
    ) -> Result<T> {
        match time::timeout(self.idle_timeout, call).await {
            Ok(response) => Ok(response?.into_inner()),
            Err(_) => Err(self.timed_out("reply")),
        }
    }
}

fn read_stream(chunks: Streaming<ReadChunk>, idle: Duration) -> ByteStream {
    Box::pin(stream::try_unfold(chunks, move |chunks| {
        next_read_chunk(chunks, idle)
    }))
}

async fn next_read_chunk(
    mut chunks: Streaming<ReadChunk>,
    idle: Duration,
) -> Result<Option<(Bytes, Streaming<ReadChunk>)>> {
    match time::timeout(idle, chunks.message()).await {
        Ok(Ok(Some(chunk))) => Ok(Some((Bytes::from(chunk.data), chunks))),
        Ok(Ok(None)) => Ok(None),
        Ok(Err(status)) => Err(status.into()),
        Err(_) => Err(DfsError::TimedOut(format!(
            "no data from namenode within {:?}",
            idle
        ))),
    }
}

// Ok(false) once the namenode has stopped listening.
async fn send_within(
    tx: &mpsc::Sender<WriteRequest>,
    message: WriteRequest,
    idle: Duration,
) -> Result<bool> {
    match time::timeout(idle, tx.send(message)).await {
        Ok(sent) => Ok(sent.is_ok()),
        Err(_) => Err(DfsError::TimedOut(format!(
            "namenode accepted no data within {:?}",
            idle
        ))),
    }
}

// The trailer is only sent once the source is exhausted, so a failing
// source ends the stream early and the namenode discards the write.
async fn pump_upload(
    tx: mpsc::Sender<WriteRequest>,
    mut data: ByteStream,
    idle: Duration,
) -> Result<u64> {
    let mut length = 0u64;
    while let Some(chunk) = data.next().await {
        let chunk = chunk?;
        for piece in chunk.chunks(MAX_CHUNK_SIZE) {
            length += piece.len() as u64;
            let message = WriteRequest {
                payload: Some(Payload::Data(piece.to_vec())),
            };
            if !send_within(&tx, message, idle).await? {
                return Ok(length);
            }
        }
    }
    let trailer = WriteRequest {
        payload: Some(Payload::Trailer(WriteTrailer { length })),
    };
    send_within(&tx, trailer, idle).await?;
    Ok(length)
}

#[tonic::async_trait]
impl FileSystem for RemoteFileSystem {
    fn uri(&self) -> String {
        format!("dfs://{}/", self.address)
    }

    async fn list_status(&self, path: &DfsPath) -> Result<Vec<FileStatus>> {
        let mut client = self.client.clone();
        let response = self.reply(client.list_status(Self::request(path))).await?;
        response
            .entries
            .into_iter()
            .map(FileStatus::try_from)
            .collect()
    }

    async fn get_file_status(&self, path: &DfsPath) -> Result<FileStatus> {
        let mut client = self.client.clone();
        let response = self.reply(client.get_file_info(Self::request(path))).await?;
        match response.status {
            Some(status) => FileStatus::try_from(status),
            None => Err(DfsError::NotFound(path.to_string())),
        }
    }

    async fn mkdirs(&self, path: &DfsPath) -> Result<bool> {
        let mut client = self.client.clone();
        let reply = self.reply(client.mkdirs(Self::request(path))).await?;
        debug!("Mkdirs {}: {}", path, reply.message);
        Ok(reply.is_success)
    }

    async fn delete(&self, path: &DfsPath, recursive: bool) -> Result<bool> {
        let mut client = self.client.clone();
        let request = DeleteRequest {
            path: path.as_str().to_string(),
            recursive,
        };
        let reply = self.reply(client.delete(request)).await?;
        debug!("Delete {}: {}", path, reply.message);
        Ok(reply.is_success)
    }

    async fn open(&self, path: &DfsPath, buffer_size: usize) -> Result<ByteStream> {
        let mut client = self.client.clone();
        let request = ReadRequest {
            path: path.as_str().to_string(),
            buffer_size: buffer_size.min(MAX_CHUNK_SIZE) as u32,
        };
        let chunks = self.reply(client.read(request)).await?;
        Ok(read_stream(chunks, self.idle_timeout))
    }

    async fn create(&self, path: &DfsPath, overwrite: bool, data: ByteStream) -> Result<u64> {
        let mut client = self.client.clone();
        let (tx, rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        let header = WriteRequest {
            payload: Some(Payload::Header(WriteHeader {
                path: path.as_str().to_string(),
                overwrite,
            })),
        };
        // cannot fail, the receiver is still held here
        let _ = tx.send(header).await;

        let mut pump = tokio::spawn(pump_upload(tx, data, self.idle_timeout));
        let call = client.write(ReceiverStream::new(rx));
        tokio::pin!(call);

        let finished = tokio::select! {
            biased;
            joined = &mut pump => Either::Left(joined),
            response = &mut call => Either::Right(response),
        };
        let pumped = match finished {
            Either::Left(joined) => {
                joined.map_err(|err| DfsError::Io(io::Error::new(io::ErrorKind::Other, err)))?
            }
            Either::Right(response) => {
                // the namenode answered before the upload finished
                pump.abort();
                return Ok(response?.into_inner().bytes_written);
            }
        };

        // the namenode settles the write once the stream has ended
        let response = time::timeout(self.idle_timeout, &mut call).await;
        pumped?;
        let written = match response {
            Ok(response) => response?.into_inner().bytes_written,
            Err(_) => return Err(self.timed_out("commit")),
        };
        debug!("Wrote {} bytes to {}", written, path);
        Ok(written)
    }
}
