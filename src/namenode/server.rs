use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info};

use crate::error::{DfsError, Result};
use crate::fs::remote::MAX_CHUNK_SIZE;
use crate::fs::{ByteStream, FileSystem, LocalFileSystem};
use crate::path::DfsPath;
use crate::proto::namespace_server::{Namespace, NamespaceServer};
use crate::proto::write_request::Payload;
use crate::proto::{
    DeleteRequest, GenericReply, GetFileInfoResponse, ListStatusResponse, PathRequest, ReadChunk,
    ReadRequest, WriteHeader, WriteRequest, WriteResponse, WriteTrailer,
};

/// Single-node gateway exporting a local directory through the `Namespace`
/// service.
pub struct NameNodeServer {
    address: SocketAddr,
    root: PathBuf,
}

impl NameNodeServer {
    pub fn new(address: SocketAddr, root: impl Into<PathBuf>) -> Self {
        Self {
            address,
            root: root.into(),
        }
    }

    fn service(&self) -> NamespaceServer<NameNodeService> {
        NamespaceServer::new(NameNodeService::new(LocalFileSystem::with_root(&self.root)))
    }

    pub async fn run_nameserver(&self) -> Result<()> {
        info!(
            "Server listening on {}, exporting {}",
            self.address,
            self.root.display()
        );
        Server::builder()
            .add_service(self.service())
            .serve(self.address)
            .await?;
        Ok(())
    }

    /// Serves on an already bound listener until `shutdown` resolves.
    pub async fn run_with_listener(
        &self,
        listener: TcpListener,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> Result<()> {
        info!(
            "Server listening on {}, exporting {}",
            listener.local_addr()?,
            self.root.display()
        );
        Server::builder()
            .add_service(self.service())
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
            .await?;
        Ok(())
    }
}

struct NameNodeService {
    fs: Arc<LocalFileSystem>,
}

impl NameNodeService {
    fn new(fs: LocalFileSystem) -> Self {
        Self { fs: Arc::new(fs) }
    }
}

fn parse_path(raw: &str) -> std::result::Result<DfsPath, Status> {
    // the namespace is unqualified on the wire
    DfsPath::new(raw)
        .map(|path| path.unqualified())
        .map_err(Status::from)
}

// Body of a write: data chunks up to a trailer whose length must match.
fn write_body(inbound: Streaming<WriteRequest>) -> ByteStream {
    Box::pin(stream::try_unfold(
        (inbound, 0u64),
        |(inbound, received)| next_write_chunk(inbound, received),
    ))
}

async fn next_write_chunk(
    mut inbound: Streaming<WriteRequest>,
    received: u64,
) -> Result<Option<(Bytes, (Streaming<WriteRequest>, u64))>> {
    match inbound.message().await? {
        Some(WriteRequest {
            payload: Some(Payload::Data(data)),
        }) => {
            if data.len() > MAX_CHUNK_SIZE {
                return Err(DfsError::Aborted(format!(
                    "data message of {} bytes exceeds {}",
                    data.len(),
                    MAX_CHUNK_SIZE
                )));
            }
            let received = received + data.len() as u64;
            Ok(Some((Bytes::from(data), (inbound, received))))
        }
        Some(WriteRequest {
            payload: Some(Payload::Trailer(WriteTrailer { length })),
        }) => {
            if length != received {
                return Err(DfsError::Aborted(format!(
                    "trailer announced {} bytes, received {}",
                    length, received
                )));
            }
            Ok(None)
        }
        Some(_) => Err(DfsError::Aborted(
            "unexpected message in write stream".to_string(),
        )),
        None => Err(DfsError::Aborted(
            "write stream ended before the trailer".to_string(),
        )),
    }
}

#[tonic::async_trait]
impl Namespace for NameNodeService {
    async fn list_status(
        &self,
        request: Request<PathRequest>,
    ) -> std::result::Result<Response<ListStatusResponse>, Status> {
        let path = parse_path(&request.into_inner().path)?;
        debug!("Received ListStatus for {}", path);

        let entries = self.fs.list_status(&path).await?;
        let response = ListStatusResponse {
            entries: entries.into_iter().map(Into::into).collect(),
        };
        Ok(Response::new(response))
    }

    async fn get_file_info(
        &self,
        request: Request<PathRequest>,
    ) -> std::result::Result<Response<GetFileInfoResponse>, Status> {
        let path = parse_path(&request.into_inner().path)?;
        debug!("Received GetFileInfo for {}", path);

        let status = match self.fs.get_file_status(&path).await {
            Ok(status) => Some(status.into()),
            Err(DfsError::NotFound(_)) => None,
            Err(err) => return Err(err.into()),
        };
        Ok(Response::new(GetFileInfoResponse { status }))
    }

    async fn mkdirs(
        &self,
        request: Request<PathRequest>,
    ) -> std::result::Result<Response<GenericReply>, Status> {
        let path = parse_path(&request.into_inner().path)?;
        info!("Received Mkdirs for {}", path);

        let is_success = self.fs.mkdirs(&path).await?;
        Ok(Response::new(GenericReply {
            is_success,
            message: format!("Mkdirs request successfully processed for: {}", path),
        }))
    }

    async fn delete(
        &self,
        request: Request<DeleteRequest>,
    ) -> std::result::Result<Response<GenericReply>, Status> {
        let DeleteRequest { path, recursive } = request.into_inner();
        let path = parse_path(&path)?;
        info!("Received Delete for {} (recursive: {})", path, recursive);

        let is_success = self.fs.delete(&path, recursive).await?;
        let message = if is_success {
            format!("Delete request successfully processed for: {}", path)
        } else {
            format!("Nothing deleted for: {}", path)
        };
        Ok(Response::new(GenericReply {
            is_success,
            message,
        }))
    }

    type ReadStream = Pin<Box<dyn Stream<Item = std::result::Result<ReadChunk, Status>> + Send>>;

    async fn read(
        &self,
        request: Request<ReadRequest>,
    ) -> std::result::Result<Response<Self::ReadStream>, Status> {
        let ReadRequest { path, buffer_size } = request.into_inner();
        let path = parse_path(&path)?;
        debug!("Received Read for {}", path);

        let buffer_size = (buffer_size as usize).clamp(1, MAX_CHUNK_SIZE);
        let chunks = self.fs.open(&path, buffer_size).await?;
        let stream = chunks.map(|chunk| {
            chunk
                .map(|data| ReadChunk {
                    data: data.to_vec(),
                })
                .map_err(Status::from)
        });
        Ok(Response::new(Box::pin(stream)))
    }

    async fn write(
        &self,
        request: Request<Streaming<WriteRequest>>,
    ) -> std::result::Result<Response<WriteResponse>, Status> {
        let mut inbound = request.into_inner();
        let WriteHeader { path, overwrite } = match inbound.message().await? {
            Some(WriteRequest {
                payload: Some(Payload::Header(header)),
            }) => header,
            _ => {
                return Err(Status::invalid_argument(
                    "write stream must start with a header",
                ))
            }
        };
        let path = parse_path(&path)?;
        info!("Received Write for {} (overwrite: {})", path, overwrite);

        let bytes_written = self
            .fs
            .create(&path, overwrite, write_body(inbound))
            .await?;
        Ok(Response::new(WriteResponse { bytes_written }))
    }
}
