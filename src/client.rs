//! Async client for the catalog TCP protocol.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::codec::{
    decode_json, read_frame, write_frame, write_json, MSG_CHUNK_DATA, MSG_END_OF_STREAM,
    MSG_IMAGE_INFO, OP_CREATE_LAPTOP, OP_SEARCH_LAPTOP, OP_UPLOAD_IMAGE, RESP_END, RESP_ERROR,
    RESP_MESSAGE,
};
use crate::error::Status;
use crate::model::{Filter, ImageType, Laptop};
use crate::proto::{
    Call, CreateLaptopRequest, CreateLaptopResponse, ImageInfo, SearchLaptopRequest,
    SearchLaptopResponse, UploadImageRequest, UploadImageResponse,
};

/// Size of each chunk sent by [`CatalogClient::upload_image`].
pub const CHUNK_SIZE: usize = 1024;

#[derive(Debug, Clone)]
pub struct CatalogClient {
    addr: String,
    timeout: Option<Duration>,
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

impl Connection {
    async fn open(addr: &str) -> Result<Self, Status> {
        let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| Status::unavailable(format!("cannot connect to {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
        })
    }

    async fn send_json<T: Serialize>(&mut self, kind: u8, message: &T) -> Result<(), Status> {
        write_json(&mut self.writer, kind, message).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), Status> {
        self.writer.flush().await?;
        Ok(())
    }

    /// `Ok(None)` is a clean end of a server stream.
    async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>, Status> {
        let frame = read_frame(&mut self.reader)
        .await?
        .ok_or_else(|| Status::unavailable("server closed the connection"))?;

        match frame.kind {
            RESP_MESSAGE => decode_json(&frame.body)
            .map(Some)
            .map_err(|e| Status::internal(format!("malformed response: {}", e))),
            RESP_END => Ok(None),
            RESP_ERROR => {
                let status: Status = decode_json(&frame.body)
                .map_err(|e| Status::internal(format!("malformed error status: {}", e)))?;
                Err(status)
            }
            other => Err(Status::internal(format!("unexpected response frame 0x{:02X}", other))),
        }
    }

    async fn recv_unary<T: DeserializeOwned>(&mut self) -> Result<T, Status> {
        self.recv()
        .await?
        .ok_or_else(|| Status::internal("server ended a unary call without a response"))
    }
}

impl CatalogClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into(), timeout: None }
    }

    /// Deadline applied to every call made by this client.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn call<T>(&self, request: T) -> Call<T> {
        Call {
            timeout_ms: self.timeout.map(|t| t.as_millis() as u64),
            request,
        }
    }

    pub async fn create_laptop(&self, laptop: Laptop) -> Result<String, Status> {
        let mut conn = Connection::open(&self.addr).await?;
        conn.send_json(OP_CREATE_LAPTOP, &self.call(CreateLaptopRequest { laptop })).await?;
        conn.flush().await?;
        let response: CreateLaptopResponse = conn.recv_unary().await?;
        Ok(response.id)
    }

    pub async fn search_laptop(&self, filter: Filter) -> Result<SearchStream, Status> {
        let mut conn = Connection::open(&self.addr).await?;
        conn.send_json(OP_SEARCH_LAPTOP, &self.call(SearchLaptopRequest { filter })).await?;
        conn.flush().await?;
        Ok(SearchStream { conn, done: false })
    }

    pub async fn upload_stream(&self) -> Result<UploadStream, Status> {
        let mut conn = Connection::open(&self.addr).await?;
        conn.send_json(OP_UPLOAD_IMAGE, &self.call(())).await?;
        conn.flush().await?;
        Ok(UploadStream { conn })
    }

    /// Sends the image info followed by the data in [`CHUNK_SIZE`] pieces.
    pub async fn upload_image(
        &self,
        laptop_id: &str,
        image_type: ImageType,
        data: &[u8],
    ) -> Result<UploadImageResponse, Status> {
        let mut upload = self.upload_stream().await?;
        upload
        .send(UploadImageRequest::Info(ImageInfo {
            laptop_id: laptop_id.to_string(),
            image_type,
        }))
        .await?;
        for chunk in data.chunks(CHUNK_SIZE) {
            upload.send(UploadImageRequest::ChunkData(chunk.to_vec())).await?;
        }
        upload.close_and_recv().await
    }
}

/// Matches of a search, pulled one at a time.
pub struct SearchStream {
    conn: Connection,
    done: bool,
}

impl SearchStream {
    /// `Ok(None)` once the server has sent every match.
    pub async fn next(&mut self) -> Result<Option<Laptop>, Status> {
        if self.done {
            return Ok(None);
        }
        match self.conn.recv::<SearchLaptopResponse>().await {
            Ok(Some(response)) => Ok(Some(response.laptop)),
            Ok(None) => {
                self.done = true;
                Ok(None)
            }
            Err(status) => {
                self.done = true;
                Err(status)
            }
        }
    }

    pub async fn collect(mut self) -> Result<Vec<Laptop>, Status> {
        let mut laptops = Vec::new();
        while let Some(laptop) = self.next().await? {
            laptops.push(laptop);
        }
        Ok(laptops)
    }
}

/// Outbound half of an upload call.
pub struct UploadStream {
    conn: Connection,
}

impl UploadStream {
    /// Image info is flushed right away; chunks are buffered.
    pub async fn send(&mut self, request: UploadImageRequest) -> Result<(), Status> {
        match request {
            UploadImageRequest::Info(info) => {
                self.conn.send_json(MSG_IMAGE_INFO, &info).await?;
                self.conn.flush().await
            }
            UploadImageRequest::ChunkData(chunk) => {
                write_frame(&mut self.conn.writer, MSG_CHUNK_DATA, &chunk).await?;
                Ok(())
            }
        }
    }

    /// Ends the stream and waits for the server's verdict.
    pub async fn close_and_recv(mut self) -> Result<UploadImageResponse, Status> {
        write_frame(&mut self.conn.writer, MSG_END_OF_STREAM, &[]).await?;
        self.conn.flush().await?;
        self.conn.recv_unary().await
    }
}
