use std::convert::Infallible;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::codec::{
    decode_json, read_frame, write_frame, write_json, Frame, MSG_CHUNK_DATA, MSG_END_OF_STREAM,
    MSG_IMAGE_INFO, OP_CREATE_LAPTOP, OP_SEARCH_LAPTOP, OP_UPLOAD_IMAGE, RESP_END, RESP_ERROR,
    RESP_MESSAGE,
};
use crate::context::CallContext;
use crate::error::Status;
use crate::proto::{Call, CreateLaptopRequest, SearchLaptopRequest, SearchLaptopResponse, UploadImageRequest};
use crate::service::{LaptopService, RequestStream, ResponseStream};

/// How long a failed upload keeps reading the client's leftover frames.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest a single response frame may wait on a peer that stopped reading.
const WRITE_STALL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct CatalogServer {
    service: Arc<LaptopService>,
}

impl CatalogServer {
    pub fn new(service: Arc<LaptopService>) -> Self {
        Self { service }
    }

    pub async fn run(&self, addr: &str) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("catalog server listening on {}", listener.local_addr()?);
        self.serve(listener).await;
        Ok(())
    }

    /// Accept loop; one task per connection.
    pub async fn serve(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    debug!("accepted connection from {}", peer);
                    let service = self.service.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(socket, service).await {
                            // Peers hanging up mid-call are routine.
                            match e.kind() {
                                io::ErrorKind::UnexpectedEof
                                | io::ErrorKind::BrokenPipe
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::TimedOut => debug!("client {} went away: {}", peer, e),
                                _ => warn!("client {} error: {}", peer, e),
                            }
                        }
                    });
                }
                Err(e) => error!("connection failed: {}", e),
            }
        }
    }
}

async fn handle_client(stream: TcpStream, service: Arc<LaptopService>) -> io::Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    loop {
        let frame = match read_frame(&mut reader).await? {
            Some(frame) => frame,
            None => return Ok(()),
        };

        match frame.kind {
            OP_CREATE_LAPTOP => handle_create(&mut writer, &frame, &service).await?,
            OP_SEARCH_LAPTOP => handle_search(&mut reader, &mut writer, &frame, &service).await?,
            OP_UPLOAD_IMAGE => {
                let reusable = handle_upload(&mut reader, &mut writer, &frame, &service).await?;
                if !reusable {
                    writer.flush().await?;
                    return Ok(());
                }
            }
            other => {
                warn!("unknown opcode: 0x{:02X}", other);
                let status = Status::unimplemented(format!("unknown opcode 0x{:02X}", other));
                write_json(&mut writer, RESP_ERROR, &status).await?;
                writer.flush().await?;
                return Ok(());
            }
        }
        writer.flush().await?;
    }
}

fn open_call<T: serde::de::DeserializeOwned>(frame: &Frame) -> Result<(CallContext, T), Status> {
    let call: Call<T> = decode_json(&frame.body)
    .map_err(|e| Status::invalid_argument(format!("malformed request: {}", e)))?;
    Ok((CallContext::from_timeout_ms(call.timeout_ms), call.request))
}

// --- UNARY ---

async fn handle_create<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame, service: &LaptopService) -> io::Result<()> {
    let result = match open_call::<CreateLaptopRequest>(frame) {
        Ok((ctx, request)) => service.create_laptop(&ctx, request).await,
        Err(status) => Err(status),
    };
    match result {
        Ok(response) => write_json(writer, RESP_MESSAGE, &response).await,
        Err(status) => write_json(writer, RESP_ERROR, &status).await,
    }
}

// --- SERVER STREAMING ---

/// Writes each response as its own flushed frame.
///
/// `pending` stays set when a write is abandoned halfway, which leaves the
/// connection unusable for further frames.
struct FrameSender<'a, W> {
    writer: &'a mut W,
    pending: bool,
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ResponseStream<SearchLaptopResponse> for FrameSender<'_, W> {
    async fn send(&mut self, message: SearchLaptopResponse) -> Result<(), Status> {
        self.pending = true;
        let writer = &mut *self.writer;
        let written = tokio::time::timeout(WRITE_STALL_TIMEOUT, async move {
            write_json(&mut *writer, RESP_MESSAGE, &message).await?;
            writer.flush().await
        })
        .await;
        match written {
            Ok(Ok(())) => {
                self.pending = false;
                Ok(())
            }
            Ok(Err(e)) => Err(Status::unavailable(e.to_string())),
            Err(_) => Err(Status::unavailable("client stopped reading responses")),
        }
    }
}

/// Cancels `ctx` once the peer closes its side. Never returns.
///
/// Peeks through the read buffer so a frame sent early by the client is
/// left for the connection loop.
async fn watch_disconnect<R: AsyncBufRead + Unpin>(reader: &mut R, ctx: &CallContext) -> Infallible {
    let closed = match reader.fill_buf().await {
        Ok(buf) => buf.is_empty(),
        Err(_) => true,
    };
    if closed {
        debug!("client went away, cancelling call");
        ctx.cancel();
    }
    std::future::pending().await
}

async fn handle_search<R, W>(reader: &mut R, writer: &mut W, frame: &Frame, service: &LaptopService) -> io::Result<()>
where
R: AsyncBufRead + Unpin + Send,
W: AsyncWrite + Unpin + Send,
{
    let (ctx, request) = match open_call::<SearchLaptopRequest>(frame) {
        Ok(call) => call,
        Err(status) => return write_json(writer, RESP_ERROR, &status).await,
    };

    let mut sender = FrameSender { writer: &mut *writer, pending: false };
    let result = tokio::select! {
        result = service.search_laptop(&ctx, request, &mut sender) => result,
        never = watch_disconnect(reader, &ctx) => match never {},
    };
    if sender.pending {
        return Err(io::Error::new(io::ErrorKind::TimedOut, "search response abandoned mid-frame"));
    }

    let trailer = async {
        match result {
            Ok(()) => write_frame(&mut *writer, RESP_END, &[]).await?,
            Err(status) => write_json(&mut *writer, RESP_ERROR, &status).await?,
        }
        writer.flush().await
    };
    match tokio::time::timeout(WRITE_STALL_TIMEOUT, trailer).await {
        Ok(written) => written,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "client stopped reading responses")),
    }
}

// --- CLIENT STREAMING ---

/// Decodes upload frames; a blocking read never outlives the call deadline.
struct FrameReceiver<'a, R> {
    reader: &'a mut R,
    ctx: CallContext,
    finished: bool,
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> RequestStream<UploadImageRequest> for FrameReceiver<'_, R> {
    async fn recv(&mut self) -> Result<Option<UploadImageRequest>, Status> {
        if self.finished {
            return Ok(None);
        }

        let read = match self.ctx.deadline() {
            Some(deadline) => {
                let deadline = tokio::time::Instant::from_std(deadline);
                match tokio::time::timeout_at(deadline, read_frame(&mut *self.reader)).await {
                    Ok(read) => read,
                    Err(_) => return Err(Status::deadline_exceeded("deadline is exceeded")),
                }
            }
            None => read_frame(&mut *self.reader).await,
        };

        let frame = match read {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.ctx.cancel();
                return Err(Status::cancelled("client closed the stream without ending it"));
            }
            Err(e) => {
                self.ctx.cancel();
                return Err(Status::cancelled(format!("client stream failed: {}", e)));
            }
        };

        match frame.kind {
            MSG_IMAGE_INFO => decode_json(&frame.body)
            .map(|info| Some(UploadImageRequest::Info(info)))
            .map_err(|e| Status::invalid_argument(format!("malformed image info: {}", e))),
            MSG_CHUNK_DATA => Ok(Some(UploadImageRequest::ChunkData(frame.body))),
            MSG_END_OF_STREAM => {
                self.finished = true;
                Ok(None)
            }
            other => Err(Status::invalid_argument(format!("unexpected frame 0x{:02X} in upload stream", other))),
        }
    }
}

/// Returns whether the connection can carry another call.
async fn handle_upload<R, W>(reader: &mut R, writer: &mut W, frame: &Frame, service: &LaptopService) -> io::Result<bool>
where
R: AsyncRead + Unpin + Send,
W: AsyncWrite + Unpin,
{
    let (ctx, ()) = match open_call::<()>(frame) {
        Ok(call) => call,
        Err(status) => {
            write_json(writer, RESP_ERROR, &status).await?;
            return Ok(false);
        }
    };

    let mut receiver = FrameReceiver { reader: &mut *reader, ctx: ctx.clone(), finished: false };
    let result = service.upload_image(&ctx, &mut receiver).await;
    let finished = receiver.finished;

    match result {
        Ok(response) => {
            write_json(writer, RESP_MESSAGE, &response).await?;
            Ok(finished)
        }
        Err(status) => {
            write_json(writer, RESP_ERROR, &status).await?;
            writer.flush().await?;
            if !finished {
                drain_upload(reader).await;
            }
            Ok(false)
        }
    }
}

/// Consumes what the client already sent so closing the socket does not
/// reset the connection before the error frame is read.
async fn drain_upload<R: AsyncRead + Unpin>(reader: &mut R) {
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        let mut frames = 0usize;
        while let Ok(Some(frame)) = read_frame(reader).await {
            frames += 1;
            if frame.kind == MSG_END_OF_STREAM {
                break;
            }
        }
        frames
    })
    .await;

    match drained {
        Ok(frames) => debug!("drained {} frames of aborted upload", frames),
        Err(_) => debug!("gave up draining aborted upload"),
    }
}
