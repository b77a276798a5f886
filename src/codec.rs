//! Length-prefixed frames shared by the server and the client.
//!
//! Layout: `[kind (1b)][length u32 LE (4b)][body (length bytes)]`.

use std::io;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// --- Call openers (client -> server) ---
pub const OP_CREATE_LAPTOP: u8  = 0x01;
pub const OP_SEARCH_LAPTOP: u8  = 0x02;
pub const OP_UPLOAD_IMAGE: u8   = 0x03;

// --- Upload stream (client -> server) ---
pub const MSG_IMAGE_INFO: u8    = 0x10;
pub const MSG_CHUNK_DATA: u8    = 0x11;
pub const MSG_END_OF_STREAM: u8 = 0x12;

// --- Responses (server -> client) ---
pub const RESP_MESSAGE: u8      = 0x20;
pub const RESP_END: u8          = 0x21;
pub const RESP_ERROR: u8        = 0x22;

/// 64KB cap keeps a hostile peer from forcing large allocations.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub kind: u8,
    pub body: Vec<u8>,
}

/// Returns `Ok(None)` when the peer closed the connection between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<Frame>> {
    let mut kind = [0u8; 1];
    match reader.read_exact(&mut kind).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} bytes (max {})", len, MAX_FRAME_LEN),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(Frame { kind: kind[0], body }))
}

/// Does not flush; callers decide when a batch of frames is complete.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, kind: u8, body: &[u8]) -> io::Result<()> {
    if body.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame too large: {} bytes (max {})", body.len(), MAX_FRAME_LEN),
        ));
    }
    writer.write_all(&[kind]).await?;
    writer.write_all(&(body.len() as u32).to_le_bytes()).await?;
    writer.write_all(body).await?;
    Ok(())
}

pub async fn write_json<W, T>(writer: &mut W, kind: u8, message: &T) -> io::Result<()>
where
W: AsyncWrite + Unpin,
T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    write_frame(writer, kind, &body).await
}

pub fn decode_json<T: DeserializeOwned>(body: &[u8]) -> io::Result<T> {
    serde_json::from_slice(body).map_err(io::Error::from)
}
