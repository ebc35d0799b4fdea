//! Length-prefixed frame encoding/decoding
//!
//! Wire format: [4-byte big-endian length][JSON payload]
//! Maximum frame size: 1MB (sanity limit). Message lists that would not fit
//! are cut into runs with [`split_messages`].

use mentorchat_core::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::protocol::Frame;

/// Maximum allowed frame size (1MB)
pub(crate) const MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// Encoded bytes of messages per frame, leaving room for the envelope
const CHUNK_BUDGET: usize = MAX_FRAME_SIZE as usize / 2;

const PREFIX_LEN: usize = 4;

fn check_len(len: usize) -> Result<u32> {
    match u32::try_from(len) {
        Ok(0) => Err(Error::Protocol("Empty frame".into())),
        Ok(len) if len <= MAX_FRAME_SIZE => Ok(len),
        _ => Err(Error::Protocol(format!(
            "Frame of {} bytes exceeds the {} byte limit",
            len, MAX_FRAME_SIZE
        ))),
    }
}

/// Fill `buf`; a stream ending mid-read counts as a closed connection
async fn fill<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(Error::ConnectionClosed),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Read one frame
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame> {
    let mut prefix = [0u8; PREFIX_LEN];
    fill(reader, &mut prefix).await?;
    let len = check_len(u32::from_be_bytes(prefix) as usize)?;

    let mut body = vec![0u8; len as usize];
    fill(reader, &mut body).await?;

    Frame::from_bytes(&body).map_err(|e| Error::Protocol(format!("Undecodable frame: {}", e)))
}

/// Write one frame and flush
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    let body = frame
        .to_bytes()
        .map_err(|e| Error::Protocol(format!("Unencodable frame: {}", e)))?;
    let len = check_len(body.len())?;

    let mut buf = Vec::with_capacity(PREFIX_LEN + body.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&body);

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Cut `messages` into ordered runs that each fit in one frame
///
/// Always returns at least one run; the last one may be empty.
pub fn split_messages(messages: Vec<Message>) -> Vec<Vec<Message>> {
    let mut runs = Vec::new();
    let mut run = Vec::new();
    let mut size = 0;

    for message in messages {
        let len = serde_json::to_vec(&message)
            .map(|bytes| bytes.len() + 1)
            .unwrap_or(CHUNK_BUDGET);
        if !run.is_empty() && size + len > CHUNK_BUDGET {
            runs.push(std::mem::take(&mut run));
            size = 0;
        }
        size += len;
        run.push(message);
    }

    runs.push(run);
    runs
}
