//! Native-messaging framing: a 4-byte little-endian length prefix followed
//! by that many bytes of UTF-8 JSON.

use std::io::{self, ErrorKind};

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Declared lengths above this are treated as stream corruption; the framing
/// cannot be resynchronized once a bogus header has been consumed.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

pub fn encode_frame<T: Serialize>(msg: &T) -> io::Result<Vec<u8>> {
    // Reserve the prefix and serialize straight into the output frame.
    let mut framed = Vec::with_capacity(256);
    framed.extend_from_slice(&[0u8; 4]);
    serde_json::to_writer(&mut framed, msg)
        .map_err(|err| io::Error::new(ErrorKind::InvalidData, err))?;
    let payload_len = framed.len() - 4;
    if payload_len > MAX_FRAME_LEN {
        return Err(io::Error::new(ErrorKind::InvalidData, "frame too large"));
    }
    let len = payload_len as u32;
    framed[..4].copy_from_slice(&len.to_le_bytes());
    Ok(framed)
}

pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> io::Result<T> {
    if bytes.len() < 4 {
        return Err(io::Error::new(ErrorKind::UnexpectedEof, "missing frame header"));
    }
    let mut header = [0u8; 4];
    header.copy_from_slice(&bytes[..4]);
    let len = u32::from_le_bytes(header) as usize;
    if bytes.len() < 4 + len {
        return Err(io::Error::new(ErrorKind::UnexpectedEof, "incomplete frame"));
    }
    serde_json::from_slice(&bytes[4..4 + len])
        .map_err(|err| io::Error::new(ErrorKind::InvalidData, err))
}

/// Read one frame's payload. `Ok(None)` means the peer closed the stream at
/// a frame boundary; EOF mid-frame is an error like any other short read.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(ErrorKind::InvalidData, "frame length exceeds limit"));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}
