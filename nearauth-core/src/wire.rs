//! Framing: length-prefix (4 bytes BE) + raw payload. No other header.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const LEN_SIZE: usize = 4;

/// Upper bound for any frame on a proxy channel.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Encode a payload into a single frame: 4 bytes BE length + payload.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameEncodeError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge(payload.len()));
    }
    let len = payload.len() as u32;
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Error encoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("frame too large: {0} bytes")]
    TooLarge(usize),
}

/// Decode one frame from the front of `bytes`. Returns the payload and the number of bytes consumed.
/// Call with partial buffer; returns `NeedMore` if not enough bytes (caller should try again after more data).
pub fn decode_frame(bytes: &[u8], max_len: usize) -> Result<(&[u8], usize), FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > max_len {
        return Err(FrameDecodeError::TooLarge(len));
    }
    if bytes.len() < LEN_SIZE + len {
        return Err(FrameDecodeError::NeedMore);
    }
    Ok((&bytes[LEN_SIZE..LEN_SIZE + len], LEN_SIZE + len))
}

/// Error decoding a frame (need more bytes, too large, or transport failure).
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large: {0} bytes")]
    TooLarge(usize),
    #[error("connection closed")]
    Closed,
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

/// Read one frame from an async reader. A clean EOF before the length prefix is `Closed`.
pub async fn read_frame<R: AsyncRead + Unpin + ?Sized>(
    reader: &mut R,
    max_len: usize,
) -> Result<Vec<u8>, FrameDecodeError> {
    let mut len_buf = [0u8; LEN_SIZE];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(FrameDecodeError::Closed),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_len {
        return Err(FrameDecodeError::TooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write one frame and flush.
pub async fn write_frame<W: AsyncWrite + Unpin + ?Sized>(
    writer: &mut W,
    payload: &[u8],
) -> io::Result<()> {
    let frame = encode_frame(payload)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    writer.write_all(&frame).await?;
    writer.flush().await
}
