//! Length-prefixed JSON framing.
//!
//! Each frame is a 4-byte big-endian body length followed by a JSON body.
//! Readers consume exactly one frame and never read ahead, so descriptor
//! readiness keeps reflecting undelivered frames.

use std::io::{self, Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Maximum frame body size (1 MB)
pub const MAX_FRAME_SIZE: usize = 1_048_576;

const HEADER_LEN: usize = 4;

/// Errors that can occur while reading or writing frames.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Frame too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Connection closed in the middle of a frame")]
    Truncated,

    #[error("Invalid frame body: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializes `message` and writes it as one frame.
pub fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), FrameError>
where
    W: Write,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: body.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    // Bounded by MAX_FRAME_SIZE above.
    let len = body.len() as u32;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Reads one frame and decodes it.
///
/// Returns `Ok(None)` if the peer closed the connection cleanly at a
/// frame boundary.
pub fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, FrameError>
where
    R: Read,
    T: DeserializeOwned,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;

    while let Some(rest) = header.get_mut(filled..).filter(|rest| !rest.is_empty()) {
        match reader.read(rest) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(FrameError::Truncated),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let size = u32::from_be_bytes(header) as usize;
    if size > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => FrameError::Truncated,
        _ => FrameError::Io(e),
    })?;

    Ok(Some(serde_json::from_slice(&body)?))
}
