//! # Wire Protocol
//!
//! Everything on the wire is a length-prefixed frame: a 4-byte big-endian
//! payload length followed by exactly that many bytes. Control frames carry a
//! JSON [`Message`]; binary frames carry raw chunk or artifact bytes. Nothing
//! in a frame says which kind it is; the exchange sequence fixes that, and
//! every binary frame is announced by the control message preceding it.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound for control frames. Chunk and artifact frames are bounded by
/// the descriptor or carve policy in force instead.
pub const MAX_CONTROL_FRAME: u32 = 64 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The peer closed the connection cleanly between frames.
    #[error("connection closed")]
    Closed,
    #[error("frame of {len} bytes exceeds limit {limit}")]
    FrameTooLarge { len: u64, limit: u64 },
    #[error("malformed control message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unexpected message: expected {expected}, got {got}")]
    Unexpected { expected: &'static str, got: String },
}

/// Control messages exchanged between coordinator and worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Worker introduces itself during the registration window
    Hello { worker_id: String, hostname: String },
    /// Coordinator accepts the worker and shares the carve policy it must use
    Welcome {
        min_artifact_bytes: u64,
        max_artifact_bytes: u64,
    },
    /// Chunk assignment; one binary frame of `overlap_end - primary_start`
    /// chunk bytes follows
    Assignment {
        chunk_index: u64,
        primary_start: u64,
        primary_end: u64,
        overlap_end: u64,
    },
    /// Announces how many meta/payload pairs follow for the assigned chunk
    ResultHeader { chunk_index: u64, artifact_count: u64 },
    /// Artifact metadata; one binary frame of `size` payload bytes follows
    ArtifactMeta { absolute_start: u64, size: u64 },
    /// No further assignments; the worker should exit
    Shutdown,
}

impl Message {
    /// Wire tag of this variant, for error reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "hello",
            Message::Welcome { .. } => "welcome",
            Message::Assignment { .. } => "assignment",
            Message::ResultHeader { .. } => "result_header",
            Message::ArtifactMeta { .. } => "artifact_meta",
            Message::Shutdown => "shutdown",
        }
    }
}

pub fn write_frame(writer: &mut impl Write, payload: &[u8]) -> Result<(), ProtocolError> {
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge {
        len: payload.len() as u64,
        limit: u32::MAX as u64,
    })?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame. EOF before the first prefix byte is a clean close; EOF
/// anywhere later means the peer vanished mid-frame and is a transport error.
pub fn read_frame(reader: &mut impl Read, limit: u32) -> Result<Vec<u8>, ProtocolError> {
    let mut prefix = [0u8; 4];
    let mut filled = 0usize;
    while filled < prefix.len() {
        let n = reader.read(&mut prefix[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Err(ProtocolError::Closed);
            }
            return Err(ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed inside a length prefix",
            )));
        }
        filled += n;
    }

    let declared = u32::from_be_bytes(prefix);
    if declared > limit {
        return Err(ProtocolError::FrameTooLarge {
            len: declared as u64,
            limit: limit as u64,
        });
    }

    let mut payload = vec![0u8; declared as usize];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

pub fn write_message(writer: &mut impl Write, message: &Message) -> Result<(), ProtocolError> {
    let payload = serde_json::to_vec(message)?;
    write_frame(writer, &payload)
}

pub fn read_message(reader: &mut impl Read) -> Result<Message, ProtocolError> {
    let payload = read_frame(reader, MAX_CONTROL_FRAME)?;
    Ok(serde_json::from_slice(&payload)?)
}
