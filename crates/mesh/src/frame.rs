//! Wire codec for mesh frames.
//!
//! Every field is a single byte, so the layout has no endianness:
//!
//! ```text
//! byte 0        type       (0x01 heartbeat, 0x02 detection, 0x03 ack)
//! byte 1        source_id
//! byte 2        dest_id    (0xFF broadcast)
//! byte 3        length     (0..=64)
//! byte 4..4+L   payload
//! byte 4+L      checksum   (XOR of bytes 0..4+L)
//! ```

use std::fmt;
use std::time::SystemTime;
use thiserror::Error;

/// Largest payload a frame may carry.
pub const MAX_PAYLOAD_SIZE: usize = 64;

/// Type, source, destination and length bytes.
pub const HEADER_SIZE: usize = 4;

/// Header plus checksum of an empty frame.
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + 1;

/// Header, full payload and checksum.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE + 1;

/// Destination id addressing every node in range.
pub use sentinel_core::BROADCAST_ID;

/// Wire format revision, bumped on any incompatible frame change
pub const PROTOCOL_VERSION: u8 = 1;

/// Frame type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Zero-payload liveness beacon
    Heartbeat,
    /// One-byte detection flag
    Detection,
    /// Acknowledgement
    Ack,
    /// A tag this build does not understand
    Unknown(u8),
}

impl From<u8> for MessageType {
    fn from(tag: u8) -> Self {
        match tag {
            0x01 => MessageType::Heartbeat,
            0x02 => MessageType::Detection,
            0x03 => MessageType::Ack,
            other => MessageType::Unknown(other),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(kind: MessageType) -> Self {
        match kind {
            MessageType::Heartbeat => 0x01,
            MessageType::Detection => 0x02,
            MessageType::Ack => 0x03,
            MessageType::Unknown(other) => other,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Heartbeat => write!(f, "heartbeat"),
            MessageType::Detection => write!(f, "detection"),
            MessageType::Ack => write!(f, "ack"),
            MessageType::Unknown(tag) => write!(f, "unknown({:#04x})", tag),
        }
    }
}

/// Frame encoding and decoding errors.
///
/// Everything except [`FrameError::ChecksumMismatch`] marks a malformed
/// frame that must never reach a consumer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Buffer shorter than an empty frame
    #[error("malformed frame: {len} bytes is below the 5-byte minimum")]
    TooShort {
        /// Received buffer length
        len: usize,
    },

    /// Declared or supplied payload larger than the protocol allows
    #[error("malformed frame: payload length {len} exceeds 64")]
    PayloadTooLarge {
        /// Offending payload length
        len: usize,
    },

    /// Declared payload length runs past the end of the buffer
    #[error("malformed frame: length byte declares {declared} payload bytes, buffer holds {available}")]
    Truncated {
        /// Payload length from the header
        declared: usize,
        /// Payload bytes actually present
        available: usize,
    },

    /// Buffer continues past the checksum the length byte points at
    #[error("malformed frame: length byte declares a {declared}-byte frame, buffer holds {actual}")]
    TrailingBytes {
        /// Frame length implied by the header
        declared: usize,
        /// Buffer length actually received
        actual: usize,
    },

    /// Recomputed checksum disagrees with the trailing byte
    #[error("checksum mismatch: frame carries {received:#04x}, computed {computed:#04x}")]
    ChecksumMismatch {
        /// Checksum byte found on the wire
        received: u8,
        /// Checksum recomputed over header and payload
        computed: u8,
    },
}

impl FrameError {
    /// True for errors that mean the frame is structurally unusable.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, FrameError::ChecksumMismatch { .. })
    }
}

/// One mesh frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshMessage {
    /// Frame type
    pub kind: MessageType,
    /// Originating node
    pub source_id: u8,
    /// Destination node, [`BROADCAST_ID`] for everyone
    pub dest_id: u8,
    /// Type-specific payload, at most [`MAX_PAYLOAD_SIZE`] bytes
    pub payload: Vec<u8>,
    /// Creation time for outbound frames, receive time for decoded ones.
    /// Not transmitted.
    pub timestamp: SystemTime,
}

impl MeshMessage {
    /// Build a frame, rejecting oversize payloads.
    pub fn new(
        kind: MessageType,
        source_id: u8,
        dest_id: u8,
        payload: Vec<u8>,
    ) -> Result<Self, FrameError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(FrameError::PayloadTooLarge { len: payload.len() });
        }
        Ok(Self {
            kind,
            source_id,
            dest_id,
            payload,
            timestamp: SystemTime::now(),
        })
    }

    /// Broadcast liveness beacon
    pub fn heartbeat(source_id: u8) -> Self {
        Self {
            kind: MessageType::Heartbeat,
            source_id,
            dest_id: BROADCAST_ID,
            payload: Vec::new(),
            timestamp: SystemTime::now(),
        }
    }

    /// Broadcast detection flag
    pub fn detection(source_id: u8, detected: bool) -> Self {
        Self {
            kind: MessageType::Detection,
            source_id,
            dest_id: BROADCAST_ID,
            payload: vec![u8::from(detected)],
            timestamp: SystemTime::now(),
        }
    }

    /// Acknowledgement addressed to one node
    pub fn ack(source_id: u8, dest_id: u8) -> Self {
        Self {
            kind: MessageType::Ack,
            source_id,
            dest_id,
            payload: Vec::new(),
            timestamp: SystemTime::now(),
        }
    }

    /// Detection flag carried by a `Detection` frame.
    ///
    /// Only `0x01` reads as detecting; an empty payload reads as not detecting.
    pub fn detection_flag(&self) -> Option<bool> {
        match self.kind {
            MessageType::Detection => Some(self.payload.first() == Some(&1)),
            _ => None,
        }
    }

    /// True when addressed to every node
    pub fn is_broadcast(&self) -> bool {
        self.dest_id == BROADCAST_ID
    }
}

/// Integrity verdict attached to every decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integrity {
    /// Checksum matched
    Valid,
    /// Checksum did not match; fields were still decoded
    ChecksumMismatch {
        /// Checksum byte found on the wire
        received: u8,
        /// Checksum recomputed over header and payload
        computed: u8,
    },
}

/// A decoded frame plus its checksum verdict
#[derive(Debug, Clone)]
pub struct Decoded {
    /// Decoded message
    pub message: MeshMessage,
    /// Checksum verdict
    pub integrity: Integrity,
}

impl Decoded {
    /// True when the checksum matched
    pub fn is_valid(&self) -> bool {
        self.integrity == Integrity::Valid
    }
}

/// Running XOR over `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Serialize a message into a self-checking frame.
pub fn encode(msg: &MeshMessage) -> Result<Vec<u8>, FrameError> {
    let len = msg.payload.len();
    if len > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge { len });
    }

    let mut frame = Vec::with_capacity(HEADER_SIZE + len + 1);
    frame.push(u8::from(msg.kind));
    frame.push(msg.source_id);
    frame.push(msg.dest_id);
    // len <= 64 checked above
    frame.push(len as u8);
    frame.extend_from_slice(&msg.payload);
    frame.push(checksum(&frame));
    Ok(frame)
}

/// Parse a frame.
///
/// Malformed buffers are rejected. A checksum mismatch is not an error here:
/// the frame is returned with [`Integrity::ChecksumMismatch`] so the caller
/// decides whether a noisy frame is still worth delivering. The buffer must
/// end exactly at the checksum; anything longer is malformed.
pub fn decode(bytes: &[u8]) -> Result<Decoded, FrameError> {
    if bytes.len() < MIN_FRAME_SIZE {
        return Err(FrameError::TooShort { len: bytes.len() });
    }

    let declared = bytes[3] as usize;
    if declared > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge { len: declared });
    }

    let checksum_at = HEADER_SIZE + declared;
    if bytes.len() <= checksum_at {
        return Err(FrameError::Truncated {
            declared,
            available: bytes.len() - HEADER_SIZE - 1,
        });
    }

    if bytes.len() != checksum_at + 1 {
        return Err(FrameError::TrailingBytes {
            declared: checksum_at + 1,
            actual: bytes.len(),
        });
    }

    let received = bytes[checksum_at];
    let computed = checksum(&bytes[..checksum_at]);
    let integrity = if received == computed {
        Integrity::Valid
    } else {
        Integrity::ChecksumMismatch { received, computed }
    };

    let message = MeshMessage {
        kind: MessageType::from(bytes[0]),
        source_id: bytes[1],
        dest_id: bytes[2],
        payload: bytes[HEADER_SIZE..checksum_at].to_vec(),
        timestamp: SystemTime::now(),
    };

    Ok(Decoded { message, integrity })
}

/// Parse a frame, treating a checksum mismatch as an error.
pub fn decode_strict(bytes: &[u8]) -> Result<MeshMessage, FrameError> {
    let decoded = decode(bytes)?;
    match decoded.integrity {
        Integrity::Valid => Ok(decoded.message),
        Integrity::ChecksumMismatch { received, computed } => {
            Err(FrameError::ChecksumMismatch { received, computed })
        }
    }
}
