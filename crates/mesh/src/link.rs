//! Physical link abstraction
//!
//! The mesh core only ever talks to a radio through these four calls. SPI
//! transactions, modulation and antenna handling belong to the driver behind
//! the trait. Methods take `&self`: a driver serialises its own register
//! access, while the transport guarantees at most one frame is being sent at
//! any time.

use sentinel_core::RadioConfig;
use std::io;

/// A frame pulled off the air
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFrame {
    /// Raw frame bytes
    pub bytes: Vec<u8>,
    /// Signal strength reported by the driver, if it measures one
    pub signal_quality: Option<i16>,
}

impl ReceivedFrame {
    /// Frame without a signal measurement
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            signal_quality: None,
        }
    }
}

/// Half-duplex frame link
pub trait Link: Send + Sync {
    /// Bring the transceiver up with the given modulation parameters.
    fn open(&self, config: &RadioConfig) -> io::Result<()>;

    /// Transmit one encoded frame.
    fn send(&self, frame: &[u8]) -> io::Result<()>;

    /// Return the next pending frame, truncated to `max_len` bytes, or
    /// `None` when nothing is waiting. Must not block beyond a short poll.
    fn try_receive(&self, max_len: usize) -> io::Result<Option<ReceivedFrame>>;

    /// Release the transceiver.
    fn close(&self);
}
