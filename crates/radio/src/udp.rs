//! UDP broadcast link
//!
//! Stands in for the LoRa transceiver on a LAN. Each mesh frame is one
//! datagram sent to the configured broadcast address; the socket is
//! non-blocking so `try_receive` returns at once when nothing is queued.
//! The node hears its own broadcasts; the transport drops those by source id.

use sentinel_core::{LinkConfig, RadioConfig};
use sentinel_mesh::{Link, ReceivedFrame};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
pub struct UdpLink {
    bind: SocketAddr,
    broadcast: SocketAddr,
    socket: Mutex<Option<UdpSocket>>,
}

impl UdpLink {
    pub fn new(bind: SocketAddr, broadcast: SocketAddr) -> Self {
        Self {
            bind,
            broadcast,
            socket: Mutex::new(None),
        }
    }

    pub fn from_config(config: &LinkConfig) -> io::Result<Self> {
        Ok(Self::new(parse(&config.bind)?, parse(&config.broadcast)?))
    }

    /// Address the socket is bound to, once open
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket().as_ref().and_then(|s| s.local_addr().ok())
    }

    fn socket(&self) -> MutexGuard<'_, Option<UdpSocket>> {
        self.socket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn parse(addr: &str) -> io::Result<SocketAddr> {
    addr.parse().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid socket address {:?}: {}", addr, e),
        )
    })
}

fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "udp link is not open")
}

impl Link for UdpLink {
    fn open(&self, config: &RadioConfig) -> io::Result<()> {
        let socket = UdpSocket::bind(self.bind)?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;
        tracing::info!(
            bind = %socket.local_addr()?,
            broadcast = %self.broadcast,
            frequency_mhz = config.frequency_mhz,
            spreading_factor = config.spreading_factor,
            "UDP link opened"
        );
        *self.socket() = Some(socket);
        Ok(())
    }

    fn send(&self, frame: &[u8]) -> io::Result<()> {
        let guard = self.socket();
        let socket = guard.as_ref().ok_or_else(not_open)?;
        let sent = socket.send_to(frame, self.broadcast)?;
        if sent != frame.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short datagram write: {} of {} bytes", sent, frame.len()),
            ));
        }
        Ok(())
    }

    fn try_receive(&self, max_len: usize) -> io::Result<Option<ReceivedFrame>> {
        let guard = self.socket();
        let socket = guard.as_ref().ok_or_else(not_open)?;
        let mut buf = vec![0u8; max_len];
        match socket.recv_from(&mut buf) {
            Ok((len, _peer)) => {
                buf.truncate(len);
                Ok(Some(ReceivedFrame::new(buf)))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn close(&self) {
        if self.socket().take().is_some() {
            tracing::info!(bind = %self.bind, "UDP link closed");
        }
    }
}
