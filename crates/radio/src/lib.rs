//! Link drivers for the Sentinel mesh
//!
//! - [`UdpLink`]: UDP broadcast on a local network, used by bench rigs and
//!   field-lab deployments where no LoRa module is fitted.
//! - [`SharedMedium`]: an in-process shared channel that many nodes attach to,
//!   used by multi-node tests and simulations.

pub mod medium;
pub mod udp;

pub use medium::{MediumLink, SharedMedium};
pub use udp::UdpLink;

use sentinel_core::{Config, LinkKind};
use sentinel_mesh::Link;
use std::io;
use std::sync::Arc;

/// Build the link driver named by the `[link]` section.
pub fn from_config(config: &Config) -> io::Result<Arc<dyn Link>> {
    match config.link.kind {
        LinkKind::Udp => Ok(Arc::new(UdpLink::from_config(&config.link)?)),
    }
}
