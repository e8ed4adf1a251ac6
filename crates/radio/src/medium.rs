//! In-process shared radio channel
//!
//! Every attached station hears every frame sent by any other open station,
//! unless the pair has been cut with [`SharedMedium::set_link`]. Delivery is
//! immediate and lossless; loss and corruption are injected explicitly.

use sentinel_core::RadioConfig;
use sentinel_mesh::{Link, ReceivedFrame};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Station {
    open: bool,
    inbox: VecDeque<ReceivedFrame>,
}

#[derive(Debug, Default)]
struct MediumState {
    stations: BTreeMap<u8, Station>,
    /// Unordered station pairs that cannot hear each other
    cut: BTreeSet<(u8, u8)>,
    signal_quality: Option<i16>,
    transmissions: u64,
}

/// Handle to one shared channel. Clones refer to the same channel.
#[derive(Debug, Clone, Default)]
pub struct SharedMedium {
    state: Arc<Mutex<MediumState>>,
}

impl SharedMedium {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a station and return its link. The station stays deaf until
    /// the link is opened. Attaching an existing station id replaces it.
    pub fn attach(&self, station: u8) -> Arc<MediumLink> {
        self.lock().stations.insert(station, Station::default());
        Arc::new(MediumLink {
            station,
            medium: self.clone(),
        })
    }

    /// Put two stations in or out of range of each other.
    pub fn set_link(&self, a: u8, b: u8, up: bool) {
        let pair = ordered(a, b);
        let mut state = self.lock();
        if up {
            state.cut.remove(&pair);
        } else {
            state.cut.insert(pair);
        }
    }

    /// Signal strength stamped on every delivered frame.
    pub fn set_signal_quality(&self, rssi: Option<i16>) {
        self.lock().signal_quality = rssi;
    }

    /// Queue raw bytes for one station as if they arrived over the air.
    /// Returns false when the station is not attached and open.
    pub fn inject(&self, station: u8, bytes: &[u8]) -> bool {
        let mut state = self.lock();
        let signal_quality = state.signal_quality;
        match state.stations.get_mut(&station) {
            Some(target) if target.open => {
                target.inbox.push_back(ReceivedFrame {
                    bytes: bytes.to_vec(),
                    signal_quality,
                });
                true
            }
            _ => false,
        }
    }

    /// Frames sent by any station since the channel was created
    pub fn transmissions(&self) -> u64 {
        self.lock().transmissions
    }

    /// Frames waiting in one station's inbox
    pub fn pending(&self, station: u8) -> usize {
        self.lock()
            .stations
            .get(&station)
            .map_or(0, |s| s.inbox.len())
    }

    fn lock(&self) -> MutexGuard<'_, MediumState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn ordered(a: u8, b: u8) -> (u8, u8) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// One station's view of a [`SharedMedium`]
#[derive(Debug)]
pub struct MediumLink {
    station: u8,
    medium: SharedMedium,
}

impl MediumLink {
    pub fn station(&self) -> u8 {
        self.station
    }
}

impl Link for MediumLink {
    fn open(&self, config: &RadioConfig) -> io::Result<()> {
        let mut state = self.medium.lock();
        let station = state.stations.get_mut(&self.station).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "station detached from medium")
        })?;
        station.open = true;
        tracing::debug!(
            station = self.station,
            frequency_mhz = config.frequency_mhz,
            "Medium link opened"
        );
        Ok(())
    }

    fn send(&self, frame: &[u8]) -> io::Result<()> {
        let mut state = self.medium.lock();
        let sender_open = state
            .stations
            .get(&self.station)
            .map_or(false, |s| s.open);
        if !sender_open {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "medium link is not open",
            ));
        }

        state.transmissions += 1;
        let signal_quality = state.signal_quality;
        let MediumState { stations, cut, .. } = &mut *state;
        for (&id, station) in stations.iter_mut() {
            if id == self.station || !station.open || cut.contains(&ordered(id, self.station)) {
                continue;
            }
            station.inbox.push_back(ReceivedFrame {
                bytes: frame.to_vec(),
                signal_quality,
            });
        }
        Ok(())
    }

    fn try_receive(&self, max_len: usize) -> io::Result<Option<ReceivedFrame>> {
        let mut state = self.medium.lock();
        let Some(station) = state.stations.get_mut(&self.station) else {
            return Ok(None);
        };
        Ok(station.inbox.pop_front().map(|mut frame| {
            frame.bytes.truncate(max_len);
            frame
        }))
    }

    fn close(&self) {
        if let Some(station) = self.medium.lock().stations.get_mut(&self.station) {
            station.open = false;
            station.inbox.clear();
        }
    }
}
