//! Local detection sources
//!
//! A source is anything that can say "smoke or not" with a supporting
//! measurement: a gas sensor's ppm, a vision model's confidence. Drivers for
//! real hardware live outside this crate and publish through one of the
//! adapters here.

use crate::error::SourceError;
use sentinel_core::{SourceConfig, SourceKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

/// One pull from a source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionReading {
    pub detected: bool,
    /// Measurement or confidence backing the flag
    pub value: f64,
    pub timestamp: SystemTime,
}

impl DetectionReading {
    pub fn new(detected: bool, value: f64) -> Self {
        Self {
            detected,
            value,
            timestamp: SystemTime::now(),
        }
    }
}

pub trait DetectionSource: Send {
    fn name(&self) -> &str;

    /// How often the control loop should call [`read`](Self::read)
    fn poll_interval(&self) -> Duration;

    fn read(&mut self) -> Result<DetectionReading, SourceError>;
}

/// Build the source described by one `[[sources]]` entry.
pub fn from_config(config: &SourceConfig) -> Box<dyn DetectionSource> {
    match config.kind {
        SourceKind::File => Box::new(FileSource::from_config(config)),
    }
}

/// Reads a single numeric measurement from a file that an external driver
/// rewrites, and flags a detection when it reaches the threshold.
#[derive(Debug, Clone)]
pub struct FileSource {
    name: String,
    path: PathBuf,
    threshold: f64,
    poll_interval: Duration,
}

impl FileSource {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        threshold: f64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            threshold,
            poll_interval,
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(
            config.name.clone(),
            config.path.clone(),
            config.threshold,
            config.poll_interval(),
        )
    }
}

impl DetectionSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn read(&mut self) -> Result<DetectionReading, SourceError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| SourceError::Io {
            path: self.path.clone(),
            source,
        })?;
        let value: f64 = content
            .trim()
            .parse()
            .ok()
            .filter(|v: &f64| v.is_finite())
            .ok_or_else(|| SourceError::Parse {
                path: self.path.clone(),
                content: content.trim().to_string(),
            })?;

        Ok(DetectionReading::new(value >= self.threshold, value))
    }
}

/// Source whose reading is set programmatically through a [`ManualHandle`].
///
/// Used by simulations and tests, and as the bridge for in-process drivers.
#[derive(Debug)]
pub struct ManualSource {
    name: String,
    poll_interval: Duration,
    current: Arc<Mutex<(bool, f64)>>,
}

/// Setter side of a [`ManualSource`]
#[derive(Debug, Clone)]
pub struct ManualHandle {
    current: Arc<Mutex<(bool, f64)>>,
}

impl ManualSource {
    pub fn new(name: impl Into<String>, poll_interval: Duration) -> (Self, ManualHandle) {
        let current = Arc::new(Mutex::new((false, 0.0)));
        let source = Self {
            name: name.into(),
            poll_interval,
            current: Arc::clone(&current),
        };
        (source, ManualHandle { current })
    }
}

impl ManualHandle {
    pub fn set(&self, detected: bool, value: f64) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = (detected, value);
    }
}

impl DetectionSource for ManualSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn read(&mut self) -> Result<DetectionReading, SourceError> {
        let (detected, value) = *self.current.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(DetectionReading::new(detected, value))
    }
}
