//! Simulated peripherals for the host emulator.
//!
//! Everything shares one virtual millisecond clock: a conversion costs one
//! millisecond and delays advance it, so a loop iteration takes the same
//! virtual time it would on the board without the host actually sleeping.

use std::cell::Cell;
use std::f32::consts::PI;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::rc::Rc;

use heatpump_core::command::Reachability;
use heatpump_core::config::{ConfigStore, StorageError};
use heatpump_core::control::NetworkLink;
use heatpump_core::current::{ADC_FULL_SCALE, ADC_REFERENCE_VOLTS, Calibration};
use heatpump_core::relay::{RelayAction, RelayDriver, RelayId};
use heatpump_core::retry::AsyncDelay;
use heatpump_core::sampler::{AdcReader, MonotonicClock, SensorChannel};
use heatpump_core::telemetry::BrokerSession;

const MAINS_HZ: f32 = 50.0;
const MIDPOINT: f32 = 2048.0;

pub type VirtualTime = Rc<Cell<u64>>;

#[derive(Clone)]
pub struct SimClock(pub VirtualTime);

impl MonotonicClock for SimClock {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }
}

/// CT inputs as 50 Hz sines around mid-scale.
pub struct SimAdc {
    time: VirtualTime,
    amplitudes: [f32; 4],
}

impl SimAdc {
    pub fn new(time: VirtualTime) -> Self {
        Self {
            time,
            amplitudes: [0.0; 4],
        }
    }

    /// Sets the sine amplitude that makes `channel` read `amps` under
    /// `calibration`.
    pub fn set_load(&mut self, channel: SensorChannel, amps: f32, calibration: Calibration) {
        let amplitude = if amps <= 0.0 || calibration.slope <= 0.0 {
            0.0
        } else {
            let swing_volts = (amps - calibration.offset).max(0.0) / calibration.slope;
            swing_volts / ADC_REFERENCE_VOLTS * ADC_FULL_SCALE / 2.0
        };
        self.amplitudes[channel.as_index()] = amplitude.min(MIDPOINT);
    }
}

impl AdcReader for SimAdc {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn read_raw(&mut self, channel: SensorChannel) -> u16 {
        let now = self.time.get() + 1;
        self.time.set(now);
        let phase = 2.0 * PI * MAINS_HZ * (now % 1_000) as f32 / 1_000.0;
        let value = MIDPOINT + self.amplitudes[channel.as_index()] * phase.sin();
        value.round().clamp(0.0, ADC_FULL_SCALE - 1.0) as u16
    }
}

/// Relay lines as plain levels.
#[derive(Default)]
pub struct SimRelays {
    pub heatpump: Option<RelayAction>,
    pub heatrod: Option<RelayAction>,
}

impl SimRelays {
    pub fn level(&self, relay: RelayId) -> Option<RelayAction> {
        match relay {
            RelayId::Heatpump => self.heatpump,
            RelayId::Heatrod => self.heatrod,
        }
    }
}

impl RelayDriver for SimRelays {
    fn apply(&mut self, relay: RelayId, action: RelayAction) {
        match relay {
            RelayId::Heatpump => self.heatpump = Some(action),
            RelayId::Heatrod => self.heatrod = Some(action),
        }
    }

    fn release_all(&mut self) {
        self.heatpump = Some(RelayAction::ReleaseHigh);
        self.heatrod = Some(RelayAction::ReleaseHigh);
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Unreachable;

/// Network link that can be unplugged from the prompt.
pub struct SimLink {
    pub available: bool,
    up: bool,
}

impl Default for SimLink {
    fn default() -> Self {
        Self {
            available: true,
            up: true,
        }
    }
}

impl SimLink {
    pub fn unplug(&mut self) {
        self.available = false;
        self.up = false;
    }
}

impl NetworkLink for SimLink {
    type Error = Unreachable;

    fn is_up(&self) -> bool {
        self.up
    }

    async fn reconnect(&mut self) -> Result<(), Self::Error> {
        if self.available {
            self.up = true;
            Ok(())
        } else {
            Err(Unreachable)
        }
    }
}

/// Any host answers while the link is plugged in.
impl Reachability for SimLink {
    async fn is_reachable(&mut self, _host: &str) -> bool {
        self.available
    }
}

/// In-memory broker that collects publications.
pub struct SimBroker {
    pub available: bool,
    connected: bool,
    client_id: String,
    outbox: Vec<(String, String)>,
}

impl Default for SimBroker {
    fn default() -> Self {
        Self {
            available: true,
            connected: false,
            client_id: String::new(),
            outbox: Vec::new(),
        }
    }
}

impl SimBroker {
    pub fn go_down(&mut self) {
        self.available = false;
        self.connected = false;
    }

    pub fn client_id(&self) -> Option<&str> {
        self.connected.then_some(self.client_id.as_str())
    }

    pub fn drain(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.outbox)
    }
}

impl BrokerSession for SimBroker {
    type Error = Unreachable;

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self, broker: &str, port: u16, client_id: &str) -> Result<(), Self::Error> {
        if !self.available {
            return Err(Unreachable);
        }
        self.connected = true;
        self.client_id = format!("{client_id}@{broker}:{port}");
        Ok(())
    }

    async fn poll(&mut self) -> Result<(), Self::Error> {
        if self.available {
            Ok(())
        } else {
            self.connected = false;
            Err(Unreachable)
        }
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(Unreachable);
        }
        self.outbox
            .push((topic.to_owned(), String::from_utf8_lossy(payload).into_owned()));
        Ok(())
    }
}

pub struct SimDelay(pub VirtualTime);

impl AsyncDelay for SimDelay {
    async fn delay_ms(&mut self, ms: u32) {
        self.0.set(self.0.get() + u64::from(ms));
    }
}

/// Configuration document kept in a JSON file next to the emulator.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl ConfigStore for FileStore {
    fn load(&mut self, buf: &mut [u8]) -> Result<usize, StorageError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Err(StorageError::NotFound),
            Err(_) => return Err(StorageError::Io),
        };
        let dst = buf.get_mut(..bytes.len()).ok_or(StorageError::TooLarge)?;
        dst.copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    fn save(&mut self, document: &[u8]) -> Result<(), StorageError> {
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, document).map_err(|_| StorageError::Io)?;
        fs::rename(&staging, &self.path).map_err(|_| StorageError::Io)
    }
}
