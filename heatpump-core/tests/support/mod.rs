#![allow(dead_code)]

use std::cell::Cell;
use std::rc::Rc;

use heatpump_core::command::Reachability;
use heatpump_core::config::{ConfigStore, StorageError};
use heatpump_core::control::{LoopIo, NetworkLink};
use heatpump_core::relay::{RelayAction, RelayDriver, RelayId};
use heatpump_core::retry::AsyncDelay;
use heatpump_core::sampler::{AdcReader, MonotonicClock, SensorChannel};
use heatpump_core::telemetry::BrokerSession;

pub type Millis = Rc<Cell<u64>>;

#[derive(Clone)]
pub struct MockClock(pub Millis);

impl MonotonicClock for MockClock {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }
}

/// Square wave per channel between a low and a high count; each conversion
/// costs one millisecond.
pub struct MockAdc {
    pub time: Millis,
    pub levels: [(u16, u16); 4],
    pub conversions: u64,
    toggle: bool,
}

impl MockAdc {
    pub fn flat(time: Millis, level: u16) -> Self {
        Self {
            time,
            levels: [(level, level); 4],
            conversions: 0,
            toggle: false,
        }
    }

    pub fn set_swing(&mut self, channel: SensorChannel, low: u16, high: u16) {
        self.levels[channel.as_index()] = (low, high);
    }
}

impl AdcReader for MockAdc {
    fn read_raw(&mut self, channel: SensorChannel) -> u16 {
        self.time.set(self.time.get() + 1);
        self.conversions += 1;
        self.toggle = !self.toggle;
        let (low, high) = self.levels[channel.as_index()];
        if self.toggle { high } else { low }
    }
}

#[derive(Default)]
pub struct MockRelays {
    pub heatpump: Option<RelayAction>,
    pub heatrod: Option<RelayAction>,
    pub writes: usize,
    pub releases: usize,
}

impl RelayDriver for MockRelays {
    fn apply(&mut self, relay: RelayId, action: RelayAction) {
        self.writes += 1;
        match relay {
            RelayId::Heatpump => self.heatpump = Some(action),
            RelayId::Heatrod => self.heatrod = Some(action),
        }
    }

    fn release_all(&mut self) {
        self.releases += 1;
        self.heatpump = Some(RelayAction::ReleaseHigh);
        self.heatrod = Some(RelayAction::ReleaseHigh);
    }
}

pub struct MockLink {
    pub up: bool,
    pub failures_before_up: u32,
    pub reconnects: u32,
}

impl MockLink {
    pub fn up() -> Self {
        Self {
            up: true,
            failures_before_up: 0,
            reconnects: 0,
        }
    }
}

impl NetworkLink for MockLink {
    type Error = &'static str;

    fn is_up(&self) -> bool {
        self.up
    }

    async fn reconnect(&mut self) -> Result<(), Self::Error> {
        self.reconnects += 1;
        if self.failures_before_up > 0 {
            self.failures_before_up -= 1;
            return Err("no carrier");
        }
        self.up = true;
        Ok(())
    }
}

#[derive(Default)]
pub struct MockSession {
    pub connected: bool,
    pub connects: u32,
    pub client_ids: Vec<String>,
    pub published: Vec<(String, String)>,
}

impl BrokerSession for MockSession {
    type Error = &'static str;

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self, _broker: &str, _port: u16, client_id: &str) -> Result<(), Self::Error> {
        self.connects += 1;
        self.client_ids.push(client_id.into());
        self.connected = true;
        Ok(())
    }

    async fn poll(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error> {
        let payload = String::from_utf8(payload.to_vec()).map_err(|_| "non-utf8 payload")?;
        self.published.push((topic.into(), payload));
        Ok(())
    }
}

/// Delay that advances the shared clock instead of sleeping.
pub struct MockDelay {
    pub time: Millis,
    pub slept_ms: u64,
}

impl AsyncDelay for MockDelay {
    async fn delay_ms(&mut self, ms: u32) {
        self.time.set(self.time.get() + u64::from(ms));
        self.slept_ms += u64::from(ms);
    }
}

/// Answers every reachability question the same way and logs the hosts.
#[derive(Default)]
pub struct MockReachability {
    pub reachable: bool,
    pub hosts: Vec<String>,
}

impl Reachability for MockReachability {
    async fn is_reachable(&mut self, host: &str) -> bool {
        self.hosts.push(host.into());
        self.reachable
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub document: Option<Vec<u8>>,
    pub fail_saves: bool,
    pub saves: u32,
}

impl ConfigStore for MemoryStore {
    fn load(&mut self, buf: &mut [u8]) -> Result<usize, StorageError> {
        let document = self.document.as_ref().ok_or(StorageError::NotFound)?;
        let dst = buf.get_mut(..document.len()).ok_or(StorageError::TooLarge)?;
        dst.copy_from_slice(document);
        Ok(document.len())
    }

    fn save(&mut self, document: &[u8]) -> Result<(), StorageError> {
        if self.fail_saves {
            return Err(StorageError::Io);
        }
        self.saves += 1;
        self.document = Some(document.to_vec());
        Ok(())
    }
}

pub type TestIo = LoopIo<MockAdc, MockClock, MockRelays, MockLink, MockSession, MockDelay>;

/// Loop collaborators sharing one simulated clock, idle 2048-count inputs and
/// a live link.
pub fn test_io() -> (TestIo, Millis) {
    let time: Millis = Rc::new(Cell::new(0));
    let io = LoopIo {
        adc: MockAdc::flat(time.clone(), 2048),
        clock: MockClock(time.clone()),
        relays: MockRelays::default(),
        link: MockLink::up(),
        session: MockSession::default(),
        delay: MockDelay {
            time: time.clone(),
            slept_ms: 0,
        },
    };
    (io, time)
}
