//! Application state shared by the control loop and the command interface.
//!
//! Switches and power values are plain atomics; readers may observe a power
//! snapshot whose channels come from two consecutive iterations, which is
//! acceptable for display and telemetry. The configuration sits behind a
//! blocking mutex so a command never sees a half-written string.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use portable_atomic::{AtomicBool, AtomicI32, Ordering};

use crate::config::RuntimeConfig;
use crate::power::PowerState;
use crate::relay::{RelayId, SwitchState};

pub struct AppState<M: RawMutex> {
    config: Mutex<M, RefCell<RuntimeConfig>>,
    heatpump_enabled: AtomicBool,
    heatrod_enabled: AtomicBool,
    heatpump_l1: AtomicI32,
    heatpump_l2: AtomicI32,
    heatpump_l3: AtomicI32,
    heatrod: AtomicI32,
}

impl<M: RawMutex> AppState<M> {
    /// State with `config` loaded, switches enabled and zero power.
    #[must_use]
    pub const fn new(config: RuntimeConfig) -> Self {
        Self {
            config: Mutex::new(RefCell::new(config)),
            heatpump_enabled: AtomicBool::new(true),
            heatrod_enabled: AtomicBool::new(true),
            heatpump_l1: AtomicI32::new(0),
            heatpump_l2: AtomicI32::new(0),
            heatpump_l3: AtomicI32::new(0),
            heatrod: AtomicI32::new(0),
        }
    }

    /// Copy of the current configuration.
    pub fn config(&self) -> RuntimeConfig {
        self.config.lock(|cell| cell.borrow().clone())
    }

    /// Runs `f` against the configuration without copying it.
    pub fn with_config<R>(&self, f: impl FnOnce(&RuntimeConfig) -> R) -> R {
        self.config.lock(|cell| f(&cell.borrow()))
    }

    /// Replaces the in-memory configuration. Callers persist first.
    pub fn commit_config(&self, config: RuntimeConfig) {
        self.config.lock(|cell| *cell.borrow_mut() = config);
    }

    pub fn switches(&self) -> SwitchState {
        SwitchState::new(
            self.heatpump_enabled.load(Ordering::Relaxed),
            self.heatrod_enabled.load(Ordering::Relaxed),
        )
    }

    pub fn set_switch(&self, relay: RelayId, enabled: bool) {
        let cell = match relay {
            RelayId::Heatpump => &self.heatpump_enabled,
            RelayId::Heatrod => &self.heatrod_enabled,
        };
        cell.store(enabled, Ordering::Relaxed);
    }

    pub fn power(&self) -> PowerState {
        PowerState {
            heatpump_l1: self.heatpump_l1.load(Ordering::Relaxed),
            heatpump_l2: self.heatpump_l2.load(Ordering::Relaxed),
            heatpump_l3: self.heatpump_l3.load(Ordering::Relaxed),
            heatrod: self.heatrod.load(Ordering::Relaxed),
        }
    }

    /// Publishes the control loop's latest readings.
    pub fn record_power(&self, power: &PowerState) {
        self.heatpump_l1.store(power.heatpump_l1, Ordering::Relaxed);
        self.heatpump_l2.store(power.heatpump_l2, Ordering::Relaxed);
        self.heatpump_l3.store(power.heatpump_l3, Ordering::Relaxed);
        self.heatrod.store(power.heatrod, Ordering::Relaxed);
    }
}
