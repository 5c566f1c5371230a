#![no_std]

//! Shared logic for the heat-pump power monitor.
//!
//! Sampling, power estimation, relay policy, telemetry and the command
//! interface all live here behind small hardware traits, so the firmware and
//! the host emulator run the same code.

pub mod command;
pub mod config;
pub mod control;
pub mod current;
pub mod power;
pub mod relay;
pub mod retry;
pub mod sampler;
pub mod state;
pub mod telemetry;

/// Firmware version reported on the status route.
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");
