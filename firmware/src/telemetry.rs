#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Loop observer and logging helpers.
//!
//! Log lines go to defmt on the target and to stdout on the host, mirroring
//! each other so host tests exercise the same formatting paths.

use core::fmt;

use heatpump_core::command::{CommandError, Effect};
use heatpump_core::config::{LoadOutcome, RuntimeConfig};
use heatpump_core::control::{IterationReport, LinkStatus, LoopObserver};
use heatpump_core::telemetry::PublishOutcome;

/// Turns loop reports into log lines and keeps running counters.
#[derive(Debug, Default)]
pub struct LogObserver {
    debug_trace: bool,
    pub iterations: u32,
    pub publications: u32,
    pub failed_publications: u32,
    pub link_restores: u32,
}

impl LogObserver {
    pub const fn new(debug_trace: bool) -> Self {
        Self {
            debug_trace,
            iterations: 0,
            publications: 0,
            failed_publications: 0,
            link_restores: 0,
        }
    }
}

impl<E: fmt::Debug> LoopObserver<E> for LogObserver {
    fn on_iteration(&mut self, report: &IterationReport<E>) {
        self.iterations = self.iterations.wrapping_add(1);
        if self.debug_trace {
            log_trace(report);
        }

        match report.link {
            LinkStatus::Restored { attempts } => {
                self.link_restores = self.link_restores.wrapping_add(1);
                log_link_restored(attempts);
            }
            LinkStatus::Down { attempts } => log_link_down(attempts),
            LinkStatus::Unchecked | LinkStatus::Up => {}
        }

        match &report.publish {
            PublishOutcome::NotDue => {}
            PublishOutcome::Published { bytes } => {
                self.publications = self.publications.wrapping_add(1);
                log_published(report.at_ms, *bytes);
            }
            PublishOutcome::Failed(error) => {
                self.failed_publications = self.failed_publications.wrapping_add(1);
                log_publish_failed(report.at_ms, error);
            }
        }
    }
}

/// Reports where the startup configuration came from.
pub fn log_config_loaded(outcome: LoadOutcome, config: &RuntimeConfig) {
    log_config(outcome, config);
}

/// Reports the side effect of a served command.
pub fn log_command_effect(effect: &Effect) {
    match effect {
        Effect::None => {}
        Effect::SwitchChanged { relay, enabled } => log_switch(relay.label(), *enabled),
        Effect::ConfigSaved { rejected } => {
            log_config_saved();
            for key in rejected {
                log_rejected_field(key.name());
            }
        }
        Effect::ConfigNotSaved { error, rejected } => {
            log_config_not_saved(error);
            for key in rejected {
                log_rejected_field(key.name());
            }
        }
        Effect::Checked { reachable } => log_checked(*reachable),
    }
}

pub fn log_request_rejected(error: CommandError) {
    log_rejected_request(&error);
}

#[cfg(target_os = "none")]
mod sink {
    use core::fmt;

    use defmt::Display2Format;

    use super::{IterationReport, LoadOutcome, RuntimeConfig};

    pub(super) fn log_trace<E: fmt::Debug>(report: &IterationReport<E>) {
        defmt::info!("{}", Display2Format(report));
    }

    pub(super) fn log_link_restored(attempts: u32) {
        defmt::info!("net: link restored after {} attempts", attempts);
    }

    pub(super) fn log_link_down(attempts: u32) {
        defmt::warn!("net: link still down after {} attempts", attempts);
    }

    pub(super) fn log_published(at_ms: u64, bytes: usize) {
        defmt::info!("mqtt: published {} bytes t={}ms", bytes, at_ms);
    }

    pub(super) fn log_publish_failed(at_ms: u64, error: &dyn fmt::Display) {
        defmt::warn!("mqtt: publish skipped t={}ms: {}", at_ms, Display2Format(error));
    }

    pub(super) fn log_config(outcome: LoadOutcome, config: &RuntimeConfig) {
        defmt::info!(
            "config: {} host={} broker={} interval={}s voltage={}V",
            Display2Format(&outcome),
            config.hostname.as_str(),
            config.broker.as_str(),
            config.publish_interval_s,
            config.voltage
        );
    }

    pub(super) fn log_switch(relay: &'static str, enabled: bool) {
        defmt::info!("http: switch {} -> {}", relay, enabled);
    }

    pub(super) fn log_config_saved() {
        defmt::info!("http: configuration saved");
    }

    pub(super) fn log_config_not_saved(error: &dyn fmt::Display) {
        defmt::error!("http: configuration not saved: {}", Display2Format(error));
    }

    pub(super) fn log_rejected_field(key: &'static str) {
        defmt::warn!("http: ignored invalid value for {}", key);
    }

    pub(super) fn log_rejected_request(error: &dyn fmt::Display) {
        defmt::warn!("http: request rejected: {}", Display2Format(error));
    }

    pub(super) fn log_checked(reachable: bool) {
        defmt::info!("http: external host reachable={}", reachable);
    }
}

#[cfg(not(target_os = "none"))]
mod sink {
    use core::fmt;

    use super::{IterationReport, LoadOutcome, RuntimeConfig};

    pub(super) fn log_trace<E: fmt::Debug>(report: &IterationReport<E>) {
        println!("{report}");
    }

    pub(super) fn log_link_restored(attempts: u32) {
        println!("net: link restored after {attempts} attempts");
    }

    pub(super) fn log_link_down(attempts: u32) {
        println!("net: link still down after {attempts} attempts");
    }

    pub(super) fn log_published(at_ms: u64, bytes: usize) {
        println!("mqtt: published {bytes} bytes t={at_ms}ms");
    }

    pub(super) fn log_publish_failed(at_ms: u64, error: &dyn fmt::Display) {
        println!("mqtt: publish skipped t={at_ms}ms: {error}");
    }

    pub(super) fn log_config(outcome: LoadOutcome, config: &RuntimeConfig) {
        println!(
            "config: {outcome} host={} broker={} interval={}s voltage={}V",
            config.hostname, config.broker, config.publish_interval_s, config.voltage
        );
    }

    pub(super) fn log_switch(relay: &'static str, enabled: bool) {
        println!("http: switch {relay} -> {enabled}");
    }

    pub(super) fn log_config_saved() {
        println!("http: configuration saved");
    }

    pub(super) fn log_config_not_saved(error: &dyn fmt::Display) {
        println!("http: configuration not saved: {error}");
    }

    pub(super) fn log_rejected_field(key: &'static str) {
        println!("http: ignored invalid value for {key}");
    }

    pub(super) fn log_rejected_request(error: &dyn fmt::Display) {
        println!("http: request rejected: {error}");
    }

    pub(super) fn log_checked(reachable: bool) {
        println!("http: external host reachable={reachable}");
    }
}

use sink::{
    log_checked, log_config, log_config_not_saved, log_config_saved, log_link_down,
    log_link_restored, log_publish_failed, log_published, log_rejected_field,
    log_rejected_request, log_switch, log_trace,
};
