mod support;

use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;

use heatpump_core::config::RuntimeConfig;
use heatpump_core::control::{ControlLoop, LinkStatus, LoopSettings};
use heatpump_core::relay::{RelayAction, RelayId};
use heatpump_core::retry::{Backoff, RetryPolicy};
use heatpump_core::sampler::SensorChannel;
use heatpump_core::state::AppState;
use heatpump_core::telemetry::{PublishError, PublishOutcome};

use support::test_io;

fn fresh_state() -> AppState<NoopRawMutex> {
    AppState::new(RuntimeConfig::default())
}

#[test]
fn relays_are_released_before_the_first_iteration() {
    let state = fresh_state();
    let (io, _) = test_io();
    let control = ControlLoop::new(&state, io, LoopSettings::default());

    let relays = &control.io().relays;
    assert_eq!(relays.releases, 1);
    assert_eq!(relays.writes, 0);
    assert_eq!(relays.heatpump, Some(RelayAction::ReleaseHigh));
    assert_eq!(relays.heatrod, Some(RelayAction::ReleaseHigh));
}

#[test]
fn idle_inputs_report_zero_power() {
    let state = fresh_state();
    let (io, _) = test_io();
    let mut control = ControlLoop::new(&state, io, LoopSettings::default());

    let report = block_on(control.run_iteration());

    assert_eq!(report.power.heatpump(), 0);
    assert_eq!(report.power.heatrod, 0);
    for reading in report.readings {
        assert_eq!((reading.min_raw, reading.max_raw), (2048, 2048));
        assert_eq!(reading.samples, 500);
    }
    assert_eq!(report.ct_raw, Some(2048));
    assert_eq!(state.power(), report.power);
}

#[test]
fn five_amps_on_every_phase_reads_3600_watts() {
    let state = fresh_state();
    let (mut io, _) = test_io();
    // 1759 counts of swing is 1.417 V, or ~5.003 A at the default slope.
    for channel in SensorChannel::HEATPUMP_PHASES {
        io.adc.set_swing(channel, 1169, 2928);
    }
    let mut control = ControlLoop::new(&state, io, LoopSettings::default());

    let report = block_on(control.run_iteration());

    assert_eq!(report.power.heatpump_l1, 1200);
    assert_eq!(report.power.heatpump_l2, 1200);
    assert_eq!(report.power.heatpump_l3, 1200);
    assert_eq!(report.power.heatpump(), 3600);
    assert_eq!(report.power.heatrod, 0);
}

#[test]
fn sampling_takes_one_window_per_input() {
    let state = fresh_state();
    let (io, time) = test_io();
    let settings = LoopSettings {
        debug_trace: false,
        ..LoopSettings::default()
    };
    let mut control = ControlLoop::new(&state, io, settings);

    let report = block_on(control.run_iteration());

    assert_eq!(report.at_ms, 2_000);
    assert_eq!(time.get(), 2_000);
    assert_eq!(report.ct_raw, None);
    assert_eq!(control.io().adc.conversions, 2_000);
}

#[test]
fn switch_change_reaches_only_its_relay_on_the_next_iteration() {
    let state = fresh_state();
    let (io, _) = test_io();
    let mut control = ControlLoop::new(&state, io, LoopSettings::default());

    block_on(control.run_iteration());
    assert_eq!(control.io().relays.heatpump, Some(RelayAction::AssertLow));
    assert_eq!(control.io().relays.heatrod, Some(RelayAction::AssertLow));

    state.set_switch(RelayId::Heatpump, false);
    let report = block_on(control.run_iteration());

    assert!(!report.switches.heatpump);
    assert_eq!(control.io().relays.heatpump, Some(RelayAction::ReleaseHigh));
    assert_eq!(control.io().relays.heatrod, Some(RelayAction::AssertLow));
    assert_eq!(control.io().relays.writes, 4);
}

#[test]
fn publishes_only_after_the_interval_has_elapsed() {
    let state = fresh_state();
    let (io, _) = test_io();
    let mut control = ControlLoop::new(&state, io, LoopSettings::default());

    let mut last_publish = 0_u64;
    let mut publications = 0;
    for _ in 0..24 {
        let report = block_on(control.run_iteration());
        let due = report.at_ms - last_publish >= 10_000;
        assert_eq!(report.publish.is_published(), due, "at {}", report.at_ms);
        if due {
            assert_eq!(report.link, LinkStatus::Up);
            last_publish = report.at_ms;
            publications += 1;
        } else {
            assert_eq!(report.publish, PublishOutcome::NotDue);
            assert_eq!(report.link, LinkStatus::Unchecked);
        }
    }

    let session = &control.io().session;
    assert_eq!(publications, 4);
    assert_eq!(session.published.len(), 4);
    assert_eq!(session.connects, 1);
    assert_eq!(session.client_ids, ["ESP-32"]);
    let (topic, payload) = &session.published[0];
    assert_eq!(topic, "heatpump");
    assert_eq!(
        payload,
        r#"{"sender":"ESP-32","heatpump":0,"heatpump_L1":0,"heatpump_L2":0,"heatpump_L3":0,"heatrod":0}"#
    );
}

#[test]
fn publish_interval_follows_configuration() {
    let mut config = RuntimeConfig::default();
    config.publish_interval_s = 2;
    let state: AppState<NoopRawMutex> = AppState::new(config);
    let (io, _) = test_io();
    let mut control = ControlLoop::new(&state, io, LoopSettings::default());

    let first = block_on(control.run_iteration());
    assert!(first.publish.is_published());
    let second = block_on(control.run_iteration());
    assert!(second.publish.is_published());
}

#[test]
fn downed_link_is_restored_before_publishing() {
    let mut config = RuntimeConfig::default();
    config.publish_interval_s = 1;
    let state: AppState<NoopRawMutex> = AppState::new(config);
    let (mut io, _) = test_io();
    io.link.up = false;
    io.link.failures_before_up = 2;
    let mut control = ControlLoop::new(&state, io, LoopSettings::default());

    let report = block_on(control.run_iteration());

    assert_eq!(report.link, LinkStatus::Restored { attempts: 3 });
    assert!(report.publish.is_published());
    assert_eq!(control.io().delay.slept_ms, 200);
    assert_eq!(control.io().link.reconnects, 3);
}

#[test]
fn bounded_link_retry_skips_the_publication() {
    let mut config = RuntimeConfig::default();
    config.publish_interval_s = 1;
    let state: AppState<NoopRawMutex> = AppState::new(config);
    let (mut io, _) = test_io();
    io.link.up = false;
    io.link.failures_before_up = u32::MAX;
    let settings = LoopSettings {
        link_retry: RetryPolicy::bounded(4, 250, Backoff::Fixed),
        ..LoopSettings::default()
    };
    let mut control = ControlLoop::new(&state, io, settings);

    let report = block_on(control.run_iteration());

    assert_eq!(report.link, LinkStatus::Down { attempts: 4 });
    assert_eq!(report.publish, PublishOutcome::Failed(PublishError::LinkDown));
    assert_eq!(control.io().session.connects, 0);
    assert_eq!(control.io().delay.slept_ms, 750);
}

#[test]
fn calibration_changes_apply_on_the_next_iteration() {
    let state = fresh_state();
    let (mut io, _) = test_io();
    io.adc.set_swing(SensorChannel::Heatrod, 1169, 2928);
    let mut control = ControlLoop::new(&state, io, LoopSettings::default());

    let before = block_on(control.run_iteration());
    assert_eq!(before.power.heatrod, 1200);

    let mut config = state.config();
    config.voltage = 120;
    state.commit_config(config);
    let after = block_on(control.run_iteration());
    assert_eq!(after.power.heatrod, 600);
}

#[test]
fn debug_trace_line_format() {
    let state = fresh_state();
    let (io, _) = test_io();
    let mut control = ControlLoop::new(&state, io, LoopSettings::default());
    state.set_switch(RelayId::Heatrod, false);

    let report = block_on(control.run_iteration());

    assert_eq!(
        format!("{report}"),
        "Heatpump -> ADC Value=2048 | L1=0W | L2=0W | L3=0W | Switch=1 | Heatrod=0W Switch=0"
    );
}
