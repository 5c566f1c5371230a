mod support;

use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;

use heatpump_core::command::{self, Command, CommandError, Effect, Reply};
use heatpump_core::config::{self, ConfigKey, RuntimeConfig};
use heatpump_core::control::{ControlLoop, LoopSettings};
use heatpump_core::relay::{RelayAction, RelayId};
use heatpump_core::sampler::SensorChannel;
use heatpump_core::state::AppState;

use support::{MemoryStore, MockReachability, test_io};

fn run(line: &str, state: &AppState<NoopRawMutex>, store: &mut MemoryStore) -> command::Response {
    let command = command::parse_request_line(line).expect("request should parse");
    block_on(command::execute(&command, state, store, &mut MockReachability::default()))
}

#[test]
fn heatrod_toggle_leaves_heatpump_relay_alone() {
    let state: AppState<NoopRawMutex> = AppState::new(RuntimeConfig::default());
    let mut store = MemoryStore::default();
    let (io, _) = test_io();
    let mut control = ControlLoop::new(&state, io, LoopSettings::default());
    block_on(control.run_iteration());

    let response = run("GET /switch_heatrod_off HTTP/1.1", &state, &mut store);
    assert_eq!(response.reply, Reply::Redirect { location: "/" });
    assert_eq!(
        response.effect,
        Effect::SwitchChanged {
            relay: RelayId::Heatrod,
            enabled: false
        }
    );

    block_on(control.run_iteration());
    assert_eq!(control.io().relays.heatrod, Some(RelayAction::ReleaseHigh));
    assert_eq!(control.io().relays.heatpump, Some(RelayAction::AssertLow));

    run("GET /switch_heatrod_on HTTP/1.1", &state, &mut store);
    block_on(control.run_iteration());
    assert_eq!(control.io().relays.heatrod, Some(RelayAction::AssertLow));
    assert_eq!(store.saves, 0, "switches are not persisted");
}

#[test]
fn saved_configuration_survives_a_reload() {
    let state: AppState<NoopRawMutex> = AppState::new(RuntimeConfig::default());
    let mut store = MemoryStore::default();

    let response = run(
        "GET /save-config?HOSTNAME=garage&MQTT_BROKER=10.0.0.5&VOLTAGE=230 HTTP/1.1",
        &state,
        &mut store,
    );
    assert_eq!(response.reply, Reply::Redirect { location: "/config" });
    assert!(matches!(response.effect, Effect::ConfigSaved { ref rejected } if rejected.is_empty()));

    let (reloaded, _) = config::load_or_default(&mut store);
    assert_eq!(reloaded, state.config());
    assert_eq!(reloaded.hostname.as_str(), "garage");
    assert_eq!(reloaded.broker.as_str(), "10.0.0.5");
    assert_eq!(reloaded.voltage, 230);
}

#[test]
fn escaped_characters_survive_save_and_reload() {
    let state: AppState<NoopRawMutex> = AppState::new(RuntimeConfig::default());
    let mut store = MemoryStore::default();

    run(
        "GET /save-config?EXTERNAL_URL=a%5Cb&HOSTNAME=pump+%22cellar%22 HTTP/1.1",
        &state,
        &mut store,
    );
    let (reloaded, _) = config::load_or_default(&mut store);
    assert_eq!(reloaded.external_url.as_str(), r"a\b");
    assert_eq!(reloaded.hostname.as_str(), r#"pump "cellar""#);

    // A second save of the reloaded values writes the same document.
    let first = store.document.clone();
    run("GET /save-config?VOLTAGE=240 HTTP/1.1", &state, &mut store);
    assert_eq!(store.document, first);
}

#[test]
fn check_reports_reachability_of_the_saved_url() {
    let state: AppState<NoopRawMutex> = AppState::new(RuntimeConfig::default());
    let mut store = MemoryStore::default();
    run("GET /save-config?EXTERNAL_URL=http%3A%2F%2Fexample.org%2F HTTP/1.1", &state, &mut store);

    let mut target = MockReachability {
        reachable: true,
        ..MockReachability::default()
    };
    let command = command::parse_request_line("GET /check HTTP/1.1").unwrap();
    let response = block_on(command::execute(&command, &state, &mut store, &mut target));

    assert_eq!(target.hosts, ["example.org"]);
    assert_eq!(response.effect, Effect::Checked { reachable: true });
    let Reply::Json(body) = response.reply else {
        panic!("expected json reply");
    };
    assert!(core::str::from_utf8(&body).unwrap().ends_with(r#""reachable":true}"#));
}

#[test]
fn new_voltage_takes_effect_on_the_next_iteration() {
    let state: AppState<NoopRawMutex> = AppState::new(RuntimeConfig::default());
    let mut store = MemoryStore::default();
    let (mut io, _) = test_io();
    io.adc.set_swing(SensorChannel::HeatpumpL2, 1169, 2928);
    let mut control = ControlLoop::new(&state, io, LoopSettings::default());

    assert_eq!(block_on(control.run_iteration()).power.heatpump_l2, 1200);
    run("GET /save-config?VOLTAGE=230", &state, &mut store);
    assert_eq!(block_on(control.run_iteration()).power.heatpump_l2, 1150);
}

#[test]
fn storage_failure_keeps_running_configuration() {
    let state: AppState<NoopRawMutex> = AppState::new(RuntimeConfig::default());
    let mut store = MemoryStore {
        fail_saves: true,
        ..MemoryStore::default()
    };

    let response = run("GET /save-config?MQTT_PUBLISH_TIME=1", &state, &mut store);

    assert!(matches!(response.effect, Effect::ConfigNotSaved { .. }));
    assert_eq!(state.config().publish_interval_s, 10);
}

#[test]
fn rejected_fields_are_reported() {
    let state: AppState<NoopRawMutex> = AppState::new(RuntimeConfig::default());
    let mut store = MemoryStore::default();

    let response = run(
        "GET /save-config?SCT_013_010_SLOPE=steep&SCT_013_010_OFFSET=0.1",
        &state,
        &mut store,
    );

    let Effect::ConfigSaved { rejected } = response.effect else {
        panic!("unexpected effect {:?}", response.effect);
    };
    assert_eq!(rejected.as_slice(), &[ConfigKey::Slope]);
    assert!((state.config().offset - 0.1).abs() < f32::EPSILON);
}

#[test]
fn power_meter_reflects_latest_iteration() {
    let state: AppState<NoopRawMutex> = AppState::new(RuntimeConfig::default());
    let mut store = MemoryStore::default();
    let (mut io, _) = test_io();
    io.adc.set_swing(SensorChannel::HeatpumpL1, 1169, 2928);
    let mut control = ControlLoop::new(&state, io, LoopSettings::default());
    block_on(control.run_iteration());

    let response = run("GET /power_meter HTTP/1.1", &state, &mut store);

    let Reply::Json(body) = response.reply else {
        panic!("expected json reply");
    };
    assert_eq!(
        core::str::from_utf8(&body).unwrap(),
        r#"{"power_heatpump":1200,"power_heatpump_L1":1200,"power_heatpump_L2":0,"power_heatpump_L3":0,"power_heatrod":0}"#
    );
}

#[test]
fn unknown_routes_and_methods_are_rejected() {
    assert_eq!(
        command::parse_request_line("GET /update HTTP/1.1"),
        Err(CommandError::NotFound)
    );
    assert_eq!(
        command::parse_request_line("DELETE / HTTP/1.1"),
        Err(CommandError::MethodNotAllowed)
    );
    assert_eq!(command::parse_target("/"), Ok(Command::Status));
}
