use std::cell::Cell;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::rc::Rc;

use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use heatpump_core::command::{self, CommandError, Effect, Reply};
use heatpump_core::config::{self, RuntimeConfig};
use heatpump_core::control::{ControlLoop, IterationReport, LoopIo, LoopSettings, NetworkLink};
use heatpump_core::relay::{RelayAction, RelayId};
use heatpump_core::retry::{AsyncDelay, Backoff, RetryPolicy};
use heatpump_core::sampler::SensorChannel;
use heatpump_core::state::AppState;
use heatpump_core::telemetry::PublishOutcome;

use crate::sim::{
    FileStore, SimAdc, SimBroker, SimClock, SimDelay, SimLink, SimRelays, Unreachable, VirtualTime,
};

const MAX_TICKS: u32 = 3_600;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    (
        "tick",
        "tick [n]                      - run n control-loop iterations (default 1)",
    ),
    (
        "load",
        "load <L1|L2|L3|heatrod> <amps> - set the current seen by a CT input",
    ),
    (
        "link",
        "link up|down                  - plug or unplug the network link",
    ),
    (
        "broker",
        "broker up|down                - start or stop the MQTT broker",
    ),
    (
        "request",
        "/<route>[?query] | GET ...    - issue an HTTP request to the monitor",
    ),
    (
        "status",
        "status                        - display switches, relays and power",
    ),
    (
        "help",
        "help [topic]                  - show help for a command",
    ),
];

type SimLoop = ControlLoop<'static, NoopRawMutex, SimAdc, SimClock, SimRelays, SimLink, SimBroker, SimDelay>;

pub struct Session {
    state: &'static AppState<NoopRawMutex>,
    control: SimLoop,
    store: FileStore,
    time: VirtualTime,
    transcript: Transcript,
}

impl Session {
    pub fn new(config_path: &Path, transcript: Option<&Path>) -> io::Result<Self> {
        let mut store = FileStore::new(config_path);
        let (config, outcome) = config::load_or_default(&mut store);
        let state: &'static AppState<NoopRawMutex> = Box::leak(Box::new(AppState::new(config)));

        let time: VirtualTime = Rc::new(Cell::new(0));
        let io = LoopIo {
            adc: SimAdc::new(time.clone()),
            clock: SimClock(time.clone()),
            relays: SimRelays::default(),
            link: SimLink::default(),
            session: SimBroker::default(),
            delay: SimDelay(time.clone()),
        };
        // Bounded retries so a downed peer cannot wedge the prompt.
        let settings = LoopSettings {
            link_retry: RetryPolicy::bounded(
                5,
                100,
                Backoff::Exponential {
                    factor: 2,
                    max_delay_ms: 1_000,
                },
            ),
            broker_retry: RetryPolicy::bounded(3, 250, Backoff::Fixed),
            ..LoopSettings::default()
        };
        let control = ControlLoop::new(state, io, settings);

        let mut transcript = Transcript::open(transcript)?;
        transcript.append(
            TranscriptRole::Emulator,
            &format!("config {} ({outcome})", store.path().display()),
        )?;

        Ok(Self {
            state,
            control,
            store,
            time,
            transcript,
        })
    }

    pub fn startup_lines(&self) -> Vec<String> {
        let config = self.state.config();
        vec![
            format!("config file {}", self.store.path().display()),
            format!(
                "host={} broker={} interval={}s voltage={}V",
                config.hostname, config.broker, config.publish_interval_s, config.voltage
            ),
        ]
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        self.transcript.append(TranscriptRole::Host, trimmed)?;

        let mut words = trimmed.split_whitespace();
        let head = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();

        let lines = if head.starts_with('/') {
            self.handle_request(command::parse_target(head))
        } else if head.eq_ignore_ascii_case("get") || head.eq_ignore_ascii_case("post") {
            self.handle_request(command::parse_request_line(trimmed))
        } else if head.eq_ignore_ascii_case("help") {
            handle_help(args.first().copied())
        } else if head.eq_ignore_ascii_case("tick") {
            self.handle_tick(&args)
        } else if head.eq_ignore_ascii_case("load") {
            self.handle_load(&args)
        } else if head.eq_ignore_ascii_case("link") {
            self.handle_link(&args)
        } else if head.eq_ignore_ascii_case("broker") {
            self.handle_broker(&args)
        } else if head.eq_ignore_ascii_case("status") {
            self.handle_status()
        } else {
            vec![format!("ERR unknown command `{head}` (try `help`)")]
        };

        for line in &lines {
            self.transcript.append(TranscriptRole::Emulator, line)?;
        }
        Ok(lines)
    }

    fn handle_tick(&mut self, args: &[&str]) -> Vec<String> {
        let count = match args.first().map(|raw| raw.parse::<u32>()) {
            None => 1,
            Some(Ok(count)) if (1..=MAX_TICKS).contains(&count) => count,
            Some(_) => return vec![format!("ERR tick count must be 1..={MAX_TICKS}")],
        };

        let mut lines = Vec::new();
        for _ in 0..count {
            let before = self.relay_levels();
            let report = block_on(self.control.run_iteration());
            self.describe_iteration(&report, before, &mut lines);
            let pause = self.control.settings().loop_delay_ms;
            block_on(self.control.io_mut().delay.delay_ms(pause));
        }
        lines
    }

    fn describe_iteration(
        &mut self,
        report: &IterationReport<Unreachable>,
        before: [Option<RelayAction>; 2],
        lines: &mut Vec<String>,
    ) {
        let at = format_clock(report.at_ms);
        for (relay, previous) in RelayId::ALL.into_iter().zip(before) {
            let level = self.control.io().relays.level(relay);
            if level != previous {
                lines.push(format!("{at} relay {relay} {}", action_label(level)));
            }
        }
        if self.control.settings().debug_trace {
            lines.push(format!("{at} {report}"));
        }
        for (topic, payload) in self.control.io_mut().session.drain() {
            lines.push(format!("{at} mqtt {topic} {payload}"));
        }
        match &report.publish {
            PublishOutcome::NotDue | PublishOutcome::Published { .. } => {}
            PublishOutcome::Failed(err) => lines.push(format!("{at} publish failed: {err}")),
        }
    }

    fn handle_request(&mut self, parsed: Result<command::Command, CommandError>) -> Vec<String> {
        let command = match parsed {
            Ok(command) => command,
            Err(err) => return vec![format!("HTTP {} {err}", status_code(err))],
        };

        let response = block_on(command::execute(
            &command,
            self.state,
            &mut self.store,
            &mut self.control.io_mut().link,
        ));
        let mut lines = match &response.reply {
            Reply::Redirect { location } => vec![format!("HTTP 303 -> {location}")],
            Reply::Json(body) => vec![
                "HTTP 200".to_string(),
                String::from_utf8_lossy(body).into_owned(),
            ],
            Reply::Unavailable => vec!["HTTP 500 response unavailable".to_string()],
        };
        match response.effect {
            Effect::None => {}
            Effect::SwitchChanged { relay, enabled } => {
                lines.push(format!("switch {relay} -> {}", on_off(enabled)));
            }
            Effect::ConfigSaved { rejected } => {
                lines.push("configuration saved".to_string());
                for key in rejected {
                    lines.push(format!("  ignored invalid {key}"));
                }
            }
            Effect::ConfigNotSaved { error, rejected } => {
                lines.push(format!("configuration not saved: {error}"));
                for key in rejected {
                    lines.push(format!("  ignored invalid {key}"));
                }
            }
            Effect::Checked { reachable } => {
                lines.push(format!(
                    "external host {}",
                    if reachable { "reachable" } else { "unreachable" }
                ));
            }
        }
        lines
    }

    fn handle_load(&mut self, args: &[&str]) -> Vec<String> {
        let [name, amps] = args else {
            return vec!["ERR usage: load <L1|L2|L3|heatrod> <amps>".to_string()];
        };
        let Some(channel) = SensorChannel::ALL
            .into_iter()
            .find(|channel| channel.label().eq_ignore_ascii_case(name))
        else {
            return vec![format!("ERR unknown input `{name}`")];
        };
        let amps = match amps.parse::<f32>() {
            Ok(amps) if amps.is_finite() && amps >= 0.0 => amps,
            _ => return vec![format!("ERR invalid current `{amps}`")],
        };

        let calibration = self.state.with_config(RuntimeConfig::calibration);
        self.control
            .io_mut()
            .adc
            .set_load(channel, amps, calibration);
        vec![format!("{channel} load set to {amps:.2} A")]
    }

    fn handle_link(&mut self, args: &[&str]) -> Vec<String> {
        let link = &mut self.control.io_mut().link;
        match args {
            [state] if state.eq_ignore_ascii_case("up") => {
                link.available = true;
                vec!["link available; reconnects before the next publication".to_string()]
            }
            [state] if state.eq_ignore_ascii_case("down") => {
                link.unplug();
                vec!["link down".to_string()]
            }
            _ => vec!["ERR usage: link up|down".to_string()],
        }
    }

    fn handle_broker(&mut self, args: &[&str]) -> Vec<String> {
        let broker = &mut self.control.io_mut().session;
        match args {
            [state] if state.eq_ignore_ascii_case("up") => {
                broker.available = true;
                vec!["broker accepting connections".to_string()]
            }
            [state] if state.eq_ignore_ascii_case("down") => {
                broker.go_down();
                vec!["broker stopped".to_string()]
            }
            _ => vec!["ERR usage: broker up|down".to_string()],
        }
    }

    fn handle_status(&self) -> Vec<String> {
        let switches = self.state.switches();
        let power = self.state.power();
        let io = self.control.io();
        let mut lines = vec![format!("clock {}", format_clock(self.time.get()))];
        for relay in RelayId::ALL {
            lines.push(format!(
                "  {relay}: switch {} relay {}",
                on_off(switches.get(relay)),
                action_label(io.relays.level(relay))
            ));
        }
        lines.push(format!("  power {power}"));
        lines.push(format!(
            "  link {} broker {}",
            if io.link.is_up() {
                "up"
            } else {
                "down"
            },
            io.session.client_id().unwrap_or("disconnected")
        ));
        lines
    }

    fn relay_levels(&self) -> [Option<RelayAction>; 2] {
        let relays = &self.control.io().relays;
        [relays.level(RelayId::Heatpump), relays.level(RelayId::Heatrod)]
    }
}

fn handle_help(topic: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    match topic {
        Some(target) => {
            if let Some((_, detail)) = HELP_TOPICS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(target))
            {
                lines.push((*detail).to_string());
            } else {
                lines.push(format!("No help available for `{target}`."));
                lines.push(format!("Available topics: {}", help_topic_list()));
            }
        }
        None => {
            lines.push("Available commands:".to_string());
            for (_, detail) in HELP_TOPICS {
                lines.push(format!("  {detail}"));
            }
            lines.push("Type `help <topic>` for a specific command.".to_string());
        }
    }
    lines
}

fn help_topic_list() -> String {
    HELP_TOPICS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn status_code(err: CommandError) -> u16 {
    match err {
        CommandError::NotFound => 404,
        CommandError::MethodNotAllowed => 405,
        CommandError::Malformed => 400,
    }
}

fn action_label(action: Option<RelayAction>) -> &'static str {
    match action {
        Some(RelayAction::AssertLow) => "assert-low",
        Some(RelayAction::ReleaseHigh) => "release-high",
        None => "floating",
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

fn format_clock(ms: u64) -> String {
    format!("[{:>6}.{:03}s]", ms / 1_000, ms % 1_000)
}

#[derive(Clone, Copy)]
enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

/// Optional log of every exchange at the prompt.
struct Transcript {
    writer: Option<BufWriter<fs::File>>,
}

impl Transcript {
    fn open(path: Option<&Path>) -> io::Result<Self> {
        let Some(path) = path else {
            return Ok(Self { writer: None });
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Some(BufWriter::new(file)),
        })
    }

    fn append(&mut self, role: TranscriptRole, line: &str) -> io::Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{} {line}", role.prefix())?;
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "heatpump-session-{}-{name}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn first_tick_engages_both_relays() {
        let dir = scratch("tick");
        let mut session = Session::new(&dir.join("config.json"), None).unwrap();

        let lines = session.handle_command("tick").unwrap();

        assert!(lines.iter().any(|line| line.ends_with("relay heatpump assert-low")));
        assert!(lines.iter().any(|line| line.ends_with("relay heatrod assert-low")));
        assert!(lines.iter().any(|line| line.contains("Heatpump -> ADC Value=2048")));
    }

    #[test]
    fn loaded_phase_is_published_after_the_interval() {
        let dir = scratch("publish");
        let mut session = Session::new(&dir.join("config.json"), None).unwrap();

        session.handle_command("load L1 5").unwrap();
        let lines = session.handle_command("tick 4").unwrap();

        let published: Vec<_> = lines.iter().filter(|line| line.contains(" mqtt ")).collect();
        assert_eq!(published.len(), 1, "{lines:#?}");
        assert!(published[0].contains(r#""heatpump_L1":1199,"#), "{}", published[0]);
    }

    #[test]
    fn broker_outage_reports_failed_publication() {
        let dir = scratch("outage");
        let mut session = Session::new(&dir.join("config.json"), None).unwrap();

        session.handle_command("broker down").unwrap();
        let lines = session.handle_command("tick 4").unwrap();

        assert!(lines.iter().any(|line| line.contains("publish failed")), "{lines:#?}");
    }

    #[test]
    fn saved_configuration_is_written_to_the_file() {
        let dir = scratch("save");
        let path = dir.join("config.json");
        let mut session = Session::new(&path, None).unwrap();

        let lines = session
            .handle_command("/save-config?HOSTNAME=loft&VOLTAGE=abc")
            .unwrap();

        assert_eq!(lines[0], "HTTP 303 -> /config");
        assert!(lines.contains(&"  ignored invalid VOLTAGE".to_string()));
        let reloaded = Session::new(&path, None).unwrap();
        assert_eq!(reloaded.state.config().hostname.as_str(), "loft");
    }

    #[test]
    fn switch_route_and_unknown_route() {
        let dir = scratch("routes");
        let mut session = Session::new(&dir.join("config.json"), None).unwrap();

        let off = session.handle_command("GET /switch_heatpump_off HTTP/1.1").unwrap();
        assert_eq!(off, ["HTTP 303 -> /", "switch heatpump -> off"]);

        let missing = session.handle_command("/reboot").unwrap();
        assert_eq!(missing.len(), 1);
        assert!(missing[0].starts_with("HTTP 404"));
    }

    #[test]
    fn check_follows_the_link() {
        let dir = scratch("check");
        let mut session = Session::new(&dir.join("config.json"), None).unwrap();

        let up = session.handle_command("/check").unwrap();
        assert_eq!(up[0], "HTTP 200");
        assert!(up[1].contains(r#""reachable":true"#), "{up:#?}");
        assert_eq!(up[2], "external host reachable");

        session.handle_command("link down").unwrap();
        let down = session.handle_command("/check").unwrap();
        assert_eq!(down[2], "external host unreachable");
    }
}
