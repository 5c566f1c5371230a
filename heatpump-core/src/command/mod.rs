//! Command and query interface.
//!
//! Requests are parsed into [`Command`] values by [`grammar`] and executed
//! against the shared [`AppState`] by [`execute`]. Execution never fails
//! outward: invalid fields are skipped, a failed save keeps the previous
//! configuration, an unreachable host is an answer rather than an error, and
//! everything noteworthy is returned as an [`Effect`] for the caller to log.

pub mod grammar;

use core::fmt;

use embassy_sync::blocking_mutex::raw::RawMutex;
use heapless::{String, Vec};
use serde::Serialize;

use crate::FIRMWARE_VERSION;
use crate::config::{self, ConfigError, ConfigKey, ConfigStore, MAX_DOCUMENT_LEN, RuntimeConfig};
use crate::relay::RelayId;
use crate::state::AppState;
use crate::telemetry;

pub use grammar::{decode_component, parse_request_line, parse_target};

/// Longest accepted field value after percent-decoding.
pub const VALUE_CAPACITY: usize = config::URL_CAPACITY;
/// Distinct keys one configuration update can carry.
pub const MAX_ASSIGNMENTS: usize = ConfigKey::ALL.len();
/// Largest response body produced by [`execute`].
pub const RESPONSE_CAPACITY: usize = MAX_DOCUMENT_LEN;

/// Parsed request.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Switch { relay: RelayId, enabled: bool },
    SaveConfig(ConfigUpdate),
    PowerMeter,
    Config,
    Status,
    /// Reachability of the configured external URL.
    Check,
}

/// Raw value of one submitted field.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FieldValue {
    Text(String<VALUE_CAPACITY>),
    /// Missing `=value`, a bad percent escape, or too long to hold.
    Undecodable,
}

/// Ordered field assignments from a configuration-update request.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigUpdate {
    assignments: Vec<(ConfigKey, FieldValue), MAX_ASSIGNMENTS>,
}

impl ConfigUpdate {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            assignments: Vec::new(),
        }
    }

    /// Records an assignment. A repeated key replaces the earlier value in
    /// place, so every key fits no matter how often it is submitted.
    pub fn push(&mut self, key: ConfigKey, value: FieldValue) {
        if let Some(slot) = self.assignments.iter_mut().find(|(seen, _)| *seen == key) {
            slot.1 = value;
        } else {
            // One slot per key.
            let _ = self.assignments.push((key, value));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConfigKey, Option<&str>)> + '_ {
        self.assignments.iter().map(|(key, value)| {
            let text = match value {
                FieldValue::Text(text) => Some(text.as_str()),
                FieldValue::Undecodable => None,
            };
            (*key, text)
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Applies every assignment that parses, returning the keys that did not.
    pub fn apply_to(&self, config: &mut RuntimeConfig) -> Vec<ConfigKey, MAX_ASSIGNMENTS> {
        let mut rejected = Vec::new();
        for (key, value) in self.iter() {
            let applied = value.is_some_and(|text| config.set_field(key, text).is_ok());
            if !applied {
                // Capacity matches `assignments`, so this cannot overflow.
                let _ = rejected.push(key);
            }
        }
        rejected
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandError {
    /// Unknown request target.
    NotFound,
    MethodNotAllowed,
    Malformed,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::NotFound => f.write_str("no such route"),
            CommandError::MethodNotAllowed => f.write_str("method not allowed"),
            CommandError::Malformed => f.write_str("malformed request"),
        }
    }
}

/// What the transport should send back.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Reply {
    /// `303 See Other` to `location`.
    Redirect { location: &'static str },
    /// `200 OK` with a JSON body.
    Json(Vec<u8, RESPONSE_CAPACITY>),
    /// Response document did not fit; nothing useful to send.
    Unavailable,
}

/// Answers whether a remote host accepts connections.
#[allow(async_fn_in_trait)]
pub trait Reachability {
    async fn is_reachable(&mut self, host: &str) -> bool;
}

/// Host part of `url`, without scheme, port, path, query or fragment.
#[must_use]
pub fn url_host(url: &str) -> &str {
    let url = url.trim();
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    authority
        .rsplit_once(':')
        .filter(|(_, port)| port.parse::<u16>().is_ok())
        .map_or(authority, |(host, _)| host)
}

/// Side effect of executing a command, for the caller's log.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    None,
    SwitchChanged {
        relay: RelayId,
        enabled: bool,
    },
    ConfigSaved {
        rejected: Vec<ConfigKey, MAX_ASSIGNMENTS>,
    },
    /// Persisting failed; the in-memory configuration is unchanged.
    ConfigNotSaved {
        error: ConfigError,
        rejected: Vec<ConfigKey, MAX_ASSIGNMENTS>,
    },
    Checked {
        reachable: bool,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub reply: Reply,
    pub effect: Effect,
}

impl Response {
    const fn quiet(reply: Reply) -> Self {
        Self {
            reply,
            effect: Effect::None,
        }
    }
}

#[derive(Serialize)]
struct StatusDocument<'a> {
    version: &'a str,
    hostname: &'a str,
    heatpump_enabled: bool,
    heatrod_enabled: bool,
    power_heatpump: i32,
    #[serde(rename = "power_heatpump_L1")]
    power_heatpump_l1: i32,
    #[serde(rename = "power_heatpump_L2")]
    power_heatpump_l2: i32,
    #[serde(rename = "power_heatpump_L3")]
    power_heatpump_l3: i32,
    power_heatrod: i32,
}

#[derive(Serialize)]
struct CheckDocument<'a> {
    #[serde(rename = "EXTERNAL_URL")]
    external_url: &'a str,
    host: &'a str,
    reachable: bool,
}

/// Runs `command` against the shared state, persisting through `store` and
/// asking `target` for reachability.
pub async fn execute<M, S, P>(
    command: &Command,
    state: &AppState<M>,
    store: &mut S,
    target: &mut P,
) -> Response
where
    M: RawMutex,
    S: ConfigStore + ?Sized,
    P: Reachability + ?Sized,
{
    match command {
        Command::Switch { relay, enabled } => {
            state.set_switch(*relay, *enabled);
            Response {
                reply: Reply::Redirect { location: "/" },
                effect: Effect::SwitchChanged {
                    relay: *relay,
                    enabled: *enabled,
                },
            }
        }
        Command::SaveConfig(update) => save_config(update, state, store),
        Command::PowerMeter => {
            let power = state.power();
            Response::quiet(render(|buf| {
                telemetry::encode_power_meter(&power, buf).map_err(|_| ())
            }))
        }
        Command::Config => {
            let config = state.config();
            Response::quiet(render(|buf| config.encode(buf).map_err(|_| ())))
        }
        Command::Status => {
            let power = state.power();
            let switches = state.switches();
            let reply = state.with_config(|config| {
                let document = StatusDocument {
                    version: FIRMWARE_VERSION,
                    hostname: config.hostname.as_str(),
                    heatpump_enabled: switches.heatpump,
                    heatrod_enabled: switches.heatrod,
                    power_heatpump: power.heatpump(),
                    power_heatpump_l1: power.heatpump_l1,
                    power_heatpump_l2: power.heatpump_l2,
                    power_heatpump_l3: power.heatpump_l3,
                    power_heatrod: power.heatrod,
                };
                render(|buf| serde_json_core::to_slice(&document, buf).map_err(|_| ()))
            });
            Response::quiet(reply)
        }
        Command::Check => check(state, target).await,
    }
}

async fn check<M, P>(state: &AppState<M>, target: &mut P) -> Response
where
    M: RawMutex,
    P: Reachability + ?Sized,
{
    // Owned copy; the check may take seconds.
    let config = state.config();
    let host = url_host(config.external_url.as_str());
    let reachable = !host.is_empty() && target.is_reachable(host).await;
    let document = CheckDocument {
        external_url: config.external_url.as_str(),
        host,
        reachable,
    };
    Response {
        reply: render(|buf| serde_json_core::to_slice(&document, buf).map_err(|_| ())),
        effect: Effect::Checked { reachable },
    }
}

fn save_config<M, S>(update: &ConfigUpdate, state: &AppState<M>, store: &mut S) -> Response
where
    M: RawMutex,
    S: ConfigStore + ?Sized,
{
    let mut candidate = state.config();
    let rejected = update.apply_to(&mut candidate);

    let effect = match config::persist(store, &candidate) {
        Ok(()) => {
            state.commit_config(candidate);
            Effect::ConfigSaved { rejected }
        }
        Err(error) => Effect::ConfigNotSaved { error, rejected },
    };

    Response {
        reply: Reply::Redirect {
            location: "/config",
        },
        effect,
    }
}

fn render(encode: impl FnOnce(&mut [u8]) -> Result<usize, ()>) -> Reply {
    let mut buf = [0u8; RESPONSE_CAPACITY];
    match encode(&mut buf) {
        Ok(len) => Vec::from_slice(&buf[..len]).map_or(Reply::Unavailable, Reply::Json),
        Err(()) => Reply::Unavailable,
    }
}
