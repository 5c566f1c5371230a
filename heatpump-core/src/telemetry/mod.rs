//! Power telemetry: JSON documents and the MQTT publish path.

use core::fmt;

use serde::Serialize;

use crate::config::{self, HOSTNAME_CAPACITY, RuntimeConfig};
use crate::power::PowerState;
use crate::retry::{AsyncDelay, RetryPolicy};

/// Topic every reading is published to.
pub const TOPIC: &str = "heatpump";
/// Plain-text MQTT port.
pub const DEFAULT_BROKER_PORT: u16 = 1883;
/// Holds either JSON document with five `i32` readings and a hostname at
/// capacity, every byte of it escaped.
pub const PAYLOAD_CAPACITY: usize = 144 + config::escaped_capacity(HOSTNAME_CAPACITY);

#[derive(Serialize)]
struct TelemetryDocument<'a> {
    sender: &'a str,
    heatpump: i32,
    #[serde(rename = "heatpump_L1")]
    heatpump_l1: i32,
    #[serde(rename = "heatpump_L2")]
    heatpump_l2: i32,
    #[serde(rename = "heatpump_L3")]
    heatpump_l3: i32,
    heatrod: i32,
}

#[derive(Serialize)]
struct PowerMeterDocument {
    power_heatpump: i32,
    #[serde(rename = "power_heatpump_L1")]
    power_heatpump_l1: i32,
    #[serde(rename = "power_heatpump_L2")]
    power_heatpump_l2: i32,
    #[serde(rename = "power_heatpump_L3")]
    power_heatpump_l3: i32,
    power_heatrod: i32,
}

/// Bus payload: `{sender, heatpump, heatpump_L1..L3, heatrod}` in whole watts.
pub fn encode_telemetry(
    sender: &str,
    power: &PowerState,
    buf: &mut [u8],
) -> Result<usize, PayloadError> {
    let document = TelemetryDocument {
        sender,
        heatpump: power.heatpump(),
        heatpump_l1: power.heatpump_l1,
        heatpump_l2: power.heatpump_l2,
        heatpump_l3: power.heatpump_l3,
        heatrod: power.heatrod,
    };
    serde_json_core::to_slice(&document, buf).map_err(|_| PayloadError)
}

/// Query-interface document with the same readings under `power_*` names.
pub fn encode_power_meter(power: &PowerState, buf: &mut [u8]) -> Result<usize, PayloadError> {
    let document = PowerMeterDocument {
        power_heatpump: power.heatpump(),
        power_heatpump_l1: power.heatpump_l1,
        power_heatpump_l2: power.heatpump_l2,
        power_heatpump_l3: power.heatpump_l3,
        power_heatrod: power.heatrod,
    };
    serde_json_core::to_slice(&document, buf).map_err(|_| PayloadError)
}

/// Output buffer too small for the document.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PayloadError;

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("payload does not fit buffer")
    }
}

/// Client side of a broker session.
#[allow(async_fn_in_trait)]
pub trait BrokerSession {
    type Error: fmt::Debug;

    /// Whether the last handshake succeeded and the transport is still open.
    fn is_connected(&self) -> bool;

    /// Opens the transport and completes the CONNECT/CONNACK handshake.
    async fn connect(&mut self, broker: &str, port: u16, client_id: &str)
    -> Result<(), Self::Error>;

    /// Services keep-alive and drains inbound packets.
    async fn poll(&mut self) -> Result<(), Self::Error>;

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error>;
}

/// Why a due publication did not reach the broker.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PublishError<E> {
    /// Network link stayed down after its retry policy.
    LinkDown,
    /// Connection attempts exhausted the retry policy.
    Connect { attempts: u32, error: E },
    /// Session dropped while servicing keep-alive.
    Session(E),
    /// Payload did not fit the buffer.
    Payload,
    /// Broker session rejected or failed the publication.
    Publish(E),
}

impl<E: fmt::Debug> fmt::Display for PublishError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::LinkDown => f.write_str("network link down"),
            PublishError::Connect { attempts, error } => {
                write!(f, "connect failed after {attempts} attempts: {error:?}")
            }
            PublishError::Session(error) => write!(f, "session lost: {error:?}"),
            PublishError::Payload => f.write_str("payload does not fit buffer"),
            PublishError::Publish(error) => write!(f, "publish failed: {error:?}"),
        }
    }
}

/// Result of the publish step of one loop iteration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PublishOutcome<E> {
    /// Interval not yet elapsed.
    NotDue,
    Published { bytes: usize },
    Failed(PublishError<E>),
}

impl<E> PublishOutcome<E> {
    #[must_use]
    pub const fn is_published(&self) -> bool {
        matches!(self, PublishOutcome::Published { .. })
    }
}

impl<E: fmt::Debug> fmt::Display for PublishOutcome<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishOutcome::NotDue => f.write_str("not due"),
            PublishOutcome::Published { bytes } => write!(f, "published {bytes} bytes"),
            PublishOutcome::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}

/// Tracks when the last publication happened.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PublishSchedule {
    last_publish_ms: u64,
}

impl PublishSchedule {
    /// Schedule whose first publication falls one interval after `now_ms`.
    #[must_use]
    pub const fn starting_at(now_ms: u64) -> Self {
        Self {
            last_publish_ms: now_ms,
        }
    }

    #[must_use]
    pub const fn is_due(&self, now_ms: u64, interval_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_publish_ms) >= interval_ms
    }

    pub fn mark(&mut self, now_ms: u64) {
        self.last_publish_ms = now_ms;
    }

    #[must_use]
    pub const fn last_publish_ms(&self) -> u64 {
        self.last_publish_ms
    }
}

/// Ensures a session, services it, and publishes one reading.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TelemetryPublisher {
    pub topic: &'static str,
    pub port: u16,
    pub retry: RetryPolicy,
}

impl Default for TelemetryPublisher {
    fn default() -> Self {
        Self {
            topic: TOPIC,
            port: DEFAULT_BROKER_PORT,
            retry: RetryPolicy::default(),
        }
    }
}

impl TelemetryPublisher {
    /// Publishes `power` as `config.hostname`, (re)connecting per the retry
    /// policy first.
    pub async fn publish<S, D>(
        &self,
        session: &mut S,
        delay: &mut D,
        power: &PowerState,
        config: &RuntimeConfig,
    ) -> PublishOutcome<S::Error>
    where
        S: BrokerSession + ?Sized,
        D: AsyncDelay + ?Sized,
    {
        if let Err(err) = self.ensure_session(session, delay, config).await {
            return PublishOutcome::Failed(err);
        }

        if let Err(err) = session.poll().await {
            return PublishOutcome::Failed(PublishError::Session(err));
        }

        let mut payload = [0u8; PAYLOAD_CAPACITY];
        let Ok(len) = encode_telemetry(config.hostname.as_str(), power, &mut payload) else {
            return PublishOutcome::Failed(PublishError::Payload);
        };

        match session.publish(self.topic, &payload[..len]).await {
            Ok(()) => PublishOutcome::Published { bytes: len },
            Err(err) => PublishOutcome::Failed(PublishError::Publish(err)),
        }
    }

    async fn ensure_session<S, D>(
        &self,
        session: &mut S,
        delay: &mut D,
        config: &RuntimeConfig,
    ) -> Result<(), PublishError<S::Error>>
    where
        S: BrokerSession + ?Sized,
        D: AsyncDelay + ?Sized,
    {
        if session.is_connected() {
            return Ok(());
        }

        let mut retry = self.retry.start();
        loop {
            let attempt = session
                .connect(config.broker.as_str(), self.port, config.hostname.as_str())
                .await;
            match attempt {
                Ok(()) => return Ok(()),
                Err(error) => match retry.next_delay() {
                    Some(ms) => delay.delay_ms(ms).await,
                    None => {
                        return Err(PublishError::Connect {
                            attempts: retry.attempts(),
                            error,
                        });
                    }
                },
            }
        }
    }
}
