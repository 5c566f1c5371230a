#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! MQTT client settings and keep-alive bookkeeping for the broker session.

use heatpump_core::telemetry::PAYLOAD_CAPACITY;
use rust_mqtt::client::client_config::{ClientConfig, MqttVersion};
use rust_mqtt::utils::rng_generator::CountingRng;

/// Keep-alive announced in CONNECT.
pub const KEEP_ALIVE_SECS: u16 = 15;
/// CONNECT properties the client may carry.
pub const MAX_PROPERTIES: usize = 2;
/// Socket inactivity limit. Also bounds a connect that never sees a SYN-ACK.
pub const SOCKET_TIMEOUT_MS: u64 = 5_000;
/// Whole handshake: DNS, TCP connect and CONNECT/CONNACK.
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
/// PINGREQ/PINGRESP round trip.
pub const PING_TIMEOUT_MS: u64 = 5_000;
/// One PUBLISH: fixed header, topic, properties and the largest payload.
pub const PACKET_BUFFER_LEN: usize = PAYLOAD_CAPACITY + 64;

pub type BrokerConfig<'a> = ClientConfig<'a, MAX_PROPERTIES, CountingRng>;

/// Client settings; `client_id` only matters for CONNECT and may be empty
/// for the other packets.
pub fn client_config(client_id: &str) -> BrokerConfig<'_> {
    let mut config = ClientConfig::new(MqttVersion::MQTTv5, CountingRng(20_000));
    config.keep_alive = KEEP_ALIVE_SECS;
    if !client_id.is_empty() {
        config.add_client_id(client_id);
    }
    config
}

/// Last time anything was sent, so a PINGREQ goes out at half the keep-alive.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct KeepAlive {
    last_sent_ms: u64,
}

impl KeepAlive {
    pub const fn new(now_ms: u64) -> Self {
        Self {
            last_sent_ms: now_ms,
        }
    }

    pub fn record_send(&mut self, now_ms: u64) {
        self.last_sent_ms = now_ms;
    }

    pub fn ping_due(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_sent_ms) >= u64::from(KEEP_ALIVE_SECS) * 500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_announces_keep_alive() {
        let config = client_config("ESP-32");
        assert_eq!(config.keep_alive, KEEP_ALIVE_SECS);
    }

    #[test]
    fn ping_due_at_half_keep_alive() {
        let mut keep_alive = KeepAlive::new(1_000);
        assert!(!keep_alive.ping_due(8_499));
        assert!(keep_alive.ping_due(8_500));
        keep_alive.record_send(8_500);
        assert!(!keep_alive.ping_due(9_000));
    }

    #[test]
    fn every_network_wait_is_bounded() {
        let keep_alive_ms = u64::from(KEEP_ALIVE_SECS) * 1_000;
        assert!(SOCKET_TIMEOUT_MS > 0 && SOCKET_TIMEOUT_MS < keep_alive_ms);
        assert!(PING_TIMEOUT_MS < keep_alive_ms);
        assert!(HANDSHAKE_TIMEOUT_MS >= SOCKET_TIMEOUT_MS);
    }

    #[test]
    fn widest_payload_fits_packet_buffer() {
        assert!(PACKET_BUFFER_LEN >= PAYLOAD_CAPACITY + "heatpump".len() + 8);
    }
}
