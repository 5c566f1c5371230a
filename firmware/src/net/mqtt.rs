use core::fmt;

use embassy_net::dns::{self, DnsQueryType};
use embassy_net::tcp::{ConnectError, State, TcpSocket};
use embassy_net::{IpAddress, Ipv4Address, Stack};
use embassy_time::{Duration, Instant, with_timeout};
use heatpump_core::telemetry::BrokerSession;
use rust_mqtt::client::client::MqttClient;
use rust_mqtt::packet::v5::publish_packet::QualityOfService;
use rust_mqtt::packet::v5::reason_codes::ReasonCode;
use rust_mqtt::utils::rng_generator::CountingRng;

use crate::broker::{
    self, HANDSHAKE_TIMEOUT_MS, KeepAlive, MAX_PROPERTIES, PACKET_BUFFER_LEN, PING_TIMEOUT_MS,
    SOCKET_TIMEOUT_MS,
};

type Client<'a> = MqttClient<'a, &'a mut TcpSocket<'static>, MAX_PROPERTIES, CountingRng>;

#[derive(Debug)]
pub enum MqttError {
    Dns(dns::Error),
    /// DNS answered without an IPv4 address.
    Unresolved,
    Connect(ConnectError),
    Broker(ReasonCode),
    Timeout,
    Closed,
}

impl fmt::Display for MqttError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MqttError::Dns(err) => write!(f, "dns: {err:?}"),
            MqttError::Unresolved => f.write_str("broker name did not resolve"),
            MqttError::Connect(err) => write!(f, "tcp connect: {err:?}"),
            MqttError::Broker(code) => write!(f, "broker: {code:?}"),
            MqttError::Timeout => f.write_str("broker did not answer"),
            MqttError::Closed => f.write_str("connection closed"),
        }
    }
}

fn now_ms() -> u64 {
    Instant::now().as_millis()
}

/// MQTT client session over one reusable TCP socket.
pub struct MqttSession {
    stack: Stack<'static>,
    socket: TcpSocket<'static>,
    connected: bool,
    keep_alive: KeepAlive,
    tx: [u8; PACKET_BUFFER_LEN],
    rx: [u8; PACKET_BUFFER_LEN],
}

impl MqttSession {
    pub fn new(
        stack: Stack<'static>,
        rx_buffer: &'static mut [u8],
        tx_buffer: &'static mut [u8],
    ) -> Self {
        let mut socket = TcpSocket::new(stack, rx_buffer, tx_buffer);
        socket.set_timeout(Some(Duration::from_millis(SOCKET_TIMEOUT_MS)));
        Self {
            stack,
            socket,
            connected: false,
            keep_alive: KeepAlive::new(0),
            tx: [0; PACKET_BUFFER_LEN],
            rx: [0; PACKET_BUFFER_LEN],
        }
    }

    /// Client bound to the open socket for the duration of one exchange.
    fn client<'a>(&'a mut self, client_id: &'a str) -> Client<'a> {
        MqttClient::new(
            &mut self.socket,
            &mut self.tx,
            PACKET_BUFFER_LEN,
            &mut self.rx,
            PACKET_BUFFER_LEN,
            broker::client_config(client_id),
        )
    }

    async fn resolve(&self, broker: &str) -> Result<IpAddress, MqttError> {
        if let Ok(address) = broker.parse::<Ipv4Address>() {
            return Ok(IpAddress::Ipv4(address));
        }
        let addresses = self
            .stack
            .dns_query(broker, DnsQueryType::A)
            .await
            .map_err(MqttError::Dns)?;
        addresses.first().copied().ok_or(MqttError::Unresolved)
    }

    fn drop_connection(&mut self) {
        self.connected = false;
        self.socket.abort();
    }

    async fn handshake(&mut self, broker: &str, port: u16, client_id: &str) -> Result<(), MqttError> {
        let address = self.resolve(broker).await?;
        self.socket
            .connect((address, port))
            .await
            .map_err(MqttError::Connect)?;
        self.client(client_id)
            .connect_to_broker()
            .await
            .map_err(MqttError::Broker)?;
        self.keep_alive = KeepAlive::new(now_ms());
        Ok(())
    }

    async fn service(&mut self) -> Result<(), MqttError> {
        if self.socket.state() != State::Established {
            return Err(MqttError::Closed);
        }
        if self.keep_alive.ping_due(now_ms()) {
            with_timeout(
                Duration::from_millis(PING_TIMEOUT_MS),
                self.client("").send_ping(),
            )
            .await
            .map_err(|_| MqttError::Timeout)?
            .map_err(MqttError::Broker)?;
            self.keep_alive.record_send(now_ms());
        }
        Ok(())
    }
}

impl BrokerSession for MqttSession {
    type Error = MqttError;

    fn is_connected(&self) -> bool {
        self.connected && self.socket.state() == State::Established
    }

    async fn connect(&mut self, broker: &str, port: u16, client_id: &str) -> Result<(), Self::Error> {
        self.drop_connection();
        // Let the reset go out so the socket is closed before reuse.
        let _ = self.socket.flush().await;

        let result = with_timeout(
            Duration::from_millis(HANDSHAKE_TIMEOUT_MS),
            self.handshake(broker, port, client_id),
        )
        .await
        .unwrap_or(Err(MqttError::Timeout));
        match result {
            Ok(()) => self.connected = true,
            Err(_) => self.drop_connection(),
        }
        result
    }

    async fn poll(&mut self) -> Result<(), Self::Error> {
        let result = self.service().await;
        if result.is_err() {
            self.drop_connection();
        }
        result
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error> {
        let result = self
            .client("")
            .send_message(topic, payload, QualityOfService::QoS0, false)
            .await
            .map_err(MqttError::Broker);
        match result {
            Ok(()) => self.keep_alive.record_send(now_ms()),
            Err(_) => self.drop_connection(),
        }
        result
    }
}
