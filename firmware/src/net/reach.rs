use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::TcpSocket;
use embassy_net::{IpAddress, Ipv4Address, Stack};
use embassy_time::{Duration, with_timeout};
use heatpump_core::command::Reachability;

const HTTP_PORT: u16 = 80;
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const BUFFER_LEN: usize = 64;

/// Resolves the host and opens, then aborts, a TCP connection to port 80.
pub struct ExternalHost {
    stack: Stack<'static>,
    rx: [u8; BUFFER_LEN],
    tx: [u8; BUFFER_LEN],
}

impl ExternalHost {
    pub fn new(stack: Stack<'static>) -> Self {
        Self {
            stack,
            rx: [0; BUFFER_LEN],
            tx: [0; BUFFER_LEN],
        }
    }

    async fn resolve(&self, host: &str) -> Option<IpAddress> {
        if let Ok(address) = host.parse::<Ipv4Address>() {
            return Some(IpAddress::Ipv4(address));
        }
        let addresses = with_timeout(CHECK_TIMEOUT, self.stack.dns_query(host, DnsQueryType::A))
            .await
            .ok()?
            .ok()?;
        addresses.first().copied()
    }
}

impl Reachability for ExternalHost {
    async fn is_reachable(&mut self, host: &str) -> bool {
        let Some(address) = self.resolve(host).await else {
            return false;
        };
        let mut socket = TcpSocket::new(self.stack, &mut self.rx, &mut self.tx);
        socket.set_timeout(Some(CHECK_TIMEOUT));
        let reachable = matches!(
            with_timeout(CHECK_TIMEOUT, socket.connect((address, HTTP_PORT))).await,
            Ok(Ok(()))
        );
        socket.abort();
        let _ = socket.flush().await;
        reachable
    }
}
