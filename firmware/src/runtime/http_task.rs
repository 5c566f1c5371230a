use defmt::Debug2Format;
use embassy_net::Stack;
use embassy_net::tcp::{self, TcpSocket};
use embassy_time::{Duration, Timer};
use embedded_io_async::Write as _;
use heatpump_core::command::{self, CommandError};

use super::SharedState;
use crate::http::{self, HTTP_PORT, HttpResponse, MAX_REQUEST_LEN};
use crate::net::ExternalHost;
use crate::storage::FlashStore;
use crate::telemetry;

const SOCKET_LEN: usize = 1024;

#[embassy_executor::task]
pub async fn run(
    stack: Stack<'static>,
    state: &'static SharedState,
    mut store: FlashStore<'static>,
) -> ! {
    let mut rx_buf = [0u8; SOCKET_LEN];
    let mut tx_buf = [0u8; SOCKET_LEN];
    let mut external = ExternalHost::new(stack);

    defmt::info!("http: listening on port {}", HTTP_PORT);
    loop {
        stack.wait_config_up().await;

        let mut socket = TcpSocket::new(stack, &mut rx_buf, &mut tx_buf);
        socket.set_timeout(Some(Duration::from_secs(10)));

        match socket.accept(HTTP_PORT).await {
            Ok(()) => {
                if let Err(err) = serve(&mut socket, state, &mut store, &mut external).await {
                    defmt::warn!("http: connection error: {}", Debug2Format(&err));
                }
                socket.close();
                let _ = socket.flush().await;
            }
            Err(err) => {
                defmt::warn!("http: accept failed: {}", Debug2Format(&err));
                Timer::after_millis(200).await;
            }
        }
        socket.abort();
    }
}

async fn serve(
    socket: &mut TcpSocket<'_>,
    state: &'static SharedState,
    store: &mut FlashStore<'static>,
    external: &mut ExternalHost,
) -> Result<(), tcp::Error> {
    let mut request = [0u8; MAX_REQUEST_LEN];
    let mut received = 0;
    while received < request.len() && !request[..received].windows(2).any(|pair| pair == b"\r\n") {
        let read = socket.read(&mut request[received..]).await?;
        if read == 0 {
            break;
        }
        received += read;
    }

    let parsed = match http::request_line(&request[..received]) {
        Some(Ok(line)) => command::parse_request_line(line),
        Some(Err(err)) => Err(err),
        None if received == 0 => return Ok(()),
        None => Err(CommandError::Malformed),
    };

    let reply;
    let response = match parsed {
        Ok(command) => {
            let outcome = command::execute(&command, state, store, external).await;
            telemetry::log_command_effect(&outcome.effect);
            reply = outcome.reply;
            HttpResponse::from_reply(&reply)
        }
        Err(err) => {
            telemetry::log_request_rejected(err);
            HttpResponse::from_error(err)
        }
    };

    // Every head fits HEAD_CAPACITY.
    let Ok(head) = response.head() else {
        return Ok(());
    };
    socket.write_all(head.as_bytes()).await?;
    socket.write_all(response.body()).await?;
    socket.flush().await
}
