//! Ethernet link supervision, the MQTT session and the reachability check.

mod mqtt;
mod reach;

use core::fmt;

use embassy_net::Stack;
use heatpump_core::control::NetworkLink;

use crate::hw::StatusLed;

pub use mqtt::{MqttError, MqttSession};
pub use reach::ExternalHost;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LinkError {
    /// PHY reports no carrier.
    NoCarrier,
    /// Carrier present but DHCP has not produced an address yet.
    NoAddress,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::NoCarrier => f.write_str("no carrier"),
            LinkError::NoAddress => f.write_str("waiting for DHCP lease"),
        }
    }
}

/// Link state as reported by the embassy-net stack; the LED blinks on every
/// failed check and stays lit once the stack is configured.
pub struct EthernetLink {
    stack: Stack<'static>,
    led: StatusLed<'static>,
}

impl EthernetLink {
    pub fn new(stack: Stack<'static>, led: StatusLed<'static>) -> Self {
        Self { stack, led }
    }

    fn check(&self) -> Result<(), LinkError> {
        if !self.stack.is_link_up() {
            Err(LinkError::NoCarrier)
        } else if !self.stack.is_config_up() {
            Err(LinkError::NoAddress)
        } else {
            Ok(())
        }
    }
}

impl NetworkLink for EthernetLink {
    type Error = LinkError;

    fn is_up(&self) -> bool {
        self.check().is_ok()
    }

    async fn reconnect(&mut self) -> Result<(), Self::Error> {
        match self.check() {
            Ok(()) => {
                self.led.on();
                Ok(())
            }
            Err(error) => {
                self.led.toggle();
                Err(error)
            }
        }
    }
}
