//! Relay actuation policy for the two load-enable outputs.

use core::fmt;

/// Relay outputs on the board.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RelayId {
    Heatpump,
    Heatrod,
}

impl RelayId {
    pub const ALL: [RelayId; 2] = [RelayId::Heatpump, RelayId::Heatrod];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            RelayId::Heatpump => "heatpump",
            RelayId::Heatrod => "heatrod",
        }
    }
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Electrical action on an open-drain relay input.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RelayAction {
    /// Pull the line low; energizes the relay (load enabled).
    AssertLow,
    /// Let the line float high; relay idle (load disabled).
    ReleaseHigh,
}

impl RelayAction {
    /// Action that realizes the requested switch position.
    #[must_use]
    pub const fn for_switch(enabled: bool) -> Self {
        if enabled {
            RelayAction::AssertLow
        } else {
            RelayAction::ReleaseHigh
        }
    }
}

/// Operator-controlled enable switches, both on at boot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SwitchState {
    pub heatpump: bool,
    pub heatrod: bool,
}

impl SwitchState {
    #[must_use]
    pub const fn new(heatpump: bool, heatrod: bool) -> Self {
        Self { heatpump, heatrod }
    }

    #[must_use]
    pub const fn get(&self, relay: RelayId) -> bool {
        match relay {
            RelayId::Heatpump => self.heatpump,
            RelayId::Heatrod => self.heatrod,
        }
    }
}

impl Default for SwitchState {
    fn default() -> Self {
        Self::new(true, true)
    }
}

/// Abstraction over the physical relay outputs.
pub trait RelayDriver {
    /// Applies the requested action to one relay line.
    fn apply(&mut self, relay: RelayId, action: RelayAction);

    /// Releases every relay line to its idle (high) level.
    fn release_all(&mut self);
}

/// Writes both relays from `switches`. Called unconditionally every loop
/// iteration so a glitched output is corrected on the next pass.
pub fn drive<D>(driver: &mut D, switches: SwitchState)
where
    D: RelayDriver + ?Sized,
{
    for relay in RelayId::ALL {
        driver.apply(relay, RelayAction::for_switch(switches.get(relay)));
    }
}
