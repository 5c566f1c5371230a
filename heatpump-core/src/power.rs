//! Instantaneous power from a current estimate and the nominal supply voltage.

use core::fmt;

use crate::sampler::SensorChannel;

/// `current * voltage`, in watts.
#[must_use]
pub fn power(current: f32, voltage: f32) -> f32 {
    current * voltage
}

/// Whole watts as reported on the wire. The fractional part is truncated.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn whole_watts(current: f32, voltage: f32) -> i32 {
    power(current, voltage) as i32
}

/// Latest per-channel power snapshot, in whole watts.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PowerState {
    pub heatpump_l1: i32,
    pub heatpump_l2: i32,
    pub heatpump_l3: i32,
    pub heatrod: i32,
}

impl PowerState {
    /// Aggregate heat-pump power (sum of the three phases).
    #[must_use]
    pub const fn heatpump(&self) -> i32 {
        self.heatpump_l1
            .saturating_add(self.heatpump_l2)
            .saturating_add(self.heatpump_l3)
    }

    #[must_use]
    pub const fn channel(&self, channel: SensorChannel) -> i32 {
        match channel {
            SensorChannel::HeatpumpL1 => self.heatpump_l1,
            SensorChannel::HeatpumpL2 => self.heatpump_l2,
            SensorChannel::HeatpumpL3 => self.heatpump_l3,
            SensorChannel::Heatrod => self.heatrod,
        }
    }

    pub fn set_channel(&mut self, channel: SensorChannel, watts: i32) {
        match channel {
            SensorChannel::HeatpumpL1 => self.heatpump_l1 = watts,
            SensorChannel::HeatpumpL2 => self.heatpump_l2 = watts,
            SensorChannel::HeatpumpL3 => self.heatpump_l3 = watts,
            SensorChannel::Heatrod => self.heatrod = watts,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "L1={}W | L2={}W | L3={}W | total={}W | heatrod={}W",
            self.heatpump_l1,
            self.heatpump_l2,
            self.heatpump_l3,
            self.heatpump(),
            self.heatrod
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_is_plain_product() {
        let product = power(4.2, 230.0);
        assert!((product - 4.2 * 230.0).abs() < f32::EPSILON);
    }

    #[test]
    fn five_amps_per_phase_at_240_volts() {
        let mut state = PowerState::default();
        for channel in SensorChannel::HEATPUMP_PHASES {
            state.set_channel(channel, whole_watts(5.0, 240.0));
        }

        assert_eq!(state.heatpump_l1, 1200);
        assert_eq!(state.heatpump_l2, 1200);
        assert_eq!(state.heatpump_l3, 1200);
        assert_eq!(state.heatpump(), 3600);
        assert_eq!(state.heatrod, 0);
    }

    #[test]
    fn whole_watts_truncates_toward_zero() {
        assert_eq!(whole_watts(1.0, 99.9), 99);
        assert_eq!(whole_watts(-1.0, 99.9), -99);
    }

    #[test]
    fn aggregate_tracks_phase_sum() {
        let state = PowerState {
            heatpump_l1: 812,
            heatpump_l2: 0,
            heatpump_l3: 1033,
            heatrod: 2999,
        };
        assert_eq!(state.heatpump(), 812 + 1033);
        assert_eq!(state.channel(SensorChannel::Heatrod), 2999);
    }
}
