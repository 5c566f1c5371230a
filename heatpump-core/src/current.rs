//! Peak-to-peak current estimate from a sampling window's extremes.

use crate::sampler::PhaseReading;

/// Number of counts spanned by the 12-bit converter.
pub const ADC_FULL_SCALE: f32 = 4096.0;
/// ADC reference voltage in volts.
pub const ADC_REFERENCE_VOLTS: f32 = 3.3;

/// Linear CT calibration: `amps = volts * slope + offset`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Calibration {
    pub slope: f32,
    pub offset: f32,
}

impl Calibration {
    /// Slope of an SCT-013-010 clamp behind the stock burden resistor.
    pub const DEFAULT_SLOPE: f32 = 3.53;
    pub const DEFAULT_OFFSET: f32 = 0.0;

    #[must_use]
    pub const fn new(slope: f32, offset: f32) -> Self {
        Self { slope, offset }
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SLOPE, Self::DEFAULT_OFFSET)
    }
}

/// Peak-to-peak swing in volts at the ADC pin.
#[must_use]
pub fn swing_volts(min_raw: u16, max_raw: u16) -> f32 {
    f32::from(max_raw.saturating_sub(min_raw)) / ADC_FULL_SCALE * ADC_REFERENCE_VOLTS
}

/// Converts raw extremes into a current estimate in amps.
///
/// Swings below 0.1 V (tenths-truncated to zero) report exactly 0 A no matter
/// what the calibration offset is, so an idle clamp does not read as a small
/// standing load.
#[must_use]
pub fn to_current(min_raw: u16, max_raw: u16, calibration: Calibration) -> f32 {
    let swing = swing_volts(min_raw, max_raw);
    let flattened = libm::floorf(swing * 10.0) / 10.0;
    if flattened <= 0.0 {
        return 0.0;
    }
    swing * calibration.slope + calibration.offset
}

/// Convenience wrapper over [`to_current`] for a sampler result.
#[must_use]
pub fn reading_to_current(reading: PhaseReading, calibration: Calibration) -> f32 {
    to_current(reading.min_raw, reading.max_raw, calibration)
}
