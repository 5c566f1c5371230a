//! Analog sampler for the current-transformer inputs.
//!
//! The sampler is intentionally synchronous: it polls the ADC as fast as the
//! platform's blocking read allows until the window elapses on a monotonic
//! clock, keeping only the smallest and largest raw count. There is no
//! averaging or filtering, so the window has to span several mains cycles
//! (500 ms by default) to avoid beating against 50/60 Hz. A timer-driven
//! capture buffer would sample more evenly but is not needed for the
//! peak-to-peak estimate.

use core::fmt;

/// ADC input wired to one current transformer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SensorChannel {
    HeatpumpL1,
    HeatpumpL2,
    HeatpumpL3,
    Heatrod,
}

impl SensorChannel {
    /// Every monitored input in sampling order.
    pub const ALL: [SensorChannel; 4] = [
        SensorChannel::HeatpumpL1,
        SensorChannel::HeatpumpL2,
        SensorChannel::HeatpumpL3,
        SensorChannel::Heatrod,
    ];

    /// The three heat-pump phases.
    pub const HEATPUMP_PHASES: [SensorChannel; 3] = [
        SensorChannel::HeatpumpL1,
        SensorChannel::HeatpumpL2,
        SensorChannel::HeatpumpL3,
    ];

    /// Stable index used for per-channel tables.
    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            SensorChannel::HeatpumpL1 => 0,
            SensorChannel::HeatpumpL2 => 1,
            SensorChannel::HeatpumpL3 => 2,
            SensorChannel::Heatrod => 3,
        }
    }

    /// Short label used in traces.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            SensorChannel::HeatpumpL1 => "L1",
            SensorChannel::HeatpumpL2 => "L2",
            SensorChannel::HeatpumpL3 => "L3",
            SensorChannel::Heatrod => "heatrod",
        }
    }
}

impl fmt::Display for SensorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Blocking single-conversion access to the ADC.
pub trait AdcReader {
    /// Performs one conversion on `channel` and returns the raw count.
    fn read_raw(&mut self, channel: SensorChannel) -> u16;
}

/// Millisecond monotonic clock.
pub trait MonotonicClock {
    /// Milliseconds since an arbitrary, fixed origin.
    fn now_ms(&self) -> u64;
}

/// One sampling request: which input and for how long.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SamplingWindow {
    pub channel: SensorChannel,
    pub duration_ms: u32,
}

impl SamplingWindow {
    #[must_use]
    pub const fn new(channel: SensorChannel, duration_ms: u32) -> Self {
        Self {
            channel,
            duration_ms,
        }
    }
}

/// Raw extremes seen during one window.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PhaseReading {
    pub min_raw: u16,
    pub max_raw: u16,
    /// Number of conversions taken inside the window.
    pub samples: u32,
}

impl PhaseReading {
    #[must_use]
    pub const fn new(min_raw: u16, max_raw: u16) -> Self {
        Self {
            min_raw,
            max_raw,
            samples: 0,
        }
    }

    /// Peak-to-peak swing in raw counts.
    #[must_use]
    pub const fn swing_counts(self) -> u16 {
        self.max_raw.saturating_sub(self.min_raw)
    }
}

/// Polls `window.channel` until `window.duration_ms` has elapsed on `clock`.
///
/// At least one conversion is always taken, so the returned reading satisfies
/// `min_raw <= max_raw` even for a zero-length window.
pub fn sample<A, C>(adc: &mut A, clock: &C, window: SamplingWindow) -> PhaseReading
where
    A: AdcReader + ?Sized,
    C: MonotonicClock + ?Sized,
{
    let started_at = clock.now_ms();
    let duration = u64::from(window.duration_ms);

    let first = adc.read_raw(window.channel);
    let mut reading = PhaseReading {
        min_raw: first,
        max_raw: first,
        samples: 1,
    };

    while clock.now_ms().saturating_sub(started_at) < duration {
        let value = adc.read_raw(window.channel);
        if value > reading.max_raw {
            reading.max_raw = value;
        }
        if value < reading.min_raw {
            reading.min_raw = value;
        }
        reading.samples = reading.samples.saturating_add(1);
    }

    reading
}
