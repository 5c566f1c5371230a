//! Top-level control loop.
//!
//! One iteration samples every CT input, drives both relays from the current
//! switch state, publishes telemetry when the interval has elapsed, and hands
//! an [`IterationReport`] to the observer. Sampling blocks for its window; the
//! loop yields to the executor between channels so the network and command
//! tasks keep running.

use core::fmt;

use embassy_futures::yield_now;
use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::current::reading_to_current;
use crate::power::{PowerState, whole_watts};
use crate::relay::{self, RelayDriver, SwitchState};
use crate::retry::{AsyncDelay, RetryPolicy};
use crate::sampler::{self, AdcReader, MonotonicClock, PhaseReading, SamplingWindow, SensorChannel};
use crate::state::AppState;
use crate::telemetry::{
    BrokerSession, PublishError, PublishOutcome, PublishSchedule, TOPIC, TelemetryPublisher,
};

/// Fixed loop timing and transport settings.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LoopSettings {
    /// Sampling window per CT input.
    pub window_ms: u32,
    /// Pause at the end of every iteration.
    pub loop_delay_ms: u32,
    /// Take the raw CT reading for the debug trace.
    pub debug_trace: bool,
    pub broker_port: u16,
    pub topic: &'static str,
    pub link_retry: RetryPolicy,
    pub broker_retry: RetryPolicy,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            window_ms: 500,
            loop_delay_ms: 1_000,
            debug_trace: true,
            broker_port: crate::telemetry::DEFAULT_BROKER_PORT,
            topic: TOPIC,
            link_retry: RetryPolicy::default(),
            broker_retry: RetryPolicy::default(),
        }
    }
}

/// Network link below the broker session.
#[allow(async_fn_in_trait)]
pub trait NetworkLink {
    type Error: fmt::Debug;

    fn is_up(&self) -> bool;

    /// One attempt at bringing the link back.
    async fn reconnect(&mut self) -> Result<(), Self::Error>;
}

/// Link state as seen by the publish step.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LinkStatus {
    /// Publication was not due, so the link was not checked.
    Unchecked,
    Up,
    Restored { attempts: u32 },
    Down { attempts: u32 },
}

impl LinkStatus {
    #[must_use]
    pub const fn is_up(self) -> bool {
        matches!(self, LinkStatus::Up | LinkStatus::Restored { .. })
    }
}

/// Everything that happened in one iteration.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct IterationReport<E> {
    /// Clock reading when sampling finished.
    pub at_ms: u64,
    pub readings: [PhaseReading; 4],
    pub power: PowerState,
    pub switches: SwitchState,
    /// Instantaneous heat-pump L1 count, taken in debug-trace mode only.
    pub ct_raw: Option<u16>,
    pub link: LinkStatus,
    pub publish: PublishOutcome<E>,
}

impl<E: fmt::Debug> fmt::Display for IterationReport<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Heatpump -> ")?;
        if let Some(raw) = self.ct_raw {
            write!(f, "ADC Value={raw} | ")?;
        }
        write!(
            f,
            "L1={}W | L2={}W | L3={}W | Switch={} | Heatrod={}W Switch={}",
            self.power.heatpump_l1,
            self.power.heatpump_l2,
            self.power.heatpump_l3,
            u8::from(self.switches.heatpump),
            self.power.heatrod,
            u8::from(self.switches.heatrod),
        )
    }
}

/// Receives a report after every iteration.
pub trait LoopObserver<E> {
    fn on_iteration(&mut self, report: &IterationReport<E>);
}

/// Hardware and network collaborators of the loop.
pub struct LoopIo<A, C, R, L, S, D> {
    pub adc: A,
    pub clock: C,
    pub relays: R,
    pub link: L,
    pub session: S,
    pub delay: D,
}

pub struct ControlLoop<'s, M, A, C, R, L, S, D>
where
    M: RawMutex,
{
    state: &'s AppState<M>,
    io: LoopIo<A, C, R, L, S, D>,
    settings: LoopSettings,
    publisher: TelemetryPublisher,
    schedule: PublishSchedule,
}

impl<'s, M, A, C, R, L, S, D> ControlLoop<'s, M, A, C, R, L, S, D>
where
    M: RawMutex,
    A: AdcReader,
    C: MonotonicClock,
    R: RelayDriver,
    L: NetworkLink,
    S: BrokerSession,
    D: AsyncDelay,
{
    /// Builds the loop and releases both relays to their idle level.
    ///
    /// The first publication is due one interval after construction.
    pub fn new(
        state: &'s AppState<M>,
        mut io: LoopIo<A, C, R, L, S, D>,
        settings: LoopSettings,
    ) -> Self {
        io.relays.release_all();
        let schedule = PublishSchedule::starting_at(io.clock.now_ms());
        let publisher = TelemetryPublisher {
            topic: settings.topic,
            port: settings.broker_port,
            retry: settings.broker_retry,
        };
        Self {
            state,
            io,
            settings,
            publisher,
            schedule,
        }
    }

    #[must_use]
    pub fn io(&self) -> &LoopIo<A, C, R, L, S, D> {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut LoopIo<A, C, R, L, S, D> {
        &mut self.io
    }

    #[must_use]
    pub const fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Runs one iteration without the trailing delay.
    pub async fn run_iteration(&mut self) -> IterationReport<S::Error> {
        let config = self.state.config();
        let calibration = config.calibration();
        let voltage = config.voltage_volts();

        let mut readings = [PhaseReading::new(0, 0); 4];
        let mut power = PowerState::default();
        for channel in SensorChannel::ALL {
            let window = SamplingWindow::new(channel, self.settings.window_ms);
            let reading = sampler::sample(&mut self.io.adc, &self.io.clock, window);
            readings[channel.as_index()] = reading;
            power.set_channel(
                channel,
                whole_watts(reading_to_current(reading, calibration), voltage),
            );
            yield_now().await;
        }
        self.state.record_power(&power);

        let switches = self.state.switches();
        relay::drive(&mut self.io.relays, switches);

        let at_ms = self.io.clock.now_ms();
        let (link, publish) = if self.schedule.is_due(at_ms, config.publish_interval_ms()) {
            let link = self.ensure_link().await;
            let publish = if link.is_up() {
                self.publisher
                    .publish(&mut self.io.session, &mut self.io.delay, &power, &config)
                    .await
            } else {
                PublishOutcome::Failed(PublishError::LinkDown)
            };
            self.schedule.mark(self.io.clock.now_ms());
            (link, publish)
        } else {
            (LinkStatus::Unchecked, PublishOutcome::NotDue)
        };

        let ct_raw = self
            .settings
            .debug_trace
            .then(|| self.io.adc.read_raw(SensorChannel::HeatpumpL1));

        IterationReport {
            at_ms,
            readings,
            power,
            switches,
            ct_raw,
            link,
            publish,
        }
    }

    /// Iterates forever, pausing `loop_delay_ms` between iterations.
    pub async fn run<O>(&mut self, observer: &mut O)
    where
        O: LoopObserver<S::Error> + ?Sized,
    {
        loop {
            let report = self.run_iteration().await;
            observer.on_iteration(&report);
            self.io.delay.delay_ms(self.settings.loop_delay_ms).await;
        }
    }

    async fn ensure_link(&mut self) -> LinkStatus {
        if self.io.link.is_up() {
            return LinkStatus::Up;
        }

        let mut retry = self.settings.link_retry.start();
        loop {
            if self.io.link.reconnect().await.is_ok() {
                return LinkStatus::Restored {
                    attempts: retry.attempts() + 1,
                };
            }
            match retry.next_delay() {
                Some(ms) => self.io.delay.delay_ms(ms).await,
                None => {
                    return LinkStatus::Down {
                        attempts: retry.attempts(),
                    };
                }
            }
        }
    }
}
