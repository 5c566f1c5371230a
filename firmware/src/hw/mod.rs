//! Board peripherals behind the core seams.

use embassy_stm32::adc::{Adc, AnyAdcChannel, SampleTime};
use embassy_stm32::gpio::{Output, OutputOpenDrain};
use embassy_stm32::peripherals::ADC1;
use embassy_time::{Instant, Timer};
use heatpump_core::relay::{RelayAction, RelayDriver, RelayId};
use heatpump_core::retry::AsyncDelay;
use heatpump_core::sampler::{AdcReader, MonotonicClock, SensorChannel};

/// The four CT inputs on ADC1.
pub struct CtInputs<'d> {
    adc: Adc<'d, ADC1>,
    heatpump_l1: AnyAdcChannel<ADC1>,
    heatpump_l2: AnyAdcChannel<ADC1>,
    heatpump_l3: AnyAdcChannel<ADC1>,
    heatrod: AnyAdcChannel<ADC1>,
}

impl<'d> CtInputs<'d> {
    pub fn new(
        mut adc: Adc<'d, ADC1>,
        heatpump_l1: AnyAdcChannel<ADC1>,
        heatpump_l2: AnyAdcChannel<ADC1>,
        heatpump_l3: AnyAdcChannel<ADC1>,
        heatrod: AnyAdcChannel<ADC1>,
    ) -> Self {
        adc.set_sample_time(SampleTime::CYCLES112);
        Self {
            adc,
            heatpump_l1,
            heatpump_l2,
            heatpump_l3,
            heatrod,
        }
    }
}

impl AdcReader for CtInputs<'_> {
    fn read_raw(&mut self, channel: SensorChannel) -> u16 {
        let Self {
            adc,
            heatpump_l1,
            heatpump_l2,
            heatpump_l3,
            heatrod,
        } = self;
        let pin = match channel {
            SensorChannel::HeatpumpL1 => heatpump_l1,
            SensorChannel::HeatpumpL2 => heatpump_l2,
            SensorChannel::HeatpumpL3 => heatpump_l3,
            SensorChannel::Heatrod => heatrod,
        };
        adc.blocking_read(pin)
    }
}

/// Open-drain relay lines; low energizes the relay.
pub struct RelayOutputs<'d> {
    heatpump: OutputOpenDrain<'d>,
    heatrod: OutputOpenDrain<'d>,
}

impl<'d> RelayOutputs<'d> {
    pub fn new(heatpump: OutputOpenDrain<'d>, heatrod: OutputOpenDrain<'d>) -> Self {
        Self { heatpump, heatrod }
    }

    fn output_mut(&mut self, relay: RelayId) -> &mut OutputOpenDrain<'d> {
        match relay {
            RelayId::Heatpump => &mut self.heatpump,
            RelayId::Heatrod => &mut self.heatrod,
        }
    }
}

impl RelayDriver for RelayOutputs<'_> {
    fn apply(&mut self, relay: RelayId, action: RelayAction) {
        let output = self.output_mut(relay);
        match action {
            RelayAction::AssertLow => output.set_low(),
            RelayAction::ReleaseHigh => output.set_high(),
        }
    }

    fn release_all(&mut self) {
        self.heatpump.set_high();
        self.heatrod.set_high();
    }
}

/// Push-pull status LED.
pub struct StatusLed<'d> {
    pin: Output<'d>,
}

impl<'d> StatusLed<'d> {
    pub fn new(pin: Output<'d>) -> Self {
        Self { pin }
    }

    pub fn on(&mut self) {
        self.pin.set_high();
    }

    pub fn toggle(&mut self) {
        self.pin.toggle();
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct EmbassyClock;

impl MonotonicClock for EmbassyClock {
    fn now_ms(&self) -> u64 {
        Instant::now().as_millis()
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct EmbassyDelay;

impl AsyncDelay for EmbassyDelay {
    async fn delay_ms(&mut self, ms: u32) {
        Timer::after_millis(u64::from(ms)).await;
    }
}
