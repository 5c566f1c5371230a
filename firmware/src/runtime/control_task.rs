use heatpump_core::sampler::SensorChannel;

use super::FirmwareLoop;
use crate::telemetry::LogObserver;

#[embassy_executor::task]
pub async fn run(mut control: FirmwareLoop, mut observer: LogObserver) {
    defmt::info!(
        "control: sampling {} inputs, {}ms window, {}ms pause",
        SensorChannel::ALL.len(),
        control.settings().window_ms,
        control.settings().loop_delay_ms
    );
    control.run(&mut observer).await;
}
