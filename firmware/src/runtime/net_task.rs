use embassy_net::Runner;

use super::EthDevice;

#[embassy_executor::task]
pub async fn run(mut runner: Runner<'static, EthDevice>) -> ! {
    runner.run().await
}
