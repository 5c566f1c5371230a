use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_net::{DhcpConfig, StackResources};
use embassy_stm32 as hal;
use embassy_stm32::adc::{Adc, AdcChannel as _};
use embassy_stm32::eth::{Ethernet, GenericPhy, PacketQueue};
use embassy_stm32::flash::Flash;
use embassy_stm32::gpio::{Level, Output, OutputOpenDrain, Speed};
use embassy_stm32::peripherals::{ETH, RNG};
use embassy_stm32::rng::Rng;
use embassy_stm32::{bind_interrupts, eth, rng};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use heatpump_core::config::{self, RuntimeConfig};
use heatpump_core::control::{ControlLoop, LoopIo, LoopSettings};
use heatpump_core::state::AppState;
use static_cell::StaticCell;

use crate::hw::{CtInputs, EmbassyClock, EmbassyDelay, RelayOutputs, StatusLed};
use crate::net::{EthernetLink, MqttSession};
use crate::storage::FlashStore;
use crate::telemetry::{self, LogObserver};

mod control_task;
mod http_task;
mod net_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

bind_interrupts!(struct Irqs {
    ETH => eth::InterruptHandler;
    HASH_RNG => rng::InterruptHandler<RNG>;
});

pub(super) type SharedState = AppState<CriticalSectionRawMutex>;
pub(super) type EthDevice = Ethernet<'static, ETH, GenericPhy>;
pub(super) type FirmwareLoop = ControlLoop<
    'static,
    CriticalSectionRawMutex,
    CtInputs<'static>,
    EmbassyClock,
    RelayOutputs<'static>,
    EthernetLink,
    MqttSession,
    EmbassyDelay,
>;

const MQTT_SOCKET_LEN: usize = 1024;

static APP_STATE: StaticCell<SharedState> = StaticCell::new();
static PACKETS: StaticCell<PacketQueue<4, 4>> = StaticCell::new();
// DHCP, DNS, MQTT, HTTP and the /check connection.
static NET_RESOURCES: StaticCell<StackResources<5>> = StaticCell::new();
static MQTT_RX: StaticCell<[u8; MQTT_SOCKET_LEN]> = StaticCell::new();
static MQTT_TX: StaticCell<[u8; MQTT_SOCKET_LEN]> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let p = hal::init(board_config());

    // Both relays idle before configuration is read.
    let relays = RelayOutputs::new(
        OutputOpenDrain::new(p.PD14, Level::High, Speed::Low),
        OutputOpenDrain::new(p.PD15, Level::High, Speed::Low),
    );
    let led = StatusLed::new(Output::new(p.PB0, Level::Low, Speed::Low));

    let mut store = FlashStore::new(Flash::new_blocking(p.FLASH));
    let (config, outcome) = config::load_or_default(&mut store);
    telemetry::log_config_loaded(outcome, &config);
    let net_config = embassy_net::Config::dhcpv4(dhcp_config(&config));
    let state: &'static SharedState = APP_STATE.init(AppState::new(config));

    let mut rng = Rng::new(p.RNG, Irqs);
    let mut seed = [0u8; 8];
    rng.async_fill_bytes(&mut seed)
        .await
        .expect("rng seed for network stack");

    let device = Ethernet::new(
        PACKETS.init(PacketQueue::new()),
        p.ETH,
        Irqs,
        p.PA1,
        p.PA2,
        p.PC1,
        p.PA7,
        p.PC4,
        p.PC5,
        p.PG13,
        p.PB13,
        p.PG11,
        GenericPhy::new_auto(),
        mac_address(),
    );
    let (stack, runner) = embassy_net::new(
        device,
        net_config,
        NET_RESOURCES.init(StackResources::new()),
        u64::from_le_bytes(seed),
    );

    let ct_inputs = CtInputs::new(
        Adc::new(p.ADC1),
        p.PA3.degrade_adc(),
        p.PC0.degrade_adc(),
        p.PC3.degrade_adc(),
        p.PB1.degrade_adc(),
    );

    let settings = LoopSettings::default();
    let observer = LogObserver::new(settings.debug_trace);
    let io = LoopIo {
        adc: ct_inputs,
        clock: EmbassyClock,
        relays,
        link: EthernetLink::new(stack, led),
        session: MqttSession::new(
            stack,
            MQTT_RX.init([0; MQTT_SOCKET_LEN]),
            MQTT_TX.init([0; MQTT_SOCKET_LEN]),
        ),
        delay: EmbassyDelay,
    };
    let control = ControlLoop::new(state, io, settings);

    spawner
        .spawn(net_task::run(runner))
        .expect("failed to spawn network stack task");

    spawner
        .spawn(http_task::run(stack, state, store))
        .expect("failed to spawn HTTP task");

    spawner
        .spawn(control_task::run(control, observer))
        .expect("failed to spawn control loop task");

    core::future::pending::<()>().await;
}

/// 8 MHz HSE bypass from the ST-LINK, 180 MHz system clock.
fn board_config() -> hal::Config {
    use hal::rcc::{
        AHBPrescaler, APBPrescaler, Hse, HseMode, Pll, PllMul, PllPDiv, PllPreDiv, PllSource,
        Sysclk,
    };
    use hal::time::Hertz;

    let mut config = hal::Config::default();
    config.rcc.hse = Some(Hse {
        freq: Hertz(8_000_000),
        mode: HseMode::Bypass,
    });
    config.rcc.pll_src = PllSource::HSE;
    config.rcc.pll = Some(Pll {
        prediv: PllPreDiv::DIV4,
        mul: PllMul::MUL180,
        divp: Some(PllPDiv::DIV2),
        divq: None,
        divr: None,
    });
    config.rcc.ahb_pre = AHBPrescaler::DIV1;
    config.rcc.apb1_pre = APBPrescaler::DIV4;
    config.rcc.apb2_pre = APBPrescaler::DIV2;
    config.rcc.sys = Sysclk::PLL1_P;
    config
}

fn dhcp_config(config: &RuntimeConfig) -> DhcpConfig {
    let mut dhcp = DhcpConfig::default();
    dhcp.hostname = config.hostname.as_str().try_into().ok();
    dhcp
}

/// Locally administered unicast address derived from the device UID.
fn mac_address() -> [u8; 6] {
    let uid = hal::uid::uid();
    [
        0x02,
        0x48,
        uid[0] ^ uid[4],
        uid[1] ^ uid[5],
        uid[2] ^ uid[8],
        uid[3] ^ uid[9],
    ]
}
