//! Firmware entry point.
//!
//! Brings up the STM32H753, exposes the terminal and the plot stream on a USB
//! serial port and starts the calibration streaming app at boot.

#![no_std]
#![no_main]

mod console;
mod peripherals;

use calstream::calibration::CalibrationStore;
use calstream::telemetry::{Heartbeat, QueuePublisher, SampleAndHold, SharedReadings};
use calstream::{LoopConfig, LoopState, SamplingLoop};
use console::{Console, ConsoleTerminal, PlotQueue};
use defmt::{error, info, warn};
use embassy_executor::Spawner;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Instant, Timer};
use peripherals::{init_system, AcmConnection, UsbSystem};

#[cfg(not(feature = "debug"))]
use panic_halt as _;
#[cfg(feature = "debug")]
use {defmt_rtt as _, panic_probe as _};

static CALIBRATION: CalibrationStore = CalibrationStore::new();

/// Latest raw readings, sampled by the app every tick.
///
/// This binary has no motor-control or ADC driver of its own, so nothing here
/// calls [`SharedReadings::update`] and every graph reads 0 until one is
/// linked in. The integration point is a task or interrupt handler that calls
/// `READINGS.update(signal, value)` whenever a new measurement is available.
pub static READINGS: SharedReadings = SharedReadings::new();

static HEARTBEAT: Heartbeat = Heartbeat::new();
static PLOT_QUEUE: PlotQueue = Channel::new();
static TERMINAL: ConsoleTerminal = ConsoleTerminal::new();
static APP: SamplingLoop<'static> = SamplingLoop::new(&CALIBRATION, LoopConfig::firmware());

/// How often the main task checks the app heartbeat
const MONITOR_PERIOD: Duration = Duration::from_secs(1);

/// Ticks a running app may miss before it is reported as stalled
const HEARTBEAT_MISSED_TICKS: u32 = 50;

/// Interval between status log lines
const STATUS_PERIOD: Duration = Duration::from_secs(60);

#[embassy_executor::task]
async fn app_task() -> ! {
    let mut source = SampleAndHold::new(&READINGS);
    let mut publisher = QueuePublisher::new(&PLOT_QUEUE);
    let mut watchdog = &HEARTBEAT;
    APP.run(&mut source, &mut publisher, &mut watchdog).await
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Starting calstream firmware v{}", env!("CARGO_PKG_VERSION"));

    let peripherals = init_system();

    let mut usb = UsbSystem::new(claim_usb!(peripherals));
    let acm = AcmConnection::new(usb.builder(), claim_acm!());
    let device = usb.into_device();

    spawner.spawn(peripherals::usb_task(device)).unwrap();
    spawner
        .spawn(console::console_task(Console::new(acm, &TERMINAL, &PLOT_QUEUE)))
        .unwrap();
    spawner.spawn(app_task()).unwrap();

    match APP.start(&mut &TERMINAL) {
        Ok(()) => info!(
            "Calibration app started, period {} ms",
            APP.config().tick_period().as_millis()
        ),
        Err(e) => error!("Calibration app failed to start: {}", e),
    }

    let mut last_status = Instant::now();
    let mut stalled = false;
    loop {
        Timer::after(MONITOR_PERIOD).await;

        if APP.state() == LoopState::Running {
            let alive = HEARTBEAT.is_alive(APP.config().tick_period() * HEARTBEAT_MISSED_TICKS);
            if !alive && !stalled {
                warn!("Calibration app heartbeat lost");
            } else if alive && stalled {
                info!("Calibration app heartbeat recovered");
            }
            stalled = !alive;
        }

        if last_status.elapsed() >= STATUS_PERIOD {
            last_status = Instant::now();
            info!("System heartbeat - app {}", APP.state());
        }
    }
}
