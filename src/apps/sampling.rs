//! Periodic sampling loop with a live-tunable calibration.
//!
//! The loop is split in two halves the way firmware apps usually are:
//!
//! - [`SamplingLoop::start`] / [`SamplingLoop::stop`] are called by the app's
//!   owner. They manage the terminal command and the lifecycle state.
//! - [`SamplingLoop::run`] is the loop body. It is spawned once, sleeps until
//!   the loop is armed, and then ticks at a fixed period until a stop is
//!   requested.
//!
//! `stop` only returns `Ok` after the loop body has stopped touching its
//! collaborators.

use core::cell::Cell;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};
use embassy_futures::yield_now;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration, Instant, Ticker};

use super::calibrate::{CalibrateCommand, CALIBRATE_COMMAND};
use crate::calibration::{CalibrationStore, Parameter};
use crate::telemetry::{
    ChannelId, RawSignal, TelemetryPublisher, TelemetrySample, TelemetrySource, Watchdog, PLOT_SERIES,
};
use crate::terminal::{CommandRegistry, RegistryFull};

/// Shortest tick period the loop runs at, one timer tick
pub const MIN_PERIOD: Duration = Duration::from_ticks(1);

/// Timing and scaling configuration for the loop.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LoopConfig {
    /// Tick period. Values below [`MIN_PERIOD`] run at [`MIN_PERIOD`].
    pub period: Duration,
    /// Delay between arming and the first published sample
    pub warm_up: Duration,
    /// Upper bound on how long `stop` waits for the loop to quiesce
    pub stop_timeout: Duration,
    /// Divisor applied to the calibrated motor RPM
    pub gear_ratio: f32,
}

impl LoopConfig {
    /// Configuration used on the motor controller: 100 Hz, 8 s warm-up
    pub const fn firmware() -> Self {
        Self {
            period: Duration::from_millis(10),
            warm_up: Duration::from_secs(8),
            stop_timeout: Duration::from_secs(1),
            gear_ratio: 14.0,
        }
    }

    /// Same timing without the warm-up delay
    pub const fn immediate() -> Self {
        Self {
            warm_up: Duration::from_ticks(0),
            ..Self::firmware()
        }
    }

    /// Override the tick period, raised to at least [`MIN_PERIOD`]
    pub const fn with_period(self, period: Duration) -> Self {
        Self {
            period: clamp_period(period),
            ..self
        }
    }

    /// Period the loop actually ticks at
    pub const fn tick_period(&self) -> Duration {
        clamp_period(self.period)
    }

    /// Override the warm-up delay
    pub const fn with_warm_up(self, warm_up: Duration) -> Self {
        Self { warm_up, ..self }
    }

    /// Override the stop timeout
    pub const fn with_stop_timeout(self, stop_timeout: Duration) -> Self {
        Self { stop_timeout, ..self }
    }
}

const fn clamp_period(period: Duration) -> Duration {
    if period.as_ticks() < MIN_PERIOD.as_ticks() {
        MIN_PERIOD
    } else {
        period
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::immediate()
    }
}

/// Lifecycle of the loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoopState {
    /// Idle; `calibrate` is not registered
    Stopped,
    /// Armed; the loop body has not started streaming yet
    Starting,
    /// Streaming one sample per channel every tick
    Running,
    /// Stop requested; the loop body has not quiesced yet
    StopRequested,
}

/// Lifecycle errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoopError {
    /// The operation is not valid in the current state
    InvalidState(LoopState),
    /// The terminal had no room for the command
    RegistryFull,
    /// The loop body did not quiesce within the configured timeout
    StopTimeout,
}

impl From<RegistryFull> for LoopError {
    fn from(_: RegistryFull) -> Self {
        LoopError::RegistryFull
    }
}

impl fmt::Display for LoopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopError::InvalidState(state) => write!(f, "invalid in state {:?}", state),
            LoopError::RegistryFull => f.write_str("command registry full"),
            LoopError::StopTimeout => f.write_str("sampling loop did not stop in time"),
        }
    }
}

/// The calibration app: a sampling loop plus its `calibrate` command.
pub struct SamplingLoop<'a> {
    config: LoopConfig,
    calibration: &'a CalibrationStore,
    command: CalibrateCommand<'a>,
    state: Mutex<CriticalSectionRawMutex, Cell<LoopState>>,
    stop_requested: AtomicBool,
    armed: Signal<CriticalSectionRawMutex, ()>,
    stopped: Signal<CriticalSectionRawMutex, ()>,
}

impl<'a> SamplingLoop<'a> {
    /// Create a stopped loop reading its calibration from `calibration`.
    pub const fn new(calibration: &'a CalibrationStore, config: LoopConfig) -> Self {
        Self {
            config,
            calibration,
            command: CalibrateCommand::new(calibration),
            state: Mutex::new(Cell::new(LoopState::Stopped)),
            stop_requested: AtomicBool::new(false),
            armed: Signal::new(),
            stopped: Signal::new(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> LoopState {
        self.state.lock(|state| state.get())
    }

    /// Loop configuration, as passed to [`SamplingLoop::new`]
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// The `calibrate` command served by this app
    pub fn command(&self) -> &CalibrateCommand<'a> {
        &self.command
    }

    /// Arm the loop and register `calibrate` with `registry`.
    ///
    /// Returns immediately; the loop body picks the request up on its own
    /// schedule.
    pub fn start<'r>(&'r self, registry: &mut impl CommandRegistry<'r>) -> Result<(), LoopError> {
        self.transition(LoopState::Stopped, LoopState::Starting)?;

        if let Err(error) = registry.register(&self.command) {
            self.set_state(LoopState::Stopped);
            return Err(error.into());
        }

        self.stop_requested.store(false, Ordering::Release);
        self.stopped.reset();
        self.armed.signal(());
        crate::log_info!("Sampling loop armed, period {}ms", self.config.period.as_millis());
        Ok(())
    }

    /// Unregister `calibrate`, request a stop and wait until the loop body
    /// has quiesced.
    ///
    /// Stopping a stopped loop is a no-op. If the loop body does not stop
    /// within [`LoopConfig::stop_timeout`] the state stays
    /// [`LoopState::StopRequested`] and [`LoopError::StopTimeout`] is returned;
    /// calling `stop` again waits for another timeout period.
    pub async fn stop<'r>(&'r self, registry: &mut impl CommandRegistry<'r>) -> Result<(), LoopError> {
        match self.state() {
            LoopState::Stopped => return Ok(()),
            LoopState::Starting | LoopState::Running => self.set_state(LoopState::StopRequested),
            LoopState::StopRequested => {}
        }

        registry.unregister(CALIBRATE_COMMAND.name);
        self.stop_requested.store(true, Ordering::Release);
        crate::log_info!("Sampling loop stop requested");

        match with_timeout(self.config.stop_timeout, self.stopped.wait()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                crate::log_warn!(
                    "Sampling loop did not stop within {}ms",
                    self.config.stop_timeout.as_millis()
                );
                Err(LoopError::StopTimeout)
            }
        }
    }

    /// Loop body. Spawn once; it serves every start/stop cycle.
    pub async fn run<S, P, W>(&self, source: &mut S, publisher: &mut P, watchdog: &mut W) -> !
    where
        S: TelemetrySource,
        P: TelemetryPublisher,
        W: Watchdog,
    {
        loop {
            self.armed.wait().await;
            self.run_session(source, publisher, watchdog).await;
        }
    }

    /// One armed period, from warm-up until the stop request is honoured.
    async fn run_session<S, P, W>(&self, source: &mut S, publisher: &mut P, watchdog: &mut W)
    where
        S: TelemetrySource,
        P: TelemetryPublisher,
        W: Watchdog,
    {
        let mut ticker = Ticker::every(self.config.tick_period());

        let warm_up_end = Instant::now() + self.config.warm_up;
        while Instant::now() < warm_up_end {
            if self.stop_pending() {
                self.quiesce();
                return;
            }
            watchdog.feed();
            next_tick(&mut ticker).await;
        }

        if self.stop_pending() {
            self.quiesce();
            return;
        }

        publisher.begin_series(&PLOT_SERIES);
        self.state.lock(|state| {
            if state.get() == LoopState::Starting {
                state.set(LoopState::Running);
            }
        });
        crate::log_info!("Sampling loop streaming {} channels", ChannelId::COUNT);

        let mut sequence: u32 = 0;
        loop {
            if self.stop_pending() {
                break;
            }

            watchdog.feed();
            self.tick(source, publisher, sequence);
            sequence = sequence.wrapping_add(1);

            next_tick(&mut ticker).await;
        }

        publisher.end_series();
        self.quiesce();
        crate::log_info!("Sampling loop stopped after {} samples", sequence);
    }

    /// Sample, calibrate and publish every channel once.
    fn tick<S, P>(&self, source: &mut S, publisher: &mut P, sequence: u32)
    where
        S: TelemetrySource,
        P: TelemetryPublisher,
    {
        let rpm_calibration = self.calibration.get(Parameter::RpmCalibration);

        for channel in ChannelId::ALL {
            let raw = source.sample(channel.signal());
            let sample = TelemetrySample {
                channel,
                sequence,
                value: self.calibrated(channel.signal(), raw, rpm_calibration),
            };
            crate::log_trace!("{:?}", sample);
            publisher.publish(sample.channel, sample.x(), sample.value);
        }
    }

    fn calibrated(&self, signal: RawSignal, raw: f32, rpm_calibration: f32) -> f32 {
        match signal {
            RawSignal::Rpm => raw * rpm_calibration / self.config.gear_ratio,
            _ => raw,
        }
    }

    fn stop_pending(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    fn quiesce(&self) {
        self.set_state(LoopState::Stopped);
        self.stopped.signal(());
    }

    fn set_state(&self, next: LoopState) {
        self.state.lock(|state| state.set(next));
    }

    fn transition(&self, from: LoopState, to: LoopState) -> Result<(), LoopError> {
        self.state.lock(|state| {
            let current = state.get();
            if current != from {
                return Err(LoopError::InvalidState(current));
            }
            state.set(to);
            Ok(())
        })
    }
}

/// Wait for the next tick and give other tasks a turn.
///
/// A ticker that has fallen behind completes without suspending, so the
/// explicit yield keeps `stop` and every other task on the executor running.
async fn next_tick(ticker: &mut Ticker) {
    ticker.next().await;
    yield_now().await;
}
