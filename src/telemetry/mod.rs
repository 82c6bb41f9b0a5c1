//! Telemetry capabilities used by the sampling loop.
//!
//! The loop never talks to hardware or transports directly. It samples raw
//! signals through a [`TelemetrySource`], streams plot points through a
//! [`TelemetryPublisher`] and proves liveness through a [`Watchdog`]. The
//! concrete implementations belong to the surrounding firmware.

pub mod heartbeat;
pub mod hold;
pub mod queue;

pub use heartbeat::Heartbeat;
pub use hold::{SampleAndHold, SampleUnavailable, SensorReader, SharedReadings};
pub use queue::{PlotEvent, QueuePublisher};

/// Raw signals provided by the motor-control interface and the ADC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RawSignal {
    /// External ADC input 1 in volts
    Adc1Volts,
    /// External ADC input 2 in volts
    Adc2Volts,
    /// Motor speed as reported by the motor-control interface
    Rpm,
    /// Total input current in amps
    CurrentIn,
    /// Filtered total input current in amps
    CurrentInFiltered,
}

impl RawSignal {
    /// Number of raw signals
    pub const COUNT: usize = 5;

    /// All raw signals
    pub const ALL: [RawSignal; Self::COUNT] = [
        RawSignal::Adc1Volts,
        RawSignal::Adc2Volts,
        RawSignal::Rpm,
        RawSignal::CurrentIn,
        RawSignal::CurrentInFiltered,
    ];

    /// Position in [`RawSignal::ALL`]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Plot channels streamed every tick, in graph order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelId {
    Adc1,
    Adc2,
    /// Calibrated speed
    Rpm,
    CurrentIn,
    CurrentInFiltered,
}

impl ChannelId {
    /// Number of plot channels
    pub const COUNT: usize = 5;

    /// All channels in graph order
    pub const ALL: [ChannelId; Self::COUNT] = [
        ChannelId::Adc1,
        ChannelId::Adc2,
        ChannelId::Rpm,
        ChannelId::CurrentIn,
        ChannelId::CurrentInFiltered,
    ];

    /// Graph index used on the plot stream
    pub const fn index(self) -> u8 {
        self as u8
    }

    /// Graph label registered with the plotting tool
    pub const fn label(self) -> &'static str {
        match self {
            ChannelId::Adc1 => "ADC1 (V)",
            ChannelId::Adc2 => "ADC2 (V)",
            ChannelId::Rpm => "RPM (1/s)",
            ChannelId::CurrentIn => "Current In (A)",
            ChannelId::CurrentInFiltered => "Current In (filtered) (A)",
        }
    }

    /// Raw signal this channel is derived from
    pub const fn signal(self) -> RawSignal {
        match self {
            ChannelId::Adc1 => RawSignal::Adc1Volts,
            ChannelId::Adc2 => RawSignal::Adc2Volts,
            ChannelId::Rpm => RawSignal::Rpm,
            ChannelId::CurrentIn => RawSignal::CurrentIn,
            ChannelId::CurrentInFiltered => RawSignal::CurrentInFiltered,
        }
    }
}

/// A plot registered once per streaming session.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PlotSeries {
    pub x_label: &'static str,
    pub y_label: &'static str,
    pub graphs: [&'static str; ChannelId::COUNT],
}

/// The plot streamed by the calibration app.
pub const PLOT_SERIES: PlotSeries = PlotSeries {
    x_label: "Sample",
    y_label: "Value",
    graphs: [
        ChannelId::Adc1.label(),
        ChannelId::Adc2.label(),
        ChannelId::Rpm.label(),
        ChannelId::CurrentIn.label(),
        ChannelId::CurrentInFiltered.label(),
    ],
};

/// One measurement produced by a tick.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TelemetrySample {
    pub channel: ChannelId,
    /// Sample index within the current session, see [`TelemetrySample::x`]
    pub sequence: u32,
    pub value: f32,
}

impl TelemetrySample {
    /// Plot x value of this sample.
    ///
    /// `f32` counts exactly only up to 2^24. Past that (about 46 h at 100 Hz)
    /// neighbouring samples share an x value.
    pub fn x(&self) -> f32 {
        self.sequence as f32
    }
}

/// Source of the latest raw readings.
///
/// Implementations must return promptly and must not fail: when a signal has
/// no fresh reading they return the last known one (see [`SampleAndHold`]).
pub trait TelemetrySource {
    /// Latest instantaneous reading of `signal`
    fn sample(&mut self, signal: RawSignal) -> f32;
}

/// Sink for plot data.
///
/// Fire-and-forget: an implementation that cannot deliver a point drops it.
/// Nothing here may block the sampling loop.
pub trait TelemetryPublisher {
    /// Register the plot. Calling it again within a session has no effect.
    fn begin_series(&mut self, series: &'static PlotSeries);

    /// Push one point to graph `channel`
    fn publish(&mut self, channel: ChannelId, x: f32, y: f32);

    /// Close the session opened by [`TelemetryPublisher::begin_series`]
    fn end_series(&mut self) {}
}

/// Liveness heartbeat towards an external watchdog.
pub trait Watchdog {
    /// Reset the watchdog timeout
    fn feed(&mut self);
}

impl<T: TelemetrySource + ?Sized> TelemetrySource for &mut T {
    fn sample(&mut self, signal: RawSignal) -> f32 {
        (**self).sample(signal)
    }
}

impl<T: TelemetryPublisher + ?Sized> TelemetryPublisher for &mut T {
    fn begin_series(&mut self, series: &'static PlotSeries) {
        (**self).begin_series(series)
    }

    fn publish(&mut self, channel: ChannelId, x: f32, y: f32) {
        (**self).publish(channel, x, y)
    }

    fn end_series(&mut self) {
        (**self).end_series()
    }
}

impl<T: Watchdog + ?Sized> Watchdog for &mut T {
    fn feed(&mut self) {
        (**self).feed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_order_matches_plot_series() {
        for channel in ChannelId::ALL {
            assert_eq!(PLOT_SERIES.graphs[channel.index() as usize], channel.label());
        }
    }

    #[test]
    fn test_channels_map_to_distinct_signals() {
        for (position, channel) in ChannelId::ALL.iter().enumerate() {
            assert_eq!(channel.signal().index(), position);
            assert_eq!(RawSignal::ALL[position], channel.signal());
        }
    }

    #[test]
    fn test_x_is_exact_up_to_2_pow_24() {
        let at = |sequence| TelemetrySample {
            channel: ChannelId::Rpm,
            sequence,
            value: 0.0,
        };

        assert_eq!(at(0).x(), 0.0);
        assert_ne!(at((1 << 24) - 1).x(), at(1 << 24).x());
        assert_eq!(at(1 << 24).x(), 16_777_216.0);
        // Past 2^24 odd indices round onto their neighbours
        assert_eq!(at((1 << 24) + 1).x(), at(1 << 24).x());
        assert_eq!(at(u32::MAX).x(), 4_294_967_296.0);
    }
}
