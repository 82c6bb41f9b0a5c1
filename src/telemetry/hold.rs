//! Stale-but-available sampling.
//!
//! Sensor gaps must never abort a tick. [`SampleAndHold`] turns a fallible
//! [`SensorReader`] into a [`TelemetrySource`] by repeating the last good
//! value of a signal until a fresh one arrives.

use core::cell::Cell;
use core::fmt;

use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};

use super::{RawSignal, TelemetrySource};

/// A signal had no fresh reading this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SampleUnavailable;

impl fmt::Display for SampleUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("sample unavailable")
    }
}

/// Fallible access to raw readings.
pub trait SensorReader {
    /// Read `signal`, or report that no reading is available right now
    fn read(&mut self, signal: RawSignal) -> Result<f32, SampleUnavailable>;
}

/// Holds the last good reading of every signal.
pub struct SampleAndHold<R> {
    reader: R,
    held: [f32; RawSignal::COUNT],
}

impl<R: SensorReader> SampleAndHold<R> {
    /// Wrap `reader`. Signals read before their first good sample report `0.0`.
    pub const fn new(reader: R) -> Self {
        Self {
            reader,
            held: [0.0; RawSignal::COUNT],
        }
    }

    /// Last value handed out for `signal`
    pub fn held(&self, signal: RawSignal) -> f32 {
        self.held[signal.index()]
    }
}

impl<R: SensorReader> TelemetrySource for SampleAndHold<R> {
    fn sample(&mut self, signal: RawSignal) -> f32 {
        match self.reader.read(signal) {
            Ok(value) => self.held[signal.index()] = value,
            Err(SampleUnavailable) => {
                crate::log_trace!("{:?} unavailable, holding last value", signal);
            }
        }
        self.held[signal.index()]
    }
}

/// Latest-value board for raw readings.
///
/// Written by the motor-control and ADC side, read by the sampling loop
/// through [`SampleAndHold`]. Every slot is guarded separately, so writers
/// and the reader may live on different execution contexts.
pub struct SharedReadings {
    slots: [Mutex<CriticalSectionRawMutex, Cell<Option<f32>>>; RawSignal::COUNT],
}

impl SharedReadings {
    /// Create a board with no readings
    pub const fn new() -> Self {
        Self {
            slots: [
                Mutex::new(Cell::new(None)),
                Mutex::new(Cell::new(None)),
                Mutex::new(Cell::new(None)),
                Mutex::new(Cell::new(None)),
                Mutex::new(Cell::new(None)),
            ],
        }
    }

    /// Store a fresh reading of `signal`
    pub fn update(&self, signal: RawSignal, value: f32) {
        self.slots[signal.index()].lock(|slot| slot.set(Some(value)));
    }

    /// Mark `signal` as unavailable until the next update
    pub fn invalidate(&self, signal: RawSignal) {
        self.slots[signal.index()].lock(|slot| slot.set(None));
    }

    /// Current reading of `signal`, if any
    pub fn latest(&self, signal: RawSignal) -> Option<f32> {
        self.slots[signal.index()].lock(|slot| slot.get())
    }
}

impl Default for SharedReadings {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorReader for &SharedReadings {
    fn read(&mut self, signal: RawSignal) -> Result<f32, SampleUnavailable> {
        self.latest(signal).ok_or(SampleUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reader that serves a scripted sequence per call
    struct Scripted<'a> {
        script: &'a [Result<f32, SampleUnavailable>],
        position: usize,
    }

    impl SensorReader for Scripted<'_> {
        fn read(&mut self, _signal: RawSignal) -> Result<f32, SampleUnavailable> {
            let next = self.script[self.position];
            self.position += 1;
            next
        }
    }

    #[test]
    fn test_holds_last_value_across_gaps() {
        let script = [
            Ok(1.0),
            Err(SampleUnavailable),
            Err(SampleUnavailable),
            Ok(2.5),
            Err(SampleUnavailable),
        ];
        let mut source = SampleAndHold::new(Scripted {
            script: &script,
            position: 0,
        });

        let values: [f32; 5] = core::array::from_fn(|_| source.sample(RawSignal::Rpm));
        assert_eq!(values, [1.0, 1.0, 1.0, 2.5, 2.5]);
        assert_eq!(source.held(RawSignal::Rpm), 2.5);
    }

    #[test]
    fn test_unavailable_before_first_reading_is_zero() {
        let script = [Err(SampleUnavailable)];
        let mut source = SampleAndHold::new(Scripted {
            script: &script,
            position: 0,
        });
        assert_eq!(source.sample(RawSignal::CurrentIn), 0.0);
    }

    #[test]
    fn test_shared_readings() {
        let readings = SharedReadings::new();
        let mut source = SampleAndHold::new(&readings);

        assert_eq!(source.sample(RawSignal::Adc1Volts), 0.0);

        readings.update(RawSignal::Adc1Volts, 3.3);
        readings.update(RawSignal::Adc2Volts, 1.1);
        assert_eq!(source.sample(RawSignal::Adc1Volts), 3.3);
        assert_eq!(source.sample(RawSignal::Adc2Volts), 1.1);

        readings.invalidate(RawSignal::Adc1Volts);
        assert_eq!(readings.latest(RawSignal::Adc1Volts), None);
        assert_eq!(source.sample(RawSignal::Adc1Volts), 3.3);
    }
}
