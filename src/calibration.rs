//! Live-tunable calibration parameters.
//!
//! The store is shared between the sampling loop (reads every tick) and the
//! terminal command (rare, user-paced writes). Each parameter sits behind its
//! own critical-section mutex so a reader always sees a complete value.

use core::cell::Cell;
use core::fmt;

use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};

/// Lower bound shared by every tracked parameter (exclusive).
pub const DEFAULT_LOWER_BOUND: f32 = -10.0;

/// Static description of a calibration parameter.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationParameter {
    /// Name reported in status output
    pub name: &'static str,
    /// Short name used in the command usage line
    pub arg_name: &'static str,
    /// Value at process start
    pub default: f32,
    /// Values must be strictly greater than this
    pub lower_bound: f32,
}

impl CalibrationParameter {
    /// Whether `value` satisfies the open lower bound. NaN never does.
    #[inline]
    pub fn accepts(&self, value: f32) -> bool {
        value > self.lower_bound
    }
}

/// Keys for the parameters held by [`CalibrationStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Parameter {
    /// Correction applied to the raw motor RPM before it is plotted
    RpmCalibration,
    /// Spare slot for a second tunable value
    Dummy,
}

impl Parameter {
    /// Number of tracked parameters
    pub const COUNT: usize = 2;

    /// All parameters, in command-argument order
    pub const ALL: [Parameter; Self::COUNT] = [Parameter::RpmCalibration, Parameter::Dummy];

    /// Descriptor for this parameter
    pub const fn descriptor(self) -> &'static CalibrationParameter {
        match self {
            Parameter::RpmCalibration => &RPM_CALIBRATION,
            Parameter::Dummy => &DUMMY,
        }
    }

    /// Position in [`Parameter::ALL`]
    pub const fn index(self) -> usize {
        match self {
            Parameter::RpmCalibration => 0,
            Parameter::Dummy => 1,
        }
    }

    /// Resolve a parameter from either its full name or its argument name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|param| {
            let descriptor = param.descriptor();
            descriptor.name == name || descriptor.arg_name == name
        })
    }
}

/// RPM calibration factor
pub const RPM_CALIBRATION: CalibrationParameter = CalibrationParameter {
    name: "rpm_calibration",
    arg_name: "rpm",
    default: 0.93,
    lower_bound: DEFAULT_LOWER_BOUND,
};

/// Placeholder second parameter
pub const DUMMY: CalibrationParameter = CalibrationParameter {
    name: "dummy",
    arg_name: "dummy",
    default: 0.0,
    lower_bound: DEFAULT_LOWER_BOUND,
};

/// Reason a calibration update was refused.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RejectedReason {
    /// The value is not strictly greater than the parameter's lower bound
    OutOfRange { value: f32, lower_bound: f32 },
}

impl fmt::Display for RejectedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectedReason::OutOfRange { value, lower_bound } => {
                write!(f, "{} is out of range, must be > {}", value, lower_bound)
            }
        }
    }
}

type Slot = Mutex<CriticalSectionRawMutex, Cell<f32>>;

/// Current values of all calibration parameters.
///
/// `const`-constructible so the firmware can keep it in a `static`.
pub struct CalibrationStore {
    slots: [Slot; Parameter::COUNT],
}

impl CalibrationStore {
    /// Create a store holding every parameter's default.
    pub const fn new() -> Self {
        Self {
            slots: [
                Mutex::new(Cell::new(RPM_CALIBRATION.default)),
                Mutex::new(Cell::new(DUMMY.default)),
            ],
        }
    }

    /// Current value of `param`.
    pub fn get(&self, param: Parameter) -> f32 {
        self.slots[param.index()].lock(|cell| cell.get())
    }

    /// Replace the value of `param` if it satisfies the parameter's bound.
    ///
    /// A rejected value leaves the previous one in place.
    pub fn set(&self, param: Parameter, value: f32) -> Result<(), RejectedReason> {
        let descriptor = param.descriptor();
        if !descriptor.accepts(value) {
            return Err(RejectedReason::OutOfRange {
                value,
                lower_bound: descriptor.lower_bound,
            });
        }

        self.slots[param.index()].lock(|cell| cell.set(value));
        Ok(())
    }

    /// Restore every parameter to its default.
    pub fn reset(&self) {
        for param in Parameter::ALL {
            self.slots[param.index()].lock(|cell| cell.set(param.descriptor().default));
        }
    }

    /// Snapshot of every value, indexed by [`Parameter::index`].
    pub fn snapshot(&self) -> [f32; Parameter::COUNT] {
        Parameter::ALL.map(|param| self.get(param))
    }
}

impl Default for CalibrationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let store = CalibrationStore::new();
        assert_eq!(store.get(Parameter::RpmCalibration), 0.93);
        assert_eq!(store.get(Parameter::Dummy), 0.0);
    }

    #[test]
    fn test_accepts_values_above_bound() {
        let store = CalibrationStore::new();
        for value in [-9.999, -1.0, 0.0, 0.5, 1.5, 1000.0, f32::INFINITY] {
            assert_eq!(store.set(Parameter::RpmCalibration, value), Ok(()));
            assert_eq!(store.get(Parameter::RpmCalibration), value);
        }
    }

    #[test]
    fn test_rejects_values_at_or_below_bound() {
        let store = CalibrationStore::new();
        store.set(Parameter::RpmCalibration, 1.25).unwrap();

        for value in [-10.0, -10.001, -50.0, f32::NEG_INFINITY] {
            assert_eq!(
                store.set(Parameter::RpmCalibration, value),
                Err(RejectedReason::OutOfRange {
                    value,
                    lower_bound: DEFAULT_LOWER_BOUND
                })
            );
            assert_eq!(store.get(Parameter::RpmCalibration), 1.25);
        }
    }

    #[test]
    fn test_rejects_nan() {
        let store = CalibrationStore::new();
        assert!(store.set(Parameter::Dummy, f32::NAN).is_err());
        assert_eq!(store.get(Parameter::Dummy), 0.0);
    }

    #[test]
    fn test_round_trip_is_exact() {
        let store = CalibrationStore::new();
        store.set(Parameter::RpmCalibration, 1.5).unwrap();
        assert_eq!(store.get(Parameter::RpmCalibration), 1.5);
    }

    #[test]
    fn test_parameters_are_independent() {
        let store = CalibrationStore::new();
        store.set(Parameter::Dummy, 2.0).unwrap();
        assert_eq!(store.get(Parameter::RpmCalibration), 0.93);
        assert_eq!(store.snapshot(), [0.93, 2.0]);

        store.reset();
        assert_eq!(store.snapshot(), [0.93, 0.0]);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Parameter::from_name("rpm"), Some(Parameter::RpmCalibration));
        assert_eq!(Parameter::from_name("rpm_calibration"), Some(Parameter::RpmCalibration));
        assert_eq!(Parameter::from_name("dummy"), Some(Parameter::Dummy));
        assert_eq!(Parameter::from_name("speed"), None);
    }

    #[test]
    fn test_rejected_reason_display() {
        let reason = RejectedReason::OutOfRange {
            value: -50.0,
            lower_bound: -10.0,
        };
        assert_eq!(reason.to_string(), "-50 is out of range, must be > -10");
    }
}
