//! Application layer.
//!
//! Apps combine the capabilities from [`crate::telemetry`] and
//! [`crate::terminal`] into behaviour that runs on the motor controller:
//! - `sampling`: the periodic sampling loop that streams calibrated telemetry
//! - `calibrate`: the terminal command that tunes it at runtime

/// `calibrate` terminal command
pub mod calibrate;
/// Periodic sampling loop and its lifecycle
pub mod sampling;

pub use calibrate::{CalibrateCommand, Outcome, ParsedArgument, Summary, CALIBRATE_COMMAND};
pub use sampling::{LoopConfig, LoopError, LoopState, SamplingLoop};
