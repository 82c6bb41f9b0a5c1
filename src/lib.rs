//! Calibrated telemetry streaming for motor-controller firmware.
//!
//! A custom application samples a handful of live values every tick, applies a
//! runtime-tunable calibration factor and streams the results to a plotting
//! tool. A `calibrate` terminal command updates the factor while the loop runs.
//!
//! Everything hardware-specific sits behind the traits in [`telemetry`] and
//! [`terminal`]; the firmware binary provides the STM32 implementations.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod logging;

pub mod apps;
pub mod calibration;
pub mod telemetry;
pub mod terminal;

pub use apps::{CalibrateCommand, LoopConfig, LoopError, LoopState, Outcome, SamplingLoop};
pub use calibration::{CalibrationStore, Parameter, RejectedReason};
