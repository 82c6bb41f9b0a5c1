//! `calibrate` terminal command.
//!
//! Usage: `calibrate [rpm] [dummy]`. Each argument must start with a number
//! (see [`parse_float_prefix`]); values that parse but fall outside a
//! parameter's range are reported and otherwise ignored.

use core::fmt::{self, Write};

use crate::calibration::{CalibrationStore, Parameter};
use crate::terminal::{CommandHandler, CommandSpec, CommandStatus};

/// Terminal entry for the command
pub const CALIBRATE_COMMAND: CommandSpec = CommandSpec {
    name: "calibrate",
    help: "Set the calibration values in this order:",
    arg_names: "[rpm] [dummy]",
};

/// How one value argument was handled.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ParsedArgument {
    pub parameter: Parameter,
    pub value: f32,
    /// `false` when the value was out of range and the old one was kept
    pub applied: bool,
}

/// Report of a completed `calibrate` invocation.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Summary {
    /// Arguments given after the command name
    pub arguments: usize,
    /// Per-parameter parse result, `None` when no argument addressed it
    pub parsed: [Option<ParsedArgument>; Parameter::COUNT],
    /// Values after the command ran, indexed by [`Parameter::index`]
    pub values: [f32; Parameter::COUNT],
}

impl Summary {
    /// Value of `param` after the command ran
    pub fn value(&self, param: Parameter) -> f32 {
        self.values[param.index()]
    }
}

/// Result of executing `calibrate`.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    /// No value arguments were given; nothing changed
    Usage,
    /// Argument `index` (1-based) is not a number. Earlier arguments were applied.
    ParseError { index: usize },
    /// All given arguments parsed
    Completed(Summary),
}

impl Outcome {
    /// Whether the dispatcher should treat the invocation as failed
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::ParseError { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Usage => {
                writeln!(f, "Please provide arguments")?;
                writeln!(f, "Usage: {} {}", CALIBRATE_COMMAND.name, CALIBRATE_COMMAND.arg_names)
            }
            Outcome::ParseError { index } => writeln!(f, "Failed to parse argument {}!", index),
            Outcome::Completed(summary) => {
                for (position, parsed) in summary.parsed.iter().enumerate() {
                    let Some(parsed) = parsed else { continue };
                    write!(f, "Argument {} parsed: {}", position + 1, parsed.value)?;
                    if !parsed.applied {
                        write!(
                            f,
                            " (rejected, must be > {})",
                            parsed.parameter.descriptor().lower_bound
                        )?;
                    }
                    writeln!(f)?;
                }
                writeln!(
                    f,
                    "Command executed successfully, {} arguments parsed!",
                    summary.arguments
                )?;
                writeln!(f)?;
                for param in Parameter::ALL {
                    writeln!(f, "{} = {}", param.descriptor().name, summary.value(param))?;
                }
                Ok(())
            }
        }
    }
}

/// Read the longest floating-point prefix of `text`, like C's `%f` conversion.
///
/// Leading whitespace is skipped. Accepted forms are decimal (`-1.5e3`, `.5`,
/// `2.`), hexadecimal (`0x1.8p1`), `inf`/`infinity` and `nan`, all
/// case-insensitive and optionally signed. Trailing characters are ignored,
/// so `1.5x` reads as `1.5`.
///
/// # Returns
///
/// * `Some(value)` - A number was found at the start of `text`
/// * `None` - `text` does not start with a number
pub fn parse_float_prefix(text: &str) -> Option<f32> {
    let text = text.trim_start();
    let bytes = text.as_bytes();

    let mut pos = 0;
    let negative = match bytes.first() {
        Some(b'-') => {
            pos += 1;
            true
        }
        Some(b'+') => {
            pos += 1;
            false
        }
        _ => false,
    };
    let body = &text[pos..];

    let magnitude = if let Some(value) = parse_special(body) {
        value
    } else if let Some(value) = parse_hex(body) {
        value
    } else {
        let len = decimal_prefix_len(body.as_bytes());
        if len == 0 {
            return None;
        }
        body[..len].parse::<f32>().ok()?
    };

    Some(if negative { -magnitude } else { magnitude })
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.len() >= prefix.len() && text.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

fn parse_special(body: &str) -> Option<f32> {
    if starts_with_ignore_case(body, "inf") {
        Some(f32::INFINITY)
    } else if starts_with_ignore_case(body, "nan") {
        Some(f32::NAN)
    } else {
        None
    }
}

/// Length of the decimal number at the start of `bytes`, 0 if there is none
fn decimal_prefix_len(bytes: &[u8]) -> usize {
    let digits_from = |start: usize| bytes[start..].iter().take_while(|b| b.is_ascii_digit()).count();

    let integer = digits_from(0);
    let mut len = integer;
    let mut fraction = 0;
    if bytes.get(len) == Some(&b'.') {
        fraction = digits_from(len + 1);
        len += 1 + fraction;
    }
    if integer + fraction == 0 {
        return 0;
    }

    // The exponent only counts when digits follow it
    if matches!(bytes.get(len), Some(b'e' | b'E')) {
        let mut exp = len + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_digits = digits_from(exp);
        if exp_digits > 0 {
            len = exp + exp_digits;
        }
    }
    len
}

/// `0x` hexadecimal float with optional fraction and binary exponent
fn parse_hex(body: &str) -> Option<f32> {
    let bytes = body.as_bytes();
    if bytes.len() < 2 || bytes[0] != b'0' || !matches!(bytes[1], b'x' | b'X') {
        return None;
    }

    let hex_digit = |pos: usize| bytes.get(pos).and_then(|&b| char::from(b).to_digit(16));

    let mut pos = 2;
    let mut mantissa: f64 = 0.0;
    let mut digits = 0;
    while let Some(digit) = hex_digit(pos) {
        mantissa = mantissa * 16.0 + f64::from(digit);
        digits += 1;
        pos += 1;
    }
    if bytes.get(pos) == Some(&b'.') {
        pos += 1;
        let mut scale = 1.0 / 16.0;
        while let Some(digit) = hex_digit(pos) {
            mantissa += f64::from(digit) * scale;
            scale /= 16.0;
            digits += 1;
            pos += 1;
        }
    }
    if digits == 0 {
        // Only "0" of "0x" is a number
        return Some(0.0);
    }

    let mut exponent: i32 = 0;
    if matches!(bytes.get(pos), Some(b'p' | b'P')) {
        let mut exp_pos = pos + 1;
        let exp_negative = match bytes.get(exp_pos) {
            Some(b'-') => {
                exp_pos += 1;
                true
            }
            Some(b'+') => {
                exp_pos += 1;
                false
            }
            _ => false,
        };
        let mut exp_digits = 0;
        let mut value: i32 = 0;
        while let Some(digit) = bytes.get(exp_pos).and_then(|&b| char::from(b).to_digit(10)) {
            value = value.saturating_mul(10).saturating_add(digit as i32);
            exp_digits += 1;
            exp_pos += 1;
        }
        if exp_digits > 0 {
            exponent = if exp_negative { -value } else { value };
        }
    }

    // Beyond this range the result is 0 or infinity in f32 anyway
    let mut remaining = exponent.clamp(-400, 400);
    while remaining > 0 {
        mantissa *= 2.0;
        remaining -= 1;
    }
    while remaining < 0 {
        mantissa /= 2.0;
        remaining += 1;
    }
    Some(mantissa as f32)
}

/// Parses `calibrate` arguments into updates of a [`CalibrationStore`].
pub struct CalibrateCommand<'a> {
    store: &'a CalibrationStore,
}

impl<'a> CalibrateCommand<'a> {
    /// Create the command.
    ///
    /// # Arguments
    ///
    /// * `store` - Calibration values read by the sampling loop and written by this command
    pub const fn new(store: &'a CalibrationStore) -> Self {
        Self { store }
    }

    /// Run the command. `args[0]` is the command name.
    pub fn execute(&self, args: &[&str]) -> Outcome {
        let values = args.get(1..).unwrap_or_default();
        if values.is_empty() {
            return Outcome::Usage;
        }

        let mut parsed = [None; Parameter::COUNT];
        for ((position, raw), param) in values.iter().enumerate().zip(Parameter::ALL) {
            let Some(value) = parse_float_prefix(raw) else {
                crate::log_warn!("calibrate: argument {} '{}' is not a number", position + 1, raw);
                return Outcome::ParseError { index: position + 1 };
            };

            let applied = match self.store.set(param, value) {
                Ok(()) => {
                    crate::log_info!("calibrate: {} = {}", param.descriptor().name, value);
                    true
                }
                Err(reason) => {
                    crate::log_warn!("calibrate: {} kept, {}", param.descriptor().name, reason);
                    false
                }
            };
            parsed[position] = Some(ParsedArgument {
                parameter: param,
                value,
                applied,
            });
        }

        Outcome::Completed(Summary {
            arguments: values.len(),
            parsed,
            values: self.store.snapshot(),
        })
    }
}

impl CommandHandler for CalibrateCommand<'_> {
    fn spec(&self) -> &'static CommandSpec {
        &CALIBRATE_COMMAND
    }

    fn handle(&self, args: &[&str], out: &mut dyn Write) -> Result<CommandStatus, fmt::Error> {
        let outcome = self.execute(args);
        write!(out, "{}", outcome)?;
        Ok(if outcome.is_error() {
            CommandStatus::Failed
        } else {
            CommandStatus::Succeeded
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(outcome: Outcome) -> Summary {
        match outcome {
            Outcome::Completed(summary) => summary,
            other => panic!("expected a completed outcome, got {:?}", other),
        }
    }

    #[test]
    fn test_no_arguments_is_usage() {
        let store = CalibrationStore::new();
        let command = CalibrateCommand::new(&store);

        for _ in 0..3 {
            assert_eq!(command.execute(&["calibrate"]), Outcome::Usage);
        }
        assert_eq!(command.execute(&[]), Outcome::Usage);
        assert_eq!(store.snapshot(), [0.93, 0.0]);
    }

    #[test]
    fn test_single_argument() {
        let store = CalibrationStore::new();
        store.set(Parameter::RpmCalibration, 1.0).unwrap();
        let command = CalibrateCommand::new(&store);

        let summary = completed(command.execute(&["calibrate", "0.93"]));
        assert_eq!(summary.arguments, 1);
        assert_eq!(summary.value(Parameter::RpmCalibration), 0.93);
        assert_eq!(store.get(Parameter::RpmCalibration), 0.93);
        assert_eq!(summary.parsed[1], None);
    }

    #[test]
    fn test_two_arguments() {
        let store = CalibrationStore::new();
        let command = CalibrateCommand::new(&store);

        let summary = completed(command.execute(&["calibrate", "0.93", "2.0"]));
        assert_eq!(summary.arguments, 2);
        assert_eq!(summary.values, [0.93, 2.0]);
        assert_eq!(store.snapshot(), [0.93, 2.0]);
    }

    #[test]
    fn test_non_numeric_first_argument() {
        let store = CalibrationStore::new();
        let command = CalibrateCommand::new(&store);

        for arg in ["abc", "", "--", ".", "e5", "x1.5", "+"] {
            assert_eq!(
                command.execute(&["calibrate", arg, "3.0"]),
                Outcome::ParseError { index: 1 }
            );
        }
        assert_eq!(store.snapshot(), [0.93, 0.0]);
    }

    #[test]
    fn test_numeric_prefix_is_applied() {
        let store = CalibrationStore::new();
        let command = CalibrateCommand::new(&store);

        let summary = completed(command.execute(&["calibrate", "1.5x"]));
        assert_eq!(summary.value(Parameter::RpmCalibration), 1.5);

        let summary = completed(command.execute(&["calibrate", "1.2.3", "0x10"]));
        assert_eq!(summary.values, [1.2, 16.0]);
    }

    #[test]
    fn test_parse_float_prefix_forms() {
        assert_eq!(parse_float_prefix("0.93"), Some(0.93));
        assert_eq!(parse_float_prefix("  -2.5e2kg"), Some(-250.0));
        assert_eq!(parse_float_prefix("+.5"), Some(0.5));
        assert_eq!(parse_float_prefix("3."), Some(3.0));
        assert_eq!(parse_float_prefix("7e"), Some(7.0));
        assert_eq!(parse_float_prefix("7e+x"), Some(7.0));
        assert_eq!(parse_float_prefix("0x10"), Some(16.0));
        assert_eq!(parse_float_prefix("-0X1.8p1"), Some(-3.0));
        assert_eq!(parse_float_prefix("0x.8"), Some(0.5));
        assert_eq!(parse_float_prefix("0x1p-2"), Some(0.25));
        assert_eq!(parse_float_prefix("0xg"), Some(0.0));
        assert_eq!(parse_float_prefix("Infinity"), Some(f32::INFINITY));
        assert_eq!(parse_float_prefix("-inf"), Some(f32::NEG_INFINITY));
        assert!(parse_float_prefix("nan").is_some_and(f32::is_nan));

        for text in ["", "abc", "-", ".", ".e1", "e5", "x1"] {
            assert_eq!(parse_float_prefix(text), None, "{:?}", text);
        }
    }

    #[test]
    fn test_nan_parses_but_is_rejected() {
        let store = CalibrationStore::new();
        let command = CalibrateCommand::new(&store);

        let summary = completed(command.execute(&["calibrate", "nan"]));
        assert_eq!(summary.value(Parameter::RpmCalibration), 0.93);
        assert!(!summary.parsed[0].is_some_and(|parsed| parsed.applied));
    }

    #[test]
    fn test_out_of_range_is_reported_not_applied() {
        let store = CalibrationStore::new();
        store.set(Parameter::RpmCalibration, 1.1).unwrap();
        let command = CalibrateCommand::new(&store);

        let summary = completed(command.execute(&["calibrate", "-50"]));
        assert_eq!(summary.arguments, 1);
        assert_eq!(summary.value(Parameter::RpmCalibration), 1.1);
        assert_eq!(
            summary.parsed[0],
            Some(ParsedArgument {
                parameter: Parameter::RpmCalibration,
                value: -50.0,
                applied: false
            })
        );
    }

    #[test]
    fn test_second_argument_parse_error_keeps_first_update() {
        let store = CalibrationStore::new();
        let command = CalibrateCommand::new(&store);

        assert_eq!(
            command.execute(&["calibrate", "1.5", "xyz"]),
            Outcome::ParseError { index: 2 }
        );
        assert_eq!(store.snapshot(), [1.5, 0.0]);
    }

    #[test]
    fn test_extra_arguments_are_counted_but_ignored() {
        let store = CalibrationStore::new();
        let command = CalibrateCommand::new(&store);

        let summary = completed(command.execute(&["calibrate", "1", "2", "junk"]));
        assert_eq!(summary.arguments, 3);
        assert_eq!(summary.values, [1.0, 2.0]);
    }

    #[test]
    fn test_summary_text() {
        let store = CalibrationStore::new();
        let command = CalibrateCommand::new(&store);

        let text = command.execute(&["calibrate", "0.5", "-20"]).to_string();
        assert_eq!(
            text,
            "Argument 1 parsed: 0.5\n\
             Argument 2 parsed: -20 (rejected, must be > -10)\n\
             Command executed successfully, 2 arguments parsed!\n\
             \n\
             rpm_calibration = 0.5\n\
             dummy = 0\n"
        );
    }

    #[test]
    fn test_usage_and_error_text() {
        assert_eq!(
            Outcome::Usage.to_string(),
            "Please provide arguments\nUsage: calibrate [rpm] [dummy]\n"
        );
        assert_eq!(
            Outcome::ParseError { index: 1 }.to_string(),
            "Failed to parse argument 1!\n"
        );
        assert!(Outcome::ParseError { index: 2 }.is_error());
        assert!(!Outcome::Usage.is_error());
    }

    #[test]
    fn test_handler_writes_outcome() {
        let store = CalibrationStore::new();
        let command = CalibrateCommand::new(&store);

        let mut out = String::new();
        assert_eq!(command.handle(&["calibrate", "abc"], &mut out), Ok(CommandStatus::Failed));
        assert_eq!(out, "Failed to parse argument 1!\n");
        assert_eq!(command.spec().name, "calibrate");

        out.clear();
        assert_eq!(command.handle(&["calibrate"], &mut out), Ok(CommandStatus::Succeeded));
        assert_eq!(command.handle(&["calibrate", "-50"], &mut out), Ok(CommandStatus::Succeeded));
    }
}
