//! Terminal command registry and line dispatcher.
//!
//! Apps register handlers while they run and remove them when they stop. The
//! console transport assembles received bytes into lines with a
//! [`LineBuffer`] and hands each one to [`Terminal::dispatch`], which
//! tokenises it and calls the matching handler.

use core::cell::RefCell;
use core::fmt::{self, Write};

use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};
use heapless::Vec;

/// Maximum number of whitespace-separated tokens in a command line
pub const MAX_ARGS: usize = 8;

/// Help entry for a registered command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommandSpec {
    /// Token that selects the command
    pub name: &'static str,
    /// One-line description
    pub help: &'static str,
    /// Argument synopsis, e.g. `[rpm] [dummy]`
    pub arg_names: &'static str,
}

/// How a command invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandStatus {
    Succeeded,
    /// The command rejected its input; the reply says why
    Failed,
}

/// A command invoked from the terminal.
pub trait CommandHandler: Sync {
    /// Help entry, also used for lookup by name
    fn spec(&self) -> &'static CommandSpec;

    /// Run the command.
    ///
    /// # Arguments
    ///
    /// * `args` - Tokens of the command line, `args[0]` is the command name
    /// * `out` - Receives the reply text
    ///
    /// # Returns
    ///
    /// * `Ok(status)` - The command ran and its reply was written in full
    /// * `Err(fmt::Error)` - `out` could not take the whole reply
    fn handle(&self, args: &[&str], out: &mut dyn Write) -> Result<CommandStatus, fmt::Error>;
}

/// No room left for another command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegistryFull;

impl fmt::Display for RegistryFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("command registry full")
    }
}

/// Where apps register their commands.
pub trait CommandRegistry<'a> {
    /// Add `handler`, replacing any command registered under the same name
    fn register(&mut self, handler: &'a dyn CommandHandler) -> Result<(), RegistryFull>;

    /// Remove the command called `name`. Unknown names are ignored.
    fn unregister(&mut self, name: &str);
}

/// Result of dispatching one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dispatch {
    /// The line held no tokens
    Empty,
    /// A registered command (or `help`) ran
    Handled,
    /// A registered command ran and reported [`CommandStatus::Failed`]
    Failed,
    /// Nothing is registered under the first token
    Unknown,
}

/// Fixed-capacity command table.
pub struct Terminal<'a, const N: usize> {
    commands: Vec<&'a dyn CommandHandler, N>,
}

impl<'a, const N: usize> Terminal<'a, N> {
    /// Create an empty table
    pub const fn new() -> Self {
        Self { commands: Vec::new() }
    }

    /// Number of registered commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether no command is registered
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Look up a command by name
    pub fn find(&self, name: &str) -> Option<&'a dyn CommandHandler> {
        self.commands.iter().copied().find(|handler| handler.spec().name == name)
    }

    /// Tokenise `line` and run the command it names, writing its output to `out`.
    pub fn dispatch(&self, line: &str, out: &mut dyn Write) -> Result<Dispatch, fmt::Error> {
        let mut args: Vec<&str, MAX_ARGS> = Vec::new();
        for token in line.split_whitespace() {
            if args.push(token).is_err() {
                crate::log_warn!("Command line truncated to {} tokens", MAX_ARGS);
                break;
            }
        }

        let Some(&name) = args.first() else {
            return Ok(Dispatch::Empty);
        };

        if name == "help" {
            self.write_help(out)?;
            return Ok(Dispatch::Handled);
        }

        match self.find(name) {
            Some(handler) => {
                crate::log_debug!("Terminal: running '{}' with {} arguments", name, args.len() - 1);
                match handler.handle(&args, out)? {
                    CommandStatus::Succeeded => Ok(Dispatch::Handled),
                    CommandStatus::Failed => {
                        crate::log_debug!("Terminal: '{}' failed", name);
                        Ok(Dispatch::Failed)
                    }
                }
            }
            None => {
                writeln!(out, "Invalid command: {}", name)?;
                writeln!(out, "type help to list all available commands")?;
                Ok(Dispatch::Unknown)
            }
        }
    }

    fn write_help(&self, out: &mut dyn Write) -> fmt::Result {
        writeln!(out, "Valid commands are:")?;
        writeln!(out, "help")?;
        writeln!(out, "  Show this help")?;
        for handler in &self.commands {
            let spec = handler.spec();
            writeln!(out, "{} {}", spec.name, spec.arg_names)?;
            writeln!(out, "  {}", spec.help)?;
        }
        Ok(())
    }
}

impl<const N: usize> Default for Terminal<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, const N: usize> CommandRegistry<'a> for Terminal<'a, N> {
    fn register(&mut self, handler: &'a dyn CommandHandler) -> Result<(), RegistryFull> {
        let name = handler.spec().name;
        if let Some(slot) = self.commands.iter_mut().find(|existing| existing.spec().name == name) {
            *slot = handler;
            return Ok(());
        }
        self.commands.push(handler).map_err(|_| RegistryFull)?;
        crate::log_debug!("Terminal: registered '{}'", name);
        Ok(())
    }

    fn unregister(&mut self, name: &str) {
        self.commands.retain(|handler| handler.spec().name != name);
    }
}

/// [`Terminal`] shared between the console transport and the app owner.
///
/// Dispatch and registration each take the lock for the duration of one call,
/// so a handler runs to completion before the table can change.
pub struct SharedTerminal<'a, const N: usize> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Terminal<'a, N>>>,
}

impl<'a, const N: usize> SharedTerminal<'a, N> {
    /// Create an empty shared table, usable as a `static`
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Terminal::new())),
        }
    }

    /// See [`Terminal::dispatch`]
    pub fn dispatch(&self, line: &str, out: &mut dyn Write) -> Result<Dispatch, fmt::Error> {
        self.inner.lock(|terminal| terminal.borrow().dispatch(line, out))
    }

    /// Whether a command called `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock(|terminal| terminal.borrow().find(name).is_some())
    }
}

impl<const N: usize> Default for SharedTerminal<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, const N: usize> CommandRegistry<'a> for &SharedTerminal<'a, N> {
    fn register(&mut self, handler: &'a dyn CommandHandler) -> Result<(), RegistryFull> {
        self.inner.lock(|terminal| terminal.borrow_mut().register(handler))
    }

    fn unregister(&mut self, name: &str) {
        self.inner.lock(|terminal| terminal.borrow_mut().unregister(name))
    }
}

/// Why a console line was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LineFault {
    /// The line did not fit the buffer
    TooLong,
    /// The line contained a byte outside 7-bit ASCII
    NonAscii,
}

impl fmt::Display for LineFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineFault::TooLong => f.write_str("Line too long"),
            LineFault::NonAscii => f.write_str("Line contains non-ASCII characters"),
        }
    }
}

/// Result of feeding one byte to a [`LineBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent<'l> {
    /// A complete, non-empty line without its terminator
    Line(&'l str),
    /// A line ended but was discarded
    Rejected(LineFault),
}

/// Assembles a byte stream into `\r`- or `\n`-terminated ASCII lines.
///
/// A faulty line is dropped whole: bytes up to its terminator are ignored
/// and the terminator reports the fault.
pub struct LineBuffer<const N: usize> {
    line: heapless::String<N>,
    fault: Option<LineFault>,
    complete: bool,
}

impl<const N: usize> LineBuffer<N> {
    pub const fn new() -> Self {
        Self {
            line: heapless::String::new(),
            fault: None,
            complete: false,
        }
    }

    /// Forget any partial line
    pub fn clear(&mut self) {
        self.line.clear();
        self.fault = None;
        self.complete = false;
    }

    /// Feed one byte.
    ///
    /// # Returns
    ///
    /// * `Some(event)` - `byte` terminated a line
    /// * `None` - The line is still open, or an empty line ended
    pub fn push(&mut self, byte: u8) -> Option<LineEvent<'_>> {
        if self.complete {
            self.line.clear();
            self.complete = false;
        }

        match byte {
            b'\r' | b'\n' => {
                if let Some(fault) = self.fault.take() {
                    self.line.clear();
                    return Some(LineEvent::Rejected(fault));
                }
                if self.line.is_empty() {
                    return None;
                }
                self.complete = true;
                Some(LineEvent::Line(self.line.as_str()))
            }
            _ if self.fault.is_some() => None,
            _ if !byte.is_ascii() => {
                self.fault = Some(LineFault::NonAscii);
                None
            }
            _ => {
                if self.line.push(char::from(byte)).is_err() {
                    self.fault = Some(LineFault::TooLong);
                }
                None
            }
        }
    }
}

impl<const N: usize> Default for LineBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}
