//! USB serial console.
//!
//! Lines typed by the host go to the terminal and the reply is written back.
//! Between commands the plot stream produced by the sampling loop is drained
//! and written as text (see the `Display` impl of [`PlotEvent`]).

use core::fmt::Write;

use calstream::telemetry::PlotEvent;
use calstream::terminal::{Dispatch, LineBuffer, LineEvent, SharedTerminal};
use defmt::{debug, info, warn};
use embassy_futures::select::{select, Either};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embassy_time::Timer;
use heapless::String;

use crate::peripherals::usb_system::MAX_PACKET_SIZE;
use crate::peripherals::{AcmConnection, LinkError};

/// Registered commands, at most this many at once
pub const TERMINAL_CAPACITY: usize = 4;

/// Plot events buffered between the sampling loop and the console
pub const PLOT_QUEUE_DEPTH: usize = 64;

pub type ConsoleTerminal = SharedTerminal<'static, TERMINAL_CAPACITY>;
pub type PlotQueue = Channel<CriticalSectionRawMutex, PlotEvent, PLOT_QUEUE_DEPTH>;

const RECONNECT_DELAY_MS: u64 = 100;

/// Longest command line accepted
const LINE_CAPACITY: usize = 128;

/// Terminal reply buffer. Replies that do not fit are cut short.
const REPLY_CAPACITY: usize = 1024;

/// Largest rendered [`PlotEvent`], a series announcement
const EVENT_CAPACITY: usize = 256;

/// Serial console serving the terminal and the plot stream.
pub struct Console<'d> {
    acm: AcmConnection<'d>,
    terminal: &'static ConsoleTerminal,
    plot: &'static PlotQueue,
    lines: LineBuffer<LINE_CAPACITY>,
}

impl<'d> Console<'d> {
    /// Create the console.
    ///
    /// # Arguments
    ///
    /// * `acm` - Serial port to the host
    /// * `terminal` - Commands reachable from the host
    /// * `plot` - Queue filled by the sampling loop's publisher
    pub const fn new(acm: AcmConnection<'d>, terminal: &'static ConsoleTerminal, plot: &'static PlotQueue) -> Self {
        Self {
            acm,
            terminal,
            plot,
            lines: LineBuffer::new(),
        }
    }

    /// Serve the host forever, waiting for it again after each disconnect
    pub async fn run(&mut self) -> ! {
        info!("Console started");

        loop {
            self.acm.wait_connection().await;
            self.lines.clear();

            if let Err(error) = self.serve().await {
                warn!("Console: link lost ({})", error);
                Timer::after_millis(RECONNECT_DELAY_MS).await;
            }
        }
    }

    async fn serve(&mut self) -> Result<(), LinkError> {
        let mut packet = [0u8; MAX_PACKET_SIZE as usize];
        let plot = self.plot;

        loop {
            match select(self.acm.receive_packet(&mut packet), plot.receive()).await {
                Either::First(Ok(len)) => self.receive(&packet[..len]).await?,
                Either::First(Err(LinkError::Overflow)) => warn!("Console: oversized packet discarded"),
                Either::First(Err(error)) => return Err(error),
                Either::Second(event) => self.send_event(&event).await?,
            }
        }
    }

    /// Accumulate bytes into lines and execute each completed one
    async fn receive(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        for &byte in bytes {
            match self.lines.push(byte) {
                None => {}
                Some(LineEvent::Line(line)) => execute(&mut self.acm, self.terminal, line).await?,
                Some(LineEvent::Rejected(fault)) => {
                    warn!("Console: line discarded ({})", fault);
                    let mut reply: String<64> = String::new();
                    let _ = writeln!(reply, "{}", fault);
                    self.acm.write_all(reply.as_bytes()).await?;
                }
            }
        }
        Ok(())
    }

    async fn send_event(&mut self, event: &PlotEvent) -> Result<(), LinkError> {
        let mut text: String<EVENT_CAPACITY> = String::new();
        if write!(text, "{}", event).is_err() {
            warn!("Console: plot event too long, dropped");
            return Ok(());
        }
        self.acm.write_all(text.as_bytes()).await
    }
}

/// Run `line` through the terminal and send the reply
async fn execute(acm: &mut AcmConnection<'_>, terminal: &ConsoleTerminal, line: &str) -> Result<(), LinkError> {
    let mut reply: String<REPLY_CAPACITY> = String::new();

    match terminal.dispatch(line, &mut reply) {
        Ok(Dispatch::Handled) => debug!("Console: '{}' handled", line),
        Ok(Dispatch::Failed) => warn!("Console: '{}' failed", line),
        Ok(Dispatch::Unknown) => debug!("Console: '{}' unknown", line),
        Ok(Dispatch::Empty) => {}
        Err(_) => {
            warn!("Console: reply to '{}' truncated", line);
            // The truncated reply may end mid-line
            let _ = reply.write_str("\n");
        }
    }

    acm.write_all(reply.as_bytes()).await
}

#[embassy_executor::task]
pub async fn console_task(mut console: Console<'static>) -> ! {
    console.run().await
}
