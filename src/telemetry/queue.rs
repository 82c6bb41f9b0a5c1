//! Bounded hand-off between the sampling loop and the plot transport.

use core::fmt;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;

use super::{ChannelId, PlotSeries, TelemetryPublisher};

/// Events consumed by the transport side of the plot stream.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlotEvent {
    /// A plot was registered; the transport announces its labels
    Series(&'static PlotSeries),
    /// One point on graph `graph`
    Point { graph: u8, x: f32, y: f32 },
    /// The session ended
    Closed,
}

/// Text rendering used on the serial plot stream, one event per block of
/// newline-terminated lines:
///
/// ```text
/// #series Sample;Value
/// #graph 0 ADC1 (V)
/// ...
/// 0 12 1.65
/// #end
/// ```
///
/// Point lines are `graph x y`.
impl fmt::Display for PlotEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlotEvent::Series(series) => {
                writeln!(f, "#series {};{}", series.x_label, series.y_label)?;
                for (graph, label) in series.graphs.iter().enumerate() {
                    writeln!(f, "#graph {} {}", graph, label)?;
                }
                Ok(())
            }
            PlotEvent::Point { graph, x, y } => writeln!(f, "{} {} {}", graph, x, y),
            PlotEvent::Closed => writeln!(f, "#end"),
        }
    }
}

/// [`TelemetryPublisher`] that enqueues [`PlotEvent`]s without waiting.
///
/// A full queue drops the event and bumps [`QueuePublisher::dropped`]; the
/// sampling loop never notices.
pub struct QueuePublisher<'q, M: RawMutex, const N: usize> {
    queue: &'q Channel<M, PlotEvent, N>,
    open: bool,
    dropped: u32,
}

impl<'q, M: RawMutex, const N: usize> QueuePublisher<'q, M, N> {
    /// Publish into `queue`
    pub const fn new(queue: &'q Channel<M, PlotEvent, N>) -> Self {
        Self {
            queue,
            open: false,
            dropped: 0,
        }
    }

    /// Events lost to a full queue since creation
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Whether a series is currently open
    pub fn is_open(&self) -> bool {
        self.open
    }

    fn push(&mut self, event: PlotEvent) {
        if self.queue.try_send(event).is_err() {
            self.dropped = self.dropped.wrapping_add(1);
        }
    }
}

impl<M: RawMutex, const N: usize> TelemetryPublisher for QueuePublisher<'_, M, N> {
    fn begin_series(&mut self, series: &'static PlotSeries) {
        if self.open {
            return;
        }
        self.open = true;
        self.push(PlotEvent::Series(series));
    }

    fn publish(&mut self, channel: ChannelId, x: f32, y: f32) {
        self.push(PlotEvent::Point {
            graph: channel.index(),
            x,
            y,
        });
    }

    fn end_series(&mut self) {
        if self.open {
            self.open = false;
            self.push(PlotEvent::Closed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::PLOT_SERIES;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    #[test]
    fn test_begin_series_is_idempotent() {
        let queue = Channel::<NoopRawMutex, PlotEvent, 8>::new();
        let mut publisher = QueuePublisher::new(&queue);

        publisher.begin_series(&PLOT_SERIES);
        publisher.begin_series(&PLOT_SERIES);
        assert!(publisher.is_open());

        assert_eq!(queue.try_receive(), Ok(PlotEvent::Series(&PLOT_SERIES)));
        assert!(queue.try_receive().is_err());
    }

    #[test]
    fn test_points_carry_graph_index() {
        let queue = Channel::<NoopRawMutex, PlotEvent, 8>::new();
        let mut publisher = QueuePublisher::new(&queue);

        publisher.publish(ChannelId::Rpm, 4.0, 0.5);
        assert_eq!(
            queue.try_receive(),
            Ok(PlotEvent::Point {
                graph: 2,
                x: 4.0,
                y: 0.5
            })
        );
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let queue = Channel::<NoopRawMutex, PlotEvent, 2>::new();
        let mut publisher = QueuePublisher::new(&queue);

        for sample in 0..5 {
            publisher.publish(ChannelId::Adc1, sample as f32, 1.0);
        }
        assert_eq!(publisher.dropped(), 3);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_end_series_only_after_begin() {
        let queue = Channel::<NoopRawMutex, PlotEvent, 4>::new();
        let mut publisher = QueuePublisher::new(&queue);

        publisher.end_series();
        assert!(queue.is_empty());

        publisher.begin_series(&PLOT_SERIES);
        publisher.end_series();
        assert!(!publisher.is_open());
        assert_eq!(queue.try_receive(), Ok(PlotEvent::Series(&PLOT_SERIES)));
        assert_eq!(queue.try_receive(), Ok(PlotEvent::Closed));
    }

    #[test]
    fn test_text_rendering() {
        let point = PlotEvent::Point {
            graph: 2,
            x: 4.0,
            y: 0.5,
        };
        assert_eq!(point.to_string(), "2 4 0.5\n");
        assert_eq!(PlotEvent::Closed.to_string(), "#end\n");

        let series = PlotEvent::Series(&PLOT_SERIES).to_string();
        assert!(series.starts_with("#series Sample;Value\n#graph 0 ADC1 (V)\n"));
        assert_eq!(series.lines().count(), 1 + ChannelId::COUNT);
    }
}
