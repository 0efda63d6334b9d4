use std::collections::VecDeque;

use tokio::time::Instant;

use crate::reading::Reading;

/// Default number of samples averaged
pub const DEFAULT_WINDOW: usize = 10;

/// Simple moving average over the most recent readings.
#[derive(Debug, Clone)]
pub struct TelemetrySmoother {
    capacity: usize,
    window: VecDeque<(Reading, Instant)>,
}

impl Default for TelemetrySmoother {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl TelemetrySmoother {
    /// A smoother averaging over the last `capacity` samples (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            window: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a sample, evicting the oldest when the window is full.
    pub fn add(&mut self, reading: Reading, at: Instant) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back((reading, at));
    }

    /// Unweighted mean of every field over the window.
    ///
    /// SOC is rounded to the nearest percent. An empty window yields an
    /// all-zero reading.
    pub fn average(&self) -> Reading {
        if self.window.is_empty() {
            return Reading::default();
        }

        let n = self.window.len() as f64;
        let (voltage, current, power, soc) = self.window.iter().fold(
            (0.0, 0.0, 0.0, 0u32),
            |(v, c, p, s), (reading, _)| {
                (
                    v + reading.voltage(),
                    c + reading.current(),
                    p + reading.power(),
                    s + u32::from(reading.soc()),
                )
            },
        );

        Reading::averaged(
            voltage / n,
            current / n,
            (f64::from(soc) / n).round() as u8,
            power / n,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}
