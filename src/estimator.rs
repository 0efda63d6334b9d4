//! Time-to-full projection from the recent state of charge trend.
//!
//! While the pack is charging, the estimator keeps the points at which the
//! averaged SOC increased, fits a line through them and extrapolates to 100%.
//! The history restarts whenever the pack stops charging, SOC drops, or SOC
//! has not moved for `stall_timeout`, so one charging session never borrows
//! trend data from another.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::reading::Reading;

#[derive(Debug, Clone)]
pub struct EstimatorConfig {
    /// Number of SOC steps kept for the fit
    pub history: usize,
    /// Steps needed before a projection is made (at least 2)
    pub min_samples: usize,
    /// Current in A above which the pack counts as charging
    pub charging_current_threshold: f64,
    /// Slowest SOC rate, in % per second, that is still projected
    pub min_rate: f64,
    /// How long SOC may stay flat before the trend is discarded
    pub stall_timeout: Duration,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            history: 10,
            min_samples: 2,
            charging_current_threshold: 0.05,
            min_rate: 0.0001,
            stall_timeout: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SocSample {
    soc: u8,
    at: Instant,
}

#[derive(Debug, Clone)]
pub struct ChargeEstimator {
    config: EstimatorConfig,
    history: VecDeque<SocSample>,
    projection: Option<Duration>,
}

impl Default for ChargeEstimator {
    fn default() -> Self {
        Self::new(EstimatorConfig::default())
    }
}

impl ChargeEstimator {
    pub fn new(mut config: EstimatorConfig) -> Self {
        config.min_samples = config.min_samples.max(2);
        config.history = config.history.max(config.min_samples);
        Self {
            history: VecDeque::with_capacity(config.history),
            config,
            projection: None,
        }
    }

    /// Feed an averaged reading taken at `now`.
    pub fn update(&mut self, reading: &Reading, now: Instant) {
        if reading.current() <= self.config.charging_current_threshold {
            if !self.history.is_empty() {
                debug!(current = reading.current(), "Not charging, discarding SOC trend");
            }
            self.reset();
            return;
        }

        let sample = SocSample {
            soc: reading.soc(),
            at: now,
        };
        match self.history.back().copied() {
            Some(last) if sample.soc < last.soc => {
                debug!(from = last.soc, to = sample.soc, "SOC dropped, restarting trend");
                self.restart_from(sample);
            }
            Some(last) if sample.soc == last.soc => {
                if now.saturating_duration_since(last.at) > self.config.stall_timeout {
                    debug!(soc = sample.soc, "SOC stalled, restarting trend");
                    self.restart_from(sample);
                }
            }
            _ => {
                if self.history.len() == self.config.history {
                    self.history.pop_front();
                }
                self.history.push_back(sample);
            }
        }

        self.projection = self.project(reading.soc());
    }

    pub fn is_estimating(&self) -> bool {
        self.projection.is_some()
    }

    /// Projected time until SOC reaches 100%, if estimating.
    pub fn time_to_full_charge(&self) -> Option<Duration> {
        self.projection
    }

    /// Observed SOC rate in % per second over the retained history.
    pub fn rate(&self) -> Option<f64> {
        if self.history.len() < self.config.min_samples {
            return None;
        }
        let first = self.history.front()?.at;
        let points: Vec<(f64, f64)> = self
            .history
            .iter()
            .map(|s| (s.at.duration_since(first).as_secs_f64(), f64::from(s.soc)))
            .collect();
        least_squares_slope(&points)
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.projection = None;
    }

    fn restart_from(&mut self, sample: SocSample) {
        self.reset();
        self.history.push_back(sample);
    }

    fn project(&self, soc: u8) -> Option<Duration> {
        let rate = self.rate()?;
        if rate.is_nan() || rate <= self.config.min_rate {
            return None;
        }
        let remaining = (100.0 - f64::from(soc)).max(0.0) / rate;
        Duration::try_from_secs_f64(remaining).ok()
    }
}

fn least_squares_slope(points: &[(f64, f64)]) -> Option<f64> {
    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let (covariance, variance) = points.iter().fold((0.0, 0.0), |(c, v), (x, y)| {
        (c + (x - mean_x) * (y - mean_y), v + (x - mean_x).powi(2))
    });
    if variance == 0.0 {
        return None;
    }
    Some(covariance / variance)
}
