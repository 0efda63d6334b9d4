use std::time::Duration;

/// One telemetry sample reported by the BMU, or an average over several.
///
/// `power` is never set independently: decoded readings derive it from
/// voltage and current, averaged readings carry the mean of the sampled powers.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Reading {
    voltage: f64,
    current: f64,
    soc: u8,
    power: f64,
    time_to_full_seconds: Option<u64>,
}

impl Reading {
    /// Build a reading from pack voltage (V), current (A, positive = charging)
    /// and state of charge (%). SOC is clamped to 100.
    pub fn new(voltage: f64, current: f64, soc: u8) -> Self {
        Self {
            voltage,
            current,
            soc: soc.min(100),
            power: voltage * current,
            time_to_full_seconds: None,
        }
    }

    pub(crate) fn averaged(voltage: f64, current: f64, soc: u8, power: f64) -> Self {
        Self {
            voltage,
            current,
            soc: soc.min(100),
            power,
            time_to_full_seconds: None,
        }
    }

    /// Attach a time-to-full projection, rounded to whole seconds.
    pub fn with_time_to_full(mut self, time_to_full: Option<Duration>) -> Self {
        self.time_to_full_seconds = time_to_full.map(|d| d.as_secs_f64().round() as u64);
        self
    }

    /// The pack voltage in V
    pub fn voltage(&self) -> f64 {
        self.voltage
    }

    /// The pack current in A. Positive while charging.
    pub fn current(&self) -> f64 {
        self.current
    }

    /// The state of charge in %
    pub fn soc(&self) -> u8 {
        self.soc
    }

    /// The power in W
    pub fn power(&self) -> f64 {
        self.power
    }

    /// Projected seconds until SOC reaches 100%, when an estimate is available
    pub fn time_to_full_seconds(&self) -> Option<u64> {
        self.time_to_full_seconds
    }
}

/// Link state towards the BMU. Only the connection state machine changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(label)
    }
}

#[test]
fn test_power_is_derived() {
    let reading = Reading::new(37.0, 1.5, 85);
    assert!((reading.power() - 55.5).abs() < 1e-9);
    assert_eq!(reading.time_to_full_seconds(), None);
}

#[test]
fn test_soc_clamped() {
    assert_eq!(Reading::new(12.0, 0.0, 130).soc(), 100);
}

#[test]
fn test_time_to_full_rounded() {
    let reading = Reading::new(12.0, 1.0, 50).with_time_to_full(Some(Duration::from_millis(1_499_600)));
    assert_eq!(reading.time_to_full_seconds(), Some(1500));
}
