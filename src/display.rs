//! Where finished telemetry records go.

use tracing::info;

use crate::reading::{ConnectionState, Reading};

/// Consumer of display-ready records, such as a screen.
pub trait DisplaySink {
    /// Show an averaged reading with its time-to-full projection attached.
    fn update(&mut self, record: &Reading);

    fn update_connection_state(&mut self, state: ConnectionState);
}

/// Renders records as log lines.
#[derive(Debug, Default)]
pub struct LogDisplay {
    state: ConnectionState,
}

impl LogDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }
}

impl DisplaySink for LogDisplay {
    fn update(&mut self, record: &Reading) {
        match record.time_to_full_seconds() {
            Some(seconds) => info!(
                voltage = format_args!("{:.2}", record.voltage()),
                current = format_args!("{:.2}", record.current()),
                power = format_args!("{:.1}", record.power()),
                soc = record.soc(),
                time_to_full = format_args!("{}h{:02}m", seconds / 3600, seconds % 3600 / 60),
                "BMU"
            ),
            None => info!(
                voltage = format_args!("{:.2}", record.voltage()),
                current = format_args!("{:.2}", record.current()),
                power = format_args!("{:.1}", record.power()),
                soc = record.soc(),
                "BMU"
            ),
        }
    }

    fn update_connection_state(&mut self, state: ConnectionState) {
        if state != self.state {
            info!(%state, "BMU link");
        }
        self.state = state;
    }
}

#[test]
fn test_log_display_tracks_state() {
    let mut display = LogDisplay::new();
    assert_eq!(display.state(), ConnectionState::Disconnected);
    display.update_connection_state(ConnectionState::Connecting);
    display.update_connection_state(ConnectionState::Connected);
    display.update(&Reading::new(13.3, 4.2, 64).with_time_to_full(Some(std::time::Duration::from_secs(5400))));
    assert_eq!(display.state(), ConnectionState::Connected);
}
