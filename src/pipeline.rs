//! Wires the connection state machine, smoother, estimator and display together.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::connection::{BmsEvent, ConnectionConfig, ConnectionStateMachine};
use crate::display::DisplaySink;
use crate::error::TransportError;
use crate::estimator::ChargeEstimator;
use crate::reading::{ConnectionState, Reading};
use crate::smoother::TelemetrySmoother;
use crate::transport::Transport;

pub struct TelemetryPipeline<T: Transport, D: DisplaySink> {
    connection: ConnectionStateMachine<T>,
    events: mpsc::UnboundedReceiver<BmsEvent>,
    smoother: TelemetrySmoother,
    estimator: ChargeEstimator,
    display: D,
}

impl<T: Transport, D: DisplaySink> TelemetryPipeline<T, D> {
    pub fn new(
        transport: T,
        config: ConnectionConfig,
        smoother: TelemetrySmoother,
        estimator: ChargeEstimator,
        display: D,
    ) -> Result<Self, TransportError> {
        let (tx, events) = mpsc::unbounded_channel();
        Ok(Self {
            connection: ConnectionStateMachine::new(transport, config, tx)?,
            events,
            smoother,
            estimator,
            display,
        })
    }

    /// Bring up the transport and start looking for the BMU.
    pub async fn initialize(&mut self) -> Result<(), TransportError> {
        self.connection.initialize().await?;
        self.dispatch();
        Ok(())
    }

    /// Poll the connection once and process whatever it reported.
    pub async fn step(&mut self) {
        self.connection.poll().await;
        self.dispatch();
    }

    /// Step forever, pausing `loop_delay` between iterations.
    pub async fn run(&mut self, loop_delay: Duration) {
        loop {
            self.step().await;
            tokio::time::sleep(loop_delay).await;
        }
    }

    /// Smooth a decoded reading, update the projection and show the result.
    pub fn handle_reading(&mut self, reading: Reading, now: Instant) {
        self.smoother.add(reading, now);
        let averaged = self.smoother.average();
        self.estimator.update(&averaged, now);
        let record = averaged.with_time_to_full(self.estimator.time_to_full_charge());
        self.display.update(&record);
    }

    pub fn handle_status(&mut self, state: ConnectionState) {
        if state == ConnectionState::Connected {
            debug!("New session, clearing smoothing window and SOC trend");
            self.smoother.reset();
            self.estimator.reset();
        }
        self.display.update_connection_state(state);
    }

    pub fn connection(&self) -> &ConnectionStateMachine<T> {
        &self.connection
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    fn dispatch(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                BmsEvent::Reading(reading) => self.handle_reading(reading, Instant::now()),
                BmsEvent::Status(state) => self.handle_status(state),
            }
        }
    }
}
