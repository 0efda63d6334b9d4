//! Read, smooth and project telemetry from a Battery Management Unit over Bluetooth Low Energy.
//!
//! The BMU speaks a small binary request-response protocol over a vendor GATT
//! service: requests are written to one characteristic and responses arrive as
//! notifications on another. This crate keeps a connection to one BMU alive,
//! asks it for its basic info once a second and turns the answers into
//! display-ready records:
//!
//! - Pack voltage (V)
//! - Pack current (A, positive while charging)
//! - Power (W)
//! - State of charge (%)
//! - Projected time until full (s), while charging
//!
//! # Example
//!
//! ```rust,no_run
//! # use std::time::Duration;
//! use bmu_telemetry::{
//!     BleTransport, ChargeEstimator, ConnectionConfig, LogDisplay, TelemetryPipeline,
//!     TelemetrySmoother,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # pub async fn main() -> anyhow::Result<()> {
//!     let config = ConnectionConfig {
//!         target_address: "a4:c1:37:33:43:51".to_string(),
//!         ..ConnectionConfig::default()
//!     };
//!     let mut pipeline = TelemetryPipeline::new(
//!         BleTransport::new().await?,
//!         config,
//!         TelemetrySmoother::default(),
//!         ChargeEstimator::default(),
//!         LogDisplay::new(),
//!     )?;
//!     pipeline.initialize().await?;
//!     pipeline.run(Duration::from_millis(50)).await;
//! #   Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod display;
pub mod error;
pub mod estimator;
pub mod logging;
mod message;
pub mod pipeline;
mod reading;
pub mod smoother;
pub mod transport;

pub use codec::FrameCodec;
pub use connection::{BmsEvent, ConnectionConfig, ConnectionStateMachine};
pub use display::{DisplaySink, LogDisplay};
pub use error::{DecodeError, TransportError};
pub use estimator::{ChargeEstimator, EstimatorConfig};
pub use pipeline::TelemetryPipeline;
pub use reading::{ConnectionState, Reading};
pub use smoother::TelemetrySmoother;
pub use transport::{BleTransport, EmulatedTransport, Transport};
