use bmu_telemetry::config::{self, Settings, TransportKind};
use bmu_telemetry::{
    BleTransport, ChargeEstimator, EmulatedTransport, LogDisplay, TelemetryPipeline,
    TelemetrySmoother, Transport,
};
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1);
    let settings = config::load_settings(config_path.as_deref())?;
    bmu_telemetry::logging::init_logger(&settings.log)?;
    info!("Starting...");

    let result = match settings.transport.kind {
        TransportKind::Ble => match BleTransport::new().await {
            Ok(transport) => run(transport, &settings).await,
            Err(err) => Err(err.into()),
        },
        TransportKind::Emulator => {
            info!("Using emulated BMU");
            let transport = EmulatedTransport::new(
                settings.device.address.clone(),
                settings.transport.emulator_initial_soc,
                settings.transport.emulator_soc_step,
            );
            run(transport, &settings).await
        }
    };

    if let Err(err) = &result {
        error!(%err, "Failed to initialize {}!", settings.transport.kind.name());
    }
    result
}

async fn run<T: Transport>(transport: T, settings: &Settings) -> anyhow::Result<()> {
    let mut pipeline = TelemetryPipeline::new(
        transport,
        settings.connection_config(),
        TelemetrySmoother::new(settings.smoothing.window),
        ChargeEstimator::new(settings.estimator_config()),
        LogDisplay::new(),
    )?;
    pipeline.initialize().await?;
    info!("{} initialized successfully!", settings.transport.kind.name());

    pipeline.run(settings.loop_delay()).await;
    Ok(())
}
