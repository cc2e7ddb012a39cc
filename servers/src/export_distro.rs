use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use lib_distro::control;
use lib_distro::ingestors::MqttEventIngestor;
use lib_distro::{Coordinator, DistroContext, HttpRegistrationSource};

mod distro_logic;
use distro_logic::{config, logger};

async fn wait_for_signal() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Cannot listen for SIGTERM: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config();
    logger::setup_logging(&config.log_dir(), config.log_level())?;

    let settings = config.to_settings();
    log::info!(
        "Starting export distro on port {} (registrations from {}, events from {}:{})",
        settings.port,
        settings.client_host,
        settings.message_bus.host,
        settings.message_bus.port
    );

    let source = Arc::new(HttpRegistrationSource::new(
        &settings.client_host,
        settings.client_max_retries,
    )?);
    let ctx = DistroContext::from_settings(settings.clone())?;

    let shutdown = CancellationToken::new();
    let (update_tx, update_rx) = mpsc::channel(settings.update_queue_depth.max(1));
    let (event_tx, event_rx) = mpsc::channel(settings.event_queue_depth.max(1));

    let coordinator_handle = tokio::spawn(Coordinator::new(ctx, source).run(
        update_rx,
        event_rx,
        shutdown.clone(),
    ));

    let port = settings.port;
    let control_shutdown = shutdown.clone();
    let control_handle = tokio::spawn(async move {
        if let Err(e) = control::serve(port, update_tx, control_shutdown.clone()).await {
            log::error!("Control server failed: {}", e);
            control_shutdown.cancel();
        }
    });

    let ingestor_handle = tokio::spawn(
        MqttEventIngestor::new(settings.message_bus.clone(), event_tx).run(shutdown.clone()),
    );

    // Wait for a shutdown signal or a fatal component failure
    tokio::select! {
        _ = wait_for_signal() => {}
        _ = shutdown.cancelled() => {}
    }

    // Send shutdown signal to all components
    shutdown.cancel();

    // Wait for components to shut down
    if let Err(e) = tokio::try_join!(coordinator_handle, control_handle, ingestor_handle) {
        log::error!("A component task failed during shutdown: {}", e);
    }

    log::info!("Shutdown complete.");
    Ok(())
}
