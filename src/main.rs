use anyhow::Result;
use tracing::{error, info};

use gce_spot_restarter::config::{Args, Config};
use gce_spot_restarter::gce::GceClient;
use gce_spot_restarter::health::HealthServer;
use gce_spot_restarter::logging;
use gce_spot_restarter::notify::EmailNotifier;
use gce_spot_restarter::watchdog::SpotWatchdog;

const HEALTH_CHECK_PORT: u16 = 8080;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::from_args();
    logging::init(&args.log_format, &args.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT"),
        build_date = env!("BUILD_DATE"),
        "GCE Spot Restarter starting"
    );

    let config = match Config::resolve(args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    // Start health check server
    let start_time = std::time::Instant::now();
    let health_server = HealthServer::new();
    let health_server_clone = health_server.clone();

    let (tx, rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if let Err(e) = health_server_clone.serve(HEALTH_CHECK_PORT, tx).await {
            error!(error = %e, "Health check server failed");
        }
    });

    // Wait for the health server to be ready
    rx.await.ok();
    info!(
        startup_time_ms = start_time.elapsed().as_millis(),
        "Health check server initialization complete"
    );

    config.display();

    let provider = match GceClient::new(&config) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to initialize Compute Engine client");
            std::process::exit(1);
        }
    };

    let notifier = match EmailNotifier::new(&config.smtp) {
        Ok(notifier) => notifier,
        Err(e) => {
            error!(error = %e, "Failed to initialize SMTP notifier");
            std::process::exit(1);
        }
    };

    let mut watchdog = SpotWatchdog::new(provider, notifier, config, health_server);

    // An interrupt is the only clean exit; any watchdog error is fatal.
    tokio::select! {
        result = watchdog.run() => {
            if let Err(e) = result {
                error!(error = %e, "Watchdog encountered a fatal error");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt signal received, stopping polling loop");
            info!("Shutdown complete");
        }
    }

    Ok(())
}
