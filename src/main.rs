//! RideTrack - outdoor ride recording engine
//!
//! Main entry point: prepares storage, recovers rides left over from an
//! unclean shutdown and reports any BLE sensors in range.

use anyhow::Context;
use ridetrack::recording::session::recover_orphans;
use ridetrack::sensors::bio::{BioEvent, BioStream};
use ridetrack::sensors::ble::BtleplugCentral;
use ridetrack::storage::config::{get_database_path, load_config};
use ridetrack::storage::database::Database;
use ridetrack::storage::store::SessionStore;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting RideTrack v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config().context("loading configuration")?;
    tracing::info!("Data directory: {}", config.data_dir.display());

    let database_path = get_database_path();
    let database = Database::open(&database_path)
        .with_context(|| format!("opening {}", database_path.display()))?;

    let recovered = recover_orphans(&database).context("recovering unfinished rides")?;
    if recovered > 0 {
        tracing::info!("Discarded {} unfinished ride(s)", recovered);
    }

    let statistics = database.statistics().context("reading ride statistics")?;
    tracing::info!(
        "{} completed ride(s): {}, {} riding, {} average",
        statistics.completed_rides,
        statistics.formatted_distance(),
        statistics.formatted_active_time(),
        statistics.formatted_average_speed()
    );

    for ride in database.recent_rides(5).context("listing recent rides")? {
        tracing::info!(
            "Ride {} on {}: {:.2} km in {}",
            ride.id,
            ride.started_at.format("%Y-%m-%d %H:%M"),
            ride.distance_km,
            ride.formatted_duration()
        );
    }

    match BtleplugCentral::new().await {
        Ok(central) => scan_once(Arc::new(central), &config).await,
        Err(e) => tracing::warn!("Skipping sensor scan: {}", e),
    }

    Ok(())
}

/// Run one discovery window and log what was found.
async fn scan_once(central: Arc<BtleplugCentral>, config: &ridetrack::AppConfig) {
    let bio = BioStream::spawn(central, config.sensors.ble_config());
    let mut events = bio.subscribe();

    if let Err(e) = bio.start_scan().await {
        tracing::warn!("Sensor scan failed: {}", e);
        return;
    }

    while let Ok(event) = events.recv().await {
        match event {
            BioEvent::Discovered(device) => tracing::info!(
                "Found {} ({}) at {}",
                device.display_name(),
                device.device_type,
                device.address
            ),
            BioEvent::ScanStopped => break,
            _ => {}
        }
    }

    tracing::info!("{} sensor(s) in range", bio.discovered_devices().len());
    bio.shutdown().await;
}
