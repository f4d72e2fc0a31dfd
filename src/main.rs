use std::path::PathBuf;

use clap::Parser;
use log::{info, warn};

mod config;
mod error;
mod geometry;
mod hysteresis;
mod manager;
mod messages;
mod mqtt;
mod resolver;
mod samples;
mod tracker;

/// Resolves which area a tracked device is in from per-area beacon distances.
#[derive(Parser, Debug)]
#[command(name = "mqtt-room", version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let args = Args::parse();
    let config = config::AppConfig::load(&args.config)?;

    info!(
        "Tracking device {} as {:?}",
        config.tracker.device_id, config.tracker.name
    );

    let areas = config.areas.unwrap_or_default();
    let tracker = tracker::RoomTracker::new(config.tracker.clone(), &areas);

    let (mqtt_client, eventloop) = mqtt::MqttClient::new(&config.mqtt, &config.tracker);
    if let Err(err) = mqtt_client.subscribe().await {
        // Retried from the event loop once the broker connection is up.
        warn!("Not yet active: {err}");
    }

    let core = manager::Manager::new(tracker, mqtt_client);
    core.run_loop(eventloop).await?;

    Ok(())
}
