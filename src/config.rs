use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde_derive::Deserialize;

pub const DEFAULT_ROOM_AWAY_SECONDS: u64 = 10;
pub const DEFAULT_UPDATE_INTERVAL_SECONDS: u64 = 10;
pub const DEFAULT_SAMPLE_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_SAMPLE_HARD_TIMEOUT_SECONDS: u64 = 60;

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub tracker: TrackerConfig,
    pub areas: Option<Vec<AreaConfig>>,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: AppConfig = toml::de::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publisher_id: Option<String>,
    pub topic_path: Option<String>,
    pub keep_alive_seconds: Option<u64>,
}

/// Settings for the single tracked device this instance resolves.
#[derive(Deserialize, Debug, Clone)]
pub struct TrackerConfig {
    pub name: String,
    pub device_id: String,
    #[serde(default)]
    pub set_icon: bool,
    pub room_away_seconds: Option<u64>,
    pub room_change_seconds: Option<u64>,
    #[serde(default)]
    pub home_away_mode: bool,
    /// Only messages for these areas are accepted. Empty accepts every area.
    #[serde(default)]
    pub area_ids: Vec<String>,
    pub update_interval_seconds: Option<u64>,
    pub sample_timeout_ms: Option<u64>,
    pub sample_hard_timeout_seconds: Option<u64>,
    /// Any accepted reading drops the other areas' soft-expired samples.
    pub purge_on_update: Option<bool>,
}

impl TrackerConfig {
    #[cfg(test)]
    pub fn new(name: &str, device_id: &str) -> Self {
        TrackerConfig {
            name: name.to_string(),
            device_id: device_id.to_string(),
            set_icon: false,
            room_away_seconds: None,
            room_change_seconds: None,
            home_away_mode: false,
            area_ids: Vec::new(),
            update_interval_seconds: None,
            sample_timeout_ms: None,
            sample_hard_timeout_seconds: None,
            purge_on_update: None,
        }
    }

    pub fn room_away(&self) -> Duration {
        Duration::from_secs(self.room_away_seconds.unwrap_or(DEFAULT_ROOM_AWAY_SECONDS))
    }

    pub fn room_change(&self) -> Duration {
        Duration::from_secs(self.room_change_seconds.unwrap_or(0))
    }

    pub fn update_interval(&self) -> Duration {
        // A zero period would make the tokio interval panic.
        Duration::from_secs(
            self.update_interval_seconds
                .unwrap_or(DEFAULT_UPDATE_INTERVAL_SECONDS)
                .max(1),
        )
    }

    pub fn sample_timeout(&self) -> Duration {
        Duration::from_millis(self.sample_timeout_ms.unwrap_or(DEFAULT_SAMPLE_TIMEOUT_MS))
    }

    pub fn sample_hard_timeout(&self) -> Duration {
        Duration::from_secs(
            self.sample_hard_timeout_seconds
                .unwrap_or(DEFAULT_SAMPLE_HARD_TIMEOUT_SECONDS),
        )
    }

    pub fn purge_on_update(&self) -> bool {
        self.purge_on_update.unwrap_or(true)
    }

    pub fn accepts_area(&self, area_id: &str) -> bool {
        self.area_ids.is_empty() || self.area_ids.iter().any(|id| id == area_id)
    }
}

/// An entry of the area registry. Geometry is optional and validated when
/// the tracker is built.
#[derive(Deserialize, Debug, Clone)]
pub struct AreaConfig {
    pub id: String,
    pub name: Option<String>,
    pub icon: Option<String>,
    pub point: Option<Vec<f64>>,
    pub bounds: Option<Vec<Vec<f64>>>,
}
