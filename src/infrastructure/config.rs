use crate::application::sampler::DEFAULT_INTERVAL;
use crate::infrastructure::sqlite_repository::RetentionPolicy;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_FILE: &str = "config/battery";
const ENV_PREFIX: &str = "BATTERY";
const APP_DIR: &str = "charge-telemetry";
const DATABASE_FILE: &str = "readings.sqlite";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub sampler: SamplerSettings,
    pub storage: StorageSettings,
    pub server: ServerSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SamplerSettings {
    pub interval_secs: u64,
    /// Tried in order until one yields a reading
    pub commands: Vec<String>,
    pub clear_on_start: bool,
    /// A source command running longer than this is killed
    pub command_timeout_secs: u64,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL.as_secs(),
            commands: vec![
                "ioreg -n AppleSmartBattery -r".to_string(),
                "ioreg -rw0 -c AppleSmartBattery".to_string(),
            ],
            clear_on_start: false,
            command_timeout_secs: 10,
        }
    }
}

impl SamplerSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageSettings {
    /// Overrides the per-user data directory
    pub path: Option<PathBuf>,
    pub retention_days: i64,
    pub max_readings: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        let retention = RetentionPolicy::default();
        Self {
            path: None,
            retention_days: retention.max_age.num_days(),
            max_readings: retention.max_readings,
        }
    }
}

impl StorageSettings {
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_age: chrono::Duration::days(self.retention_days.max(1)),
            max_readings: self.max_readings.max(1),
        }
    }

    /// The configured path, or `<data dir>/charge-telemetry/readings.sqlite`.
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_dir().context("No per-user data directory on this system")?;
        Ok(data_dir.join(APP_DIR).join(DATABASE_FILE))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Defaults, then `config/battery.toml` if present, then `BATTERY__*` variables.
pub fn load_config() -> Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(CONFIG_FILE).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("sampler.commands"),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}
