use config::{Config, ConfigError, Environment, File};
use rusty_smu::{ConnectionSettings, SweepScripts};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub instrument: InstrumentConfig,
    pub scripts: ScriptsConfig,
    pub storage: StorageConfig,
    pub history: HistoryConfig,
    pub console: ConsoleConfig,
}

impl AppConfig {
    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instrument.baud_rate == 0 {
            return Err(ConfigError::Message(
                "instrument.baud_rate must be greater than zero".to_string(),
            ));
        }
        if self.instrument.terminator.is_empty() {
            return Err(ConfigError::Message(
                "instrument.terminator must not be empty".to_string(),
            ));
        }
        if !self.instrument.terminator.is_ascii() {
            return Err(ConfigError::Message(format!(
                "instrument.terminator must be ASCII, got {:?}",
                self.instrument.terminator
            )));
        }
        if self.instrument.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "instrument.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        let instrument = &self.instrument;
        ConnectionSettings {
            address: instrument.address.clone(),
            terminator: instrument.terminator.chars().next().unwrap_or('\n'),
            baud_rate: instrument.baud_rate,
            read_timeout: (instrument.read_timeout_ms > 0)
                .then(|| Duration::from_millis(instrument.read_timeout_ms)),
            poll_interval: Duration::from_millis(instrument.poll_interval_ms),
        }
    }

    pub fn sweep_scripts(&self) -> SweepScripts {
        SweepScripts {
            transfer_forward: self.scripts.transfer_forward.clone(),
            transfer_reverse: self.scripts.transfer_reverse.clone(),
            output: self.scripts.output.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct InstrumentConfig {
    /// VISA-style resource string, serial device path or `sim://<name>`
    pub address: String,
    pub baud_rate: u32,
    pub terminator: String,
    /// 0 disables the read deadline
    pub read_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ScriptsConfig {
    pub dir: String,
    pub transfer_forward: String,
    pub transfer_reverse: String,
    pub output: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub output_dir: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ConsoleConfig {
    pub verbosity: String,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            address: "USB0::1510::9782::4399155::0::INSTR".to_string(),
            baud_rate: rusty_smu::smu::connection::DEFAULT_BAUD_RATE,
            terminator: "\n".to_string(),
            read_timeout_ms: 0,
            poll_interval_ms: 100,
        }
    }
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        let scripts = SweepScripts::default();
        Self {
            dir: "TSP-scripts".to_string(),
            transfer_forward: scripts.transfer_forward,
            transfer_reverse: scripts.transfer_reverse,
            output: scripts.output,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: ".".to_string(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "./logs/smu_history.jsonl".to_string(),
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            verbosity: "info".to_string(),
        }
    }
}

/// Load configuration from defaults, an optional file and the environment
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

    if let Some(path) = config_path {
        if !path.exists() {
            return Err(ConfigError::Message(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        builder = builder.add_source(File::from(path));
    } else if let Some(path) = ["smu_sweep.toml", "config.toml"]
        .into_iter()
        .find(|path| Path::new(path).exists())
    {
        builder = builder.add_source(File::with_name(path));
    }

    // e.g. RUSTY_SMU__INSTRUMENT__ADDRESS=sim://bench
    builder = builder.add_source(
        Environment::with_prefix("RUSTY_SMU")
            .separator("__")
            .try_parsing(true),
    );

    let app_config = builder.build()?.try_deserialize::<AppConfig>()?;
    app_config.validate()?;
    Ok(app_config)
}

/// Load configuration, falling back to defaults only for auto-discovered files
///
/// An explicitly given path that is missing or invalid is an error. Runs
/// before the logger exists, so the fallback notice goes to stderr.
pub fn load_config_or_default(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match load_config(config_path) {
        Ok(config) => Ok(config),
        Err(e) if config_path.is_some() => Err(e),
        Err(e) => {
            eprintln!("Warning: failed to load config: {e}. Using defaults.");
            Ok(AppConfig::default())
        }
    }
}
