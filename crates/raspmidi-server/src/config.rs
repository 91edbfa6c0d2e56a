//! Server configuration: TOML file, then environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const ENV_HOST: &str = "RASPMIDI_HOST";
pub const ENV_PORT: &str = "RASPMIDI_PORT";
pub const ENV_DATA_DIR: &str = "RASPMIDI_DATA_DIR";

const PATCHES_FILE: &str = "patches.json";
const MIDI_SELECTION_FILE: &str = "midi_config.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// ALSA/CoreMIDI/WinMM through midir.
    Midir,
    /// In-memory ports; for development without hardware.
    Virtual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub backend: BackendKind,
    pub max_patches: usize,
    /// Output used by ad-hoc commands that name no device.
    pub default_output: Option<String>,
    /// Input watched by monitor start when the request names none.
    pub default_input: Option<String>,
    pub dispatch_timeout_ms: u64,
    /// Scan, reconnect and monitor start.
    pub reconnect_timeout_ms: u64,
    pub inter_frame_delay_ms: u64,
    pub monitor_capacity: usize,
    pub command_log_capacity: usize,
    /// 0 disables the periodic health check.
    pub health_check_interval_secs: u64,
    pub route_program_changes: bool,
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            data_dir: PathBuf::from("./data"),
            backend: BackendKind::Midir,
            max_patches: raspmidi_store::DEFAULT_MAX_PATCHES,
            default_output: Some("zoom_g3x".to_string()),
            default_input: Some("chocolate".to_string()),
            dispatch_timeout_ms: 5000,
            reconnect_timeout_ms: 5000,
            inter_frame_delay_ms: 30,
            monitor_capacity: raspmidi_midi_io::DEFAULT_MONITOR_CAPACITY,
            command_log_capacity: raspmidi_midi_io::DEFAULT_COMMAND_LOG_CAPACITY,
            health_check_interval_secs: 5,
            route_program_changes: true,
            log_filter: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Reads `path` (when given) and applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Cannot read {}: {e}", path.display()))
                })?;
                Self::from_toml(&contents)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))
    }

    /// Applies `RASPMIDI_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup(ENV_HOST) {
            self.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("{ENV_PORT} must be a port number, got '{port}'")))?;
        }
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".to_string()));
        }
        if self.dispatch_timeout_ms == 0 || self.reconnect_timeout_ms == 0 {
            return Err(Error::Config("timeouts must be greater than zero".to_string()));
        }
        if self.max_patches == 0 {
            return Err(Error::Config("max_patches must be greater than zero".to_string()));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn patches_path(&self) -> PathBuf {
        self.data_dir.join(PATCHES_FILE)
    }

    pub fn midi_selection_path(&self) -> PathBuf {
        self.data_dir.join(MIDI_SELECTION_FILE)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_timeout_ms)
    }

    pub fn inter_frame_delay(&self) -> Duration {
        Duration::from_millis(self.inter_frame_delay_ms)
    }

    pub fn health_check_interval(&self) -> Option<Duration> {
        (self.health_check_interval_secs > 0)
            .then(|| Duration::from_secs(self.health_check_interval_secs))
    }
}

/// Input and output picked at runtime, saved next to the patches.
///
/// Starts from `default_input`/`default_output` until the first save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiSelection {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    /// Keep the monitor open on `input_device` so controller Program Changes
    /// reach the router.
    pub auto_connect: bool,
}

impl Default for MidiSelection {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

impl MidiSelection {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            input_device: config.default_input.clone(),
            output_device: config.default_output.clone(),
            auto_connect: true,
        }
    }

    /// Reads `path`, or returns `fallback` when the file does not exist.
    pub fn load(path: &Path, fallback: Self) -> Result<Self> {
        if !path.exists() {
            return Ok(fallback);
        }
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("Cannot parse {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::Config(format!("Cannot encode MIDI selection: {e}")))?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:5000");
        assert_eq!(config.patches_path(), PathBuf::from("./data/patches.json"));
        assert_eq!(config.monitor_capacity, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ServerConfig::from_toml(
            r#"
            port = 8080
            backend = "virtual"
            health_check_interval_secs = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.backend, BackendKind::Virtual);
        assert_eq!(config.host, "0.0.0.0");
        assert!(config.health_check_interval().is_none());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ServerConfig::default();
        config
            .apply_env(|key| match key {
                ENV_HOST => Some("127.0.0.1".to_string()),
                ENV_PORT => Some("5050".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:5050");

        let bad = config.apply_env(|key| (key == ENV_PORT).then(|| "http".to_string()));
        assert!(matches!(bad, Err(Error::Config(_))));
    }

    #[test]
    fn test_midi_selection_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            data_dir: dir.path().join("data"),
            ..ServerConfig::default()
        };
        let path = config.midi_selection_path();

        let fallback = MidiSelection::from_config(&config);
        assert_eq!(fallback.input_device.as_deref(), Some("chocolate"));
        assert_eq!(MidiSelection::load(&path, fallback.clone()).unwrap(), fallback);

        let chosen = MidiSelection {
            output_device: Some("looper".to_string()),
            auto_connect: false,
            ..fallback.clone()
        };
        chosen.save(&path).unwrap();
        assert_eq!(MidiSelection::load(&path, fallback.clone()).unwrap(), chosen);

        std::fs::write(&path, r#"{"output_device": "zoom_g3x"}"#).unwrap();
        let partial = MidiSelection::load(&path, fallback.clone()).unwrap();
        assert_eq!(partial.input_device.as_deref(), Some("chocolate"));
        assert!(partial.auto_connect);

        std::fs::write(&path, "{").unwrap();
        assert!(matches!(MidiSelection::load(&path, fallback), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(ServerConfig::from_toml("backend = \"alsa\"").is_err());
        let config = ServerConfig {
            dispatch_timeout_ms: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
