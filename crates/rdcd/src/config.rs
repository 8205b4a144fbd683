//! Daemon configuration.
//!
//! Loaded from a TOML file, then overridden from the environment:
//!
//! | Variable      | Overrides          |
//! |---------------|--------------------|
//! | `RDC_SOCKET`  | `socket_path`      |
//! | `PIGPIO_ADDR` | `pigpiod.host`     |
//! | `PIGPIO_PORT` | `pigpiod.port`     |
//!
//! ```toml
//! socket_path = "/tmp/rdc.sock"
//!
//! [pigpiod]
//! host = "localhost"
//! port = 8888
//!
//! [[servo]]
//! label = "servo"
//! pwm_frequency = 50
//!
//! [servo.x]
//! pin = 12
//! min = 20
//! ```
//!
//! Every field is optional. Without any `[[servo]]` table a single servo
//! manager with the default wiring is configured.

use std::path::{Path, PathBuf};
use std::{fs, io};

use rdc_core::Label;
use rdc_servo::{ServoConfig, DEFAULT_PIGPIOD_HOST, DEFAULT_PIGPIOD_PORT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::server::DEFAULT_SOCKET_PATH;

pub const SOCKET_ENV: &str = "RDC_SOCKET";
pub const PIGPIOD_HOST_ENV: &str = "PIGPIO_ADDR";
pub const PIGPIOD_PORT_ENV: &str = "PIGPIO_PORT";

/// Label used when a `[[servo]]` table does not name one.
pub const DEFAULT_SERVO_LABEL: &str = "servo";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid {variable}: {value:?} is not a port number")]
    InvalidPort { variable: &'static str, value: String },

    #[error("No servo managers configured")]
    NoServos,

    #[error("Servo label must not be empty")]
    EmptyLabel,

    #[error("Servo '{label}': {source}")]
    Servo {
        label: Label,
        #[source]
        source: rdc_servo::ConfigError,
    },
}

/// Connection settings for the pigpio daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PigpiodConfig {
    pub host: String,
    pub port: u16,
}

impl Default for PigpiodConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_PIGPIOD_HOST.to_string(),
            port: DEFAULT_PIGPIOD_PORT,
        }
    }
}

/// One servo manager: its registration label and hardware settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServoEntry {
    #[serde(default = "default_label")]
    pub label: Label,

    #[serde(flatten)]
    pub servo: ServoConfig,
}

fn default_label() -> Label {
    Label::new(DEFAULT_SERVO_LABEL)
}

impl Default for ServoEntry {
    fn default() -> Self {
        Self {
            label: default_label(),
            servo: ServoConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket the channel server listens on
    pub socket_path: PathBuf,

    pub pigpiod: PigpiodConfig,

    #[serde(rename = "servo")]
    pub servos: Vec<ServoEntry>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            pigpiod: PigpiodConfig::default(),
            servos: vec![ServoEntry::default()],
        }
    }
}

impl DaemonConfig {
    /// Reads `path` (or starts from defaults), applies environment
    /// overrides and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };

        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Applies `RDC_SOCKET`, `PIGPIO_ADDR` and `PIGPIO_PORT` as read by
    /// `lookup`. Empty values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|value| !value.is_empty());

        if let Some(socket) = lookup(SOCKET_ENV) {
            self.socket_path = PathBuf::from(socket);
        }
        if let Some(host) = lookup(PIGPIOD_HOST_ENV) {
            self.pigpiod.host = host;
        }
        if let Some(port) = lookup(PIGPIOD_PORT_ENV) {
            self.pigpiod.port = port.parse().map_err(|_| ConfigError::InvalidPort {
                variable: PIGPIOD_PORT_ENV,
                value: port,
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servos.is_empty() {
            return Err(ConfigError::NoServos);
        }
        for entry in &self.servos {
            if entry.label.as_str().is_empty() {
                return Err(ConfigError::EmptyLabel);
            }
            entry.servo.validate().map_err(|source| ConfigError::Servo {
                label: entry.label.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Renders the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdc_core::DegreeRange;
    use std::collections::HashMap;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = DaemonConfig::from_toml_str("").unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.servos.len(), 1);
        assert_eq!(config.servos[0].label.as_str(), "servo");
        config.validate().unwrap();
    }

    #[test]
    fn test_multiple_servos_sharing_label() {
        let config = DaemonConfig::from_toml_str(
            r#"
            socket_path = "/run/rdc.sock"

            [[servo]]
            [servo.x]
            pin = 12

            [[servo]]
            pwm_frequency = 100
            [servo.x]
            pin = 18
            [servo.y]
            pin = 19
            min = 30
            max = 150
            "#,
        )
        .unwrap();

        assert_eq!(config.socket_path, PathBuf::from("/run/rdc.sock"));
        assert_eq!(config.servos.len(), 2);
        assert!(config.servos.iter().all(|s| s.label.as_str() == "servo"));
        assert_eq!(config.servos[0].servo.x, ServoConfig::default().x);
        let second = &config.servos[1].servo;
        assert_eq!(second.pwm_frequency, 100);
        assert_eq!((second.y.pin, second.y.min, second.y.max), (19, 30, 150));
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_axis_tables_keep_default_limits() {
        let config = DaemonConfig::from_toml_str("[[servo]]\n[servo.x]\npin = 18\n[servo.y]\npin = 19\n").unwrap();
        let defaults = ServoConfig::default();
        let servo = &config.servos[0].servo;

        assert_eq!(servo.x.pin, 18);
        assert_eq!(servo.x.range(), defaults.x.range());
        assert_eq!(servo.x.range(), DegreeRange::new(20, 180).unwrap());
        assert_eq!(servo.y.pin, 19);
        assert_eq!(servo.y.range(), defaults.y.range());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("RDC_SOCKET", "/tmp/other.sock"),
            ("PIGPIO_ADDR", "pi.local"),
            ("PIGPIO_PORT", "9999"),
        ]
        .into_iter()
        .collect();

        let mut config = DaemonConfig::default();
        config
            .apply_env_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.socket_path, PathBuf::from("/tmp/other.sock"));
        assert_eq!(config.pigpiod.host, "pi.local");
        assert_eq!(config.pigpiod.port, 9999);
    }

    #[test]
    fn test_env_bad_port_rejected() {
        let mut config = DaemonConfig::default();
        let err = config
            .apply_env_overrides(|name| (name == PIGPIOD_PORT_ENV).then(|| "pigpio".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort { .. }));
    }

    #[test]
    fn test_validation_errors() {
        let config = DaemonConfig::from_toml_str("servo = []").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::NoServos)));

        let config = DaemonConfig::from_toml_str("[[servo]]\nlabel = \"\"").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::EmptyLabel)));

        let config = DaemonConfig::from_toml_str("[[servo]]\n[servo.x]\npin = 12\nmin = 100\nmax = 50").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Servo { .. })));
    }

    #[test]
    fn test_unparsable_file() {
        let err = DaemonConfig::from_toml_str("socket_path = [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rdcd.toml");
        fs::write(&path, "[[servo]]\nlabel = \"pan-tilt\"\n").unwrap();

        let config = DaemonConfig::load(Some(&path)).unwrap();
        assert_eq!(config.servos[0].label.as_str(), "pan-tilt");

        let missing = DaemonConfig::load(Some(&dir.path().join("missing.toml")));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_rendered_config_parses_back() {
        let config = DaemonConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(DaemonConfig::from_toml_str(&text).unwrap(), config);
    }
}
