//! Loading [`BotConfig`] from disk.

pub use botcore::config::{BotConfig, BrowserIdentity, ConfigError};

use log::debug;
use std::path::Path;

/// Reads a JSON config file. Missing keys take their defaults; the result is
/// not validated here, that happens when the supervisor bootstraps.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<BotConfig, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let config: BotConfig = serde_json::from_str(&raw)?;
    debug!(target: "Config", "Loaded config for {} from {}", config.bot_name, path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn partial_file_takes_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"bot_name": "Relay", "owner_number": "+44 7700 900123", "anti_call": true, "reconnect_delay_ms": 2500}}"#
        )
        .unwrap();

        let config = load_from_path(file.path()).unwrap();
        assert_eq!(config.bot_name, "Relay");
        assert!(config.anti_call);
        assert_eq!(config.reconnect_delay(), Duration::from_millis(2_500));
        assert_eq!(config.pairing_delay(), Duration::from_millis(10_000));
        assert_eq!(config.max_pairing_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_from_path(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            load_from_path(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn wrong_type_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"heartbeat_interval_ms": "soon"}}"#).unwrap();
        assert!(matches!(
            load_from_path(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
