use std::env;
use std::fs;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::DEFAULT_RELAY_ADDR;

/// Runtime defaults, loadable from a JSON file.
///
/// Lookup order: built-in defaults, then the file named by `TRAN_CONFIG`,
/// then the `RELAY_ADDR` environment variable.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub relay_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_addr: DEFAULT_RELAY_ADDR.to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let mut config = match env::var("TRAN_CONFIG") {
            Ok(path) => match fs::read_to_string(&path) {
                Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                    warn!("ignoring malformed config file {}: {}", path, e);
                    Config::default()
                }),
                Err(e) => {
                    warn!("could not read config file {}: {}", path, e);
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        };

        if let Ok(addr) = env::var("RELAY_ADDR") {
            config.relay_addr = addr;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_points_at_builtin_relay() {
        assert_eq!(Config::default().relay_addr, DEFAULT_RELAY_ADDR);
    }

    #[test]
    fn config_json_roundtrip() {
        let parsed: Config = serde_json::from_str(r#"{"relay_addr":"127.0.0.1:9000"}"#).unwrap();
        assert_eq!(parsed.relay_addr, "127.0.0.1:9000");

        let empty: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.relay_addr, DEFAULT_RELAY_ADDR);
    }
}
