// Client defaults, environment overrides, and the optional YAML override
// file.
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

pub(crate) const MAILBOX_DEPTH: usize = 1024;
pub(crate) const EVENT_QUEUE_DEPTH: usize = 1024;
pub(crate) const MAX_NAME_LEN: usize = 255;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5552;
const DEFAULT_VHOST: &str = "/";
const DEFAULT_USERNAME: &str = "guest";
const DEFAULT_PASSWORD: &str = "guest";
const DEFAULT_FRAME_MAX: u32 = 1_048_576;
const DEFAULT_HEARTBEAT_SECS: u32 = 60;

/// Connection settings. `frame_max` and `heartbeat` are the client's
/// proposals for tune negotiation; the effective values are the minimum of
/// both sides, where 0 means unconstrained.
///
/// ```
/// use warren_client::ClientConfig;
///
/// let config = ClientConfig::default();
/// assert_eq!(config.port, 5552);
/// assert_eq!(config.frame_max, 1_048_576);
/// ```
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub vhost: String,
    pub username: String,
    pub password: String,
    pub frame_max: u32,
    pub heartbeat: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            vhost: DEFAULT_VHOST.to_string(),
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            frame_max: DEFAULT_FRAME_MAX,
            heartbeat: DEFAULT_HEARTBEAT_SECS,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
struct ClientConfigOverride {
    host: Option<String>,
    port: Option<u16>,
    vhost: Option<String>,
    username: Option<String>,
    password: Option<String>,
    frame_max: Option<u32>,
    heartbeat: Option<u32>,
}

impl ClientConfig {
    /// Defaults, then environment variables, then the YAML override file
    /// named by `config_path` or `WARREN_CLIENT_CONFIG`.
    pub fn from_env_or_yaml(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::from_env();
        let override_path = config_path
            .map(|value| value.to_string())
            .or_else(|| std::env::var("WARREN_CLIENT_CONFIG").ok());
        let contents = match override_path.as_deref() {
            Some(path) => Some(
                fs::read_to_string(path).with_context(|| format!("read client config: {path}"))?,
            ),
            None => None,
        };
        if let Some(contents) = contents {
            let override_cfg: ClientConfigOverride =
                serde_yaml::from_str(&contents).context("parse client config yaml")?;
            override_cfg.apply(&mut config);
        }
        Ok(config)
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("WARREN_HOST") {
            if !value.is_empty() {
                config.host = value;
            }
        }
        if let Some(value) = read_env::<u16>("WARREN_PORT") {
            config.port = value;
        }
        if let Ok(value) = std::env::var("WARREN_VHOST") {
            if !value.is_empty() {
                config.vhost = value;
            }
        }
        if let Ok(value) = std::env::var("WARREN_USERNAME") {
            if !value.is_empty() {
                config.username = value;
            }
        }
        if let Ok(value) = std::env::var("WARREN_PASSWORD") {
            if !value.is_empty() {
                config.password = value;
            }
        }
        if let Some(value) = read_env::<u32>("WARREN_FRAME_MAX") {
            config.frame_max = value;
        }
        if let Some(value) = read_env::<u32>("WARREN_HEARTBEAT") {
            config.heartbeat = value;
        }
        config
    }
}

impl ClientConfigOverride {
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(value) = &self.host {
            if !value.is_empty() {
                config.host = value.clone();
            }
        }
        if let Some(value) = self.port {
            if value > 0 {
                config.port = value;
            }
        }
        if let Some(value) = &self.vhost {
            if !value.is_empty() {
                config.vhost = value.clone();
            }
        }
        if let Some(value) = &self.username {
            if !value.is_empty() {
                config.username = value.clone();
            }
        }
        if let Some(value) = &self.password {
            if !value.is_empty() {
                config.password = value.clone();
            }
        }
        if let Some(value) = self.frame_max {
            config.frame_max = value;
        }
        if let Some(value) = self.heartbeat {
            config.heartbeat = value;
        }
    }
}

fn read_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5552);
        assert_eq!(config.vhost, "/");
        assert_eq!(config.username, "guest");
        assert_eq!(config.password, "guest");
        assert_eq!(config.frame_max, 1_048_576);
        assert_eq!(config.heartbeat, 60);
    }

    #[test]
    fn yaml_override_applies_set_fields_only() {
        let override_cfg: ClientConfigOverride =
            serde_yaml::from_str("host: broker-1\nheartbeat: 30\n").expect("parse");
        let mut config = ClientConfig::default();
        override_cfg.apply(&mut config);
        assert_eq!(config.host, "broker-1");
        assert_eq!(config.heartbeat, 30);
        assert_eq!(config.port, 5552);
        assert_eq!(config.vhost, "/");
    }

    #[test]
    fn yaml_override_ignores_empty_strings() {
        let override_cfg: ClientConfigOverride =
            serde_yaml::from_str("host: \"\"\nvhost: \"\"\n").expect("parse");
        let mut config = ClientConfig::default();
        override_cfg.apply(&mut config);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.vhost, "/");
    }

    #[test]
    fn missing_override_file_is_an_error() {
        let err = ClientConfig::from_env_or_yaml(Some("/nonexistent/warren.yaml"))
            .expect_err("missing file");
        assert!(err.to_string().contains("read client config"));
    }
}
