//! Configuration management

use serde::Deserialize;
use std::path::Path;

use queuestack_sqs::EngineConfig;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

fn default_port() -> u16 {
    3000
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

impl Config {
    /// Load configuration from an optional file and the environment.
    ///
    /// Without an explicit path, `queuestack.{toml,yaml,json}` in the
    /// working directory is used if present. Environment variables look
    /// like `QUEUESTACK_ENGINE__DEDUP_WINDOW_SECS=60`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("queuestack").required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("QUEUESTACK")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(config.try_deserialize::<Config>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                r#"{"engine": {"dedup_window_secs": 60}}"#,
                config::FileFormat::Json,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.engine.dedup_window_secs, 60);
        assert_eq!(config.engine.default_visibility_timeout_secs, 30);
        assert_eq!(config.server.port, 3000);
    }
}
