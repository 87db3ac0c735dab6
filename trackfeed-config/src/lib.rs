//! # Trackfeed Configuration System
//!
//! Hierarchical configuration for the feed ingester.
//!
//! ## Features
//! - **Unified Configuration**: one document for capture, sink and telemetry
//! - **Validation**: runtime validation of addresses, ranges and thresholds
//! - **Environment Awareness**: per-environment overrides and `TRACKFEED_*` variables

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod capture;
mod error;
mod sink;
mod telemetry;
mod validation;

pub use capture::CaptureConfig;
pub use error::ConfigError;
pub use sink::SinkConfig;
pub use telemetry::TelemetryConfig;

const BASE_FILE: &str = "config/trackfeed.yaml";
const ENV_PREFIX: &str = "TRACKFEED_";

/// Top‑level configuration container.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone)]
pub struct TrackfeedConfig {
    /// Sources and worker timing policy.
    #[validate(nested)]
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Output file layout.
    #[validate(nested)]
    #[serde(default)]
    pub sink: SinkConfig,

    /// Logging configuration.
    #[validate(nested)]
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl TrackfeedConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default Values
    /// 2. `config/trackfeed.yaml`, skipped when missing
    /// 3. `config/<TRACKFEED_ENV>.yaml`, environment‑specific overrides
    /// 4. `TRACKFEED_*` environment variables (`__` separates sections)
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(TrackfeedConfig::default()));

        if Path::new(BASE_FILE).exists() {
            figment = figment.merge(Yaml::file(BASE_FILE));
        }

        let env = std::env::var("TRACKFEED_ENV").unwrap_or_else(|_| "production".into());
        let env_file = format!("config/{}.yaml", env);
        if Path::new(&env_file).exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        Self::finish(figment)
    }

    /// Load configuration from a specific file layered over defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        let figment =
            Figment::from(Serialized::defaults(TrackfeedConfig::default())).merge(Yaml::file(path));
        Self::finish(figment)
    }

    /// Replaces the configured sources and revalidates.
    pub fn with_sources(mut self, sources: Vec<String>) -> Result<Self, ConfigError> {
        self.capture.sources = sources;
        self.validate()?;
        Ok(self)
    }

    fn finish(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn full_config_validation() {
        let config = TrackfeedConfig::default();
        config.validate().expect("Default config should validate");
    }

    #[test]
    fn base_file_and_environment_override() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/trackfeed.yaml",
                r#"
capture:
  sources: ["10.1.1.1:30003", "10.1.1.2:30003"]
  read_buffer_size: 4KiB
sink:
  prefix: adsb
"#,
            )?;
            jail.set_env("TRACKFEED_CAPTURE__BUS_CAPACITY", "64");

            let config = TrackfeedConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.capture.sources.len(), 2);
            assert_eq!(config.capture.bus_capacity, 64);
            assert_eq!(config.capture.read_buffer_size, 4096);
            assert_eq!(config.capture.reconnect_delay_ms, 5000);
            assert_eq!(config.sink.prefix, "adsb");
            Ok(())
        });
    }

    #[test]
    fn environment_file_overrides_base() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file("config/trackfeed.yaml", "capture:\n  idle_timeout_ms: 3000\n")?;
            jail.create_file("config/staging.yaml", "capture:\n  idle_timeout_ms: 9000\n")?;
            jail.set_env("TRACKFEED_ENV", "staging");

            let config = TrackfeedConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.capture.idle_timeout_ms, 9000);
            Ok(())
        });
    }

    #[test]
    fn source_override_is_validated() {
        let config = TrackfeedConfig::default()
            .with_sources(vec!["127.0.0.1:30003".into(), "127.0.0.1:30003".into()])
            .unwrap();
        assert_eq!(config.capture.sources.len(), 2);

        assert!(matches!(
            TrackfeedConfig::default().with_sources(vec!["localhost".into()]),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(matches!(
            TrackfeedConfig::load_from_path("/definitely/not/here.yaml"),
            Err(ConfigError::FileNotFound(_))
        ));
    }

    #[test]
    fn invalid_file_reports_field() {
        Jail::expect_with(|jail| {
            jail.create_file("feeds.yaml", "capture:\n  sources: [\"nowhere\"]\n")?;
            let err = TrackfeedConfig::load_from_path("feeds.yaml").unwrap_err();
            assert!(err.to_string().contains("capture.sources"), "{err}");
            Ok(())
        });
    }
}
