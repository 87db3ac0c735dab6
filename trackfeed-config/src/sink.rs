//! Persistence sink configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Date-partitioned output files.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct SinkConfig {
    /// Directory that receives one file per UTC day.
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// File name prefix, `<prefix>-YYYY-MM-DD.log`.
    #[validate(custom(function = validation::validate_file_prefix))]
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Upper bound on how long a written record may sit in the write buffer
    /// (milliseconds).
    #[validate(range(min = 1, max = 60000))]
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,

    /// LZ4-compress the previous day's file after rotation.
    #[serde(default = "default_compress")]
    pub compress: bool,
}

fn default_directory() -> PathBuf {
    PathBuf::from("data")
}

fn default_prefix() -> String {
    "tracking".into()
}

fn default_flush_interval() -> u64 {
    100
}

fn default_compress() -> bool {
    true
}

impl SinkConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            prefix: default_prefix(),
            flush_interval_ms: default_flush_interval(),
            compress: default_compress(),
        }
    }
}
