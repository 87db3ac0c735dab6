//! Custom validation functions for configuration.

use validator::ValidationError;

use crate::capture::CaptureConfig;

/// Validate that every source is a `host:port` address with a usable port.
pub fn validate_sources(sources: &[String]) -> Result<(), ValidationError> {
    if sources.iter().all(|s| is_source_addr(s)) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_source_address"))
    }
}

fn is_source_addr(addr: &str) -> bool {
    let Some((host, port)) = addr.rsplit_once(':') else {
        return false;
    };
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    !host.is_empty()
        && !host.chars().any(char::is_whitespace)
        && matches!(port.parse::<u16>(), Ok(p) if p != 0)
}

/// Outage classification needs `hiccup_min < reestablished_after`.
pub fn validate_outage_thresholds(config: &CaptureConfig) -> Result<(), ValidationError> {
    if config.hiccup_min_ms < config.reestablished_after_ms {
        Ok(())
    } else {
        Err(ValidationError::new("hiccup_threshold_not_below_reestablished"))
    }
}

/// File prefixes end up in file names; keep them flat.
pub fn validate_file_prefix(prefix: &str) -> Result<(), ValidationError> {
    let valid = !prefix.is_empty()
        && prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_file_prefix"))
    }
}
