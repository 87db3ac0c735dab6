use thiserror::Error;
use trackfeed_core::BusError;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Invalid capture policy: {0}")]
    InvalidPolicy(String),

    #[error("Message bus error: {0}")]
    Bus(#[from] BusError),
}
