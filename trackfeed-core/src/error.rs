use thiserror::Error;

/// Message bus error conditions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Invalid bus capacity {0} (must be at least 1)")]
    InvalidCapacity(usize),

    #[error("Message bus is closed")]
    Closed,
}
