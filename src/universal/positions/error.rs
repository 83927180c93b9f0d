use std::fmt;

/// Errors that can occur when interacting with the position store.
#[derive(Debug, PartialEq)]
pub enum PositionError {
    /// A position for the asset was opened inside the cooldown window.
    /// Carries the asset id and the existing position's open timestamp.
    DuplicateOpen(String, i64),
    /// Entry price or size is not a positive finite number.
    InvalidEntry(String),
    /// A generic internal error.
    Internal(String),
}

impl fmt::Display for PositionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionError::DuplicateOpen(asset_id, opened_at) => {
                write!(
                    f,
                    "Position for {} already opened at {} (inside cooldown)",
                    asset_id, opened_at
                )
            }
            PositionError::InvalidEntry(msg) => write!(f, "Invalid entry: {}", msg),
            PositionError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for PositionError {}
