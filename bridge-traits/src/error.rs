use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

impl BridgeError {
    /// Whether the failure happened below the HTTP layer and may succeed on
    /// another attempt.
    pub fn is_network_failure(&self) -> bool {
        matches!(self, BridgeError::Network(_) | BridgeError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_failures() {
        assert!(BridgeError::Network("reset".into()).is_network_failure());
        assert!(BridgeError::Timeout(Duration::from_secs(1)).is_network_failure());
        assert!(!BridgeError::NotAvailable("no client".into()).is_network_failure());
        assert!(!BridgeError::OperationFailed("bad url".into()).is_network_failure());
    }
}
