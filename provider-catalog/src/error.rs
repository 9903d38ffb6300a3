//! Error types for the catalog client

use thiserror::Error;

/// Catalog fetch errors
///
/// `Fatal`, `InvalidRequest` and `Decode` mean more attempts cannot help and
/// the sync session should stop. `Transient` means one page could not be
/// fetched within the retry budget; later pages are unaffected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Remote refused the request (auth, bad parameters, missing endpoint)
    #[error("Catalog request rejected (status {status:?}): {message}")]
    Fatal {
        status: Option<u16>,
        message: String,
    },

    /// Retries exhausted for the page starting at `offset`
    #[error("Catalog page at offset {offset} failed after {attempts} attempts: {message}")]
    Transient {
        offset: u64,
        attempts: u32,
        message: String,
    },

    /// Stream parameters out of bounds
    #[error("Invalid catalog request: {0}")]
    InvalidRequest(String),

    /// 2xx response whose body does not match the expected shape
    #[error("Malformed catalog response at offset {offset}: {message}")]
    Decode { offset: u64, message: String },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    pub fn is_fatal(&self) -> bool {
        !self.is_transient()
    }

    /// Offset of the page the error belongs to, when known.
    pub fn offset(&self) -> Option<u64> {
        match self {
            FetchError::Transient { offset, .. } | FetchError::Decode { offset, .. } => {
                Some(*offset)
            }
            _ => None,
        }
    }
}

/// Result type for catalog operations
pub type Result<T> = std::result::Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = FetchError::Fatal {
            status: Some(401),
            message: "Unauthorized".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Catalog request rejected (status Some(401)): Unauthorized"
        );

        let error = FetchError::Transient {
            offset: 200,
            attempts: 3,
            message: "HTTP 503".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Catalog page at offset 200 failed after 3 attempts: HTTP 503"
        );
    }

    #[test]
    fn test_classification() {
        let transient = FetchError::Transient {
            offset: 0,
            attempts: 1,
            message: String::new(),
        };
        assert!(transient.is_transient());
        assert!(!transient.is_fatal());
        assert_eq!(transient.offset(), Some(0));

        let invalid = FetchError::InvalidRequest("page size".to_string());
        assert!(invalid.is_fatal());
        assert_eq!(invalid.offset(), None);

        let decode = FetchError::Decode {
            offset: 100,
            message: "missing field".to_string(),
        };
        assert!(decode.is_fatal());
        assert_eq!(decode.offset(), Some(100));
    }
}
