//! Runtime errors: invalid engine configuration and logging bootstrap
//! failures.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A configuration value is missing or out of range. The message names
    /// the field and the accepted range.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A global tracing subscriber could not be installed, usually because
    /// one already is.
    #[error("Logging setup failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_problem() {
        let err = Error::Config("page_size must be between 1 and 500".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: page_size must be between 1 and 500"
        );
        assert!(Error::Logging("already set".into()).to_string().contains("already set"));
    }
}
