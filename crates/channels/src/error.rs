use std::error::Error as StdError;

/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed channel errors shared across channel traits.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input payload or parameter is invalid (empty target, empty content).
    #[error("invalid channel input: {message}")]
    InvalidInput { message: String },

    /// A requested account ID is not running.
    #[error("unknown channel account: {account_id}")]
    UnknownAccount { account_id: String },

    /// No pending route exists for a reply (never registered, or expired).
    #[error("no pending route for reply {correlation_id}")]
    RouteNotFound { correlation_id: String },

    /// Wrapped source error from the backend client.
    #[error("channel operation failed: {context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unknown_account(account_id: impl std::fmt::Display) -> Self {
        Self::UnknownAccount {
            account_id: account_id.to_string(),
        }
    }

    #[must_use]
    pub fn route_not_found(correlation_id: impl std::fmt::Display) -> Self {
        Self::RouteNotFound {
            correlation_id: correlation_id.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}
