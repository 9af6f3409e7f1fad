/// Errors raised by the Mochat client, transport, and pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid mochat config: {0}")]
    Config(String),

    /// Non-2xx HTTP response from the Claw API.
    #[error("Mochat HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Envelope reported a non-200 `code`.
    #[error("{message} (code={code})")]
    Api { code: i64, message: String },

    #[error("socket transport error: {0}")]
    Transport(String),

    #[error("no ack for {event} within {timeout_ms}ms")]
    AckTimeout { event: String, timeout_ms: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Request(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Channel(#[from] clawlink_channels::Error),
}

impl Error {
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for clawlink_channels::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Channel(inner) => inner,
            other => clawlink_channels::Error::external("mochat", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_mentions_code() {
        let err = Error::Api {
            code: 401,
            message: "token expired".into(),
        };
        assert_eq!(err.to_string(), "token expired (code=401)");
    }

    #[test]
    fn channel_conversion_unwraps_channel_errors() {
        let inner = clawlink_channels::Error::invalid_input("empty target");
        let converted: clawlink_channels::Error = Error::Channel(inner).into();
        assert!(matches!(
            converted,
            clawlink_channels::Error::InvalidInput { .. }
        ));

        let converted: clawlink_channels::Error = Error::transport("closed").into();
        assert!(matches!(
            converted,
            clawlink_channels::Error::External { .. }
        ));
    }
}
