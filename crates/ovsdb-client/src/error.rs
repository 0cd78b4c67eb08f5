use thiserror::Error;

/// Result type for OVSDB client operations.
pub type Result<T> = std::result::Result<T, OvsDbError>;

/// Errors raised by the OVSDB client.
#[derive(Debug, Error)]
pub enum OvsDbError {
    /// Socket error.
    #[error("OVSDB socket error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON on the wire.
    #[error("OVSDB JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server answered a request with an error.
    #[error("OVSDB JSON RPC error: {error} ({details})")]
    Rpc {
        /// Error tag, e.g. "unknown database".
        error: String,
        /// Human readable details, empty when the server sent none.
        details: String,
    },

    /// The connection was closed before a reply arrived.
    #[error("OVSDB connection closed")]
    Disconnected,

    /// The server sent a reply the client cannot interpret.
    #[error("Invalid reply from OVSDB for {context}: {reply}")]
    InvalidReply {
        /// What was being parsed.
        context: String,
        /// The offending JSON.
        reply: String,
    },

    /// The endpoint string is not `unix:<path>` or `tcp:<host>:<port>`.
    #[error("Invalid OVSDB endpoint '{0}'")]
    InvalidEndpoint(String),
}

impl OvsDbError {
    pub(crate) fn invalid_reply(context: impl Into<String>, reply: &serde_json::Value) -> Self {
        OvsDbError::InvalidReply {
            context: context.into(),
            reply: reply.to_string(),
        }
    }
}
