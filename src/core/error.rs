use thiserror::Error;

/// Service-level error taxonomy. Every user-visible failure carries a
/// one-line message; stack traces never reach API responses.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Missing URL, malformed parameters. Maps to HTTP 400.
    #[error("{0}")]
    BadRequest(String),

    /// The underlying engine failed (network, timeout, protocol). During
    /// auto escalation these are absorbed and the ladder continues; in
    /// explicit-engine mode they surface.
    #[error("engine failure: {0}")]
    Engine(#[from] anyhow::Error),

    /// Every ladder step failed or returned insufficient content.
    #[error("all escalation steps failed or returned insufficient content")]
    ExhaustedEscalation,

    /// Advanced-mode per-item failure (download or upload of one resource);
    /// recorded in the result record, never fatal to the whole request.
    #[error("resource failure: {0}")]
    Resource(String),

    /// Lost the remote browser connection after the reconnect retry.
    #[error("browser pool disconnected: {0}")]
    PoolDisconnected(String),

    /// Request abandoned mid-flight (service drain or caller abort); no
    /// profile store mutation happens.
    #[error("request cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        FetchError::BadRequest(msg.into())
    }

    /// One-line operator-facing message, safe to return to API callers.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}
