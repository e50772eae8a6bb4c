//! Error types for the FHE session manager.

use thiserror::Error;

/// Errors that can occur while managing an FHE session.
#[derive(Debug, Error)]
pub enum SessionError {
    // ═══════════════════════════════════════════════════════════════════════════════
    // BOOTSTRAP ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    /// The bootstrap attempt was superseded or aborted. Never a user-facing
    /// failure; it only means "no instance yet".
    #[error("bootstrap cancelled")]
    Cancelled,

    #[error("coprocessor SDK unavailable: {0}")]
    SdkUnavailable(String),

    #[error("coprocessor SDK initialization failed: {0}")]
    SdkInit(String),

    #[error("chain probe failed: {0}")]
    ChainProbe(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ═══════════════════════════════════════════════════════════════════════════════
    // SIGNING ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    /// The wallet declined to sign the typed-data request. The authorization
    /// manager turns this into an absent result rather than propagating it.
    #[error("wallet declined to sign")]
    SigningRejected,

    // ═══════════════════════════════════════════════════════════════════════════════
    // CACHE ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    // ═══════════════════════════════════════════════════════════════════════════════
    // AMBIENT ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[error("instance error: {0}")]
    Instance(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl SessionError {
    /// Whether this error is the distinguished cancellation signal.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SessionError::Cancelled)
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Serialization(err.to_string())
    }
}
