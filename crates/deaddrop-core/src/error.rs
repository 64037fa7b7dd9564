use thiserror::Error;

pub type DropResult<T> = Result<T, DropError>;

/// Error taxonomy surfaced by the storage core.
///
/// The embedding HTTP layer maps these to status codes and emits a single
/// generic message to the client; the core never formats client-facing text.
/// `AuthFailure` covers both a failed AEAD tag check and a failed key unwrap,
/// so corruption and tampering are indistinguishable at the API surface.
#[derive(Debug, Error)]
pub enum DropError {
    #[error("invalid drop id")]
    InvalidId,

    #[error("drop not found")]
    NotFound,

    #[error("authentication failed")]
    AuthFailure,

    #[error("crypto setup failed: {0}")]
    CryptoSetup(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("receipt mismatch")]
    ReceiptMismatch,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
