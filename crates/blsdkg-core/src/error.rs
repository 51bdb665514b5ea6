//! Error types shared by the codec, crypto and storage layers

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by envelope codecs, key handling and the share store
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// An envelope, share or crypto object failed to decode
    #[error("malformed: {0}")]
    Malformed(String),

    /// A key failed to parse or encode
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// An RSA signature did not verify
    #[error("invalid signature")]
    InvalidSignature,

    /// The share store failed
    #[error("storage error: {0}")]
    Io(String),

    /// A cryptographic operation failed
    #[error("crypto error: {0}")]
    Crypto(String),
}
