//! Operator-facing error types

use thiserror::Error;

/// Result type alias for Switch and session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to the transport by the Switch and its sessions.
///
/// `Clone` because a failed session replays its terminal error on every
/// subsequent dispatch until it is evicted.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// An envelope or protocol payload failed to decode
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The initiator signature on an init or dispatch did not verify
    #[error("initiator signature isn't valid")]
    InvalidInitiatorSig,

    /// This operator's public key is not in the init roster
    #[error("local operator is missing from the roster")]
    UnknownLocalOperator,

    /// An inner message names a signer outside the session roster
    #[error("no roster key for signer {0}")]
    UnknownSigner(u64),

    /// An inner message's RSA signature did not verify
    #[error("invalid signature from operator {0}")]
    InvalidMessageSig(u64),

    /// Dispatch for an instance this operator doesn't have
    #[error("got message to instance that doesn't exist, send init first")]
    MissingInstance,

    /// Init for an instance that is still live
    #[error("got init message for existing instance")]
    AlreadyExists,

    /// Instance capacity exhausted even after cleanup
    #[error("max number of instances ongoing, please wait")]
    MaxInstances,

    /// Old and new rosters disagree on the key for a shared operator id
    #[error("conflicting roster keys for operator {0}")]
    RosterConflict(u64),

    /// Share store fault
    #[error("storage error: {0}")]
    Io(String),

    /// BLS material was invalid or the DKG protocol failed
    #[error("protocol failure: {0}")]
    Crypto(String),
}

impl From<blsdkg_core::Error> for Error {
    fn from(e: blsdkg_core::Error) -> Self {
        use blsdkg_core::Error as Core;
        match e {
            Core::Malformed(m) => Error::Malformed(m),
            Core::InvalidKey(m) => Error::Malformed(m),
            Core::InvalidSignature => Error::Crypto("invalid signature".into()),
            Core::Io(m) => Error::Io(m),
            Core::Crypto(m) => Error::Crypto(m),
        }
    }
}
