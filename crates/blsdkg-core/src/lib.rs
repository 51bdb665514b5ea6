//! # blsdkg-core
//!
//! Building blocks for the operator side of a BLS threshold key generation
//! service:
//!
//! - canonical wire envelopes exchanged between the initiator and operators
//! - RSA identity signatures over those envelopes
//! - BLS12-381 share material, its stable persisted codec, and the share store
//! - Feldman VSS math used by the DKG and reshare rounds
//!
//! The session state machine and the instance multiplexer that host a DKG run
//! live in `blsdkg-operator`; this crate is everything they agree on with the
//! outside world.

pub mod crypto;
pub mod error;
pub mod feldman;
pub mod roster;
pub mod share;
pub mod wire;

pub use error::{Error, Result};
pub use share::{DistKeyShare, ShareStore};
pub use wire::{Init, InstanceId, MultipleSignedTransports, Operator, SignedTransport, Transport};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
