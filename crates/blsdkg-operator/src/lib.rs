//! # blsdkg-operator
//!
//! The operator side of the BLS DKG service: a process-wide [`Switch`] that
//! admits, evicts and routes to concurrently running DKG instances, and the
//! [`LocalOwner`] session each instance is hosted by.
//!
//! The transport layer hands the Switch opaque byte strings: an init envelope
//! starts a new instance, a dispatch envelope is routed to an existing one by
//! its 24-byte identifier. Both calls block until the instance emits exactly
//! one outbound message, which is returned for the transport to ship back to
//! the initiator.
//!
//! [`Switch`]: switch::Switch
//! [`LocalOwner`]: session::LocalOwner

pub mod error;
pub mod session;
pub mod switch;

#[cfg(test)]
mod tests;

pub use error::{Error, Result};
pub use session::{Instance, LocalOwner, OwnerOpts, VerifyFn};
pub use switch::{create_verify_fn, Switch, MAX_INSTANCES, MAX_INSTANCE_TIME};
