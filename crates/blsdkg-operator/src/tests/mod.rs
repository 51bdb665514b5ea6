//! Multi-operator integration tests
//!
//! Every operator in a scenario runs a real [`Switch`](crate::Switch) backed
//! by its own share store; the tests play the initiator, signing init
//! envelopes and relaying full message batches between the switches.

mod helpers;
