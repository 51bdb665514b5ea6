//! Canonical wire envelopes
//!
//! Everything the initiator and the operators exchange is one of the types
//! here, encoded with borsh: a fixed-layout, little-endian-length canonical
//! codec, so a message has exactly one byte representation and signatures
//! over "the encoding" are well defined.
//!
//! Signature discipline:
//! - the initiator signs the canonical [`Transport`] encoding of an init
//! - each operator signs the `payload` bytes of its [`SignedTransport`]
//! - the initiator signs the in-order concatenation of the canonical
//!   [`SignedTransport`] encodings inside a [`MultipleSignedTransports`]

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Opaque 24-byte identifier naming one DKG instance, chosen by the initiator
pub type InstanceId = [u8; 24];

/// One operator in a roster: a numeric id and its PKIX DER RSA public key.
/// Id 0 is reserved and never valid.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Operator {
    pub id: u64,
    pub pubkey: Vec<u8>,
}

/// Message kinds carried by a [`Transport`]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum MessageType {
    /// Initiator → operator: start an instance
    Init,
    /// Round 0/1: Feldman commitments
    Exchange,
    /// Round 2: encrypted polynomial evaluations
    Deal,
    /// Terminal: an operator's final result
    Output,
}

/// Typed envelope for one protocol message within an instance
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Transport {
    pub msg_type: MessageType,
    pub identifier: InstanceId,
    pub data: Vec<u8>,
}

/// Initiator request to start a fresh DKG or a reshare.
///
/// A non-empty `new_operators` roster requests a reshare of the secret
/// persisted under `old_id`; otherwise `old_id` is meaningless.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Init {
    pub operators: Vec<Operator>,
    pub new_operators: Vec<Operator>,
    /// Address of the owner account the generated key is for
    pub owner: [u8; 20],
    pub nonce: u64,
    /// PKIX DER RSA key the initiator signs envelopes with
    pub initiator_pubkey: Vec<u8>,
    pub old_id: InstanceId,
}

impl Init {
    /// Whether this envelope requests a reshare rather than a fresh DKG.
    pub fn is_reshare(&self) -> bool {
        !self.new_operators.is_empty()
    }
}

/// A [`Transport`] encoding signed by the operator identified by `signer`
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct SignedTransport {
    pub signer: u64,
    /// Canonical [`Transport`] bytes; the signature is over exactly these
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

/// A batch of operator messages for one instance, countersigned by the
/// initiator over the concatenation of the inner canonical encodings
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct MultipleSignedTransports {
    pub identifier: InstanceId,
    pub messages: Vec<SignedTransport>,
    pub signature: Vec<u8>,
}

/// Round-0 broadcast: commitments to the sender's share polynomial.
///
/// `commitments` is `t` concatenated 48-byte compressed G1 points; a reshare
/// joiner deals nothing and sends it empty. The `reshare` flag lets peers
/// reject a mode mismatch before any dealing happens.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Exchange {
    pub reshare: bool,
    pub commitments: Vec<u8>,
}

/// One share, OAEP-encrypted to the recipient's roster key
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Deal {
    pub recipient: u64,
    pub share: Vec<u8>,
}

/// Round-2 broadcast: the sender's deals for every recipient.
/// Non-dealers send an empty bundle so each round stays one-message-per-operator.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct DealBundle {
    pub deals: Vec<Deal>,
}

/// Terminal broadcast: an operator's view of the finished instance
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Output {
    /// Share index of this operator, 0 if it holds no share in the new committee
    pub index: u32,
    /// Group commitment vector, concatenated 48-byte G1 points
    pub commits: Vec<u8>,
    /// Group public key (the constant-term commitment)
    pub public_key: Vec<u8>,
    pub owner: [u8; 20],
    pub nonce: u64,
}

/// Canonically encode a wire value.
pub fn encode<T: BorshSerialize>(value: &T) -> Result<Vec<u8>> {
    borsh::to_vec(value).map_err(|e| Error::Malformed(format!("encode: {e}")))
}

/// Decode a wire value, requiring every input byte to be consumed.
pub fn decode<T: BorshDeserialize>(bytes: &[u8]) -> Result<T> {
    borsh::from_slice(bytes).map_err(|e| Error::Malformed(format!("decode: {e}")))
}
