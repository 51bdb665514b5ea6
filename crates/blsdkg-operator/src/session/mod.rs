//! One hosted DKG run
//!
//! A [`LocalOwner`] is the session side of a single instance: it accepts the
//! inbound signed transports the Switch routes to it, walks the protocol
//! state machine in [`machine`], and pushes every outbound message onto the
//! capacity-1 broadcast sink the Switch reads from. The sink's capacity is
//! the round-0 rendezvous: `init` has placed exactly one message on it by the
//! time the Switch's receive returns, so admission completes only after
//! round 0 is done.

mod machine;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use blsdkg_core::crypto;
use blsdkg_core::share::{DistKeyShare, ShareStore};
use blsdkg_core::wire::{self, Init, InstanceId, MessageType, SignedTransport, Transport};

use crate::error::{Error, Result};
use machine::{Machine, Phase};

/// Per-session signature predicate built by the Switch from the instance
/// roster: `(operator id, message, signature) → ok/err`.
pub type VerifyFn = Arc<dyn Fn(u64, &[u8], &[u8]) -> Result<()> + Send + Sync>;

/// The narrow capability set a live instance exposes to the Switch.
#[async_trait]
pub trait Instance: Send + Sync {
    /// Feed one inbound operator message into the session.
    async fn process(&self, signer: u64, msg: &SignedTransport) -> Result<()>;
    /// Blocking receive of the session's next outbound message.
    async fn read_response(&self) -> Result<Vec<u8>>;
    /// Blocking receive on the session's error channel.
    async fn read_error(&self) -> Option<Error>;
    /// Verify an initiator signature under the key captured at init time.
    fn verify_initiator_message(&self, msg: &[u8], sig: &[u8]) -> Result<()>;
}

/// Construction bundle for a [`LocalOwner`]
pub struct OwnerOpts {
    /// This operator's id in the instance roster
    pub operator_id: u64,
    /// Owner account the generated key is for
    pub owner: [u8; 20],
    pub nonce: u64,
    /// Operator identity key; signs every outbound transport and opens
    /// deals addressed to this operator
    pub rsa_priv: Arc<RsaPrivateKey>,
    /// Initiator key the init envelope carried; authenticates dispatches
    pub initiator_pubkey: RsaPublicKey,
    /// Roster signature predicate from the Switch's verifier factory
    pub verify: VerifyFn,
    /// Parsed roster keys, for encrypting deals to their recipients
    pub roster_keys: HashMap<u64, RsaPublicKey>,
    pub store: ShareStore,
    /// Capacity-1 broadcast sink owned by the Switch
    pub broadcast: mpsc::Sender<Vec<u8>>,
    /// Previously persisted share, present when resharing
    pub secret_share: Option<DistKeyShare>,
}

/// Session hosting one DKG or reshare run for this operator
pub struct LocalOwner {
    operator_id: u64,
    owner: [u8; 20],
    nonce: u64,
    rsa_priv: Arc<RsaPrivateKey>,
    initiator_pubkey: RsaPublicKey,
    verify: VerifyFn,
    roster_keys: HashMap<u64, RsaPublicKey>,
    store: ShareStore,
    broadcast: mpsc::Sender<Vec<u8>>,
    error_tx: mpsc::Sender<Error>,
    machine: Mutex<Machine>,
}

impl LocalOwner {
    /// Build a session and hand back the receiving end of its error channel.
    pub fn new(opts: OwnerOpts) -> (Self, mpsc::Receiver<Error>) {
        let (error_tx, error_rx) = mpsc::channel(1);
        let owner = Self {
            operator_id: opts.operator_id,
            owner: opts.owner,
            nonce: opts.nonce,
            rsa_priv: opts.rsa_priv,
            initiator_pubkey: opts.initiator_pubkey,
            verify: opts.verify,
            roster_keys: opts.roster_keys,
            store: opts.store,
            broadcast: opts.broadcast,
            error_tx,
            machine: Mutex::new(Machine::new(opts.secret_share)),
        };
        (owner, error_rx)
    }

    /// Run round 0 and place the first outbound message on the broadcast
    /// sink. Called exactly once, before the instance is registered.
    pub async fn init(&self, req_id: InstanceId, init: &Init) -> Result<()> {
        let mut machine = self.machine.lock().await;
        let first = machine.start(self.operator_id, req_id, init)?;
        self.broadcast_signed(&first).await
    }

    /// Feed one inbound message. The declared signer must match the routing
    /// signer and the roster signature is re-verified before the state
    /// machine sees the payload.
    pub async fn process(&self, signer: u64, msg: &SignedTransport) -> Result<()> {
        if msg.signer != signer {
            return Err(Error::Malformed(format!(
                "declared signer {} does not match routed signer {signer}",
                msg.signer
            )));
        }
        (self.verify)(signer, &msg.payload, &msg.signature)?;

        let transport: Transport = wire::decode(&msg.payload)?;

        let mut machine = self.machine.lock().await;
        if let Phase::Failed(e) = machine.phase() {
            return Err(e.clone());
        }
        if transport.identifier != machine.req_id() {
            return Err(Error::Malformed("transport for a different instance".into()));
        }

        let outbound = match transport.msg_type {
            MessageType::Exchange => machine.handle_exchange(self, signer, &transport.data),
            MessageType::Deal => machine.handle_deal(self, signer, &transport.data),
            MessageType::Init | MessageType::Output => Err(Error::Crypto(format!(
                "unexpected {:?} message from operator {signer}",
                transport.msg_type
            ))),
        };

        match outbound {
            Ok(Some(t)) => {
                debug!(signer, msg_type = ?t.msg_type, "round advanced");
                self.broadcast_signed(&t).await
            }
            Ok(None) => Ok(()),
            Err(e) => {
                if matches!(e, Error::Crypto(_)) {
                    machine.fail(e.clone());
                    let _ = self.error_tx.try_send(e.clone());
                }
                Err(e)
            }
        }
    }

    /// Verify `sig` as the initiator's signature over `msg`.
    pub fn verify_initiator_message(&self, msg: &[u8], sig: &[u8]) -> Result<()> {
        crypto::verify_rsa(&self.initiator_pubkey, msg, sig)
            .map_err(|_| Error::InvalidInitiatorSig)
    }

    /// Sign a transport with the operator identity key and push the signed
    /// encoding onto the broadcast sink.
    async fn broadcast_signed(&self, transport: &Transport) -> Result<()> {
        let payload = wire::encode(transport)?;
        let signature = crypto::sign_rsa(&self.rsa_priv, &payload)?;
        let signed = SignedTransport {
            signer: self.operator_id,
            payload,
            signature,
        };
        let bytes = wire::encode(&signed)?;
        self.broadcast
            .send(bytes)
            .await
            .map_err(|_| Error::Crypto("broadcast sink closed".into()))
    }

    fn roster_key(&self, id: u64) -> Result<&RsaPublicKey> {
        self.roster_keys.get(&id).ok_or(Error::UnknownSigner(id))
    }

    fn private_key(&self) -> &RsaPrivateKey {
        &self.rsa_priv
    }

    fn store(&self) -> &ShareStore {
        &self.store
    }

    fn binding(&self) -> ([u8; 20], u64) {
        (self.owner, self.nonce)
    }
}
