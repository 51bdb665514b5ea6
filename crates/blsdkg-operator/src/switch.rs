//! Instance multiplexer
//!
//! The [`Switch`] is the process-wide registry of live DKG instances: it
//! admits new instances (bounded count, TTL-based eviction, one live instance
//! per identifier), verifies initiator authenticity on both entry points, and
//! routes dispatch batches to the owning session.
//!
//! Locking discipline: one reader-writer lock guards the two registry maps.
//! Lookups take the read lock, admission and eviction the write lock, and no
//! session work (signatures, curve math, channel receives) ever runs under
//! either. Admission reserves the slot with a pending marker, constructs the
//! session outside the lock, then transitions the slot to live.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use blsdkg_core::crypto;
use blsdkg_core::roster::{disjoint_new_operators, disjoint_old_operators};
use blsdkg_core::share::{DistKeyShare, ShareStore};
use blsdkg_core::wire::{
    self, Init, InstanceId, MultipleSignedTransports, Operator, SignedTransport, Transport,
};

use crate::error::{Error, Result};
use crate::session::{Instance, LocalOwner, OwnerOpts, VerifyFn};

/// Hard cap on concurrently registered instances
pub const MAX_INSTANCES: usize = 1024;
/// Registry TTL; an instance past it may be evicted by any admission
pub const MAX_INSTANCE_TIME: Duration = Duration::from_secs(5 * 60);

enum Slot {
    /// Reserved during admission while the session runs round 0
    Pending,
    Live(Arc<dyn Instance>),
}

struct Registry {
    instances: HashMap<InstanceId, Slot>,
    init_time: HashMap<InstanceId, Instant>,
}

impl Registry {
    /// Evict every instance past the TTL from both maps. A pending slot
    /// belongs to an in-flight admission and is never reclaimed here, so a
    /// session under construction cannot lose its reservation. Callers hold
    /// the registry write lock by construction.
    fn clean_instances(&mut self, ttl: Duration) -> usize {
        let now = Instant::now();
        let stale: Vec<InstanceId> = self
            .init_time
            .iter()
            .filter(|(id, started)| {
                now.duration_since(**started) > ttl
                    && !matches!(self.instances.get(*id), Some(Slot::Pending))
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            self.instances.remove(id);
            self.init_time.remove(id);
        }
        stale.len()
    }
}

/// Process-wide multiplexer over live DKG instances
pub struct Switch {
    registry: RwLock<Registry>,
    private_key: Arc<RsaPrivateKey>,
    /// This operator's PKIX DER key, matched against init rosters
    pubkey_der: Vec<u8>,
    store: ShareStore,
    ttl: Duration,
    max_instances: usize,
}

impl Switch {
    /// Build a switch around this operator's identity key and share store.
    pub fn new(private_key: RsaPrivateKey, store: ShareStore) -> Result<Self> {
        Self::with_limits(private_key, store, MAX_INSTANCE_TIME, MAX_INSTANCES)
    }

    pub(crate) fn with_limits(
        private_key: RsaPrivateKey,
        store: ShareStore,
        ttl: Duration,
        max_instances: usize,
    ) -> Result<Self> {
        let pubkey_der = crypto::encode_rsa_pub(&private_key.to_public_key())?;
        Ok(Self {
            registry: RwLock::new(Registry {
                instances: HashMap::with_capacity(max_instances),
                init_time: HashMap::with_capacity(max_instances),
            }),
            private_key: Arc::new(private_key),
            pubkey_der,
            store,
            ttl,
            max_instances,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().expect("registry lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().expect("registry lock poisoned")
    }

    /// Start a new instance from an initiator-signed init envelope and return
    /// its first outbound message.
    pub async fn init_instance(
        &self,
        req_id: InstanceId,
        init_msg: &Transport,
        initiator_signature: &[u8],
    ) -> Result<Vec<u8>> {
        info!(reqid = %hex::encode(req_id), "initializing DKG instance");
        let init: Init = wire::decode(&init_msg.data)?;
        let initiator_pubkey = crypto::parse_rsa_pub(&init.initiator_pubkey)?;
        let canonical = wire::encode(init_msg)?;
        crypto::verify_rsa(&initiator_pubkey, &canonical, initiator_signature)
            .map_err(|_| Error::InvalidInitiatorSig)?;
        debug!(reqid = %hex::encode(req_id), "init message signature verified");

        let secret = if init.is_reshare() {
            info!(
                reqid = %hex::encode(req_id),
                joining = disjoint_new_operators(&init.operators, &init.new_operators).len(),
                leaving = disjoint_old_operators(&init.operators, &init.new_operators).len(),
                "starting resharing protocol"
            );
            match self.store.get(&init.old_id)? {
                Some(bytes) => Some(DistKeyShare::decode(&bytes)?),
                None => {
                    // no share under old_id: proceed along the fresh path
                    debug!(
                        old_id = %hex::encode(init.old_id),
                        "no stored share for reshare, falling back to fresh initialization"
                    );
                    None
                }
            }
        } else {
            info!(reqid = %hex::encode(req_id), "starting initial DKG protocol");
            None
        };

        self.reserve(req_id)?;

        // session construction and round 0 run outside the lock
        match self.build_and_init(req_id, &init, initiator_pubkey, secret).await {
            Ok((handle, first)) => {
                // the pending slot is still this admission's: cleanup and
                // replacement both refuse to touch pending entries, so the
                // insert is a pure transition and the count is unchanged
                let mut reg = self.write();
                reg.instances.insert(req_id, Slot::Live(Arc::new(handle)));
                Ok(first)
            }
            Err(e) => {
                let mut reg = self.write();
                reg.instances.remove(&req_id);
                reg.init_time.remove(&req_id);
                Err(e)
            }
        }
    }

    /// Admission under the write lock: make room, enforce identifier
    /// uniqueness within the TTL, and hold the slot with a pending marker.
    fn reserve(&self, req_id: InstanceId) -> Result<()> {
        let mut reg = self.write();
        if reg.instances.len() >= self.max_instances {
            let cleaned = reg.clean_instances(self.ttl);
            debug!(cleaned, "instance cleanup");
            if reg.instances.len() >= self.max_instances {
                return Err(Error::MaxInstances);
            }
        }
        if let Some(started) = reg.init_time.get(&req_id) {
            // a pending reservation is owned by an in-flight admission and is
            // never replaced, whatever its age
            let pending = matches!(reg.instances.get(&req_id), Some(Slot::Pending));
            if pending || Instant::now().duration_since(*started) <= self.ttl {
                return Err(Error::AlreadyExists);
            }
            reg.instances.remove(&req_id);
            reg.init_time.remove(&req_id);
        }
        reg.instances.insert(req_id, Slot::Pending);
        reg.init_time.insert(req_id, Instant::now());
        Ok(())
    }

    async fn build_and_init(
        &self,
        req_id: InstanceId,
        init: &Init,
        initiator_pubkey: RsaPublicKey,
        secret_share: Option<DistKeyShare>,
    ) -> Result<(SessionHandle, Vec<u8>)> {
        let mut union = init.operators.clone();
        union.extend(init.new_operators.iter().cloned());
        let roster = parse_roster(&union)?;

        let operator_id = union
            .iter()
            .find(|op| op.pubkey == self.pubkey_der)
            .map(|op| op.id)
            .ok_or(Error::UnknownLocalOperator)?;

        let (broadcast_tx, mut broadcast_rx) = mpsc::channel(1);
        let (owner, error_rx) = LocalOwner::new(OwnerOpts {
            operator_id,
            owner: init.owner,
            nonce: init.nonce,
            rsa_priv: self.private_key.clone(),
            initiator_pubkey,
            verify: verifier_from(roster.clone()),
            roster_keys: roster,
            store: self.store.clone(),
            broadcast: broadcast_tx,
            secret_share,
        });
        owner.init(req_id, init).await?;

        // round-0 rendezvous: init has already placed the first message
        let first = broadcast_rx
            .recv()
            .await
            .ok_or_else(|| Error::Crypto("no round-0 message produced".into()))?;

        let handle = SessionHandle {
            owner,
            responses: Mutex::new(broadcast_rx),
            errors: Mutex::new(error_rx),
        };
        Ok((handle, first))
    }

    /// Route a dispatch batch to its instance and return the instance's next
    /// outbound message.
    pub async fn process_message(&self, dkg_msg: &[u8]) -> Result<Vec<u8>> {
        let batch: MultipleSignedTransports = wire::decode(dkg_msg)?;

        let instance = {
            let reg = self.read();
            match reg.instances.get(&batch.identifier) {
                Some(Slot::Live(instance)) => instance.clone(),
                _ => return Err(Error::MissingInstance),
            }
        };

        // the initiator signed the in-order concatenation of the inner
        // canonical encodings
        let mut signed_bytes = Vec::new();
        for msg in &batch.messages {
            signed_bytes.extend(wire::encode(msg)?);
        }
        instance.verify_initiator_message(&signed_bytes, &batch.signature)?;

        for msg in &batch.messages {
            instance.process(msg.signer, msg).await?;
        }

        instance.read_response().await
    }
}

/// Parse the concatenated old+new roster into an id → key map. A shared id
/// must carry the same key in both rosters.
fn parse_roster(operators: &[Operator]) -> Result<HashMap<u64, RsaPublicKey>> {
    let mut keys = HashMap::with_capacity(operators.len());
    for op in operators {
        let key = crypto::parse_rsa_pub(&op.pubkey)?;
        match keys.get(&op.id) {
            Some(existing) if *existing != key => return Err(Error::RosterConflict(op.id)),
            Some(_) => {}
            None => {
                keys.insert(op.id, key);
            }
        }
    }
    Ok(keys)
}

fn verifier_from(keys: HashMap<u64, RsaPublicKey>) -> VerifyFn {
    Arc::new(move |id, msg, sig| {
        let key = keys.get(&id).ok_or(Error::UnknownSigner(id))?;
        crypto::verify_rsa(key, msg, sig).map_err(|_| Error::InvalidMessageSig(id))
    })
}

/// Build the per-session signature predicate for an instance roster.
pub fn create_verify_fn(operators: &[Operator]) -> Result<VerifyFn> {
    Ok(verifier_from(parse_roster(operators)?))
}

/// A registered session: the owner plus the receiving ends of its broadcast
/// and error channels.
struct SessionHandle {
    owner: LocalOwner,
    responses: Mutex<mpsc::Receiver<Vec<u8>>>,
    errors: Mutex<mpsc::Receiver<Error>>,
}

#[async_trait]
impl Instance for SessionHandle {
    async fn process(&self, signer: u64, msg: &SignedTransport) -> Result<()> {
        self.owner.process(signer, msg).await
    }

    async fn read_response(&self) -> Result<Vec<u8>> {
        self.responses
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| Error::Crypto("response channel closed".into()))
    }

    async fn read_error(&self) -> Option<Error> {
        self.errors.lock().await.recv().await
    }

    fn verify_initiator_message(&self, msg: &[u8], sig: &[u8]) -> Result<()> {
        self.owner.verify_initiator_message(msg, sig)
    }
}

#[cfg(test)]
impl Switch {
    pub(crate) fn instance_count(&self) -> usize {
        self.read().instances.len()
    }

    pub(crate) fn assert_registry_consistent(&self) {
        let reg = self.read();
        assert_eq!(reg.instances.len(), reg.init_time.len());
        assert!(reg.instances.keys().all(|id| reg.init_time.contains_key(id)));
    }

    pub(crate) fn inject_instance(&self, id: InstanceId, instance: Arc<dyn Instance>) {
        let mut reg = self.write();
        reg.instances.insert(id, Slot::Live(instance));
        reg.init_time.insert(id, Instant::now());
    }
}
