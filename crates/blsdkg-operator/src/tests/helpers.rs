//! Fixtures and an in-process initiator for driving switches

use std::collections::BTreeMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use tempfile::TempDir;

use blsdkg_core::crypto::{encode_rsa_pub, sign_rsa};
use blsdkg_core::share::ShareStore;
use blsdkg_core::wire::{
    self, DealBundle, Exchange, Init, InstanceId, MessageType, MultipleSignedTransports, Operator,
    Output, SignedTransport, Transport,
};

use crate::switch::Switch;

/// Operator ids 1..=8 have fixture keys; RSA keygen is slow enough that the
/// whole test binary shares one set.
pub const OPERATOR_COUNT: usize = 8;

/// 1024-bit keys: large enough for OAEP/SHA-256 over a 32-byte share, small
/// enough to generate in test time.
const TEST_KEY_BITS: usize = 1024;

pub struct TestKeys {
    pub initiator: RsaPrivateKey,
    pub operators: Vec<RsaPrivateKey>,
}

pub static KEYS: Lazy<TestKeys> = Lazy::new(|| TestKeys {
    initiator: RsaPrivateKey::new(&mut OsRng, TEST_KEY_BITS).expect("initiator keygen"),
    operators: (0..OPERATOR_COUNT)
        .map(|_| RsaPrivateKey::new(&mut OsRng, TEST_KEY_BITS).expect("operator keygen"))
        .collect(),
});

/// Opt-in log output for scenario debugging (`RUST_LOG=debug cargo test`)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub fn operator_key(id: u64) -> &'static RsaPrivateKey {
    &KEYS.operators[(id - 1) as usize]
}

pub fn operator(id: u64) -> Operator {
    Operator {
        id,
        pubkey: encode_rsa_pub(&operator_key(id).to_public_key()).unwrap(),
    }
}

pub fn roster(ids: &[u64]) -> Vec<Operator> {
    ids.iter().map(|&id| operator(id)).collect()
}

/// One switch per operator, each over its own temp-dir share store
pub struct Cluster {
    pub switches: BTreeMap<u64, Switch>,
    pub stores: BTreeMap<u64, ShareStore>,
    _dirs: Vec<TempDir>,
}

pub fn cluster(ids: &[u64]) -> Cluster {
    cluster_with_limits(ids, crate::MAX_INSTANCE_TIME, crate::MAX_INSTANCES)
}

pub fn cluster_with_limits(ids: &[u64], ttl: Duration, max_instances: usize) -> Cluster {
    let mut switches = BTreeMap::new();
    let mut stores = BTreeMap::new();
    let mut dirs = Vec::new();
    for &id in ids {
        let dir = tempfile::tempdir().unwrap();
        let store = ShareStore::open(dir.path().join("shares.redb")).unwrap();
        let switch =
            Switch::with_limits(operator_key(id).clone(), store.clone(), ttl, max_instances)
                .unwrap();
        switches.insert(id, switch);
        stores.insert(id, store);
        dirs.push(dir);
    }
    Cluster { switches, stores, _dirs: dirs }
}

pub fn make_init(operators: &[u64], new_operators: &[u64], old_id: InstanceId) -> Init {
    Init {
        operators: roster(operators),
        new_operators: roster(new_operators),
        owner: [0x42; 20],
        nonce: 7,
        initiator_pubkey: encode_rsa_pub(&KEYS.initiator.to_public_key()).unwrap(),
        old_id,
    }
}

/// Wrap an init envelope the way the initiator does: a signed Init transport.
pub fn init_transport(req_id: InstanceId, init: &Init) -> (Transport, Vec<u8>) {
    let transport = Transport {
        msg_type: MessageType::Init,
        identifier: req_id,
        data: wire::encode(init).unwrap(),
    };
    let signature = sign_rsa(&KEYS.initiator, &wire::encode(&transport).unwrap()).unwrap();
    (transport, signature)
}

/// Countersign a round's messages into a dispatch batch.
pub fn batch(req_id: InstanceId, messages: &[SignedTransport]) -> Vec<u8> {
    let mut concat = Vec::new();
    for msg in messages {
        concat.extend(wire::encode(msg).unwrap());
    }
    let signature = sign_rsa(&KEYS.initiator, &concat).unwrap();
    wire::encode(&MultipleSignedTransports {
        identifier: req_id,
        messages: messages.to_vec(),
        signature,
    })
    .unwrap()
}

pub fn decode_signed(bytes: &[u8]) -> SignedTransport {
    wire::decode(bytes).unwrap()
}

pub fn transport_of(msg: &SignedTransport) -> Transport {
    wire::decode(&msg.payload).unwrap()
}

pub fn exchange_of(msg: &SignedTransport) -> Exchange {
    let transport = transport_of(msg);
    assert_eq!(transport.msg_type, MessageType::Exchange);
    wire::decode(&transport.data).unwrap()
}

pub fn deal_bundle_of(msg: &SignedTransport) -> DealBundle {
    let transport = transport_of(msg);
    assert_eq!(transport.msg_type, MessageType::Deal);
    wire::decode(&transport.data).unwrap()
}

pub fn output_of(msg: &SignedTransport) -> Output {
    let transport = transport_of(msg);
    assert_eq!(transport.msg_type, MessageType::Output);
    wire::decode(&transport.data).unwrap()
}

/// Run init round 0 across `ids`, returning each operator's exchange message.
pub async fn run_init(cluster: &Cluster, ids: &[u64], req_id: InstanceId, init: &Init) -> Vec<SignedTransport> {
    let (transport, signature) = init_transport(req_id, init);
    let mut exchanges = Vec::new();
    for id in ids {
        let resp = cluster.switches[id]
            .init_instance(req_id, &transport, &signature)
            .await
            .unwrap();
        exchanges.push(decode_signed(&resp));
    }
    exchanges
}

/// Relay one full round batch to every operator, returning their responses.
pub async fn dispatch_round(
    cluster: &Cluster,
    ids: &[u64],
    req_id: InstanceId,
    messages: &[SignedTransport],
) -> Vec<SignedTransport> {
    let bytes = batch(req_id, messages);
    let mut responses = Vec::new();
    for id in ids {
        let resp = cluster.switches[id].process_message(&bytes).await.unwrap();
        responses.push(decode_signed(&resp));
    }
    responses
}

/// Drive a whole instance (init, exchanges, deals) and return every
/// operator's output.
pub async fn run_protocol(
    cluster: &Cluster,
    ids: &[u64],
    req_id: InstanceId,
    init: &Init,
) -> Vec<Output> {
    let exchanges = run_init(cluster, ids, req_id, init).await;
    let deals = dispatch_round(cluster, ids, req_id, &exchanges).await;
    let outputs = dispatch_round(cluster, ids, req_id, &deals).await;
    outputs.iter().map(output_of).collect()
}
