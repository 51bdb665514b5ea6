//! The DKG round state machine
//!
//! `New → Exchanging → Dealing → Completed | Failed`. Rounds advance on full
//! quorum: the initiator relays complete batches, so every committee member's
//! message must arrive before the next round's broadcast is produced.
//!
//! Fresh run: every operator deals a random polynomial; the group polynomial
//! is the sum. Reshare: the old committee deals polynomials whose constant
//! terms are their existing shares, and results are re-based with Lagrange
//! weights at zero, which keeps the group public key fixed while moving the
//! shares to the new committee.

use std::collections::{BTreeMap, BTreeSet};

use bls12_381::{G1Affine, G1Projective, Scalar};
use ff::Field;
use group::Curve;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::info;
use zeroize::Zeroizing;

use blsdkg_core::crypto::{self, POINT_SIZE, SCALAR_SIZE};
use blsdkg_core::feldman;
use blsdkg_core::roster::{disjoint_new_operators, split_bytes};
use blsdkg_core::share::DistKeyShare;
use blsdkg_core::wire::{
    self, Deal, DealBundle, Exchange, Init, InstanceId, MessageType, Operator, Output, Transport,
};

use super::LocalOwner;
use crate::error::{Error, Result};

/// Supermajority threshold for a committee of `n` operators
fn threshold_for(n: usize) -> usize {
    n - (n - 1) / 3
}

#[derive(Debug)]
pub(super) enum Phase {
    New,
    Exchanging,
    Dealing,
    Completed,
    Failed(Error),
}

pub(super) struct Machine {
    phase: Phase,
    req_id: InstanceId,
    my_id: u64,
    reshare: bool,
    /// Everyone expected to broadcast each round, envelope order
    committee: Vec<u64>,
    /// Operators that deal polynomials, envelope order (weights follow it)
    dealers: Vec<u64>,
    /// Committee that ends up holding shares
    recipients: Vec<u64>,
    /// Commitments per dealer (= the resulting committee's threshold)
    threshold: usize,
    polynomial: Option<Vec<Scalar>>,
    old_share: Option<DistKeyShare>,
    exchanges: BTreeMap<u64, Vec<G1Affine>>,
    deal_shares: BTreeMap<u64, Scalar>,
    bundle_seen: BTreeSet<u64>,
}

impl Machine {
    pub(super) fn new(old_share: Option<DistKeyShare>) -> Self {
        Self {
            phase: Phase::New,
            req_id: [0; 24],
            my_id: 0,
            reshare: false,
            committee: Vec::new(),
            dealers: Vec::new(),
            recipients: Vec::new(),
            threshold: 0,
            polynomial: None,
            old_share,
            exchanges: BTreeMap::new(),
            deal_shares: BTreeMap::new(),
            bundle_seen: BTreeSet::new(),
        }
    }

    pub(super) fn phase(&self) -> &Phase {
        &self.phase
    }

    pub(super) fn req_id(&self) -> InstanceId {
        self.req_id
    }

    pub(super) fn fail(&mut self, e: Error) {
        self.phase = Phase::Failed(e);
    }

    fn is_dealer(&self) -> bool {
        self.dealers.contains(&self.my_id)
    }

    fn is_recipient(&self) -> bool {
        self.recipients.contains(&self.my_id)
    }

    /// Round 0: fix rosters, sample the polynomial if this operator deals,
    /// and produce the exchange broadcast.
    pub(super) fn start(&mut self, my_id: u64, req_id: InstanceId, init: &Init) -> Result<Transport> {
        if !matches!(self.phase, Phase::New) {
            return Err(Error::Crypto("session already initialized".into()));
        }

        let old_ids = validated_ids(&init.operators)?;
        let new_ids = validated_ids(&init.new_operators)?;

        // old roster plus operators only the new roster names, envelope order
        let mut committee = old_ids.clone();
        committee.extend(
            disjoint_new_operators(&init.operators, &init.new_operators)
                .iter()
                .map(|op| op.id),
        );
        if committee.is_empty() {
            return Err(Error::Malformed("empty operator roster".into()));
        }
        if !committee.contains(&my_id) {
            return Err(Error::UnknownLocalOperator);
        }

        // A loaded share means we redistribute it; otherwise this is a fresh
        // run, over the whole union when the envelope asked for a reshare we
        // cannot serve (no stored share under old_id).
        let reshare = self.old_share.is_some();
        if reshare && !init.is_reshare() {
            return Err(Error::Malformed(
                "stored share supplied for a non-reshare init".into(),
            ));
        }
        let (dealers, recipients) = if reshare {
            (old_ids, new_ids)
        } else {
            (committee.clone(), committee.clone())
        };
        let threshold = threshold_for(recipients.len());

        self.req_id = req_id;
        self.my_id = my_id;
        self.reshare = reshare;
        self.committee = committee;
        self.dealers = dealers;
        self.recipients = recipients;
        self.threshold = threshold;

        let commitments = if self.is_dealer() {
            let secret = match &self.old_share {
                Some(share) => share.share,
                None => random_scalar(),
            };
            let polynomial = feldman::generate_polynomial(&secret, threshold, &mut OsRng);
            let commits = feldman::generate_commitments(&polynomial);
            self.polynomial = Some(polynomial);
            commits
                .iter()
                .flat_map(|c| crypto::point_to_bytes(c))
                .collect()
        } else {
            Vec::new()
        };

        info!(
            instance = %hex::encode(req_id),
            operator = my_id,
            reshare,
            committee = self.committee.len(),
            threshold,
            "instance round 0"
        );

        self.phase = Phase::Exchanging;
        Ok(Transport {
            msg_type: MessageType::Exchange,
            identifier: req_id,
            data: wire::encode(&Exchange { reshare, commitments })?,
        })
    }

    /// Accumulate one exchange; on full quorum, emit this operator's deal
    /// bundle and enter the dealing round.
    pub(super) fn handle_exchange(
        &mut self,
        owner: &LocalOwner,
        signer: u64,
        data: &[u8],
    ) -> Result<Option<Transport>> {
        if !matches!(self.phase, Phase::Exchanging) {
            return Err(Error::Crypto(format!(
                "exchange from operator {signer} outside the exchange round"
            )));
        }
        if !self.committee.contains(&signer) {
            return Err(Error::UnknownSigner(signer));
        }
        if self.exchanges.contains_key(&signer) {
            return Err(Error::Crypto(format!(
                "duplicate exchange from operator {signer}"
            )));
        }

        let exchange: Exchange = wire::decode(data)?;
        if exchange.reshare != self.reshare {
            return Err(Error::Crypto(format!(
                "operator {signer} runs the wrong protocol mode"
            )));
        }

        let commits = if self.dealers.contains(&signer) {
            if exchange.commitments.len() != self.threshold * POINT_SIZE {
                return Err(Error::Crypto(format!(
                    "operator {signer} committed to {} bytes, expected {}",
                    exchange.commitments.len(),
                    self.threshold * POINT_SIZE
                )));
            }
            split_bytes(&exchange.commitments, POINT_SIZE)
                .iter()
                .map(|chunk| {
                    crypto::point_from_slice(chunk)
                        .map_err(|_| Error::Crypto(format!("invalid commitment from operator {signer}")))
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            if !exchange.commitments.is_empty() {
                return Err(Error::Crypto(format!(
                    "non-dealing operator {signer} sent commitments"
                )));
            }
            Vec::new()
        };
        self.exchanges.insert(signer, commits);

        if self.exchanges.len() < self.committee.len() {
            return Ok(None);
        }

        self.phase = Phase::Dealing;
        let bundle = self.make_bundle(owner)?;
        Ok(Some(Transport {
            msg_type: MessageType::Deal,
            identifier: self.req_id,
            data: wire::encode(&bundle)?,
        }))
    }

    /// This operator's deals: its polynomial evaluated at every recipient id,
    /// each share encrypted to the recipient's roster key. Non-dealers send
    /// an empty bundle so the round stays one broadcast per operator.
    fn make_bundle(&self, owner: &LocalOwner) -> Result<DealBundle> {
        let Some(polynomial) = &self.polynomial else {
            return Ok(DealBundle { deals: Vec::new() });
        };
        let mut deals = Vec::with_capacity(self.recipients.len());
        for &recipient in &self.recipients {
            let share = feldman::evaluate_polynomial(polynomial, &Scalar::from(recipient));
            let share_bytes = Zeroizing::new(crypto::scalar_to_bytes(&share));
            let encrypted = crypto::encrypt_to(owner.roster_key(recipient)?, share_bytes.as_ref())?;
            deals.push(Deal { recipient, share: encrypted });
        }
        Ok(DealBundle { deals })
    }

    /// Accumulate one deal bundle; on full quorum, finalize the instance.
    pub(super) fn handle_deal(
        &mut self,
        owner: &LocalOwner,
        signer: u64,
        data: &[u8],
    ) -> Result<Option<Transport>> {
        if !matches!(self.phase, Phase::Dealing) {
            return Err(Error::Crypto(format!(
                "deal from operator {signer} outside the dealing round"
            )));
        }
        if !self.committee.contains(&signer) {
            return Err(Error::UnknownSigner(signer));
        }
        if self.bundle_seen.contains(&signer) {
            return Err(Error::Crypto(format!(
                "duplicate deal bundle from operator {signer}"
            )));
        }

        let bundle: DealBundle = wire::decode(data)?;
        if self.dealers.contains(&signer) {
            if bundle.deals.len() != self.recipients.len()
                || bundle
                    .deals
                    .iter()
                    .zip(&self.recipients)
                    .any(|(deal, &want)| deal.recipient != want)
            {
                return Err(Error::Crypto(format!(
                    "operator {signer} dealt to the wrong recipient set"
                )));
            }
            if self.is_recipient() {
                let mine = bundle
                    .deals
                    .iter()
                    .find(|deal| deal.recipient == self.my_id)
                    .ok_or_else(|| {
                        Error::Crypto(format!("operator {signer} dealt nothing to this operator"))
                    })?;
                let share = self.open_deal(owner, signer, &mine.share)?;
                self.deal_shares.insert(signer, share);
            }
        } else if !bundle.deals.is_empty() {
            return Err(Error::Crypto(format!(
                "non-dealing operator {signer} sent deals"
            )));
        }

        self.bundle_seen.insert(signer);
        if self.bundle_seen.len() < self.committee.len() {
            return Ok(None);
        }
        self.finalize(owner).map(Some)
    }

    /// Decrypt and commitment-check one deal addressed to this operator.
    fn open_deal(&self, owner: &LocalOwner, dealer: u64, encrypted: &[u8]) -> Result<Scalar> {
        let plain = Zeroizing::new(crypto::decrypt(owner.private_key(), encrypted)?);
        let bytes: [u8; SCALAR_SIZE] = plain
            .as_slice()
            .try_into()
            .map_err(|_| Error::Crypto(format!("operator {dealer} dealt a malformed share")))?;
        let share = crypto::scalar_from_bytes(&bytes)
            .map_err(|_| Error::Crypto(format!("operator {dealer} dealt an invalid scalar")))?;

        let commits = self
            .exchanges
            .get(&dealer)
            .ok_or_else(|| Error::Crypto(format!("no commitments from operator {dealer}")))?;
        if !feldman::verify_share(&share, self.my_id, commits) {
            return Err(Error::Crypto(format!(
                "deal from operator {dealer} fails its commitment check"
            )));
        }
        Ok(share)
    }

    /// Combine deals and commitments into the group result, persist this
    /// operator's new share under the instance id, and emit the output.
    fn finalize(&mut self, owner: &LocalOwner) -> Result<Transport> {
        // reshare results are re-based with Lagrange weights at zero over the
        // dealing committee; a fresh run is a plain sum
        let weights = if self.reshare {
            let mut w = Vec::with_capacity(self.dealers.len());
            for &dealer in &self.dealers {
                w.push(
                    feldman::lagrange_at_zero(&self.dealers, dealer)
                        .ok_or_else(|| Error::Crypto("degenerate dealing committee".into()))?,
                );
            }
            Some(w)
        } else {
            None
        };

        let mut commits = Vec::with_capacity(self.threshold);
        for k in 0..self.threshold {
            let mut acc = G1Projective::identity();
            for (i, dealer) in self.dealers.iter().enumerate() {
                let c = &self.exchanges[dealer][k];
                acc += match &weights {
                    Some(w) => c * w[i],
                    None => G1Projective::from(c),
                };
            }
            commits.push(acc.to_affine());
        }
        let public_key = commits[0];

        if let Some(old) = &self.old_share {
            if *old.public_key() != public_key {
                return Err(Error::Crypto("reshare changed the group public key".into()));
            }
        }

        let mut index = 0u32;
        if self.is_recipient() {
            let mut share = Scalar::ZERO;
            for (i, dealer) in self.dealers.iter().enumerate() {
                let dealt = self
                    .deal_shares
                    .get(dealer)
                    .ok_or_else(|| Error::Crypto(format!("missing deal from operator {dealer}")))?;
                share += match &weights {
                    Some(w) => dealt * w[i],
                    None => *dealt,
                };
            }
            if !feldman::verify_share(&share, self.my_id, &commits) {
                return Err(Error::Crypto(
                    "combined share fails the group commitment check".into(),
                ));
            }

            index = self.my_id as u32;
            let dist = DistKeyShare { index, share, commits: commits.clone() };
            owner.store().put(&self.req_id, &dist.encode())?;
        }

        let (owner_addr, nonce) = owner.binding();
        let output = Output {
            index,
            commits: commits.iter().flat_map(crypto::point_to_bytes).collect(),
            public_key: crypto::point_to_bytes(&public_key).to_vec(),
            owner: owner_addr,
            nonce,
        };

        info!(
            instance = %hex::encode(self.req_id),
            operator = self.my_id,
            holds_share = index != 0,
            public_key = %hex::encode(output.public_key.as_slice()),
            "instance completed"
        );

        self.phase = Phase::Completed;
        Ok(Transport {
            msg_type: MessageType::Output,
            identifier: self.req_id,
            data: wire::encode(&output)?,
        })
    }
}

/// Roster ids must be unique, non-zero and fit the persisted share index.
fn validated_ids(ops: &[Operator]) -> Result<Vec<u64>> {
    let mut ids = Vec::with_capacity(ops.len());
    for op in ops {
        if op.id == 0 {
            return Err(Error::Malformed("operator id 0 is reserved".into()));
        }
        if op.id > u64::from(u32::MAX) {
            return Err(Error::Malformed(format!(
                "operator id {} exceeds the share index range",
                op.id
            )));
        }
        if ids.contains(&op.id) {
            return Err(Error::Malformed(format!("duplicate operator id {}", op.id)));
        }
        ids.push(op.id);
    }
    Ok(ids)
}

fn random_scalar() -> Scalar {
    let mut wide = [0u8; 64];
    OsRng.fill_bytes(&mut wide);
    Scalar::from_bytes_wide(&wide)
}
