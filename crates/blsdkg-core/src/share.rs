//! Threshold share material and its persistence
//!
//! A [`DistKeyShare`] is what one operator keeps after a finished DKG: its
//! private share of the group secret plus the group commitment vector. The
//! persisted byte layout is a stability contract across versions:
//!
//! ```text
//! u32 index (big-endian) || 32-byte big-endian scalar || t x 48-byte G1 points
//! ```
//!
//! Shares are stored in a `redb` table keyed by the 24-byte instance id the
//! share was generated under, so a later reshare can find it by `old_id`.

use std::path::Path;
use std::sync::Arc;

use bls12_381::{G1Affine, Scalar};
use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;
use zeroize::Zeroizing;

use crate::crypto::{
    point_from_slice, point_to_bytes, scalar_from_bytes, scalar_to_bytes, POINT_SIZE, SCALAR_SIZE,
};
use crate::error::{Error, Result};
use crate::roster::split_bytes;
use crate::wire::InstanceId;

const SECRETS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("secret");

const HEADER_SIZE: usize = 4 + SCALAR_SIZE;

/// One operator's share of a distributed key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistKeyShare {
    /// Share index (the operator id the polynomial was evaluated at)
    pub index: u32,
    /// Private share scalar
    pub share: Scalar,
    /// Feldman commitments to the group polynomial, constant term first
    pub commits: Vec<G1Affine>,
}

impl DistKeyShare {
    /// The group public key: the constant-term commitment.
    pub fn public_key(&self) -> &G1Affine {
        &self.commits[0]
    }

    /// The threshold the commitment vector encodes.
    pub fn threshold(&self) -> usize {
        self.commits.len()
    }

    /// Serialize to the stable persisted layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.commits.len() * POINT_SIZE);
        out.extend_from_slice(&self.index.to_be_bytes());
        out.extend_from_slice(&scalar_to_bytes(&self.share));
        for commit in &self.commits {
            out.extend_from_slice(&point_to_bytes(commit));
        }
        out
    }

    /// Decode from the persisted layout. Every 48-byte commitment chunk must
    /// unmarshal as a G1 point or the whole decode fails.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE + POINT_SIZE {
            return Err(Error::Malformed(format!(
                "share too short: {} bytes",
                bytes.len()
            )));
        }
        let commits_bytes = &bytes[HEADER_SIZE..];
        if commits_bytes.len() % POINT_SIZE != 0 {
            return Err(Error::Malformed(format!(
                "commitment bytes not a multiple of {POINT_SIZE}"
            )));
        }

        let index = u32::from_be_bytes(bytes[..4].try_into().expect("4-byte slice"));
        let scalar_bytes: Zeroizing<[u8; SCALAR_SIZE]> = Zeroizing::new(
            bytes[4..HEADER_SIZE].try_into().expect("32-byte slice"),
        );
        let share = scalar_from_bytes(&scalar_bytes)?;

        let commits = split_bytes(commits_bytes, POINT_SIZE)
            .iter()
            .map(|chunk| point_from_slice(chunk))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { index, share, commits })
    }
}

/// Persistent store mapping an instance id to the share generated under it
#[derive(Clone)]
pub struct ShareStore {
    db: Arc<Database>,
}

impl ShareStore {
    /// Open (or create) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = if path.as_ref().exists() {
            Database::open(path)
        } else {
            Database::create(path)
        }
        .map_err(|e| Error::Io(e.to_string()))?;
        let store = Self { db: Arc::new(db) };
        store.init_tables()?;
        Ok(store)
    }

    fn init_tables(&self) -> Result<()> {
        let tx = self.db.begin_write().map_err(|e| Error::Io(e.to_string()))?;
        {
            tx.open_table(SECRETS).map_err(|e| Error::Io(e.to_string()))?;
        }
        tx.commit().map_err(|e| Error::Io(e.to_string()))
    }

    /// Fetch the encoded share stored under `id`, if any.
    pub fn get(&self, id: &InstanceId) -> Result<Option<Vec<u8>>> {
        let tx = self.db.begin_read().map_err(|e| Error::Io(e.to_string()))?;
        let table = tx.open_table(SECRETS).map_err(|e| Error::Io(e.to_string()))?;
        let value = table
            .get(id.as_slice())
            .map_err(|e| Error::Io(e.to_string()))?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    /// Store an encoded share under `id`, replacing any previous value.
    pub fn put(&self, id: &InstanceId, share: &[u8]) -> Result<()> {
        let tx = self.db.begin_write().map_err(|e| Error::Io(e.to_string()))?;
        {
            let mut table = tx.open_table(SECRETS).map_err(|e| Error::Io(e.to_string()))?;
            table
                .insert(id.as_slice(), share)
                .map_err(|e| Error::Io(e.to_string()))?;
        }
        tx.commit().map_err(|e| Error::Io(e.to_string()))?;
        debug!(id = %hex::encode(id), len = share.len(), "share persisted");
        Ok(())
    }
}
