//! sled-backed dataset: tree layout, key encoding and transaction helpers
use super::error::{ReferralError, Result};
use super::model::Level;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree,
};
use sled::{Db, Tree};
use std::sync::Arc;

// Tree names are part of the on-disk format.
const TREE_PARTICIPANTS: &str = "participants";
const TREE_EDGES_UP: &str = "edges_up";
const TREE_EDGES_DOWN: &str = "edges_down";
const TREE_PURCHASES: &str = "purchases";
const TREE_COMMISSIONS: &str = "commissions";
const TREE_BENEFICIARY_COMMISSIONS: &str = "beneficiary_commissions";

const SEP: u8 = 0;

pub(crate) type TxResult<T> = ConflictableTransactionResult<T, ReferralError>;

/// Handles to every tree of the dataset. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
    db: Arc<Db>,
    pub(crate) participants: Tree,
    pub(crate) edges_up: Tree,   // descendant \0 level -> edge
    pub(crate) edges_down: Tree, // ancestor \0 level seq descendant -> edge
    pub(crate) purchases: Tree,
    pub(crate) commissions: Tree, // purchase \0 level -> commission
    pub(crate) beneficiary_commissions: Tree, // beneficiary \0 seq purchase \0 level -> commission key
}

impl Store {
    pub fn open(db: Arc<Db>) -> Result<Self> {
        Ok(Self {
            participants: db.open_tree(TREE_PARTICIPANTS)?,
            edges_up: db.open_tree(TREE_EDGES_UP)?,
            edges_down: db.open_tree(TREE_EDGES_DOWN)?,
            purchases: db.open_tree(TREE_PURCHASES)?,
            commissions: db.open_tree(TREE_COMMISSIONS)?,
            beneficiary_commissions: db.open_tree(TREE_BENEFICIARY_COMMISSIONS)?,
            db,
        })
    }
    /// In-memory store removed on drop
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::open(Arc::new(db))
    }
    /// Monotonic sequence used to order records by creation
    pub(crate) fn next_seq(&self) -> Result<u64> {
        Ok(self.db.generate_id()?)
    }
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

pub(crate) mod keys {
    use super::{Level, SEP};

    pub fn participant(id: &str) -> Vec<u8> {
        id.as_bytes().to_vec()
    }
    pub fn purchase(id: &str) -> Vec<u8> {
        id.as_bytes().to_vec()
    }
    fn with_sep(id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(id.len() + 16);
        key.extend_from_slice(id.as_bytes());
        key.push(SEP);
        key
    }
    pub fn edge_up(descendant: &str, level: Level) -> Vec<u8> {
        let mut key = with_sep(descendant);
        key.push(level.number());
        key
    }
    pub fn edge_down_prefix(ancestor: &str, level: Level) -> Vec<u8> {
        let mut key = with_sep(ancestor);
        key.push(level.number());
        key
    }
    pub fn edge_down(ancestor: &str, level: Level, seq: u64, descendant: &str) -> Vec<u8> {
        let mut key = edge_down_prefix(ancestor, level);
        key.extend_from_slice(&seq.to_be_bytes());
        key.extend_from_slice(descendant.as_bytes());
        key
    }
    pub fn commission_prefix(purchase_id: &str) -> Vec<u8> {
        with_sep(purchase_id)
    }
    pub fn commission(purchase_id: &str, level: Level) -> Vec<u8> {
        let mut key = commission_prefix(purchase_id);
        key.push(level.number());
        key
    }
    pub fn beneficiary_prefix(beneficiary: &str) -> Vec<u8> {
        with_sep(beneficiary)
    }
    pub fn beneficiary(beneficiary: &str, seq: u64, purchase_id: &str, level: Level) -> Vec<u8> {
        let mut key = beneficiary_prefix(beneficiary);
        key.extend_from_slice(&seq.to_be_bytes());
        key.extend_from_slice(&commission(purchase_id, level));
        key
    }
}

pub(crate) fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>> {
    Ok(minicbor::to_vec(value)?)
}

pub(crate) fn decode<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    Ok(minicbor::decode(bytes)?)
}

pub(crate) fn get<T>(tree: &Tree, key: &[u8]) -> Result<Option<T>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    tree.get(key)?.map(|bytes| decode(&bytes)).transpose()
}

/// Decode every value under `prefix`, in key order
pub(crate) fn scan<T>(tree: &Tree, prefix: &[u8]) -> Result<Vec<T>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    tree.scan_prefix(prefix)
        .map(|item| {
            let (_, value) = item?;
            decode(&value)
        })
        .collect()
}

pub(crate) fn abort<T>(err: ReferralError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err))
}

pub(crate) fn tx_get<T>(tree: &TransactionalTree, key: &[u8]) -> TxResult<Option<T>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tree.get(key)? {
        Some(bytes) => decode(&bytes)
            .map(Some)
            .map_err(ConflictableTransactionError::Abort),
        None => Ok(None),
    }
}

pub(crate) fn tx_put<T: minicbor::Encode<()>>(
    tree: &TransactionalTree,
    key: Vec<u8>,
    value: &T,
) -> TxResult<()> {
    let bytes = encode(value).map_err(ConflictableTransactionError::Abort)?;
    tree.insert(key, bytes)?;
    Ok(())
}
