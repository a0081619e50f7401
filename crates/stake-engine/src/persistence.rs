//! Persistence Layer for Engine State
//!
//! Uses sled embedded database to persist one domain engine across restarts.
//! Append-only tables (oracle records, exit requests, outbound messages,
//! claim receipts, reward epochs) get one tree each, keyed by big-endian id so
//! iteration order is creation order. Everything mutable in place lives in a
//! single metadata entry. State is saved periodically and on shutdown.
//!
//! A save writes every tree and the metadata in one sled transaction, so a
//! crash mid-save leaves the previous snapshot intact.

use std::path::Path;

use anyhow::anyhow;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sled::{
    transaction::{ConflictableTransactionResult, TransactionError, TransactionalTree},
    Db, Transactional,
};
use stake_types::{Amount, Domain, Pubkey};

use crate::{
    engine::{DomainEngine, EngineExport, FundRequestRecord},
    ledger::ExchangeRateLedger,
    oracle::OracleAccounting,
    pause::PauseState,
    rewards::ClaimStream,
};

/// Key of the engine metadata entry
const METADATA_KEY: &str = "engine";

/// Mutable engine state stored beside the append-only tables
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EngineMetadata {
    pub domain: Domain,
    /// Local height at save time
    pub height: u64,
    pub ledger: ExchangeRateLedger,
    pub accounting: OracleAccounting,
    pub claimable: Vec<(ClaimStream, Pubkey, Amount)>,
    pub carried_liquidity: Amount,
    pub pause: PauseState,
    pub fund_requests: Vec<FundRequestRecord>,
    /// Last save timestamp
    pub last_save_ts: i64,
}

/// Persistent storage for one domain engine
pub struct PersistentStore {
    /// Sled database instance
    db: Db,
    /// Oracle records by id
    records: sled::Tree,
    /// Unstake requests by id
    requests: sled::Tree,
    /// Outbound messages by nonce
    messages: sled::Tree,
    /// Claim receipts by (origin tag, nonce)
    claims: sled::Tree,
    /// Reward epochs by id
    epochs: sled::Tree,
    /// Metadata tree
    metadata: sled::Tree,
}

impl PersistentStore {
    /// Open or create a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let db = sled::open(&path)?;
        let records = db.open_tree("records")?;
        let requests = db.open_tree("requests")?;
        let messages = db.open_tree("messages")?;
        let claims = db.open_tree("claims")?;
        let epochs = db.open_tree("epochs")?;
        let metadata = db.open_tree("metadata")?;

        tracing::info!("Opened persistent store at {:?}", path.as_ref());

        Ok(Self {
            db,
            records,
            requests,
            messages,
            claims,
            epochs,
            metadata,
        })
    }

    /// Save engine metadata
    pub fn save_metadata(&self, metadata: &EngineMetadata) -> anyhow::Result<()> {
        let bytes = bincode::serialize(metadata)?;
        self.metadata.insert(METADATA_KEY, bytes)?;
        Ok(())
    }

    /// Load engine metadata
    pub fn load_metadata(&self) -> anyhow::Result<Option<EngineMetadata>> {
        match self.metadata.get(METADATA_KEY)? {
            Some(bytes) => {
                let metadata: EngineMetadata = bincode::deserialize(&bytes)?;
                Ok(Some(metadata))
            }
            None => Ok(None),
        }
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> anyhow::Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Number of stored oracle records
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) -> anyhow::Result<()> {
        for tree in self.trees() {
            tree.clear()?;
        }
        self.metadata.clear()?;
        Ok(())
    }

    fn trees(&self) -> [&sled::Tree; 5] {
        [
            &self.records,
            &self.requests,
            &self.messages,
            &self.claims,
            &self.epochs,
        ]
    }
}

/// Serialized rows for one tree
type Rows = Vec<(Vec<u8>, Vec<u8>)>;

fn rows<'a, T, K, I>(values: I, key: K) -> anyhow::Result<Rows>
where
    T: Serialize + 'a,
    K: Fn(&T) -> Vec<u8>,
    I: IntoIterator<Item = &'a T>,
{
    values
        .into_iter()
        .map(|value| Ok((key(value), bincode::serialize(value)?)))
        .collect()
}

fn insert_rows(tree: &TransactionalTree, rows: &Rows) -> ConflictableTransactionResult<()> {
    for (key, value) in rows {
        tree.insert(key.as_slice(), value.as_slice())?;
    }
    Ok(())
}

fn load_all<T: DeserializeOwned>(tree: &sled::Tree) -> anyhow::Result<Vec<T>> {
    let mut values = Vec::with_capacity(tree.len());
    for result in tree.iter() {
        let (_, value) = result?;
        values.push(bincode::deserialize(&value)?);
    }
    Ok(values)
}

fn claim_key(origin: Domain, nonce: u64) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[0] = origin.tag();
    key[1..].copy_from_slice(&nonce.to_be_bytes());
    key
}

/// Extension trait to add persistence to DomainEngine
pub trait EnginePersistence {
    /// Save all engine state. Returns the number of table rows written.
    fn save_to_disk(&self, store: &PersistentStore) -> anyhow::Result<usize>;

    /// Load engine state. Returns the number of table rows loaded, or zero if
    /// the store is empty.
    fn load_from_disk(&self, store: &PersistentStore) -> anyhow::Result<usize>;
}

impl EnginePersistence for DomainEngine {
    fn save_to_disk(&self, store: &PersistentStore) -> anyhow::Result<usize> {
        let export = self.export();

        let records = rows(&export.records, |r| r.id.to_be_bytes().to_vec())?;
        let requests = rows(&export.requests, |r| r.id.to_be_bytes().to_vec())?;
        let messages = rows(&export.messages, |m| m.nonce.to_be_bytes().to_vec())?;
        let claims = rows(&export.receipts, |r| claim_key(r.origin, r.nonce).to_vec())?;
        let epochs = rows(&export.epochs, |e| e.epoch_id.to_be_bytes().to_vec())?;
        let count = records.len() + requests.len() + messages.len() + claims.len() + epochs.len();

        let metadata = bincode::serialize(&EngineMetadata {
            domain: export.domain,
            height: export.height,
            ledger: export.ledger,
            accounting: export.accounting,
            claimable: export.claimable,
            carried_liquidity: export.carried_liquidity,
            pause: export.pause,
            fund_requests: export.fund_requests,
            last_save_ts: chrono::Utc::now().timestamp(),
        })?;

        (
            &store.records,
            &store.requests,
            &store.messages,
            &store.claims,
            &store.epochs,
            &store.metadata,
        )
            .transaction(|(r, q, m, c, e, md)| {
                insert_rows(r, &records)?;
                insert_rows(q, &requests)?;
                insert_rows(m, &messages)?;
                insert_rows(c, &claims)?;
                insert_rows(e, &epochs)?;
                md.insert(METADATA_KEY.as_bytes(), metadata.as_slice())?;
                Ok(())
            })
            .map_err(|e: TransactionError<()>| match e {
                TransactionError::Storage(e) => anyhow::Error::from(e),
                TransactionError::Abort(()) => anyhow!("save of {} engine aborted", export.domain),
            })?;

        store.flush()?;
        tracing::info!("Saved {} engine at height {} ({} rows)", export.domain, export.height, count);

        Ok(count)
    }

    fn load_from_disk(&self, store: &PersistentStore) -> anyhow::Result<usize> {
        let Some(metadata) = store.load_metadata()? else {
            tracing::info!("No saved state for {} engine", self.domain());
            return Ok(0);
        };

        let export = EngineExport {
            domain: metadata.domain,
            height: metadata.height,
            ledger: metadata.ledger,
            records: load_all(&store.records)?,
            accounting: metadata.accounting,
            epochs: load_all(&store.epochs)?,
            claimable: metadata.claimable,
            requests: load_all(&store.requests)?,
            carried_liquidity: metadata.carried_liquidity,
            pause: metadata.pause,
            messages: load_all(&store.messages)?,
            receipts: load_all(&store.claims)?,
            fund_requests: metadata.fund_requests,
        };
        let count = export.records.len()
            + export.requests.len()
            + export.messages.len()
            + export.receipts.len()
            + export.epochs.len();

        self.restore(export)?;
        tracing::info!(
            "Loaded {} engine from disk ({} rows, saved at {})",
            self.domain(),
            count,
            chrono::DateTime::from_timestamp(metadata.last_save_ts, 0)
                .map(|ts| ts.to_rfc3339())
                .unwrap_or_default()
        );

        Ok(count)
    }
}
