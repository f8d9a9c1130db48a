//! # RocksDB Storage
//!
//! Durable storage for committed blocks and spent anonymous tokens.
//!
//! Two column families:
//!
//! - `blocks`: 8-byte big-endian block index → JSON-encoded block
//! - `used_tokens`: hex token hash → marker byte
//!
//! Block writes are fsync'd: a block the engine considers committed must
//! survive a crash, otherwise replicas could restart into diverging chains.
//! All operations are synchronous blocking I/O with short critical sections.

use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteOptions, DB};
use std::path::Path;
use thiserror::Error;
use tracing::info;
use urna_types::{Block, TokenStore, TokenStoreError};

const CF_BLOCKS: &str = "blocks";
const CF_USED_TOKENS: &str = "used_tokens";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(String),

    /// The block store is internally inconsistent (gaps, bad keys).
    #[error("corrupt block store: {0}")]
    Corrupt(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// RocksDB-backed store, one database per replica.
pub struct Storage {
    db: DB,
}

impl Storage {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_BLOCKS, Options::default()),
            ColumnFamilyDescriptor::new(CF_USED_TOKENS, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path.as_ref(), cf_descriptors)
            .map_err(|e| StorageError::Db(e.to_string()))?;
        info!(path = %path.as_ref().display(), "storage opened");
        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::Db(format!("column family {name} not found")))
    }

    /// Persist a block, fsync'd, keyed by big-endian index.
    pub fn save_block(&self, block: &Block) -> Result<(), StorageError> {
        let cf = self.cf(CF_BLOCKS)?;
        let key = block.index.to_be_bytes();
        let value = serde_json::to_vec(block)?;

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        self.db
            .put_cf_opt(cf, key, value, &write_opts)
            .map_err(|e| StorageError::Db(e.to_string()))
    }

    /// Load every block ordered by index. Gaps or malformed keys are
    /// corruption: the replica must not start from a holed chain.
    pub fn load_all_blocks(&self) -> Result<Vec<Block>, StorageError> {
        let cf = self.cf(CF_BLOCKS)?;
        let mut blocks = Vec::new();

        for (expected, item) in self.db.iterator_cf(cf, IteratorMode::Start).enumerate() {
            let (key, value) = item.map_err(|e| StorageError::Db(e.to_string()))?;
            let key: [u8; 8] = key
                .as_ref()
                .try_into()
                .map_err(|_| StorageError::Corrupt(format!("block key of length {}", key.len())))?;
            let index = u64::from_be_bytes(key);
            if index != expected as u64 {
                return Err(StorageError::Corrupt(format!(
                    "gap in block store: expected index {expected}, found {index}"
                )));
            }

            let block: Block = serde_json::from_slice(&value)?;
            if block.index != index {
                return Err(StorageError::Corrupt(format!(
                    "block stored under index {index} claims index {}",
                    block.index
                )));
            }
            blocks.push(block);
        }
        Ok(blocks)
    }

    /// Number of stored blocks.
    pub fn block_count(&self) -> Result<usize, StorageError> {
        let cf = self.cf(CF_BLOCKS)?;
        Ok(self.db.iterator_cf(cf, IteratorMode::Start).count())
    }

    /// Record an anonymous token as spent, fsync'd.
    pub fn mark_token_used(&self, token_hash: &str) -> Result<(), StorageError> {
        let cf = self.cf(CF_USED_TOKENS)?;
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        self.db
            .put_cf_opt(cf, token_hash.as_bytes(), [1u8], &write_opts)
            .map_err(|e| StorageError::Db(e.to_string()))
    }

    /// Whether an anonymous token has been spent.
    pub fn is_token_used(&self, token_hash: &str) -> Result<bool, StorageError> {
        let cf = self.cf(CF_USED_TOKENS)?;
        self.db
            .get_cf(cf, token_hash.as_bytes())
            .map(|v| v.is_some())
            .map_err(|e| StorageError::Db(e.to_string()))
    }
}

impl TokenStore for Storage {
    fn is_used(&self, token_hash: &str) -> Result<bool, TokenStoreError> {
        self.is_token_used(token_hash)
            .map_err(|e| TokenStoreError(e.to_string()))
    }

    fn mark_used(&self, token_hash: &str) -> Result<(), TokenStoreError> {
        self.mark_token_used(token_hash)
            .map_err(|e| TokenStoreError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use urna_types::{current_timestamp, Ballot};

    fn open_temp() -> (Storage, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path().join("blockchain.db")).unwrap();
        (storage, dir)
    }

    #[test]
    fn fresh_store_is_empty() {
        let (storage, _dir) = open_temp();
        assert_eq!(storage.block_count().unwrap(), 0);
        assert!(storage.load_all_blocks().unwrap().is_empty());
    }

    #[test]
    fn block_round_trip_preserves_hash() {
        let (storage, _dir) = open_temp();
        let genesis = Block::genesis();
        let block = Block::new(
            1,
            genesis.hash.clone(),
            vec![Ballot::vote("alice", "c1")],
            current_timestamp(),
        );

        storage.save_block(&genesis).unwrap();
        storage.save_block(&block).unwrap();

        let loaded = storage.load_all_blocks().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], genesis);
        assert_eq!(loaded[1], block);
        assert!(loaded[1].verify());
    }

    #[test]
    fn blocks_come_back_in_index_order() {
        let (storage, _dir) = open_temp();
        let genesis = Block::genesis();
        let mut prev = genesis.hash.clone();
        storage.save_block(&genesis).unwrap();
        for i in 1..=5 {
            let block = Block::new(i, prev.clone(), vec![], current_timestamp());
            prev = block.hash.clone();
            storage.save_block(&block).unwrap();
        }

        let loaded = storage.load_all_blocks().unwrap();
        let indexes: Vec<u64> = loaded.iter().map(|b| b.index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn gap_in_block_store_is_corruption() {
        let (storage, _dir) = open_temp();
        let genesis = Block::genesis();
        let orphan = Block::new(2, "prev".to_string(), vec![], current_timestamp());
        storage.save_block(&genesis).unwrap();
        storage.save_block(&orphan).unwrap();

        assert!(matches!(
            storage.load_all_blocks(),
            Err(StorageError::Corrupt(_))
        ));
    }

    #[test]
    fn token_marks_persist_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blockchain.db");
        {
            let storage = Storage::open(&path).unwrap();
            assert!(!storage.is_token_used("cafe").unwrap());
            storage.mark_token_used("cafe").unwrap();
            assert!(storage.is_token_used("cafe").unwrap());
        }
        let storage = Storage::open(&path).unwrap();
        assert!(storage.is_token_used("cafe").unwrap());
        assert!(!storage.is_token_used("beef").unwrap());
    }

    #[test]
    fn token_store_trait_maps_through() {
        let (storage, _dir) = open_temp();
        let tokens: &dyn TokenStore = &storage;
        tokens.mark_used("feed").unwrap();
        assert!(tokens.is_used("feed").unwrap());
    }
}
