//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `packets` - Red packet records (key: packet id)
//! - `collections` - Collection records (key: collection id)
//! - `events` - Append-only event log (key: sequence number)
//! - `indices` - Per-identity reverse indices (sent/claimed/created/paid)
//! - `meta` - Sequential id counters and the event log cursor
//!
//! Every mutating commit goes through a single `WriteBatch`: the entity, the
//! events it produced, the counters, and the index entries land atomically or
//! not at all. A failed guard never reaches this layer, so entity state is
//! byte-for-byte unchanged on any failure.

use crate::{
    error::{Error, Result},
    events::{EngineEvent, EventRecord},
    types::{AccountId, Collection, RedPacket},
    Config,
};
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, IteratorMode, Options, WriteBatch, DB};
use std::sync::Arc;

/// Column family names
const CF_PACKETS: &str = "packets";
const CF_COLLECTIONS: &str = "collections";
const CF_EVENTS: &str = "events";
const CF_INDICES: &str = "indices";
const CF_META: &str = "meta";

/// Meta keys
const META_PACKET_COUNT: &[u8] = b"packet_count";
const META_COLLECTION_COUNT: &[u8] = b"collection_count";
const META_EVENT_SEQ: &[u8] = b"event_seq";

/// Index tags (key layout: tag || account_len || account || event_seq)
const IDX_SENT_PACKETS: &[u8] = b"ps";
const IDX_CLAIMED_PACKETS: &[u8] = b"pc";
const IDX_CREATED_COLLECTIONS: &[u8] = b"cc";
const IDX_PAID_COLLECTIONS: &[u8] = b"cp";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for write-heavy workload
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_PACKETS, Self::cf_options_entities()),
            ColumnFamilyDescriptor::new(CF_COLLECTIONS, Self::cf_options_entities()),
            ColumnFamilyDescriptor::new(CF_EVENTS, Self::cf_options_events()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_META, Self::cf_options_entities()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = %path.display(), "Opened RocksDB");

        Ok(Self { db: Arc::new(db) })
    }

    // Column family options

    fn cf_options_entities() -> Options {
        let mut opts = Options::default();
        // Entities are frequently read back, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_events() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Counters

    fn get_meta_u64(&self, key: &[u8]) -> Result<u64> {
        let cf = self.cf_handle(CF_META)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage("corrupt meta counter".to_string()))?;
                Ok(u64::from_be_bytes(arr))
            }
            None => Ok(0),
        }
    }

    /// Total red packets ever created (also the next packet id)
    pub fn red_packet_count(&self) -> Result<u64> {
        self.get_meta_u64(META_PACKET_COUNT)
    }

    /// Total collections ever created (also the next collection id)
    pub fn collection_count(&self) -> Result<u64> {
        self.get_meta_u64(META_COLLECTION_COUNT)
    }

    /// Number of events in the log (also the next sequence number)
    pub fn event_count(&self) -> Result<u64> {
        self.get_meta_u64(META_EVENT_SEQ)
    }

    // Point lookups

    /// Get red packet by id
    pub fn get_red_packet(&self, id: u64) -> Result<RedPacket> {
        let cf = self.cf_handle(CF_PACKETS)?;
        let value = self
            .db
            .get_cf(cf, id.to_be_bytes())?
            .ok_or(Error::PacketNotFound(id))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Get collection by id
    pub fn get_collection(&self, id: u64) -> Result<Collection> {
        let cf = self.cf_handle(CF_COLLECTIONS)?;
        let value = self
            .db
            .get_cf(cf, id.to_be_bytes())?
            .ok_or(Error::CollectionNotFound(id))?;
        Ok(bincode::deserialize(&value)?)
    }

    // Atomic commits

    /// Persist a newly created red packet, its creation event, and the
    /// creator's "sent" index entry
    pub fn commit_red_packet_creation(
        &self,
        packet: &RedPacket,
        event: EngineEvent,
        now: DateTime<Utc>,
    ) -> Result<EventRecord> {
        let expected_id = self.red_packet_count()?;
        if packet.id != expected_id {
            return Err(Error::InvariantViolation(format!(
                "packet id {} does not match sequence {}",
                packet.id, expected_id
            )));
        }

        let seq = self.event_count()?;
        let record = EventRecord::new(seq, now, event);

        let mut batch = WriteBatch::default();
        let cf_packets = self.cf_handle(CF_PACKETS)?;
        batch.put_cf(cf_packets, packet.id.to_be_bytes(), bincode::serialize(packet)?);

        let cf_meta = self.cf_handle(CF_META)?;
        batch.put_cf(cf_meta, META_PACKET_COUNT, (expected_id + 1).to_be_bytes());
        batch.put_cf(cf_meta, META_EVENT_SEQ, (seq + 1).to_be_bytes());

        let cf_events = self.cf_handle(CF_EVENTS)?;
        batch.put_cf(cf_events, seq.to_be_bytes(), bincode::serialize(&record)?);

        let cf_indices = self.cf_handle(CF_INDICES)?;
        batch.put_cf(
            cf_indices,
            index_key(IDX_SENT_PACKETS, &packet.creator, seq),
            packet.id.to_be_bytes(),
        );

        self.db.write(batch)?;

        tracing::debug!(packet_id = packet.id, seq, "red packet creation committed");
        Ok(record)
    }

    /// Persist an updated red packet together with the events the update
    /// produced; `claimer` adds a "claimed" index entry
    pub fn commit_red_packet_update(
        &self,
        packet: &RedPacket,
        claimer: Option<&AccountId>,
        events: Vec<EngineEvent>,
        now: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>> {
        let mut seq = self.event_count()?;
        let first_seq = seq;

        let mut batch = WriteBatch::default();
        let cf_packets = self.cf_handle(CF_PACKETS)?;
        batch.put_cf(cf_packets, packet.id.to_be_bytes(), bincode::serialize(packet)?);

        let cf_events = self.cf_handle(CF_EVENTS)?;
        let mut records = Vec::with_capacity(events.len());
        for event in events {
            let record = EventRecord::new(seq, now, event);
            batch.put_cf(cf_events, seq.to_be_bytes(), bincode::serialize(&record)?);
            records.push(record);
            seq += 1;
        }

        let cf_meta = self.cf_handle(CF_META)?;
        batch.put_cf(cf_meta, META_EVENT_SEQ, seq.to_be_bytes());

        if let Some(account) = claimer {
            let cf_indices = self.cf_handle(CF_INDICES)?;
            batch.put_cf(
                cf_indices,
                index_key(IDX_CLAIMED_PACKETS, account, first_seq),
                packet.id.to_be_bytes(),
            );
        }

        self.db.write(batch)?;

        tracing::debug!(
            packet_id = packet.id,
            events = records.len(),
            "red packet update committed"
        );
        Ok(records)
    }

    /// Persist a newly created collection, its creation event, and the
    /// creator's "created" index entry
    pub fn commit_collection_creation(
        &self,
        collection: &Collection,
        event: EngineEvent,
        now: DateTime<Utc>,
    ) -> Result<EventRecord> {
        let expected_id = self.collection_count()?;
        if collection.id != expected_id {
            return Err(Error::InvariantViolation(format!(
                "collection id {} does not match sequence {}",
                collection.id, expected_id
            )));
        }

        let seq = self.event_count()?;
        let record = EventRecord::new(seq, now, event);

        let mut batch = WriteBatch::default();
        let cf_collections = self.cf_handle(CF_COLLECTIONS)?;
        batch.put_cf(
            cf_collections,
            collection.id.to_be_bytes(),
            bincode::serialize(collection)?,
        );

        let cf_meta = self.cf_handle(CF_META)?;
        batch.put_cf(cf_meta, META_COLLECTION_COUNT, (expected_id + 1).to_be_bytes());
        batch.put_cf(cf_meta, META_EVENT_SEQ, (seq + 1).to_be_bytes());

        let cf_events = self.cf_handle(CF_EVENTS)?;
        batch.put_cf(cf_events, seq.to_be_bytes(), bincode::serialize(&record)?);

        let cf_indices = self.cf_handle(CF_INDICES)?;
        batch.put_cf(
            cf_indices,
            index_key(IDX_CREATED_COLLECTIONS, &collection.creator, seq),
            collection.id.to_be_bytes(),
        );

        self.db.write(batch)?;

        tracing::debug!(collection_id = collection.id, seq, "collection creation committed");
        Ok(record)
    }

    /// Persist an updated collection together with the events the update
    /// produced; `payer` adds a "paid" index entry
    pub fn commit_collection_update(
        &self,
        collection: &Collection,
        payer: Option<&AccountId>,
        events: Vec<EngineEvent>,
        now: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>> {
        let mut seq = self.event_count()?;
        let first_seq = seq;

        let mut batch = WriteBatch::default();
        let cf_collections = self.cf_handle(CF_COLLECTIONS)?;
        batch.put_cf(
            cf_collections,
            collection.id.to_be_bytes(),
            bincode::serialize(collection)?,
        );

        let cf_events = self.cf_handle(CF_EVENTS)?;
        let mut records = Vec::with_capacity(events.len());
        for event in events {
            let record = EventRecord::new(seq, now, event);
            batch.put_cf(cf_events, seq.to_be_bytes(), bincode::serialize(&record)?);
            records.push(record);
            seq += 1;
        }

        let cf_meta = self.cf_handle(CF_META)?;
        batch.put_cf(cf_meta, META_EVENT_SEQ, seq.to_be_bytes());

        if let Some(account) = payer {
            let cf_indices = self.cf_handle(CF_INDICES)?;
            batch.put_cf(
                cf_indices,
                index_key(IDX_PAID_COLLECTIONS, account, first_seq),
                collection.id.to_be_bytes(),
            );
        }

        self.db.write(batch)?;

        tracing::debug!(
            collection_id = collection.id,
            events = records.len(),
            "collection update committed"
        );
        Ok(records)
    }

    // Reverse indices

    /// Red packets funded by `account`, in creation order
    pub fn user_sent_red_packets(&self, account: &AccountId) -> Result<Vec<u64>> {
        self.scan_index(IDX_SENT_PACKETS, account)
    }

    /// Red packets claimed by `account`, in claim order
    pub fn user_claimed_red_packets(&self, account: &AccountId) -> Result<Vec<u64>> {
        self.scan_index(IDX_CLAIMED_PACKETS, account)
    }

    /// Collections opened by `account`, in creation order
    pub fn user_created_collections(&self, account: &AccountId) -> Result<Vec<u64>> {
        self.scan_index(IDX_CREATED_COLLECTIONS, account)
    }

    /// Collections paid into by `account`, in payment order
    pub fn user_paid_collections(&self, account: &AccountId) -> Result<Vec<u64>> {
        self.scan_index(IDX_PAID_COLLECTIONS, account)
    }

    fn scan_index(&self, tag: &[u8], account: &AccountId) -> Result<Vec<u64>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let prefix = index_prefix(tag, account);

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, rocksdb::Direction::Forward));

        let mut ids = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let id_bytes: [u8; 8] = value
                .as_ref()
                .try_into()
                .map_err(|_| Error::Storage("corrupt index entry".to_string()))?;
            ids.push(u64::from_be_bytes(id_bytes));
        }

        Ok(ids)
    }

    // Event log

    /// Events at or after `from_seq`, in log order, up to `limit`
    pub fn events_since(&self, from_seq: u64, limit: usize) -> Result<Vec<EventRecord>> {
        let cf = self.cf_handle(CF_EVENTS)?;
        let start = from_seq.to_be_bytes();

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, rocksdb::Direction::Forward));

        let mut records = Vec::new();
        for item in iter.take(limit) {
            let (_, value) = item?;
            records.push(bincode::deserialize(&value)?);
        }

        Ok(records)
    }
}

/// Index key: tag || account_len (u16 BE) || account || event_seq (u64 BE)
///
/// The length prefix keeps one account's entries from shadowing another's;
/// the event sequence suffix preserves per-identity insertion order.
fn index_key(tag: &[u8], account: &AccountId, seq: u64) -> Vec<u8> {
    let mut key = index_prefix(tag, account);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn index_prefix(tag: &[u8], account: &AccountId) -> Vec<u8> {
    let account_bytes = account.as_str().as_bytes();
    let mut key = Vec::with_capacity(tag.len() + 2 + account_bytes.len() + 8);
    key.extend_from_slice(tag);
    key.extend_from_slice(&(account_bytes.len() as u16).to_be_bytes());
    key.extend_from_slice(account_bytes);
    key
}
