//! Engine facade
//!
//! [`Engine`] is the public entry point: it validates inputs at the edge,
//! forwards mutations to the single-writer actor, and serves reads directly
//! from storage without crossing the actor mailbox.

use crate::actor::{spawn_engine_actor, EngineHandle};
use crate::clock::{Clock, SystemClock};
use crate::events::EventRecord;
use crate::types::{
    AccountId, Amount, Collection, CollectionKind, PacketKind, RedPacket,
};
use crate::{Config, Error, Metrics, Result, Storage, Treasury};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Escrow and distribution engine
///
/// Cheap to clone; all clones share the same actor, storage, and treasury.
#[derive(Clone)]
pub struct Engine {
    handle: EngineHandle,
    storage: Arc<Storage>,
    treasury: Arc<Treasury>,
    metrics: Metrics,
    events_tx: broadcast::Sender<EventRecord>,
}

impl Engine {
    /// Open the engine with the system clock and an entropy-seeded RNG
    pub async fn open(config: Config) -> Result<Self> {
        Self::open_with(config, Arc::new(SystemClock), None).await
    }

    /// Open the engine with an explicit clock and optional RNG seed
    ///
    /// Tests inject a [`ManualClock`](crate::clock::ManualClock) to step
    /// through deadlines and a fixed seed for reproducible random splits.
    pub async fn open_with(
        config: Config,
        clock: Arc<dyn Clock>,
        rng_seed: Option<u64>,
    ) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let treasury = Arc::new(Treasury::new());
        rehydrate_treasury(&storage, &treasury)?;
        let metrics = Metrics::new().map_err(|e| Error::Config(e.to_string()))?;
        let (events_tx, _) = broadcast::channel(config.engine.event_channel_capacity);

        let rng = match rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let handle = spawn_engine_actor(
            storage.clone(),
            treasury.clone(),
            clock,
            rng,
            config.engine.random_share_multiplier,
            metrics.clone(),
            events_tx.clone(),
            config.engine.mailbox_capacity,
        );

        tracing::info!(
            data_dir = %config.data_dir.display(),
            service = %config.service_name,
            "engine opened"
        );

        Ok(Self {
            handle,
            storage,
            treasury,
            metrics,
            events_tx,
        })
    }

    /// Create and fund a red packet, returning its id
    pub async fn create_red_packet(
        &self,
        creator: AccountId,
        kind: PacketKind,
        total_count: u32,
        duration_minutes: i64,
        passphrase: impl Into<String>,
        funded_amount: Amount,
    ) -> Result<u64> {
        if funded_amount == 0 {
            return Err(Error::InvalidInput("Funded amount must be positive".to_string()));
        }
        if total_count == 0 {
            return Err(Error::InvalidInput("Count must be at least 1".to_string()));
        }
        let passphrase = passphrase.into();
        validate_passphrase(&passphrase)?;
        validate_duration(duration_minutes)?;

        self.handle
            .create_red_packet(creator, kind, total_count, duration_minutes, passphrase, funded_amount)
            .await
    }

    /// Claim one share from a red packet
    pub async fn claim_red_packet(
        &self,
        packet_id: u64,
        claimer: AccountId,
        passphrase: impl Into<String>,
    ) -> Result<()> {
        self.handle
            .claim_red_packet(packet_id, claimer, passphrase.into())
            .await
    }

    /// Return the undisbursed remainder of an expired packet to its creator
    pub async fn refund_expired_red_packet(&self, packet_id: u64, caller: AccountId) -> Result<()> {
        self.handle.refund_expired_red_packet(packet_id, caller).await
    }

    /// Open a collection, returning its id
    pub async fn create_collection(
        &self,
        creator: AccountId,
        kind: CollectionKind,
        target_amount: Amount,
        target_count: u32,
        duration_minutes: i64,
        passphrase: impl Into<String>,
    ) -> Result<u64> {
        if target_amount == 0 {
            return Err(Error::InvalidInput("Target amount must be positive".to_string()));
        }
        if kind == CollectionKind::FixedSplit {
            if target_count == 0 {
                return Err(Error::InvalidInput("Count must be at least 1".to_string()));
            }
            if target_amount < target_count as Amount {
                return Err(Error::InvalidInput(
                    "Target amount too small to split".to_string(),
                ));
            }
        }
        let passphrase = passphrase.into();
        validate_passphrase(&passphrase)?;
        validate_duration(duration_minutes)?;

        self.handle
            .create_collection(creator, kind, target_amount, target_count, duration_minutes, passphrase)
            .await
    }

    /// Pay into a collection
    pub async fn pay_collection(
        &self,
        collection_id: u64,
        payer: AccountId,
        passphrase: impl Into<String>,
        amount: Amount,
    ) -> Result<()> {
        self.handle
            .pay_collection(collection_id, payer, passphrase.into(), amount)
            .await
    }

    /// Resolve a collection whose deadline has passed; callable by anyone
    pub async fn handle_expired_collection(&self, collection_id: u64) -> Result<()> {
        self.handle.handle_expired_collection(collection_id).await
    }

    /// Fetch a red packet by id
    pub fn red_packet(&self, packet_id: u64) -> Result<RedPacket> {
        self.storage.get_red_packet(packet_id)
    }

    /// Fetch a collection by id
    pub fn collection(&self, collection_id: u64) -> Result<Collection> {
        self.storage.get_collection(collection_id)
    }

    /// Total number of red packets ever created
    pub fn red_packet_count(&self) -> Result<u64> {
        self.storage.red_packet_count()
    }

    /// Total number of collections ever created
    pub fn collection_count(&self) -> Result<u64> {
        self.storage.collection_count()
    }

    /// Ids of packets funded by an account, in creation order
    pub fn user_sent_red_packets(&self, account: &AccountId) -> Result<Vec<u64>> {
        self.storage.user_sent_red_packets(account)
    }

    /// Ids of packets an account claimed from, in claim order
    pub fn user_claimed_red_packets(&self, account: &AccountId) -> Result<Vec<u64>> {
        self.storage.user_claimed_red_packets(account)
    }

    /// Ids of collections opened by an account, in creation order
    pub fn user_created_collections(&self, account: &AccountId) -> Result<Vec<u64>> {
        self.storage.user_created_collections(account)
    }

    /// Ids of collections an account paid into, in payment order
    pub fn user_paid_collections(&self, account: &AccountId) -> Result<Vec<u64>> {
        self.storage.user_paid_collections(account)
    }

    /// Read persisted event records starting at a sequence number
    pub fn events_since(&self, from_seq: u64, limit: usize) -> Result<Vec<EventRecord>> {
        self.storage.events_since(from_seq, limit)
    }

    /// Value credited to an account by payouts and refunds
    pub fn balance(&self, account: &AccountId) -> Amount {
        self.treasury.balance(account)
    }

    /// Value currently held in escrow
    pub fn escrowed(&self) -> Amount {
        self.treasury.escrowed()
    }

    /// Subscribe to the live event feed
    ///
    /// The feed is lossy under lag; the persisted log read through
    /// [`events_since`](Self::events_since) is authoritative.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.events_tx.subscribe()
    }

    /// Metrics collector for scrape endpoints
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Stop the actor; queued mutations ahead of the shutdown still run
    pub async fn shutdown(&self) -> Result<()> {
        self.handle.shutdown().await
    }
}

const REPLAY_BATCH: usize = 1_024;

/// Rebuild escrow and credited balances by replaying the persisted log
///
/// The treasury is volatile; the event log is the durable record of every
/// value movement, so replaying it in order restores the exact state held
/// when the directory was last written.
fn rehydrate_treasury(storage: &Storage, treasury: &Treasury) -> Result<()> {
    let mut from_seq = 0;
    loop {
        let records = storage.events_since(from_seq, REPLAY_BATCH)?;
        let Some(last) = records.last() else {
            break;
        };
        from_seq = last.seq + 1;

        for record in &records {
            treasury.apply_event(&record.event)?;
        }
    }
    Ok(())
}

fn validate_passphrase(passphrase: &str) -> Result<()> {
    if passphrase.is_empty() {
        return Err(Error::InvalidInput("Passphrase must not be empty".to_string()));
    }
    Ok(())
}

/// Ten years in minutes; deadlines beyond this are rejected as malformed
const MAX_DURATION_MINUTES: i64 = 10 * 365 * 24 * 60;

fn validate_duration(duration_minutes: i64) -> Result<()> {
    if duration_minutes < 1 {
        return Err(Error::InvalidInput("Duration must be at least 1 minute".to_string()));
    }
    if duration_minutes > MAX_DURATION_MINUTES {
        return Err(Error::InvalidInput("Duration exceeds the supported maximum".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_test_engine(temp_dir: &tempfile::TempDir) -> Engine {
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        Engine::open_with(config, Arc::new(SystemClock), Some(7))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine = open_test_engine(&temp_dir).await;
        let alice = AccountId::new("alice");

        let err = engine
            .create_red_packet(alice.clone(), PacketKind::Equal, 5, 60, "pw", 0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let err = engine
            .create_red_packet(alice.clone(), PacketKind::Equal, 0, 60, "pw", 100)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let err = engine
            .create_red_packet(alice.clone(), PacketKind::Equal, 5, 60, "", 100)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let err = engine
            .create_collection(alice, CollectionKind::FixedSplit, 10, 20, 60, "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_rejects_out_of_range_duration() {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine = open_test_engine(&temp_dir).await;
        let alice = AccountId::new("alice");

        for bad in [0, -1, i64::MAX, MAX_DURATION_MINUTES + 1] {
            let err = engine
                .create_red_packet(alice.clone(), PacketKind::Equal, 5, bad, "pw", 100)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)));

            let err = engine
                .create_collection(alice.clone(), CollectionKind::OpenCrowdfund, 100, 0, bad, "pw")
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)));
        }

        // The writer is still alive after the rejected inputs
        engine
            .create_red_packet(alice, PacketKind::Equal, 5, MAX_DURATION_MINUTES, "pw", 100)
            .await
            .unwrap();

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reads_bypass_actor() {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine = open_test_engine(&temp_dir).await;
        let alice = AccountId::new("alice");

        let id = engine
            .create_red_packet(alice.clone(), PacketKind::Equal, 2, 60, "pw", 500)
            .await
            .unwrap();

        let packet = engine.red_packet(id).unwrap();
        assert_eq!(packet.total_amount, 500);
        assert_eq!(engine.red_packet_count().unwrap(), 1);
        assert_eq!(engine.user_sent_red_packets(&alice).unwrap(), vec![id]);
        assert_eq!(engine.escrowed(), 500);

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_event_subscription() {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine = open_test_engine(&temp_dir).await;
        let mut events = engine.subscribe();

        engine
            .create_red_packet(AccountId::new("alice"), PacketKind::Equal, 2, 60, "pw", 500)
            .await
            .unwrap();

        let record = events.recv().await.unwrap();
        assert_eq!(record.seq, 0);
        assert_eq!(record.event.name(), "RedPacketCreated");

        engine.shutdown().await.unwrap();
    }
}
