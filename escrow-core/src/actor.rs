//! Actor-based concurrency for the engine
//!
//! Mutating operations execute on a single-writer Tokio actor: one logical
//! writer serializes every read-modify-write sequence, so no two mutations
//! interleave against the same entity. Reads bypass the actor and are served
//! directly from storage snapshots.
//!
//! Within one mutation the ordering is fixed: guard, compute, persist
//! (atomic batch), and only then execute outbound transfers and publish
//! events. A reentrant caller can never observe stale state.

use crate::clock::Clock;
use crate::events::EventRecord;
use crate::types::{
    AccountId, Amount, Claim, CollectionKind, PacketKind, PasswordCommitment, RedPacket,
};
use crate::{distribution, guard, lifecycle, Error, Metrics, Result, Storage, Treasury};
use rand::rngs::StdRng;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Message sent to the engine actor
pub enum EngineMessage {
    /// Create and fund a red packet
    CreateRedPacket {
        /// Funding party
        creator: AccountId,
        /// Split policy
        kind: PacketKind,
        /// Claim slots
        total_count: u32,
        /// Claim window in minutes
        duration_minutes: i64,
        /// Creator-chosen passphrase
        passphrase: String,
        /// Payable value escrowed into the pool
        funded_amount: Amount,
        /// Assigned packet id
        response: oneshot::Sender<Result<u64>>,
    },

    /// Claim from a red packet
    ClaimRedPacket {
        /// Packet id
        packet_id: u64,
        /// Claiming identity
        claimer: AccountId,
        /// Submitted passphrase
        passphrase: String,
        /// Completion signal
        response: oneshot::Sender<Result<()>>,
    },

    /// Refund an expired red packet to its creator
    RefundExpiredRedPacket {
        /// Packet id
        packet_id: u64,
        /// Calling identity (must be the creator)
        caller: AccountId,
        /// Completion signal
        response: oneshot::Sender<Result<()>>,
    },

    /// Open a collection
    CreateCollection {
        /// Collecting party
        creator: AccountId,
        /// Campaign policy
        kind: CollectionKind,
        /// Total sought
        target_amount: Amount,
        /// Required headcount (FixedSplit only)
        target_count: u32,
        /// Payment window in minutes
        duration_minutes: i64,
        /// Creator-chosen passphrase
        passphrase: String,
        /// Assigned collection id
        response: oneshot::Sender<Result<u64>>,
    },

    /// Pay into a collection
    PayCollection {
        /// Collection id
        collection_id: u64,
        /// Paying identity
        payer: AccountId,
        /// Submitted passphrase
        passphrase: String,
        /// Payable value
        amount: Amount,
        /// Completion signal
        response: oneshot::Sender<Result<()>>,
    },

    /// Resolve a collection whose deadline has passed (callable by anyone)
    HandleExpiredCollection {
        /// Collection id
        collection_id: u64,
        /// Completion signal
        response: oneshot::Sender<Result<()>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that serializes all mutating operations
pub struct EngineActor {
    /// Storage backend
    storage: Arc<Storage>,

    /// Escrow pool and credited balances
    treasury: Arc<Treasury>,

    /// Time source for deadline checks
    clock: Arc<dyn Clock>,

    /// Randomness for random-split payouts (seedable, fairness only)
    rng: StdRng,

    /// Fair-share multiplier for random splits
    share_multiplier: u32,

    /// Metrics collector
    metrics: Metrics,

    /// Live event channel (the persisted log is authoritative)
    events_tx: broadcast::Sender<EventRecord>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<EngineMessage>,
}

impl EngineActor {
    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            if !self.handle_message(msg) {
                break;
            }
        }
    }

    /// Dispatch one message; returns `false` once a shutdown is received
    fn handle_message(&mut self, msg: EngineMessage) -> bool {
        let start = std::time::Instant::now();

        match msg {
            EngineMessage::Shutdown => return false,

            EngineMessage::CreateRedPacket {
                creator,
                kind,
                total_count,
                duration_minutes,
                passphrase,
                funded_amount,
                response,
            } => {
                let result = self.create_red_packet(
                    creator,
                    kind,
                    total_count,
                    duration_minutes,
                    &passphrase,
                    funded_amount,
                );
                let _ = response.send(result);
            }

            EngineMessage::ClaimRedPacket {
                packet_id,
                claimer,
                passphrase,
                response,
            } => {
                let result = self.claim_red_packet(packet_id, claimer, &passphrase);
                let _ = response.send(result);
            }

            EngineMessage::RefundExpiredRedPacket {
                packet_id,
                caller,
                response,
            } => {
                let result = self.refund_expired_red_packet(packet_id, caller);
                let _ = response.send(result);
            }

            EngineMessage::CreateCollection {
                creator,
                kind,
                target_amount,
                target_count,
                duration_minutes,
                passphrase,
                response,
            } => {
                let result = self.create_collection(
                    creator,
                    kind,
                    target_amount,
                    target_count,
                    duration_minutes,
                    &passphrase,
                );
                let _ = response.send(result);
            }

            EngineMessage::PayCollection {
                collection_id,
                payer,
                passphrase,
                amount,
                response,
            } => {
                let result = self.pay_collection(collection_id, payer, &passphrase, amount);
                let _ = response.send(result);
            }

            EngineMessage::HandleExpiredCollection {
                collection_id,
                response,
            } => {
                let result = self.handle_expired_collection(collection_id);
                let _ = response.send(result);
            }
        }

        self.metrics
            .record_mutation_duration(start.elapsed().as_secs_f64());
        true
    }

    fn create_red_packet(
        &mut self,
        creator: AccountId,
        kind: PacketKind,
        total_count: u32,
        duration_minutes: i64,
        passphrase: &str,
        funded_amount: Amount,
    ) -> Result<u64> {
        let now = self.clock.now();
        let id = self.storage.red_packet_count()?;
        let deadline = deadline_after(now, duration_minutes)?;

        let packet = RedPacket::new(
            id,
            creator.clone(),
            kind,
            funded_amount,
            total_count,
            deadline,
            PasswordCommitment::derive(passphrase),
        );

        let event = crate::events::EngineEvent::RedPacketCreated {
            packet_id: id,
            creator,
            kind,
            total_amount: funded_amount,
            total_count,
            deadline,
        };

        let record = self.storage.commit_red_packet_creation(&packet, event, now)?;
        self.treasury.deposit(funded_amount);
        let _ = self.events_tx.send(record);

        self.metrics.packets_created.inc();
        tracing::info!(
            packet_id = id,
            ?kind,
            total_amount = funded_amount,
            total_count,
            "red packet created"
        );

        Ok(id)
    }

    fn claim_red_packet(
        &mut self,
        packet_id: u64,
        claimer: AccountId,
        passphrase: &str,
    ) -> Result<()> {
        let now = self.clock.now();
        let mut packet = self.storage.get_red_packet(packet_id)?;

        guard::check_claim(&packet, &claimer, passphrase, now)?;

        let payout = distribution::compute_payout(&packet, self.share_multiplier, &mut self.rng);
        let outcome = lifecycle::apply_claim(
            &mut packet,
            Claim {
                claimer: claimer.clone(),
                amount: payout,
                claimed_at: now,
            },
        )?;

        let records =
            self.storage
                .commit_red_packet_update(&packet, Some(&claimer), outcome.events, now)?;
        for transfer in &outcome.transfers {
            self.treasury.transfer(transfer)?;
        }
        for record in records {
            let _ = self.events_tx.send(record);
        }

        self.metrics.claims.inc();
        tracing::info!(packet_id, claimer = %claimer, payout, "red packet claimed");

        Ok(())
    }

    fn refund_expired_red_packet(&mut self, packet_id: u64, caller: AccountId) -> Result<()> {
        let now = self.clock.now();
        let mut packet = self.storage.get_red_packet(packet_id)?;

        guard::check_packet_refund(&packet, &caller, now)?;

        let outcome = lifecycle::refund_expired_packet(&mut packet);
        let records = self
            .storage
            .commit_red_packet_update(&packet, None, outcome.events, now)?;
        for transfer in &outcome.transfers {
            self.treasury.transfer(transfer)?;
        }
        for record in records {
            let _ = self.events_tx.send(record);
        }

        self.metrics.packet_refunds.inc();
        Ok(())
    }

    fn create_collection(
        &mut self,
        creator: AccountId,
        kind: CollectionKind,
        target_amount: Amount,
        target_count: u32,
        duration_minutes: i64,
        passphrase: &str,
    ) -> Result<u64> {
        let now = self.clock.now();
        let id = self.storage.collection_count()?;
        let deadline = deadline_after(now, duration_minutes)?;

        let collection = crate::types::Collection::new(
            id,
            creator.clone(),
            kind,
            target_amount,
            target_count,
            deadline,
            PasswordCommitment::derive(passphrase),
        );

        let event = crate::events::EngineEvent::CollectionCreated {
            collection_id: id,
            creator,
            kind,
            target_amount,
            target_count,
            deadline,
        };

        let record = self
            .storage
            .commit_collection_creation(&collection, event, now)?;
        let _ = self.events_tx.send(record);

        self.metrics.collections_created.inc();
        tracing::info!(
            collection_id = id,
            ?kind,
            target_amount,
            target_count,
            "collection created"
        );

        Ok(id)
    }

    fn pay_collection(
        &mut self,
        collection_id: u64,
        payer: AccountId,
        passphrase: &str,
        amount: Amount,
    ) -> Result<()> {
        let now = self.clock.now();
        let mut collection = self.storage.get_collection(collection_id)?;

        guard::check_payment(&collection, &payer, passphrase, amount, now)?;

        let outcome = lifecycle::apply_payment(&mut collection, payer.clone(), amount, now)?;
        let settled = !outcome.transfers.is_empty();

        let records =
            self.storage
                .commit_collection_update(&collection, Some(&payer), outcome.events, now)?;
        self.treasury.deposit(amount);
        for transfer in &outcome.transfers {
            self.treasury.transfer(transfer)?;
        }
        for record in records {
            let _ = self.events_tx.send(record);
        }

        self.metrics.payments.inc();
        if settled {
            self.metrics.settlements.inc();
        }
        tracing::info!(collection_id, payer = %payer, amount, settled, "collection payment");

        Ok(())
    }

    fn handle_expired_collection(&mut self, collection_id: u64) -> Result<()> {
        let now = self.clock.now();
        let mut collection = self.storage.get_collection(collection_id)?;

        guard::check_collection_expiry(&collection, now)?;

        let outcome = lifecycle::resolve_expired_collection(&mut collection);
        let records = self
            .storage
            .commit_collection_update(&collection, None, outcome.events, now)?;
        for transfer in &outcome.transfers {
            self.treasury.transfer(transfer)?;
        }

        match collection.kind {
            CollectionKind::FixedSplit => {
                if !outcome.transfers.is_empty() {
                    self.metrics.settlements.inc();
                }
            }
            CollectionKind::OpenCrowdfund => {
                for _ in &outcome.transfers {
                    self.metrics.contributor_refunds.inc();
                }
            }
        }

        for record in records {
            let _ = self.events_tx.send(record);
        }

        Ok(())
    }
}

/// Compute a deadline without panicking on pathological durations
///
/// `chrono::Duration::minutes` and timestamp addition both panic on
/// overflow; a panic here would kill the writer task and strand every
/// queued caller, so out-of-range input is reported as `InvalidInput`.
fn deadline_after(
    now: chrono::DateTime<chrono::Utc>,
    duration_minutes: i64,
) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::Duration::try_minutes(duration_minutes)
        .and_then(|duration| now.checked_add_signed(duration))
        .ok_or_else(|| Error::InvalidInput("Duration out of range".to_string()))
}

/// Handle for sending messages to the actor
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<EngineMessage>,
}

impl EngineHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<EngineMessage>) -> Self {
        Self { sender }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> EngineMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Create and fund a red packet
    pub async fn create_red_packet(
        &self,
        creator: AccountId,
        kind: PacketKind,
        total_count: u32,
        duration_minutes: i64,
        passphrase: String,
        funded_amount: Amount,
    ) -> Result<u64> {
        self.call(|response| EngineMessage::CreateRedPacket {
            creator,
            kind,
            total_count,
            duration_minutes,
            passphrase,
            funded_amount,
            response,
        })
        .await
    }

    /// Claim from a red packet
    pub async fn claim_red_packet(
        &self,
        packet_id: u64,
        claimer: AccountId,
        passphrase: String,
    ) -> Result<()> {
        self.call(|response| EngineMessage::ClaimRedPacket {
            packet_id,
            claimer,
            passphrase,
            response,
        })
        .await
    }

    /// Refund an expired red packet to its creator
    pub async fn refund_expired_red_packet(&self, packet_id: u64, caller: AccountId) -> Result<()> {
        self.call(|response| EngineMessage::RefundExpiredRedPacket {
            packet_id,
            caller,
            response,
        })
        .await
    }

    /// Open a collection
    pub async fn create_collection(
        &self,
        creator: AccountId,
        kind: CollectionKind,
        target_amount: Amount,
        target_count: u32,
        duration_minutes: i64,
        passphrase: String,
    ) -> Result<u64> {
        self.call(|response| EngineMessage::CreateCollection {
            creator,
            kind,
            target_amount,
            target_count,
            duration_minutes,
            passphrase,
            response,
        })
        .await
    }

    /// Pay into a collection
    pub async fn pay_collection(
        &self,
        collection_id: u64,
        payer: AccountId,
        passphrase: String,
        amount: Amount,
    ) -> Result<()> {
        self.call(|response| EngineMessage::PayCollection {
            collection_id,
            payer,
            passphrase,
            amount,
            response,
        })
        .await
    }

    /// Resolve an expired collection
    pub async fn handle_expired_collection(&self, collection_id: u64) -> Result<()> {
        self.call(|response| EngineMessage::HandleExpiredCollection {
            collection_id,
            response,
        })
        .await
    }

    /// Shutdown actor
    ///
    /// Resolves once the actor has drained the messages ahead of the
    /// shutdown and released its resources (storage handles included),
    /// so callers may reopen the data directory afterwards.
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(EngineMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        self.sender.closed().await;
        Ok(())
    }
}

/// Spawn the engine actor
#[allow(clippy::too_many_arguments)]
pub fn spawn_engine_actor(
    storage: Arc<Storage>,
    treasury: Arc<Treasury>,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    share_multiplier: u32,
    metrics: Metrics,
    events_tx: broadcast::Sender<EventRecord>,
    mailbox_capacity: usize,
) -> EngineHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity); // Bounded channel for backpressure
    let actor = EngineActor {
        storage,
        treasury,
        clock,
        rng,
        share_multiplier,
        metrics,
        events_tx,
        mailbox: rx,
    };

    tokio::spawn(async move {
        actor.run().await;
    });

    EngineHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::Config;
    use rand::SeedableRng;

    fn spawn_test_actor(temp_dir: &tempfile::TempDir) -> (EngineHandle, Arc<Storage>, Arc<Treasury>) {
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let storage = Arc::new(Storage::open(&config).unwrap());
        let treasury = Arc::new(Treasury::new());
        let (events_tx, _) = broadcast::channel(64);
        let handle = spawn_engine_actor(
            storage.clone(),
            treasury.clone(),
            Arc::new(SystemClock),
            StdRng::seed_from_u64(1),
            2,
            Metrics::new().unwrap(),
            events_tx,
            16,
        );
        (handle, storage, treasury)
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (handle, _, _) = spawn_test_actor(&temp_dir);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_create_and_claim() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (handle, storage, treasury) = spawn_test_actor(&temp_dir);

        let id = handle
            .create_red_packet(
                AccountId::new("alice"),
                PacketKind::Equal,
                5,
                60,
                "pw".to_string(),
                1_000,
            )
            .await
            .unwrap();
        assert_eq!(id, 0);
        assert_eq!(treasury.escrowed(), 1_000);

        handle
            .claim_red_packet(0, AccountId::new("bob"), "pw".to_string())
            .await
            .unwrap();

        let packet = storage.get_red_packet(0).unwrap();
        assert_eq!(packet.remaining_count, 4);
        assert_eq!(packet.remaining_amount, 800);
        assert_eq!(treasury.balance(&AccountId::new("bob")), 200);
        assert_eq!(treasury.escrowed(), 800);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_pathological_duration_does_not_kill_actor() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (handle, _, _) = spawn_test_actor(&temp_dir);

        // Durations past what chrono can represent must come back as an
        // error, not panic the writer task
        let err = handle
            .create_red_packet(
                AccountId::new("alice"),
                PacketKind::Equal,
                5,
                i64::MAX,
                "pw".to_string(),
                1_000,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::InvalidInput(_)));

        let id = handle
            .create_red_packet(
                AccountId::new("alice"),
                PacketKind::Equal,
                5,
                60,
                "pw".to_string(),
                1_000,
            )
            .await
            .unwrap();
        assert_eq!(id, 0);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_serializes_concurrent_claims() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (handle, storage, _) = spawn_test_actor(&temp_dir);

        handle
            .create_red_packet(
                AccountId::new("alice"),
                PacketKind::Random,
                8,
                60,
                "pw".to_string(),
                100_000,
            )
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle
                    .claim_red_packet(0, AccountId::new(format!("claimer-{i}")), "pw".to_string())
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let packet = storage.get_red_packet(0).unwrap();
        assert_eq!(packet.remaining_count, 0);
        assert_eq!(packet.remaining_amount, 0);
        assert_eq!(packet.claimed_amount(), 100_000);

        handle.shutdown().await.unwrap();
    }
}
