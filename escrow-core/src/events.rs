//! Lifecycle events emitted on state change
//!
//! The append-only event log is the sole channel through which external
//! read-side projections learn of changes. Each record carries the entity
//! id, the relevant counterparty identity, and the amount involved.

use crate::types::{AccountId, Amount, CollectionKind, PacketKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// State-change event payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineEvent {
    /// A red packet was created and funded
    RedPacketCreated {
        /// Packet id
        packet_id: u64,
        /// Funding party
        creator: AccountId,
        /// Split policy
        kind: PacketKind,
        /// Funded pool size
        total_amount: Amount,
        /// Claim slots
        total_count: u32,
        /// Claim deadline
        deadline: DateTime<Utc>,
    },

    /// A claim was paid out
    RedPacketClaimed {
        /// Packet id
        packet_id: u64,
        /// Claiming identity
        claimer: AccountId,
        /// Payout received
        amount: Amount,
    },

    /// An expired packet's remainder was returned to its creator
    RedPacketRefunded {
        /// Packet id
        packet_id: u64,
        /// Refund recipient
        creator: AccountId,
        /// Remainder returned
        refund_amount: Amount,
    },

    /// A collection was opened
    CollectionCreated {
        /// Collection id
        collection_id: u64,
        /// Collecting party
        creator: AccountId,
        /// Campaign policy
        kind: CollectionKind,
        /// Total sought
        target_amount: Amount,
        /// Required headcount (FixedSplit only)
        target_count: u32,
        /// Payment deadline
        deadline: DateTime<Utc>,
    },

    /// A payment was accepted into a collection
    CollectionPaid {
        /// Collection id
        collection_id: u64,
        /// Paying identity
        contributor: AccountId,
        /// Amount paid
        amount: Amount,
    },

    /// Accumulated funds were settled to the collection's creator
    CollectionCompleted {
        /// Collection id
        collection_id: u64,
        /// Settlement recipient
        creator: AccountId,
        /// Amount settled
        total_amount: Amount,
    },

    /// A contributor was refunded their individual payment
    ///
    /// Emitted once per contributor when an OpenCrowdfund collection
    /// expires short of its target.
    CollectionRefunded {
        /// Collection id
        collection_id: u64,
        /// Refund recipient
        contributor: AccountId,
        /// Amount returned
        refund_amount: Amount,
    },
}

impl EngineEvent {
    /// Event name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::RedPacketCreated { .. } => "RedPacketCreated",
            EngineEvent::RedPacketClaimed { .. } => "RedPacketClaimed",
            EngineEvent::RedPacketRefunded { .. } => "RedPacketRefunded",
            EngineEvent::CollectionCreated { .. } => "CollectionCreated",
            EngineEvent::CollectionPaid { .. } => "CollectionPaid",
            EngineEvent::CollectionCompleted { .. } => "CollectionCompleted",
            EngineEvent::CollectionRefunded { .. } => "CollectionRefunded",
        }
    }

    /// Amount involved in the state change
    pub fn amount(&self) -> Amount {
        match self {
            EngineEvent::RedPacketCreated { total_amount, .. } => *total_amount,
            EngineEvent::RedPacketClaimed { amount, .. } => *amount,
            EngineEvent::RedPacketRefunded { refund_amount, .. } => *refund_amount,
            EngineEvent::CollectionCreated { target_amount, .. } => *target_amount,
            EngineEvent::CollectionPaid { amount, .. } => *amount,
            EngineEvent::CollectionCompleted { total_amount, .. } => *total_amount,
            EngineEvent::CollectionRefunded { refund_amount, .. } => *refund_amount,
        }
    }
}

/// A committed event, as stored in the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique event ID (UUIDv7 for time-ordering)
    pub event_id: Uuid,

    /// Position in the global append-only log
    pub seq: u64,

    /// Commit timestamp
    pub recorded_at: DateTime<Utc>,

    /// The state change
    pub event: EngineEvent,
}

impl EventRecord {
    /// Stamp an event payload with its log position
    pub fn new(seq: u64, recorded_at: DateTime<Utc>, event: EngineEvent) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            seq,
            recorded_at,
            event,
        }
    }
}
