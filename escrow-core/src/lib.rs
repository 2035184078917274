//! # Escrow Core
//!
//! Deterministic escrow and distribution engine for passphrase-gated
//! red packets and group collections.
//!
//! ## Features
//!
//! - **Red packets**: a funded pool split across N claims, equally or
//!   randomly, with the undisbursed remainder refundable to the creator
//!   after expiry
//! - **Collections**: fixed-split cost sharing and open crowdfunding
//!   campaigns, settled to the creator on target or resolved at expiry
//! - **Strictly serialized mutations**: a single-writer actor orders every
//!   read-modify-write; reads are served lock-free from storage
//! - **Durability**: RocksDB column families with atomic multi-write
//!   batches and an append-only event log
//! - **Passphrase gating**: SHA-256 commitments, never plaintext at rest
//!
//! ## Architecture
//!
//! ```text
//! Engine (validation, reads)
//!    |
//!    v
//! EngineActor (single writer: guard -> compute -> persist -> transfer)
//!    |
//!    +--> Storage (RocksDB: packets, collections, events, indices, meta)
//!    +--> Treasury (escrow pool, credited balances)
//!    +--> broadcast (live event feed)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use escrow_core::{AccountId, Config, Engine, PacketKind};
//!
//! #[tokio::main]
//! async fn main() -> escrow_core::Result<()> {
//!     let engine = Engine::open(Config::default()).await?;
//!
//!     let alice = AccountId::new("alice");
//!     let id = engine
//!         .create_red_packet(alice, PacketKind::Random, 8, 60, "gong xi", 88_000)
//!         .await?;
//!
//!     engine
//!         .claim_red_packet(id, AccountId::new("bob"), "gong xi")
//!         .await?;
//!
//!     engine.shutdown().await
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod actor;
pub mod clock;
pub mod config;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod events;
pub mod guard;
pub mod lifecycle;
pub mod metrics;
pub mod storage;
pub mod treasury;
pub mod types;

pub use actor::{EngineHandle, EngineMessage};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, EngineConfig, RocksDbConfig};
pub use engine::Engine;
pub use error::{Error, Result};
pub use events::{EngineEvent, EventRecord};
pub use metrics::Metrics;
pub use storage::Storage;
pub use treasury::Treasury;
pub use types::{
    AccountId, Amount, Claim, Collection, CollectionKind, Contribution, EntityStatus, PacketKind,
    PasswordCommitment, RedPacket, Transfer,
};
