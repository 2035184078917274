//! Escrow pool and per-account credited balances
//!
//! The treasury models the value boundary of the engine: deposits arriving
//! with payable calls enter escrow, settlements and refunds leave escrow and
//! credit the recipient. It is intentionally not persisted; the event log is
//! the durable record of every value movement, and the engine rebuilds the
//! treasury by replaying that log when it opens a data directory.

use crate::events::EngineEvent;
use crate::types::{AccountId, Amount, Transfer};
use crate::{Error, Result};
use dashmap::DashMap;
use parking_lot::RwLock;

/// Escrowed value plus credited outbound balances
#[derive(Debug, Default)]
pub struct Treasury {
    /// Value currently held in escrow
    escrow: RwLock<Amount>,

    /// Value credited out to each account
    balances: DashMap<AccountId, Amount>,
}

impl Treasury {
    /// Create an empty treasury
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept an inbound deposit into escrow
    pub fn deposit(&self, amount: Amount) {
        let mut escrow = self.escrow.write();
        *escrow += amount;
    }

    /// Execute an outbound transfer: escrow decreases, recipient is credited
    ///
    /// Fails if the transfer would overdraw escrow; that can only happen if a
    /// conservation invariant has already been violated upstream.
    pub fn transfer(&self, transfer: &Transfer) -> Result<()> {
        let mut escrow = self.escrow.write();
        if transfer.amount > *escrow {
            return Err(Error::InvariantViolation(format!(
                "transfer of {} exceeds escrowed {}",
                transfer.amount, *escrow
            )));
        }
        *escrow -= transfer.amount;
        drop(escrow);

        *self.balances.entry(transfer.to.clone()).or_insert(0) += transfer.amount;

        tracing::debug!(
            to = %transfer.to,
            amount = transfer.amount,
            "escrow transfer executed"
        );

        Ok(())
    }

    /// Re-apply the value movement of a persisted event
    ///
    /// Replayed in log order at open this reconstructs the exact escrow and
    /// balance state the engine held when the event was committed.
    pub fn apply_event(&self, event: &EngineEvent) -> Result<()> {
        match event {
            EngineEvent::RedPacketCreated { total_amount, .. } => {
                self.deposit(*total_amount);
                Ok(())
            }
            EngineEvent::CollectionPaid { amount, .. } => {
                self.deposit(*amount);
                Ok(())
            }
            EngineEvent::RedPacketClaimed { claimer, amount, .. } => self.transfer(&Transfer {
                to: claimer.clone(),
                amount: *amount,
            }),
            EngineEvent::RedPacketRefunded {
                creator,
                refund_amount,
                ..
            } => self.transfer(&Transfer {
                to: creator.clone(),
                amount: *refund_amount,
            }),
            EngineEvent::CollectionCompleted {
                creator,
                total_amount,
                ..
            } => self.transfer(&Transfer {
                to: creator.clone(),
                amount: *total_amount,
            }),
            EngineEvent::CollectionRefunded {
                contributor,
                refund_amount,
                ..
            } => self.transfer(&Transfer {
                to: contributor.clone(),
                amount: *refund_amount,
            }),
            EngineEvent::CollectionCreated { .. } => Ok(()),
        }
    }

    /// Total credited to an account so far
    pub fn balance(&self, account: &AccountId) -> Amount {
        self.balances.get(account).map(|b| *b).unwrap_or(0)
    }

    /// Value still held in escrow
    pub fn escrowed(&self) -> Amount {
        *self.escrow.read()
    }
}
