//! Access guard: precondition checks for every mutating call
//!
//! Checks run in a fixed order so callers observe deterministic failures
//! (a fully-drained packet reports `Exhausted` even after its deadline).
//! A guard failure leaves entity state untouched; nothing has been written
//! when one of these returns an error.

use crate::types::{AccountId, Amount, Collection, CollectionKind, EntityStatus, RedPacket};
use crate::{Error, Result};
use chrono::{DateTime, Utc};

/// Validate a claim against a red packet
pub fn check_claim(
    packet: &RedPacket,
    claimer: &AccountId,
    passphrase: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    if packet.remaining_count == 0 {
        return Err(Error::Exhausted);
    }
    if packet.status != EntityStatus::Active {
        return Err(Error::NotActive);
    }
    if packet.is_expired(now) {
        return Err(Error::Expired);
    }
    if !packet.commitment.matches(passphrase) {
        return Err(Error::InvalidPassword);
    }
    if packet.has_claimed(claimer) {
        return Err(Error::AlreadyClaimed);
    }
    Ok(())
}

/// Validate a payment into a collection
pub fn check_payment(
    collection: &Collection,
    payer: &AccountId,
    passphrase: &str,
    amount: Amount,
    now: DateTime<Utc>,
) -> Result<()> {
    if collection.status != EntityStatus::Active {
        return Err(Error::NotActive);
    }
    if collection.is_expired(now) {
        return Err(Error::Expired);
    }
    if !collection.commitment.matches(passphrase) {
        return Err(Error::InvalidPassword);
    }
    if collection.has_paid(payer) {
        return Err(Error::AlreadyPaid);
    }
    match collection.kind {
        CollectionKind::FixedSplit => {
            let share = collection.share_amount();
            if amount != share {
                return Err(Error::WrongAmount {
                    expected: share,
                    got: amount,
                });
            }
        }
        CollectionKind::OpenCrowdfund => {
            if amount == 0 {
                return Err(Error::InvalidInput(
                    "payment amount must be greater than zero".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Validate a creator refund of an expired red packet
pub fn check_packet_refund(
    packet: &RedPacket,
    caller: &AccountId,
    now: DateTime<Utc>,
) -> Result<()> {
    if caller != &packet.creator {
        return Err(Error::Unauthorized);
    }
    if packet.status != EntityStatus::Active {
        return Err(Error::NotActive);
    }
    if !packet.is_expired(now) {
        return Err(Error::NotExpired);
    }
    Ok(())
}

/// Validate expiry handling of a collection (callable by anyone)
pub fn check_collection_expiry(collection: &Collection, now: DateTime<Utc>) -> Result<()> {
    if collection.status != EntityStatus::Active {
        return Err(Error::NotActive);
    }
    if !collection.is_expired(now) {
        return Err(Error::NotExpired);
    }
    Ok(())
}
