//! Lifecycle manager: state transitions, settlement, and refunds
//!
//! Every function here mutates the entity to its post-transition state and
//! returns the outbound transfers plus the events describing the change.
//! Callers persist the entity first and execute transfers strictly after
//! (effects-before-external-call ordering).

use crate::events::EngineEvent;
use crate::types::{
    Claim, Collection, CollectionKind, EntityStatus, RedPacket, Transfer,
};
use chrono::{DateTime, Utc};

/// Outcome of a lifecycle transition
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    /// Value leaving escrow, in execution order
    pub transfers: Vec<Transfer>,
    /// Events describing the change, in emission order
    pub events: Vec<EngineEvent>,
}

/// Apply a successful claim and the completion transition it may trigger
///
/// The payout itself is the claim's outbound transfer; completion (last slot
/// claimed) moves no further funds, value was already disbursed
/// claim-by-claim.
pub fn apply_claim(
    packet: &mut RedPacket,
    claim: Claim,
) -> crate::Result<Outcome> {
    let event = EngineEvent::RedPacketClaimed {
        packet_id: packet.id,
        claimer: claim.claimer.clone(),
        amount: claim.amount,
    };
    let transfer = Transfer {
        to: claim.claimer.clone(),
        amount: claim.amount,
    };
    packet.record_claim(claim)?;

    if packet.status == EntityStatus::Completed {
        tracing::debug!(packet_id = packet.id, "red packet fully claimed");
    }

    Ok(Outcome {
        transfers: vec![transfer],
        events: vec![event],
    })
}

/// Return an expired packet's remainder to its creator
///
/// Zeroes `remaining_amount` and flips the packet to `Expired`.
pub fn refund_expired_packet(packet: &mut RedPacket) -> Outcome {
    let refund_amount = packet.remaining_amount;
    packet.remaining_amount = 0;
    packet.status = EntityStatus::Expired;

    tracing::info!(
        packet_id = packet.id,
        creator = %packet.creator,
        refund_amount,
        "expired red packet refunded"
    );

    Outcome {
        transfers: vec![Transfer {
            to: packet.creator.clone(),
            amount: refund_amount,
        }],
        events: vec![EngineEvent::RedPacketRefunded {
            packet_id: packet.id,
            creator: packet.creator.clone(),
            refund_amount,
        }],
    }
}

/// Record a payment and settle to the creator if it completes the target
///
/// Triggered by the payment that reaches the target headcount (FixedSplit)
/// or the target amount (OpenCrowdfund): the full accumulated amount is
/// transferred to the creator and the collection flips to `Completed`.
pub fn apply_payment(
    collection: &mut Collection,
    payer: crate::types::AccountId,
    amount: crate::types::Amount,
    now: DateTime<Utc>,
) -> crate::Result<Outcome> {
    collection.record_payment(crate::types::Contribution {
        payer: payer.clone(),
        amount,
        paid_at: now,
    })?;

    let mut outcome = Outcome {
        transfers: Vec::new(),
        events: vec![EngineEvent::CollectionPaid {
            collection_id: collection.id,
            contributor: payer,
            amount,
        }],
    };

    if collection.target_reached() {
        collection.status = EntityStatus::Completed;
        outcome.transfers.push(Transfer {
            to: collection.creator.clone(),
            amount: collection.current_amount,
        });
        outcome.events.push(EngineEvent::CollectionCompleted {
            collection_id: collection.id,
            creator: collection.creator.clone(),
            total_amount: collection.current_amount,
        });

        tracing::info!(
            collection_id = collection.id,
            creator = %collection.creator,
            total_amount = collection.current_amount,
            "collection target reached, settled to creator"
        );
    }

    Ok(outcome)
}

/// Resolve a collection whose deadline passed with the target unmet
///
/// FixedSplit forwards the accumulated partial amount to the creator (a
/// commitment device: participants who already paid get no refund merely
/// because others didn't join). OpenCrowdfund refunds every contributor
/// their individual payment. Both flip the collection to `Expired`.
pub fn resolve_expired_collection(collection: &mut Collection) -> Outcome {
    collection.status = EntityStatus::Expired;

    match collection.kind {
        CollectionKind::FixedSplit => {
            let amount = collection.current_amount;
            let mut outcome = Outcome {
                transfers: Vec::new(),
                events: vec![EngineEvent::CollectionCompleted {
                    collection_id: collection.id,
                    creator: collection.creator.clone(),
                    total_amount: amount,
                }],
            };
            if amount > 0 {
                outcome.transfers.push(Transfer {
                    to: collection.creator.clone(),
                    amount,
                });
            }

            tracing::info!(
                collection_id = collection.id,
                creator = %collection.creator,
                amount,
                "expired fixed-split collection forwarded to creator"
            );
            outcome
        }
        CollectionKind::OpenCrowdfund => {
            let mut outcome = Outcome::default();
            for contribution in &collection.contributions {
                outcome.transfers.push(Transfer {
                    to: contribution.payer.clone(),
                    amount: contribution.amount,
                });
                outcome.events.push(EngineEvent::CollectionRefunded {
                    collection_id: collection.id,
                    contributor: contribution.payer.clone(),
                    refund_amount: contribution.amount,
                });
            }

            tracing::info!(
                collection_id = collection.id,
                contributors = collection.contributions.len(),
                refunded = collection.current_amount,
                "expired crowdfund collection refunded to contributors"
            );
            outcome
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountId, Amount, PacketKind, PasswordCommitment};
    use chrono::Duration;

    fn packet() -> RedPacket {
        RedPacket::new(
            0,
            AccountId::new("creator"),
            PacketKind::Equal,
            1_000,
            2,
            Utc::now() + Duration::minutes(60),
            PasswordCommitment::derive("pw"),
        )
    }

    fn collection(kind: CollectionKind, target_amount: Amount, target_count: u32) -> Collection {
        Collection::new(
            0,
            AccountId::new("creator"),
            kind,
            target_amount,
            target_count,
            Utc::now() + Duration::minutes(60),
            PasswordCommitment::derive("pw"),
        )
    }

    #[test]
    fn test_claim_outcome_pays_claimer() {
        let mut p = packet();
        let outcome = apply_claim(
            &mut p,
            Claim {
                claimer: AccountId::new("bob"),
                amount: 500,
                claimed_at: Utc::now(),
            },
        )
        .unwrap();

        assert_eq!(outcome.transfers.len(), 1);
        assert_eq!(outcome.transfers[0].to, AccountId::new("bob"));
        assert_eq!(outcome.transfers[0].amount, 500);
        assert_eq!(p.remaining_amount, 500);
        assert_eq!(p.status, EntityStatus::Active);
    }

    #[test]
    fn test_last_claim_flips_to_completed() {
        let mut p = packet();
        apply_claim(
            &mut p,
            Claim {
                claimer: AccountId::new("a"),
                amount: 500,
                claimed_at: Utc::now(),
            },
        )
        .unwrap();
        apply_claim(
            &mut p,
            Claim {
                claimer: AccountId::new("b"),
                amount: 500,
                claimed_at: Utc::now(),
            },
        )
        .unwrap();
        assert_eq!(p.status, EntityStatus::Completed);
        assert_eq!(p.remaining_count, 0);
    }

    #[test]
    fn test_packet_refund_returns_remainder() {
        let mut p = packet();
        apply_claim(
            &mut p,
            Claim {
                claimer: AccountId::new("a"),
                amount: 500,
                claimed_at: Utc::now(),
            },
        )
        .unwrap();

        let outcome = refund_expired_packet(&mut p);
        assert_eq!(outcome.transfers[0].to, AccountId::new("creator"));
        assert_eq!(outcome.transfers[0].amount, 500);
        assert_eq!(p.remaining_amount, 0);
        assert_eq!(p.status, EntityStatus::Expired);
        assert!(matches!(
            outcome.events[0],
            EngineEvent::RedPacketRefunded {
                refund_amount: 500,
                ..
            }
        ));
    }

    #[test]
    fn test_final_payment_settles_to_creator() {
        let mut c = collection(CollectionKind::FixedSplit, 900, 3);
        let now = Utc::now();

        for name in ["a", "b"] {
            let outcome = apply_payment(&mut c, AccountId::new(name), 300, now).unwrap();
            assert!(outcome.transfers.is_empty());
            assert_eq!(outcome.events.len(), 1);
        }

        let outcome = apply_payment(&mut c, AccountId::new("c"), 300, now).unwrap();
        assert_eq!(c.status, EntityStatus::Completed);
        assert_eq!(outcome.transfers.len(), 1);
        assert_eq!(outcome.transfers[0].to, AccountId::new("creator"));
        assert_eq!(outcome.transfers[0].amount, 900);
        assert_eq!(outcome.events.len(), 2);
        assert!(matches!(
            outcome.events[1],
            EngineEvent::CollectionCompleted {
                total_amount: 900,
                ..
            }
        ));
    }

    #[test]
    fn test_crowdfund_settles_on_amount() {
        let mut c = collection(CollectionKind::OpenCrowdfund, 1_000, 0);
        let now = Utc::now();
        apply_payment(&mut c, AccountId::new("a"), 600, now).unwrap();
        let outcome = apply_payment(&mut c, AccountId::new("b"), 400, now).unwrap();

        assert_eq!(c.status, EntityStatus::Completed);
        assert_eq!(outcome.transfers[0].amount, 1_000);
    }

    #[test]
    fn test_fixed_split_expiry_pays_creator() {
        let mut c = collection(CollectionKind::FixedSplit, 900, 3);
        apply_payment(&mut c, AccountId::new("a"), 300, Utc::now()).unwrap();

        let outcome = resolve_expired_collection(&mut c);
        assert_eq!(c.status, EntityStatus::Expired);
        assert_eq!(outcome.transfers.len(), 1);
        assert_eq!(outcome.transfers[0].to, AccountId::new("creator"));
        assert_eq!(outcome.transfers[0].amount, 300);
    }

    #[test]
    fn test_crowdfund_expiry_refunds_each_contributor() {
        let mut c = collection(CollectionKind::OpenCrowdfund, 1_000, 0);
        let now = Utc::now();
        apply_payment(&mut c, AccountId::new("a"), 300, now).unwrap();
        apply_payment(&mut c, AccountId::new("b"), 200, now).unwrap();

        let outcome = resolve_expired_collection(&mut c);
        assert_eq!(c.status, EntityStatus::Expired);
        assert_eq!(outcome.transfers.len(), 2);
        assert_eq!(outcome.transfers[0].to, AccountId::new("a"));
        assert_eq!(outcome.transfers[0].amount, 300);
        assert_eq!(outcome.transfers[1].to, AccountId::new("b"));
        assert_eq!(outcome.transfers[1].amount, 200);
        assert_eq!(outcome.events.len(), 2);
    }

    #[test]
    fn test_empty_crowdfund_expiry_refunds_nobody() {
        let mut c = collection(CollectionKind::OpenCrowdfund, 1_000, 0);
        let outcome = resolve_expired_collection(&mut c);
        assert!(outcome.transfers.is_empty());
        assert!(outcome.events.is_empty());
        assert_eq!(c.status, EntityStatus::Expired);
    }
}
