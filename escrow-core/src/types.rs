//! Core types for the escrow engine
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (integer smallest-unit amounts)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Value in the smallest currency unit (wei-style)
pub type Amount = u128;

/// Account identifier (address, account number, etc.)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Split policy for a red packet, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketKind {
    /// Each claim pays the same share
    Equal = 0,
    /// Each claim draws a bounded pseudo-random share
    Random = 1,
}

/// Campaign policy for a collection, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CollectionKind {
    /// Exact per-participant share over a fixed headcount ("AA")
    FixedSplit = 0,
    /// Arbitrary positive amounts toward a total target
    OpenCrowdfund = 1,
}

/// Entity lifecycle state
///
/// `Completed` and `Expired` are terminal: no further claims, payments, or
/// transitions are permitted once either is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntityStatus {
    /// Accepting claims / payments
    Active = 0,
    /// Resolved by the expiry handler (terminal)
    Expired = 1,
    /// Target reached or slots exhausted (terminal)
    Completed = 2,
}

impl EntityStatus {
    /// Check if the state permits no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, EntityStatus::Expired | EntityStatus::Completed)
    }
}

/// Stored comparison value derived from the creator-supplied passphrase
///
/// SHA-256 digest rather than the plaintext passphrase. Either way the
/// passphrase travels with every claim, so this gates convenience, not
/// security.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordCommitment([u8; 32]);

impl PasswordCommitment {
    /// Derive the commitment for a passphrase
    pub fn derive(passphrase: &str) -> Self {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(passphrase.as_bytes());
        Self(hasher.finalize().into())
    }

    /// Check a submitted passphrase against this commitment
    pub fn matches(&self, passphrase: &str) -> bool {
        Self::derive(passphrase) == *self
    }
}

/// One successful claim against a red packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Identity that claimed
    pub claimer: AccountId,
    /// Payout received
    pub amount: Amount,
    /// When the claim was recorded
    pub claimed_at: DateTime<Utc>,
}

/// A pre-funded pool of value split among a bounded number of claimants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedPacket {
    /// Sequential identifier, assigned at creation
    pub id: u64,

    /// Identity of the funding party
    pub creator: AccountId,

    /// Split policy
    pub kind: PacketKind,

    /// Funded pool size
    pub total_amount: Amount,

    /// Undisbursed value; `remaining_amount <= total_amount` always
    pub remaining_amount: Amount,

    /// Claim slots at creation
    pub total_count: u32,

    /// Unclaimed slots; `remaining_count <= total_count` always
    pub remaining_count: u32,

    /// Claims are disallowed after this instant
    pub deadline: DateTime<Utc>,

    /// Passphrase commitment
    pub commitment: PasswordCommitment,

    /// Lifecycle state
    pub status: EntityStatus,

    /// Successful claims in claim order
    pub claims: Vec<Claim>,

    /// Membership index over `claims` (uniqueness invariant)
    claimers: HashSet<AccountId>,
}

impl RedPacket {
    /// Create a new active packet with the full pool undisbursed
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        creator: AccountId,
        kind: PacketKind,
        total_amount: Amount,
        total_count: u32,
        deadline: DateTime<Utc>,
        commitment: PasswordCommitment,
    ) -> Self {
        Self {
            id,
            creator,
            kind,
            total_amount,
            remaining_amount: total_amount,
            total_count,
            remaining_count: total_count,
            deadline,
            commitment,
            status: EntityStatus::Active,
            claims: Vec::new(),
            claimers: HashSet::new(),
        }
    }

    /// Check whether an identity has already claimed
    pub fn has_claimed(&self, account: &AccountId) -> bool {
        self.claimers.contains(account)
    }

    /// Check whether the deadline has passed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }

    /// Record a claim; rejects duplicate claimers
    ///
    /// Callers are expected to have run the access guard first; the duplicate
    /// check here is the last line of the uniqueness invariant.
    pub fn record_claim(&mut self, claim: Claim) -> crate::Result<()> {
        if !self.claimers.insert(claim.claimer.clone()) {
            return Err(crate::Error::AlreadyClaimed);
        }
        if claim.amount > self.remaining_amount {
            return Err(crate::Error::InvariantViolation(format!(
                "claim {} exceeds remaining {}",
                claim.amount, self.remaining_amount
            )));
        }
        self.remaining_amount -= claim.amount;
        self.remaining_count -= 1;
        self.claims.push(claim);
        if self.remaining_count == 0 {
            self.status = EntityStatus::Completed;
        }
        Ok(())
    }

    /// Total disbursed so far
    pub fn claimed_amount(&self) -> Amount {
        self.claims.iter().map(|c| c.amount).sum()
    }
}

/// One payment into a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    /// Identity that paid
    pub payer: AccountId,
    /// Amount paid (needed for proportional refund on failure)
    pub amount: Amount,
    /// When the payment was recorded
    pub paid_at: DateTime<Utc>,
}

/// A pooled-payment campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    /// Sequential identifier, assigned at creation
    pub id: u64,

    /// Identity of the party collecting
    pub creator: AccountId,

    /// Campaign policy
    pub kind: CollectionKind,

    /// Total sought
    pub target_amount: Amount,

    /// Required participant count (FixedSplit only; 0 for OpenCrowdfund)
    pub target_count: u32,

    /// Accumulated payments
    pub current_amount: Amount,

    /// Payer count
    pub current_count: u32,

    /// Payments are disallowed after this instant
    pub deadline: DateTime<Utc>,

    /// Passphrase commitment
    pub commitment: PasswordCommitment,

    /// Lifecycle state
    pub status: EntityStatus,

    /// Payments in payment order
    pub contributions: Vec<Contribution>,

    /// Membership index over `contributions`
    contributors: HashSet<AccountId>,
}

impl Collection {
    /// Create a new active collection; no funds change hands at creation
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        creator: AccountId,
        kind: CollectionKind,
        target_amount: Amount,
        target_count: u32,
        deadline: DateTime<Utc>,
        commitment: PasswordCommitment,
    ) -> Self {
        Self {
            id,
            creator,
            kind,
            target_amount,
            target_count,
            current_amount: 0,
            current_count: 0,
            deadline,
            commitment,
            status: EntityStatus::Active,
            contributions: Vec::new(),
            contributors: HashSet::new(),
        }
    }

    /// Exact per-participant share for FixedSplit collections
    pub fn share_amount(&self) -> Amount {
        debug_assert!(self.kind == CollectionKind::FixedSplit);
        self.target_amount / self.target_count as Amount
    }

    /// Check whether an identity has already paid
    pub fn has_paid(&self, account: &AccountId) -> bool {
        self.contributors.contains(account)
    }

    /// Check whether the deadline has passed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }

    /// Record a payment; rejects duplicate payers
    pub fn record_payment(&mut self, contribution: Contribution) -> crate::Result<()> {
        if !self.contributors.insert(contribution.payer.clone()) {
            return Err(crate::Error::AlreadyPaid);
        }
        self.current_amount += contribution.amount;
        self.current_count += 1;
        self.contributions.push(contribution);
        Ok(())
    }

    /// Check whether the target has been met
    pub fn target_reached(&self) -> bool {
        match self.kind {
            CollectionKind::FixedSplit => self.current_count >= self.target_count,
            CollectionKind::OpenCrowdfund => self.current_amount >= self.target_amount,
        }
    }
}

/// An outbound value transfer executed on settlement or refund
///
/// Transfers are executed strictly after the entity's state has been
/// persisted (effects-before-external-call ordering).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Recipient of the value
    pub to: AccountId,
    /// Amount moved out of escrow
    pub amount: Amount,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn packet() -> RedPacket {
        RedPacket::new(
            0,
            AccountId::new("alice"),
            PacketKind::Equal,
            1_000,
            4,
            Utc::now() + Duration::minutes(60),
            PasswordCommitment::derive("secret"),
        )
    }

    #[test]
    fn test_commitment_roundtrip() {
        let commitment = PasswordCommitment::derive("test123");
        assert!(commitment.matches("test123"));
        assert!(!commitment.matches("wrong"));
        assert!(!commitment.matches(""));
    }

    #[test]
    fn test_record_claim_updates_balances() {
        let mut p = packet();
        p.record_claim(Claim {
            claimer: AccountId::new("bob"),
            amount: 250,
            claimed_at: Utc::now(),
        })
        .unwrap();

        assert_eq!(p.remaining_amount, 750);
        assert_eq!(p.remaining_count, 3);
        assert_eq!(p.status, EntityStatus::Active);
        assert!(p.has_claimed(&AccountId::new("bob")));
        assert!(!p.has_claimed(&AccountId::new("carol")));
    }

    #[test]
    fn test_duplicate_claim_rejected() {
        let mut p = packet();
        let claim = Claim {
            claimer: AccountId::new("bob"),
            amount: 250,
            claimed_at: Utc::now(),
        };
        p.record_claim(claim.clone()).unwrap();
        assert!(matches!(
            p.record_claim(claim),
            Err(crate::Error::AlreadyClaimed)
        ));
        // State unchanged by the failed attempt
        assert_eq!(p.remaining_amount, 750);
        assert_eq!(p.remaining_count, 3);
    }

    #[test]
    fn test_last_claim_completes_packet() {
        let mut p = packet();
        for (i, share) in [250u128, 250, 250, 250].iter().enumerate() {
            p.record_claim(Claim {
                claimer: AccountId::new(format!("claimer-{i}")),
                amount: *share,
                claimed_at: Utc::now(),
            })
            .unwrap();
        }
        assert_eq!(p.remaining_count, 0);
        assert_eq!(p.remaining_amount, 0);
        assert_eq!(p.status, EntityStatus::Completed);
        assert!(p.status.is_terminal());
    }

    #[test]
    fn test_fixed_split_share() {
        let c = Collection::new(
            0,
            AccountId::new("alice"),
            CollectionKind::FixedSplit,
            900,
            3,
            Utc::now() + Duration::minutes(60),
            PasswordCommitment::derive("pw"),
        );
        assert_eq!(c.share_amount(), 300);
        assert!(!c.target_reached());
    }

    #[test]
    fn test_crowdfund_target_reached_on_amount() {
        let mut c = Collection::new(
            0,
            AccountId::new("alice"),
            CollectionKind::OpenCrowdfund,
            1_000,
            0,
            Utc::now() + Duration::minutes(60),
            PasswordCommitment::derive("pw"),
        );
        c.record_payment(Contribution {
            payer: AccountId::new("bob"),
            amount: 600,
            paid_at: Utc::now(),
        })
        .unwrap();
        assert!(!c.target_reached());

        c.record_payment(Contribution {
            payer: AccountId::new("carol"),
            amount: 400,
            paid_at: Utc::now(),
        })
        .unwrap();
        assert!(c.target_reached());
        assert_eq!(c.current_amount, 1_000);
        assert_eq!(c.current_count, 2);
    }

    #[test]
    fn test_duplicate_payment_rejected() {
        let mut c = Collection::new(
            0,
            AccountId::new("alice"),
            CollectionKind::OpenCrowdfund,
            1_000,
            0,
            Utc::now() + Duration::minutes(60),
            PasswordCommitment::derive("pw"),
        );
        let payment = Contribution {
            payer: AccountId::new("bob"),
            amount: 100,
            paid_at: Utc::now(),
        };
        c.record_payment(payment.clone()).unwrap();
        assert!(matches!(
            c.record_payment(payment),
            Err(crate::Error::AlreadyPaid)
        ));
        assert_eq!(c.current_amount, 100);
        assert_eq!(c.current_count, 1);
    }
}
