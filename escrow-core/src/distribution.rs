//! Payout computation for claims against an active red packet
//!
//! Both policies conserve the pool by construction: the final remaining slot
//! always receives exactly `remaining_amount`, so the sum of all payouts
//! equals `total_amount` once the packet is drained.

use crate::types::{Amount, PacketKind, RedPacket};
use rand::Rng;

/// Compute the payout for the next claim against `packet`
///
/// The randomness source is caller-supplied; fairness, not unpredictability,
/// is the guaranteed property.
pub fn compute_payout<R: Rng>(
    packet: &RedPacket,
    share_multiplier: u32,
    rng: &mut R,
) -> Amount {
    match packet.kind {
        PacketKind::Equal => equal_payout(packet),
        PacketKind::Random => random_payout(packet, share_multiplier, rng),
    }
}

/// Equal split: `total_amount / total_count` per claim, remainder to the last
///
/// Integer division leaves dust (`total_amount mod total_count`); the last
/// remaining slot receives `remaining_amount` in full so no value is lost.
fn equal_payout(packet: &RedPacket) -> Amount {
    debug_assert!(packet.remaining_count >= 1);
    if packet.remaining_count == 1 {
        packet.remaining_amount
    } else {
        packet.total_amount / packet.total_count as Amount
    }
}

/// Random split bounded by the fair-share multiplier
///
/// Each claim before the last draws from `[1, upper]` where
/// `upper = min(multiplier x remaining / slots, remaining - (slots - 1))`,
/// leaving at least 1 unit for every still-unclaimed slot. The final slot
/// receives exactly `remaining_amount`.
fn random_payout<R: Rng>(packet: &RedPacket, share_multiplier: u32, rng: &mut R) -> Amount {
    let remaining = packet.remaining_amount;
    let slots = packet.remaining_count as Amount;
    debug_assert!(slots >= 1);

    if slots == 1 {
        return remaining;
    }
    if remaining == 0 {
        return 0;
    }

    // Keep 1 unit reserved per unclaimed slot; degenerate pools (fewer units
    // than slots) pay the minimum until drained.
    let reserve = slots - 1;
    let spendable = remaining.saturating_sub(reserve);
    if spendable <= 1 {
        return 1;
    }

    let fair_cap = remaining
        .saturating_mul(share_multiplier as Amount)
        / slots;
    let upper = fair_cap.clamp(1, spendable);

    rng.gen_range(1..=upper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountId, Claim, PasswordCommitment};
    use chrono::{Duration, Utc};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn packet(kind: PacketKind, total_amount: Amount, total_count: u32) -> RedPacket {
        RedPacket::new(
            0,
            AccountId::new("creator"),
            kind,
            total_amount,
            total_count,
            Utc::now() + Duration::minutes(60),
            PasswordCommitment::derive("pw"),
        )
    }

    fn drain<R: Rng>(mut p: RedPacket, rng: &mut R) -> Vec<Amount> {
        let mut payouts = Vec::new();
        let mut i = 0u32;
        while p.remaining_count > 0 {
            let payout = compute_payout(&p, 2, rng);
            p.record_claim(Claim {
                claimer: AccountId::new(format!("claimer-{i}")),
                amount: payout,
                claimed_at: Utc::now(),
            })
            .unwrap();
            payouts.push(payout);
            i += 1;
        }
        assert_eq!(p.remaining_amount, 0);
        payouts
    }

    #[test]
    fn test_equal_split_shares() {
        let mut rng = StdRng::seed_from_u64(1);
        let payouts = drain(packet(PacketKind::Equal, 1_000, 4), &mut rng);
        assert_eq!(payouts, vec![250, 250, 250, 250]);
    }

    #[test]
    fn test_equal_split_dust_goes_to_last_claim() {
        let mut rng = StdRng::seed_from_u64(1);
        // 1000 / 3 = 333 per claim, last gets 334
        let payouts = drain(packet(PacketKind::Equal, 1_000, 3), &mut rng);
        assert_eq!(payouts, vec![333, 333, 334]);
        assert_eq!(payouts.iter().sum::<Amount>(), 1_000);
    }

    #[test]
    fn test_random_split_conserves_pool() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let payouts = drain(packet(PacketKind::Random, 1_000_000, 7), &mut rng);
            assert_eq!(payouts.len(), 7);
            assert_eq!(payouts.iter().sum::<Amount>(), 1_000_000);
            assert!(payouts.iter().all(|&p| p >= 1));
        }
    }

    #[test]
    fn test_random_split_respects_fair_bound() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let mut p = packet(PacketKind::Random, 1_000_000, 10);
            let mut i = 0u32;
            while p.remaining_count > 1 {
                let remaining = p.remaining_amount;
                let slots = p.remaining_count as Amount;
                let payout = compute_payout(&p, 2, &mut rng);
                assert!(payout <= 2 * remaining / slots);
                p.record_claim(Claim {
                    claimer: AccountId::new(format!("claimer-{i}")),
                    amount: payout,
                    claimed_at: Utc::now(),
                })
                .unwrap();
                i += 1;
            }
        }
    }

    #[test]
    fn test_random_split_degenerate_pool() {
        // Fewer units than slots: everyone gets the minimum until drained
        let mut rng = StdRng::seed_from_u64(3);
        let payouts = drain(packet(PacketKind::Random, 3, 5), &mut rng);
        assert_eq!(payouts.iter().sum::<Amount>(), 3);
        assert!(payouts.iter().all(|&p| p <= 1));
    }

    #[test]
    fn test_single_slot_takes_everything() {
        let mut rng = StdRng::seed_from_u64(9);
        let p = packet(PacketKind::Random, 12_345, 1);
        assert_eq!(compute_payout(&p, 2, &mut rng), 12_345);
    }
}
