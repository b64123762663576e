//! Proof-of-stake difficulty arithmetic.
//!
//! All products are taken in `u128`: a base target times power times seconds
//! easily exceeds 64 bits, and cumulative difficulty is built from
//! `2^64 / base_target`. Floating point is never used so that every node
//! orders competing chains identically.

use super::{
    DEFAULT_BLOCK_TIME, DEFAULT_MAX_BLOCK_TIME, DEFAULT_MIN_BLOCK_TIME, DIFF_ADJUST_NUMERATOR,
    DIFF_ADJUST_NUMERATOR_COE, DIFF_ADJUST_NUMERATOR_HALF, Sha256Hash,
};
use crate::wallet::PublicKey;

fn clamp_interval(interval: i64) -> u128 {
    interval.clamp(DEFAULT_MIN_BLOCK_TIME, DEFAULT_MAX_BLOCK_TIME) as u128
}

/// Base target for the next block, given the previous base target and the
/// interval the previous block actually took.
///
/// Fast blocks lower the base target (harder), slow blocks raise it.
pub fn required_base_target(previous_base_target: u64, interval: i64) -> u64 {
    let t = clamp_interval(interval);
    let target = DEFAULT_BLOCK_TIME as u128;
    let prev = previous_base_target as u128;

    let next = if t < target {
        let delta = prev * DIFF_ADJUST_NUMERATOR_COE / DIFF_ADJUST_NUMERATOR * (target - t) / target;
        prev - delta
    } else {
        let delta = prev * DIFF_ADJUST_NUMERATOR_COE / DIFF_ADJUST_NUMERATOR * (t - target) / target;
        prev + delta
    };

    next.clamp(DIFF_ADJUST_NUMERATOR_HALF, u64::MAX as u128) as u64
}

/// `previous + 2^64 / base_target`, saturating at `u64::MAX`.
pub fn cumulative_difficulty(previous: u64, base_target: u64) -> u64 {
    let step = DIFF_ADJUST_NUMERATOR / base_target.max(1) as u128;
    (previous as u128 + step).min(u64::MAX as u128) as u64
}

/// Seed for the next miner's eligibility: `sha256(previous || miner)`.
pub fn generation_signature(previous: &Sha256Hash, miner: &PublicKey) -> Sha256Hash {
    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(previous.as_bytes());
    data.extend_from_slice(miner.as_bytes());
    Sha256Hash::digest(&data)
}

/// Hit value drawn from a generation signature (first 8 bytes, big endian).
pub fn random_hit(generation_signature: &Sha256Hash) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&generation_signature.0[..8]);
    u64::from_be_bytes(b)
}

/// Seconds after its parent at which a miner with `power` may seal a block.
pub fn mining_time_interval(hit: u64, base_target: u64, power: i64) -> i64 {
    if power <= 0 {
        return DEFAULT_MAX_BLOCK_TIME;
    }
    let weight = base_target.max(1) as u128 * power as u128;
    let interval = hit as u128 / weight + 1;
    clamp_interval(interval.min(i64::MAX as u128) as i64) as i64
}

/// Whether a miner with `power` is eligible to seal a block `interval`
/// seconds after its parent.
pub fn verify_hit(hit: u64, base_target: u64, power: i64, interval: i64) -> bool {
    if interval < DEFAULT_MIN_BLOCK_TIME {
        return false;
    }
    if interval >= DEFAULT_MAX_BLOCK_TIME {
        return true;
    }
    if power <= 0 {
        return false;
    }
    (hit as u128) < base_target as u128 * power as u128 * interval as u128
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::GENESIS_BASE_TARGET;

    #[test]
    fn on_target_interval_keeps_base_target() {
        assert_eq!(required_base_target(GENESIS_BASE_TARGET, 300), GENESIS_BASE_TARGET);
    }

    #[test]
    fn fast_blocks_lower_and_slow_blocks_raise() {
        let fast = required_base_target(GENESIS_BASE_TARGET, 10);
        let slow = required_base_target(GENESIS_BASE_TARGET, 10_000);
        assert!(fast < GENESIS_BASE_TARGET);
        assert!(slow > GENESIS_BASE_TARGET);
        // clamped to [60, 540]
        assert_eq!(fast, required_base_target(GENESIS_BASE_TARGET, 60));
        assert_eq!(slow, required_base_target(GENESIS_BASE_TARGET, 540));
    }

    #[test]
    fn base_target_has_a_floor() {
        let mut bt = DIFF_ADJUST_NUMERATOR_HALF as u64;
        for _ in 0..10 {
            bt = required_base_target(bt, 1);
        }
        assert_eq!(bt as u128, DIFF_ADJUST_NUMERATOR_HALF);
    }

    #[test]
    fn cumulative_difficulty_is_exact_and_monotone() {
        let bt = 1u64 << 40;
        assert_eq!(cumulative_difficulty(0, bt), 1 << 24);
        assert_eq!(cumulative_difficulty(5, 1), u64::MAX);
        let mut total = 0;
        for bt in [GENESIS_BASE_TARGET, 1 << 33, 1 << 50] {
            let next = cumulative_difficulty(total, bt);
            assert!(next > total);
            total = next;
        }
    }

    #[test]
    fn mined_interval_passes_hit_check() {
        let sig = generation_signature(&Sha256Hash::GENESIS_SENTINEL, &PublicKey([9u8; 32]));
        let hit = random_hit(&sig);
        for power in [1, 5, 1_000, 1_000_000] {
            let interval = mining_time_interval(hit, GENESIS_BASE_TARGET, power);
            assert!(verify_hit(hit, GENESIS_BASE_TARGET, power, interval));
            assert!(!verify_hit(hit, GENESIS_BASE_TARGET, power, 59));
        }
    }

    #[test]
    fn zero_power_waits_for_the_ceiling() {
        assert_eq!(mining_time_interval(1, 1, 0), DEFAULT_MAX_BLOCK_TIME);
        assert!(!verify_hit(0, 1, 0, 300));
        assert!(verify_hit(u64::MAX, 1, 0, DEFAULT_MAX_BLOCK_TIME));
    }
}
