#![no_std]
use soroban_sdk::{contracttype, Address, Env, Vec, U256};

/// Shared types and accrual arithmetic used by all Launchpool contracts.
/// Every reward figure in the system flows through the helpers here so the
/// two pool flavors settle with identical rounding.

// ============================================================================
// Constants
// ============================================================================

/// 1e18 fixed-point scale for rates and accumulated-reward-per-share values
pub const SCALE: i128 = 1_000_000_000_000_000_000;

/// Seconds in a year (365 days), the APR time base of linear pools
pub const SECONDS_PER_YEAR: u64 = 31_536_000;

/// Linear-pool APRs are percentages carrying 18 decimals (10e18 = 10% a year)
pub const APR_DENOM: i128 = 100 * SCALE;

/// Hard upper bound on reward tokens a single pool may track
pub const MAX_REWARD_TOKENS: u32 = 5;

// ============================================================================
// Core Business Types
// ============================================================================

#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PoolState {
    NotStarted,
    Active,
    Closed,
}

#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PoolKind {
    Linear,
    Allocation,
}

#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    Admin,
    Mod,
}

// ============================================================================
// Fixed-Point Arithmetic
// ============================================================================

// Products are widened through U256 so that multiply-then-divide never
// wraps; division floors. Callers decide how to surface a None (overflow
// of the narrowed result).

fn to_u256(env: &Env, value: i128) -> Option<U256> {
    let unsigned: u128 = value.try_into().ok()?;
    Some(U256::from_u128(env, unsigned))
}

fn narrow(value: &U256) -> Option<i128> {
    value.to_u128()?.try_into().ok()
}

/// floor(a * b / denom) with a 256-bit intermediate product
pub fn mul_div(env: &Env, a: i128, b: i128, denom: i128) -> Option<i128> {
    if denom <= 0 {
        return None;
    }
    let product = to_u256(env, a)?.mul(&to_u256(env, b)?);
    narrow(&product.div(&to_u256(env, denom)?))
}

/// floor(emitted * SCALE / total_weight), kept wide: this is the
/// accumulated-reward-per-share delta and routinely exceeds 128 bits
pub fn acc_delta(env: &Env, emitted: i128, total_weight: i128) -> Option<U256> {
    if total_weight <= 0 {
        return None;
    }
    let scaled = to_u256(env, emitted)?.mul(&to_u256(env, SCALE)?);
    Some(scaled.div(&to_u256(env, total_weight)?))
}

/// floor(weight * acc / SCALE): a position's share of cumulative emission.
/// Kept wide so reward-debt snapshots subtract without narrowing first.
pub fn settled_value(env: &Env, weight: i128, acc: &U256) -> Option<U256> {
    let product = to_u256(env, weight)?.mul(acc);
    Some(product.div(&to_u256(env, SCALE)?))
}

/// Newly accrued reward since the last debt snapshot. The accumulator is
/// monotonic and the debt was taken at the same weight, so the difference
/// cannot underflow.
pub fn accrued_since(env: &Env, weight: i128, acc: &U256, debt: &U256) -> Option<i128> {
    let settled = settled_value(env, weight, acc)?;
    narrow(&settled.sub(debt))
}

// ============================================================================
// Accrual Schedules
// ============================================================================

/// The checkpoint primitive both ledgers share: fold the span between two
/// checkpoints into a reward amount using only integer arithmetic. The
/// caller clamps `to` at whatever horizon ends accrual (pool close, window
/// end) before asking, and calling with `to <= from` emits nothing, which
/// is what makes settlement idempotent within a single ledger close.
pub trait AccrualSchedule {
    /// Reward emitted over `[from, to)`, already carrying any bonus
    /// multiplier the schedule defines. None means arithmetic overflow.
    fn emitted(&self, env: &Env, from: u64, to: u64) -> Option<i128>;
}

/// Per-second APR accrual on an individual principal (linear pools).
pub struct FixedRate {
    pub principal: i128,
    pub apr: i128,
}

impl AccrualSchedule for FixedRate {
    fn emitted(&self, env: &Env, from: u64, to: u64) -> Option<i128> {
        if to <= from {
            return Some(0);
        }
        let elapsed = to - from;
        let product = to_u256(env, self.principal)?
            .mul(&to_u256(env, self.apr)?)
            .mul(&U256::from_u128(env, elapsed as u128));
        let denom = (SECONDS_PER_YEAR as u128) * (APR_DENOM as u128);
        narrow(&product.div(&U256::from_u128(env, denom)))
    }
}

/// Per-block pot emission with a step-function bonus window (allocation
/// pools). A span straddling `bonus_end_block` is charged per side.
pub struct SharedPot {
    pub rate_per_block: i128,
    pub bonus_multiplier: u64,
    pub bonus_end_block: u64,
}

impl SharedPot {
    /// Block count weighted by the bonus multiplier, split exactly at the
    /// bonus boundary. Never averages a multiplier across the boundary.
    pub fn weighted_span(&self, from: u64, to: u64) -> Option<u128> {
        if to <= from {
            return Some(0);
        }
        if to <= self.bonus_end_block {
            return ((to - from) as u128).checked_mul(self.bonus_multiplier as u128);
        }
        if from >= self.bonus_end_block {
            return Some((to - from) as u128);
        }
        let boosted =
            ((self.bonus_end_block - from) as u128).checked_mul(self.bonus_multiplier as u128)?;
        boosted.checked_add((to - self.bonus_end_block) as u128)
    }
}

impl AccrualSchedule for SharedPot {
    fn emitted(&self, env: &Env, from: u64, to: u64) -> Option<i128> {
        let span = self.weighted_span(from, to)?;
        let emitted = U256::from_u128(env, span).mul(&to_u256(env, self.rate_per_block)?);
        narrow(&emitted)
    }
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Stake-token lists must not repeat an asset
pub fn contains_duplicate(tokens: &Vec<Address>) -> bool {
    for i in 0..tokens.len() {
        for j in (i + 1)..tokens.len() {
            if tokens.get_unchecked(i) == tokens.get_unchecked(j) {
                return true;
            }
        }
    }
    false
}

pub fn valid_amount(amount: i128) -> bool {
    amount >= 0
}

/// A join window is sound when it is open-ended (end == 0) or ends both in
/// the future and after it starts
pub fn valid_join_window(now: u64, start: u64, end: u64) -> bool {
    end == 0 || (end > now && end > start)
}

/// Investment bounds are sound when unset (0) or ordered min <= max
pub fn valid_investment_bounds(min: i128, max: i128) -> bool {
    if min < 0 || max < 0 {
        return false;
    }
    max == 0 || min <= max
}
