use std::cmp::min;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Adds two costs, saturating at `infinity`
///
/// # Arguments
///
/// * `cost_a`: First cost
/// * `cost_b`: Second cost
/// * `infinity`: the unreachable sentinel
///
/// returns: u32
///
/// # Examples
///
/// ```
/// assert_eq!(nexthop::util::sum_inf(3, 4, 16), 7);
/// assert_eq!(nexthop::util::sum_inf(15, 4, 16), 16);
/// assert_eq!(nexthop::util::sum_inf(16, 0, 16), 16);
/// ```
pub fn sum_inf(cost_a: u32, cost_b: u32, infinity: u32) -> u32 {
    if cost_a >= infinity || cost_b >= infinity {
        infinity
    } else {
        min(infinity as u64, cost_a as u64 + cost_b as u64) as u32
    }
}

/// Draws a duration uniformly from `base ± jitter`
///
/// ```
/// use rand::SeedableRng;
/// use std::time::Duration;
/// let mut rng = rand::rngs::StdRng::seed_from_u64(1);
/// let d = nexthop::util::jittered(&mut rng, Duration::from_secs(30), Duration::from_secs(5));
/// assert!(d >= Duration::from_secs(25) && d <= Duration::from_secs(35));
/// assert_eq!(nexthop::util::jittered(&mut rng, Duration::from_secs(30), Duration::ZERO), Duration::from_secs(30));
/// // saturates instead of overflowing
/// let _ = nexthop::util::jittered(&mut rng, Duration::MAX, Duration::MAX);
/// ```
pub fn jittered(rng: &mut StdRng, base: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return base;
    }
    let spread = millis(jitter);
    let offset = rng.gen_range(0..=spread.saturating_mul(2));
    base.saturating_add(Duration::from_millis(offset)).saturating_sub(jitter)
}

/// Draws a duration uniformly from `0..=max`
pub fn up_to(rng: &mut StdRng, max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    Duration::from_millis(rng.gen_range(0..=millis(max)))
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub(crate) fn unseeded_rng() -> StdRng {
    StdRng::seed_from_u64(0)
}
