//! Bit-packed tier reports.
//!
//! A report is a word of 8 lanes of 32 bits. Lane `i` (bits `32i..32i+32`)
//! holds the block or timestamp at which tier `i + 1` was continuously held
//! since, or [`NEVER`] if it was not.

use crate::types::u256::U256;
use crate::virtual_machine::operand::{SelectLogic, SelectMode, TierRange};

/// Lane value for "tier never held".
pub const NEVER: u32 = 0xFFFF_FFFF;
pub const LANE_BITS: u32 = 32;
pub const LANES: usize = 8;

/// Report with every lane at [`NEVER`].
pub const NEVER_REPORT: U256 = U256::MAX;

pub fn lane(report: U256, index: usize) -> u32 {
    (report >> (LANE_BITS * index as u32)).low_u32()
}

pub fn lanes(report: U256) -> [u32; LANES] {
    let mut out = [0u32; LANES];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = lane(report, i);
    }
    out
}

pub fn from_lanes(lanes: [u32; LANES]) -> U256 {
    lanes
        .iter()
        .enumerate()
        .fold(U256::ZERO, |acc, (i, &v)| {
            acc | (U256::from(v) << (LANE_BITS * i as u32))
        })
}

/// Time at which `tier` was reached; tier 0 is always held.
pub fn time_for_tier(report: U256, tier: u8) -> U256 {
    match tier {
        0 => U256::ZERO,
        t => U256::from(lane(report, t as usize - 1)),
    }
}

/// Lane-wise `a - b`, clamped at zero.
pub fn saturating_diff(a: U256, b: U256) -> U256 {
    let (a, b) = (lanes(a), lanes(b));
    let mut out = [0u32; LANES];
    for i in 0..LANES {
        out[i] = a[i].saturating_sub(b[i]);
    }
    from_lanes(out)
}

/// Combines `reports` (deepest first) lane by lane, treating any lane later
/// than `threshold` as never held.
pub fn select_lte(reports: &[U256], threshold: U256, logic: SelectLogic, mode: SelectMode) -> U256 {
    let reports: Vec<[u32; LANES]> = reports.iter().map(|&r| lanes(r)).collect();
    let mut out = [NEVER; LANES];
    for (i, slot) in out.iter_mut().enumerate() {
        let candidates = reports.iter().map(|report| {
            if U256::from(report[i]) > threshold {
                NEVER
            } else {
                report[i]
            }
        });
        *slot = match logic {
            SelectLogic::Every => {
                let all: Vec<u32> = candidates.collect();
                if all.contains(&NEVER) {
                    NEVER
                } else {
                    reduce(all.into_iter(), mode)
                }
            }
            SelectLogic::Any => reduce(candidates.filter(|&v| v != NEVER), mode),
        };
    }
    from_lanes(out)
}

/// Reduces candidates per `mode`; an empty set yields [`NEVER`].
fn reduce(candidates: impl Iterator<Item = u32>, mode: SelectMode) -> u32 {
    match mode {
        SelectMode::Min => candidates.min(),
        SelectMode::Max => candidates.max(),
        SelectMode::First => candidates.last(),
    }
    .unwrap_or(NEVER)
}

/// Lowers every lane in `range` to at most `value`; other lanes pass through.
pub fn update_times_for_tier_range(report: U256, range: TierRange, value: U256) -> U256 {
    let mut out = lanes(report);
    for lane in &mut out[range.lanes()] {
        if value < U256::from(*lane) {
            *lane = value.low_u32();
        }
    }
    from_lanes(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(values: [u32; LANES]) -> U256 {
        from_lanes(values)
    }

    #[test]
    fn lane_zero_is_least_significant() {
        let r = report([1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(r.low_u32(), 1);
        assert_eq!(lane(r, 7), 8);
        assert_eq!(lanes(r), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(time_for_tier(r, 3), U256::from(3u8));
        assert_eq!(time_for_tier(r, 0), U256::ZERO);
    }

    #[test]
    fn saturating_diff_clamps_per_lane() {
        let a = report([10, 5, 0, NEVER, 7, 7, 7, 7]);
        let b = report([3, 9, 1, 1, 7, 0, 8, 6]);
        assert_eq!(lanes(saturating_diff(a, b)), [7, 0, 0, NEVER - 1, 0, 7, 0, 1]);
    }

    #[test]
    fn select_every_first_with_threshold_on_lane() {
        let r = report([10, 20, 30, 40, 50, 60, 70, 80]);
        let out = select_lte(&[r], U256::from(30u8), SelectLogic::Every, SelectMode::First);
        assert_eq!(lanes(out), [10, 20, 30, NEVER, NEVER, NEVER, NEVER, NEVER]);
    }

    #[test]
    fn select_every_needs_all_reports() {
        let a = report([1, 1, 1, 1, 1, 1, 1, 1]);
        let b = report([2, NEVER, 2, 2, 2, 2, 2, 2]);
        let min = select_lte(&[a, b], U256::from(100u8), SelectLogic::Every, SelectMode::Min);
        assert_eq!(lanes(min), [1, NEVER, 1, 1, 1, 1, 1, 1]);
        let max = select_lte(&[a, b], U256::from(100u8), SelectLogic::Every, SelectMode::Max);
        assert_eq!(lane(max, 0), 2);
    }

    #[test]
    fn select_any_skips_sentinels() {
        let a = report([5, NEVER, 50, NEVER, 1, 1, 1, 1]);
        let b = report([3, 7, 60, NEVER, 2, 2, 2, 2]);
        let threshold = U256::from(55u8);
        let min = select_lte(&[a, b], threshold, SelectLogic::Any, SelectMode::Min);
        assert_eq!(lanes(min)[..4], [3, 7, 50, NEVER]);
        let max = select_lte(&[a, b], threshold, SelectLogic::Any, SelectMode::Max);
        assert_eq!(lanes(max)[..4], [5, 7, 50, NEVER]);
        let last = select_lte(&[a, b], threshold, SelectLogic::Any, SelectMode::First);
        assert_eq!(lanes(last)[..5], [3, 7, 50, NEVER, 2]);
    }

    #[test]
    fn update_full_range() {
        let r = report([NEVER; LANES]);
        let range = TierRange::new(0, 8).unwrap();
        assert_eq!(
            update_times_for_tier_range(r, range, U256::from(100u8)),
            report([100; LANES])
        );
    }

    #[test]
    fn update_respects_range_and_keeps_earlier_times() {
        let r = report([5, 500, 500, 5, 500, 500, 500, 500]);
        let range = TierRange::new(1, 4).unwrap();
        let out = update_times_for_tier_range(r, range, U256::from(100u8));
        assert_eq!(lanes(out), [5, 100, 100, 5, 500, 500, 500, 500]);

        let empty = TierRange::new(4, 2).unwrap();
        assert_eq!(update_times_for_tier_range(r, empty, U256::ZERO), r);
    }
}
