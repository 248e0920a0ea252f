//! Blast-radius cap: the most deletions a single evaluation may perform.

use crate::policy::model::Caps;

/// `min(max_absolute, max(min_if_nonempty, floor(eligible * pct / 100)))`,
/// or zero when nothing is eligible.
#[must_use]
pub fn blast_radius_cap(caps: &Caps, eligible_count: usize) -> usize {
    if eligible_count == 0 {
        return 0;
    }
    let pct = usize::try_from(caps.max_percent_eligible).unwrap_or(usize::MAX);
    let by_percent = eligible_count.saturating_mul(pct) / 100;
    let floor = usize::try_from(caps.min_if_nonempty).unwrap_or(usize::MAX);
    let absolute = usize::try_from(caps.max_absolute).unwrap_or(usize::MAX);
    by_percent.max(floor).min(absolute)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(max_absolute: u32, max_percent_eligible: u32, min_if_nonempty: u32) -> Caps {
        Caps {
            max_absolute,
            max_percent_eligible,
            min_if_nonempty,
        }
    }

    #[test]
    fn empty_pool_caps_to_zero() {
        assert_eq!(blast_radius_cap(&caps(5, 10, 1), 0), 0);
    }

    #[test]
    fn small_pool_gets_minimum() {
        assert_eq!(blast_radius_cap(&caps(5, 10, 1), 3), 1);
        assert_eq!(blast_radius_cap(&caps(5, 10, 2), 3), 2);
    }

    #[test]
    fn percent_then_absolute_bound() {
        assert_eq!(blast_radius_cap(&caps(5, 10, 1), 40), 4);
        assert_eq!(blast_radius_cap(&caps(5, 10, 1), 400), 5);
        assert_eq!(blast_radius_cap(&caps(500, 100, 1), 7), 7);
    }

    #[test]
    fn minimum_never_exceeds_absolute() {
        assert_eq!(blast_radius_cap(&caps(2, 10, 20), 1), 2);
    }
}
