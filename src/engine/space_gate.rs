//! Space-reclaim hysteresis gate.
//!
//! The gate fires when usage reaches the trigger, then stays closed until
//! usage falls back to `trigger - hysteresis` and the cooldown has elapsed.
//! Hovering at the threshold therefore fires once, not every evaluation.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

use crate::platform::pal::DiskUsage;
use crate::policy::model::{Meta, SpaceRule};

/// Persisted gate state (lives in scope meta).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateState {
    pub armed: bool,
    pub cooldown_until_unix: i64,
}

impl Default for GateState {
    fn default() -> Self {
        Self {
            armed: true,
            cooldown_until_unix: 0,
        }
    }
}

impl GateState {
    #[must_use]
    pub const fn from_meta(meta: &Meta) -> Self {
        Self {
            armed: meta.last_space_trigger_armed,
            cooldown_until_unix: meta.cooldown_until_unix,
        }
    }

    pub fn commit(self, meta: &mut Meta) {
        meta.last_space_trigger_armed = self.armed;
        meta.cooldown_until_unix = self.cooldown_until_unix;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    pub fire: bool,
    pub next: GateState,
}

/// Step the gate. An unknown usage (`None`) never fires and never re-arms.
/// A disabled rule never fires and leaves the state untouched.
#[must_use]
pub fn evaluate_gate(
    space: &SpaceRule,
    state: GateState,
    used_pct: Option<f64>,
    now_unix: i64,
) -> GateDecision {
    let mut next = state;
    let Some(used) = used_pct.filter(|_| space.enabled) else {
        return GateDecision { fire: false, next };
    };

    let trigger = f64::from(space.used_trigger_pct);
    let rearm_at = f64::from(space.used_trigger_pct.saturating_sub(space.hysteresis_pct));
    if used <= rearm_at {
        next.armed = true;
    }

    let fire = used >= trigger && next.armed && now_unix >= next.cooldown_until_unix;
    if fire {
        next.armed = false;
        next.cooldown_until_unix =
            now_unix.saturating_add(i64::try_from(space.cooldown_seconds).unwrap_or(i64::MAX));
    }
    GateDecision { fire, next }
}

/// Free bytes the space rule tries to reach once the gate fires.
#[must_use]
pub fn reclaim_target_bytes(space: &SpaceRule, usage: &DiskUsage) -> u64 {
    if space.free_space_below_gb > 0 {
        return space.free_space_below_gb.saturating_mul(1 << 30);
    }
    let pct = u64::from(100_u32.saturating_sub(space.used_trigger_pct).min(50));
    let scaled = u128::from(usage.total_bytes) * u128::from(pct) / 100;
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> SpaceRule {
        SpaceRule {
            enabled: true,
            used_trigger_pct: 80,
            target_free_pct: 20,
            hysteresis_pct: 5,
            cooldown_seconds: 0,
            free_space_below_gb: 0,
        }
    }

    #[test]
    fn hysteresis_fires_once_and_rearms_below_band() {
        let space = rule();
        let mut state = GateState::default();

        let d = evaluate_gate(&space, state, Some(82.0), 1_000);
        assert!(d.fire);
        assert!(!d.next.armed);
        state = d.next;

        let d = evaluate_gate(&space, state, Some(81.0), 1_010);
        assert!(!d.fire);
        state = d.next;

        let d = evaluate_gate(&space, state, Some(77.0), 1_020);
        assert!(!d.fire);
        assert!(!d.next.armed);
        state = d.next;

        let d = evaluate_gate(&space, state, Some(75.0), 1_030);
        assert!(!d.fire);
        assert!(d.next.armed);
        state = d.next;

        assert!(evaluate_gate(&space, state, Some(82.0), 1_040).fire);
    }

    #[test]
    fn cooldown_blocks_until_deadline() {
        let mut space = rule();
        space.cooldown_seconds = 600;
        let first = evaluate_gate(&space, GateState::default(), Some(90.0), 1_000);
        assert!(first.fire);
        assert_eq!(first.next.cooldown_until_unix, 1_600);

        // Re-armed by a dip, but still cooling down.
        let dip = evaluate_gate(&space, first.next, Some(70.0), 1_100);
        let early = evaluate_gate(&space, dip.next, Some(90.0), 1_200);
        assert!(!early.fire);
        assert!(early.next.armed);
        assert!(evaluate_gate(&space, early.next, Some(90.0), 1_600).fire);
    }

    #[test]
    fn unknown_usage_or_disabled_rule_is_inert() {
        let state = GateState {
            armed: false,
            cooldown_until_unix: 5,
        };
        let d = evaluate_gate(&rule(), state, None, 10);
        assert!(!d.fire);
        assert_eq!(d.next, state);

        let mut off = rule();
        off.enabled = false;
        let d = evaluate_gate(&off, GateState::default(), Some(99.0), 10);
        assert!(!d.fire);
        assert_eq!(d.next, GateState::default());
    }

    #[test]
    fn reclaim_target_prefers_gb_override() {
        let usage = DiskUsage::from_bytes(1_000_000, 100_000);
        let mut space = rule();
        assert_eq!(reclaim_target_bytes(&space, &usage), 200_000);
        space.used_trigger_pct = 40;
        assert_eq!(reclaim_target_bytes(&space, &usage), 500_000);
        space.free_space_below_gb = 2;
        assert_eq!(reclaim_target_bytes(&space, &usage), 2 * (1 << 30));
    }
}
