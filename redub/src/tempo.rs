//! Tempo reconciler: decides how a synthesized clip fits its slot.

use serde::Serialize;
use tracing::warn;

/// Largest factor a single tempo stage may apply.
pub const MAX_STAGE_FACTOR: f64 = 2.0;
/// Smallest factor a single tempo stage may apply.
pub const MIN_STAGE_FACTOR: f64 = 0.5;

/// What to do with a clip.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TempoAction {
    /// No usable slot; the clip is not placed.
    Drop,
    /// Fits as-is.
    Place,
    /// Speed up by the product of `stages`, each within
    /// [`MIN_STAGE_FACTOR`, `MAX_STAGE_FACTOR`].
    SpeedUp { stages: Vec<f64> },
    /// The needed speed-up is past the quality floor; cut the clip instead.
    Truncate { to_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reconciliation {
    /// Overall speed-up applied, 1.0 unless the action is [`TempoAction::SpeedUp`].
    pub speed_factor: f64,
    #[serde(flatten)]
    pub action: TempoAction,
}

impl Reconciliation {
    fn unchanged(action: TempoAction) -> Self {
        Self {
            speed_factor: 1.0,
            action,
        }
    }
}

/// Decide how a `clip_ms` clip fits a `slot_ms` slot.
///
/// Ratios up to `max_speed_ratio` inclusive are sped up; anything beyond is
/// truncated to the slot.
pub fn reconcile(clip_ms: u64, slot_ms: u64, max_speed_ratio: f64) -> Reconciliation {
    if slot_ms == 0 {
        return Reconciliation::unchanged(TempoAction::Drop);
    }
    if clip_ms <= slot_ms {
        return Reconciliation::unchanged(TempoAction::Place);
    }

    let ratio = clip_ms as f64 / slot_ms as f64;
    if ratio > max_speed_ratio {
        warn!(
            clip_ms,
            slot_ms,
            ratio = format!("{ratio:.2}"),
            max_speed_ratio,
            "speed-up beyond limit, truncating clip"
        );
        return Reconciliation::unchanged(TempoAction::Truncate { to_ms: slot_ms });
    }

    Reconciliation {
        speed_factor: ratio,
        action: TempoAction::SpeedUp {
            stages: tempo_stages(ratio),
        },
    }
}

/// Split a speed-up `ratio` into stages of at most [`MAX_STAGE_FACTOR`].
///
/// Full 2.0 stages come first, the remainder last: 3.6 becomes `[2.0, 1.8]`.
/// A ratio of 1.0 or less needs no stage.
pub fn tempo_stages(ratio: f64) -> Vec<f64> {
    let mut stages = Vec::new();
    if !ratio.is_finite() {
        return stages;
    }

    let mut remaining = ratio;
    while remaining > MAX_STAGE_FACTOR {
        stages.push(MAX_STAGE_FACTOR);
        remaining /= MAX_STAGE_FACTOR;
    }
    if remaining > 1.0 {
        stages.push(remaining);
    }
    stages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stages_of(r: &Reconciliation) -> &[f64] {
        match &r.action {
            TempoAction::SpeedUp { stages } => stages,
            other => panic!("expected speed-up, got {other:?}"),
        }
    }

    #[test]
    fn test_fits_unmodified() {
        let r = reconcile(800, 1000, 4.0);
        assert_eq!(r.action, TempoAction::Place);
        assert_eq!(r.speed_factor, 1.0);
        assert_eq!(reconcile(1000, 1000, 4.0).action, TempoAction::Place);
    }

    #[test]
    fn test_zero_slot_drops() {
        assert_eq!(reconcile(500, 0, 4.0).action, TempoAction::Drop);
        assert_eq!(reconcile(0, 0, 4.0).action, TempoAction::Drop);
    }

    #[test]
    fn test_single_stage_speed_up() {
        let r = reconcile(1800, 1000, 4.0);
        assert!((r.speed_factor - 1.8).abs() < 1e-9);
        assert_eq!(stages_of(&r).len(), 1);
        assert!((stages_of(&r)[0] - 1.8).abs() < 1e-9);
    }

    #[test]
    fn test_over_limit_truncates() {
        let r = reconcile(4500, 1000, 4.0);
        assert_eq!(r.action, TempoAction::Truncate { to_ms: 1000 });
        assert_eq!(r.speed_factor, 1.0);
    }

    #[test]
    fn test_limit_is_inclusive() {
        let r = reconcile(4000, 1000, 4.0);
        assert_eq!(stages_of(&r), &[2.0, 2.0]);
    }

    #[test]
    fn test_chained_stages() {
        let r = reconcile(3600, 1000, 4.0);
        let stages = stages_of(&r);
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0], 2.0);
        assert!((stages[1] - 1.8).abs() < 1e-9);
        let product: f64 = stages.iter().product();
        assert!((product - 3.6).abs() < 1e-9);
    }

    #[test]
    fn test_stage_bounds() {
        for ratio in [1.01, 1.5, 2.0, 2.01, 3.99, 7.3, 15.0] {
            let stages = tempo_stages(ratio);
            assert!(stages
                .iter()
                .all(|&s| (MIN_STAGE_FACTOR..=MAX_STAGE_FACTOR).contains(&s)));
            let product: f64 = stages.iter().product();
            assert!((product - ratio).abs() < 1e-9, "ratio {ratio} -> {stages:?}");
        }
    }

    #[test]
    fn test_no_stage_for_unit_ratio() {
        assert!(tempo_stages(1.0).is_empty());
        assert!(tempo_stages(0.7).is_empty());
        assert!(tempo_stages(f64::INFINITY).is_empty());
    }

    #[test]
    fn test_custom_limit() {
        assert!(matches!(
            reconcile(2500, 1000, 2.0).action,
            TempoAction::Truncate { to_ms: 1000 }
        ));
    }

    #[test]
    fn test_serialize_action() {
        let json = serde_json::to_value(reconcile(4500, 1000, 4.0)).unwrap();
        assert_eq!(json["action"], "truncate");
        assert_eq!(json["to_ms"], 1000);
    }
}
