//! Decay & scoring
//!
//! Produces a continuous relevance score from access history:
//!
//! ```text
//! score(t) = max(use_count, 1)^beta * f_model(dt) * strength
//! ```
//!
//! where `dt = max(0, t - last_used)` and `f_model` is one of three
//! forgetting curves. The same module owns the forget/promote decisions so
//! the thresholds and the curve can never drift apart.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{DecayModelKind, EngineConfig};
use crate::memory::MemoryRecord;

/// Elapsed time is clamped to ten years to keep the math far away from
/// denormals. Clamps are counted, not hidden.
pub const MAX_ELAPSED_SECS: f64 = 10.0 * 365.0 * 86_400.0;

// ============================================================================
// DECAY MODELS
// ============================================================================

/// A resolved forgetting curve. All parameters are in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecayModel {
    /// `f(dt) = exp(-lambda * dt)`
    Exponential { lambda: f64 },
    /// `f(dt) = (1 + dt/t0)^(-alpha)`
    PowerLaw { alpha: f64, t0: f64 },
    /// `f(dt) = w * exp(-lf * dt) + (1 - w) * exp(-ls * dt)`
    TwoComponent {
        lambda_fast: f64,
        lambda_slow: f64,
        weight_fast: f64,
    },
}

impl DecayModel {
    /// Resolve the configured model, deriving rate constants from the
    /// half-life where the config expresses one.
    pub fn from_config(config: &EngineConfig) -> Self {
        match config.decay_model {
            DecayModelKind::Exponential => DecayModel::Exponential {
                lambda: config.exponential_lambda(),
            },
            DecayModelKind::PowerLaw => DecayModel::PowerLaw {
                alpha: config.alpha,
                t0: config.power_law_t0(),
            },
            DecayModelKind::TwoComponent => DecayModel::TwoComponent {
                lambda_fast: config.tc_lambda_fast,
                lambda_slow: config.tc_lambda_slow,
                weight_fast: config.tc_weight_fast,
            },
        }
    }

    /// Retention fraction after `dt_secs` of disuse. Monotonically
    /// non-increasing, `retention(0) == 1`.
    pub fn retention(&self, dt_secs: f64) -> f64 {
        let dt = dt_secs.max(0.0);
        match *self {
            DecayModel::Exponential { lambda } => (-lambda * dt).exp(),
            DecayModel::PowerLaw { alpha, t0 } => (1.0 + dt / t0).powf(-alpha),
            DecayModel::TwoComponent {
                lambda_fast,
                lambda_slow,
                weight_fast,
            } => {
                weight_fast * (-lambda_fast * dt).exp()
                    + (1.0 - weight_fast) * (-lambda_slow * dt).exp()
            }
        }
    }
}

// ============================================================================
// SCORER
// ============================================================================

/// Computes combined scores and lifecycle decisions for records.
///
/// Holds the resolved curve plus the thresholds; shared read-only across the
/// engine. The clamp counter is the only mutable state and is purely a
/// metric.
#[derive(Debug)]
pub struct Scorer {
    model: DecayModel,
    beta: f64,
    forget_threshold: f64,
    promote_threshold: f64,
    promote_use_count: u32,
    promote_window_secs: i64,
    pinned_strength_floor: f64,
    clamped: AtomicU64,
}

impl Scorer {
    /// Build a scorer from validated config.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            model: DecayModel::from_config(config),
            beta: config.beta,
            forget_threshold: config.forget_threshold,
            promote_threshold: config.promote_threshold,
            promote_use_count: config.promote_use_count,
            promote_window_secs: config.promote_window_secs(),
            pinned_strength_floor: config.pinned_strength_floor,
            clamped: AtomicU64::new(0),
        }
    }

    /// The resolved decay model.
    pub fn model(&self) -> &DecayModel {
        &self.model
    }

    /// Combined relevance score of `record` at time `now`.
    ///
    /// A never-touched record scores `retention(dt) * strength`; negative
    /// elapsed time (clock skew) scores as freshly used.
    pub fn score(&self, record: &MemoryRecord, now: i64) -> f64 {
        let mut dt = (now - record.last_used).max(0) as f64;
        if dt > MAX_ELAPSED_SECS {
            dt = MAX_ELAPSED_SECS;
            self.clamped.fetch_add(1, Ordering::Relaxed);
        }
        let use_weight = f64::from(record.use_count.max(1)).powf(self.beta);
        use_weight * self.model.retention(dt) * record.strength
    }

    /// Whether a GC sweep at `now` should remove `record`.
    ///
    /// Records at or above the pinned-strength floor are immune regardless
    /// of score.
    pub fn should_forget(&self, record: &MemoryRecord, now: i64) -> bool {
        record.is_active()
            && record.strength < self.pinned_strength_floor
            && self.score(record, now) < self.forget_threshold
    }

    /// Whether `record` qualifies for promotion at `now`: high score, or
    /// heavy use within the promotion window.
    pub fn should_promote(&self, record: &MemoryRecord, now: i64) -> bool {
        if !record.is_active() {
            return false;
        }
        if self.score(record, now) >= self.promote_threshold {
            return true;
        }
        record.use_count >= self.promote_use_count
            && (now - record.created_at) <= self.promote_window_secs
    }

    /// How many score computations clamped their elapsed time so far.
    pub fn clamp_count(&self) -> u64 {
        self.clamped.load(Ordering::Relaxed)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SaveInput;

    const DAY: i64 = 86_400;

    fn record_at(created: i64, last_used: i64, use_count: u32, strength: f64) -> MemoryRecord {
        let mut record = MemoryRecord::new(
            SaveInput {
                content: "test".to_string(),
                ..Default::default()
            },
            created,
        )
        .unwrap();
        record.last_used = last_used;
        record.use_count = use_count;
        record.strength = strength;
        record
    }

    fn exponential_scorer() -> Scorer {
        Scorer::new(&EngineConfig {
            decay_model: DecayModelKind::Exponential,
            half_life_days: 3.0,
            ..Default::default()
        })
    }

    #[test]
    fn test_exponential_half_life() {
        // One half-life of disuse halves the score exactly.
        let scorer = exponential_scorer();
        let record = record_at(0, 0, 1, 1.0);
        let score = scorer.score(&record, 3 * DAY);
        assert!((score - 0.5).abs() < 1e-6, "score = {score}");
    }

    #[test]
    fn test_power_law_half_life() {
        let scorer = Scorer::new(&EngineConfig {
            decay_model: DecayModelKind::PowerLaw,
            half_life_days: 3.0,
            alpha: 1.1,
            ..Default::default()
        });
        let record = record_at(0, 0, 1, 1.0);
        let score = scorer.score(&record, 3 * DAY);
        assert!((score - 0.5).abs() < 1e-9, "score = {score}");
    }

    #[test]
    fn test_two_component_bounds() {
        let model = DecayModel::TwoComponent {
            lambda_fast: 1.603e-5,
            lambda_slow: 1.147e-6,
            weight_fast: 0.7,
        };
        assert!((model.retention(0.0) - 1.0).abs() < 1e-12);
        let day = model.retention(DAY as f64);
        let month = model.retention(30.0 * DAY as f64);
        assert!(day > month);
        assert!(month > 0.0);
    }

    #[test]
    fn test_zero_use_count_scores_as_one() {
        let scorer = exponential_scorer();
        let mut record = record_at(0, 0, 1, 1.0);
        record.use_count = 0;
        let zero = scorer.score(&record, DAY);
        record.use_count = 1;
        let one = scorer.score(&record, DAY);
        assert_eq!(zero, one);
    }

    #[test]
    fn test_clock_skew_clamps_to_zero() {
        let scorer = exponential_scorer();
        let record = record_at(0, 100, 1, 1.0);
        // now precedes last_used; dt clamps to 0 so retention is 1.0
        assert!((scorer.score(&record, 50) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ancient_elapsed_time_is_clamped_and_counted() {
        let scorer = exponential_scorer();
        let record = record_at(0, 0, 1, 1.0);
        let _ = scorer.score(&record, 100 * 365 * DAY);
        assert_eq!(scorer.clamp_count(), 1);
    }

    #[test]
    fn test_use_count_weighting_is_sublinear() {
        let scorer = exponential_scorer();
        let one = scorer.score(&record_at(0, 0, 1, 1.0), DAY);
        let four = scorer.score(&record_at(0, 0, 4, 1.0), DAY);
        assert!(four > one);
        assert!(four < 4.0 * one);
        // beta = 0.6: 4^0.6 ~ 2.297
        assert!((four / one - 4f64.powf(0.6)).abs() < 1e-9);
    }

    #[test]
    fn test_pinned_record_never_forgotten() {
        let scorer = exponential_scorer();
        // 30 days of disuse decays far below the forget threshold
        let faded = record_at(0, 0, 1, 1.9);
        assert!(scorer.score(&faded, 30 * DAY) < 0.05);
        assert!(!scorer.should_forget(&faded, 30 * DAY));

        let unpinned = record_at(0, 0, 1, 1.0);
        assert!(scorer.should_forget(&unpinned, 30 * DAY));
    }

    #[test]
    fn test_promotion_by_use_count_within_window() {
        let scorer = exponential_scorer();
        // Seven days of decay keeps the score under the 0.65 threshold, so
        // only the use-count path can qualify this record.
        let record = record_at(0, 0, 6, 1.0);
        assert!(scorer.score(&record, 7 * DAY) < 0.65);
        assert!(scorer.should_promote(&record, 7 * DAY));

        // Outside the 14-day window the use-count path closes
        let stale = record_at(0, 0, 5, 1.0);
        assert!(!scorer.should_promote(&stale, 21 * DAY));
    }

    #[test]
    fn test_promotion_by_score() {
        let scorer = exponential_scorer();
        let record = record_at(0, 0, 10, 1.0);
        // 10^0.6 ~ 3.98 with almost no decay clears the 0.65 threshold
        assert!(scorer.should_promote(&record, 60));
    }

    #[test]
    fn test_non_active_records_opt_out() {
        let scorer = exponential_scorer();
        let mut record = record_at(0, 0, 10, 1.0);
        record.status = crate::memory::MemoryStatus::Promoted;
        record.promoted_at = Some(0);
        record.promoted_to = Some("memories/test.md".into());
        assert!(!scorer.should_promote(&record, 60));
        assert!(!scorer.should_forget(&record, 365 * DAY));
    }
}
