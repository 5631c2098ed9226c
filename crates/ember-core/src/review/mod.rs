//! Reinforcement & review
//!
//! Mutation rules for recall events (touch, observe) and the review-priority
//! curve that surfaces memories decaying through the danger zone:
//!
//! - Touch: bump `last_used`/`use_count`, optional strength boost
//! - Observe: touch plus a cross-domain strength boost when the usage
//!   context barely overlaps the record's own tags
//! - Review priority: gaussian bump centered in the danger zone, suppressed
//!   for recently touched records

use crate::config::EngineConfig;
use crate::memory::{MemoryRecord, ObservationEvent};

/// Strength is capped at the top of the record range.
const MAX_STRENGTH: f64 = 2.0;

// ============================================================================
// REINFORCEMENT
// ============================================================================

/// What an applied reinforcement did to the record.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reinforcement {
    /// Strength before the event
    pub old_strength: f64,
    /// Strength after the event
    pub new_strength: f64,
    /// Whether the cross-domain boost fired
    pub cross_domain: bool,
}

/// Apply a plain touch: freshen `last_used`, bump `use_count`, and add the
/// configured boost when requested.
pub fn apply_touch(
    record: &mut MemoryRecord,
    now: i64,
    boost: bool,
    config: &EngineConfig,
) -> Reinforcement {
    let old_strength = record.strength;
    record.last_used = now.max(record.created_at);
    record.use_count = record.use_count.saturating_add(1);
    if boost {
        record.strength = (record.strength + config.touch_boost).min(MAX_STRENGTH);
    }
    Reinforcement {
        old_strength,
        new_strength: record.strength,
        cross_domain: false,
    }
}

/// Apply an observation: a touch plus the cross-domain boost when the
/// context tags barely overlap the record's tags.
///
/// Reuse in a new domain is stronger evidence of durable value than
/// in-domain reuse. An observation with no context tags carries no domain
/// signal and never triggers the boost.
pub fn apply_observation(
    record: &mut MemoryRecord,
    event: &ObservationEvent,
    config: &EngineConfig,
) -> Reinforcement {
    let mut outcome = apply_touch(record, event.observed_at, false, config);

    let cross_domain = !event.context_tags.is_empty()
        && jaccard(&event.context_tags, &record.tags) < config.cross_domain_threshold;
    if cross_domain {
        record.strength = (record.strength + config.cross_domain_boost).min(MAX_STRENGTH);
        outcome.new_strength = record.strength;
        outcome.cross_domain = true;
    }
    outcome
}

/// Jaccard similarity of two tag sets. Two empty sets are identical (1.0).
pub fn jaccard(a: &[String], b: &[String]) -> f64 {
    use std::collections::HashSet;
    let a: HashSet<&str> = a.iter().map(String::as_str).collect();
    let b: HashSet<&str> = b.iter().map(String::as_str).collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

// ============================================================================
// REVIEW PRIORITY
// ============================================================================

/// Scores records for "worth revisiting before it fades" ranking.
#[derive(Debug, Clone)]
pub struct ReviewScorer {
    center: f64,
    sigma: f64,
    recency_window_secs: i64,
    blend_ratio: f64,
}

impl ReviewScorer {
    /// Build from the configured danger zone.
    pub fn new(config: &EngineConfig) -> Self {
        let [low, high] = config.review_danger_zone;
        Self {
            center: (low + high) / 2.0,
            sigma: (high - low) / 2.0,
            recency_window_secs: config.review_recency_window_secs,
            blend_ratio: config.review_blend_ratio,
        }
    }

    /// Review priority of a record whose combined score is `score`.
    ///
    /// Zero outside two sigma of the zone center and for records touched
    /// within the recency window; peaks at the zone center.
    pub fn priority(&self, score: f64, last_used: i64, now: i64) -> f64 {
        if now - last_used < self.recency_window_secs {
            return 0.0;
        }
        let deviation = (score - self.center).abs();
        if deviation > 2.0 * self.sigma {
            return 0.0;
        }
        (-(deviation * deviation) / (2.0 * self.sigma * self.sigma)).exp()
    }

    /// Number of top-`k` result slots review candidates may claim.
    pub fn blend_slots(&self, k: usize) -> usize {
        (self.blend_ratio * k as f64).ceil() as usize
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SaveInput;

    fn record_with_tags(tags: &[&str]) -> MemoryRecord {
        MemoryRecord::new(
            SaveInput {
                content: "JWT validation requires the issuer claim".to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                ..Default::default()
            },
            1_000,
        )
        .unwrap()
    }

    #[test]
    fn test_touch_updates_usage() {
        let mut record = record_with_tags(&["security"]);
        let outcome = apply_touch(&mut record, 5_000, false, &EngineConfig::default());
        assert_eq!(record.last_used, 5_000);
        assert_eq!(record.use_count, 2);
        assert_eq!(outcome.old_strength, outcome.new_strength);
    }

    #[test]
    fn test_touch_boost_caps_at_two() {
        let config = EngineConfig::default();
        let mut record = record_with_tags(&["security"]);
        record.strength = 1.95;
        apply_touch(&mut record, 5_000, true, &config);
        assert_eq!(record.strength, 2.0);
    }

    #[test]
    fn test_touch_never_violates_created_at_invariant() {
        let mut record = record_with_tags(&["security"]);
        // Skewed clock behind created_at
        apply_touch(&mut record, 500, false, &EngineConfig::default());
        assert_eq!(record.last_used, record.created_at);
        record.validate().unwrap();
    }

    #[test]
    fn test_cross_domain_boost_fires_on_disjoint_context() {
        let config = EngineConfig::default();
        let mut record = record_with_tags(&["security", "jwt"]);
        let event = ObservationEvent {
            memory_id: record.id.clone(),
            observed_at: 5_000,
            context_tags: vec!["api".into(), "frontend".into()],
        };
        let outcome = apply_observation(&mut record, &event, &config);
        assert!(outcome.cross_domain);
        assert!((record.strength - 1.15).abs() < 1e-12);
        assert_eq!(record.use_count, 2);
        assert_eq!(record.last_used, 5_000);
    }

    #[test]
    fn test_in_domain_observation_does_not_boost() {
        let config = EngineConfig::default();
        let mut record = record_with_tags(&["security", "jwt"]);
        let event = ObservationEvent {
            memory_id: record.id.clone(),
            observed_at: 5_000,
            context_tags: vec!["security".into(), "jwt".into(), "api".into()],
        };
        // Jaccard 2/3 is comfortably above the 0.3 threshold
        let outcome = apply_observation(&mut record, &event, &config);
        assert!(!outcome.cross_domain);
        assert_eq!(record.strength, 1.0);
    }

    #[test]
    fn test_empty_context_carries_no_signal() {
        let config = EngineConfig::default();
        let mut record = record_with_tags(&["security"]);
        let event = ObservationEvent {
            memory_id: record.id.clone(),
            observed_at: 5_000,
            context_tags: vec![],
        };
        let outcome = apply_observation(&mut record, &event, &config);
        assert!(!outcome.cross_domain);
        assert_eq!(record.strength, 1.0);
    }

    #[test]
    fn test_jaccard() {
        let a = vec!["x".to_string(), "y".to_string()];
        let b = vec!["y".to_string(), "z".to_string()];
        assert!((jaccard(&a, &b) - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(jaccard(&[], &[]), 1.0);
        assert_eq!(jaccard(&a, &[]), 0.0);
    }

    #[test]
    fn test_priority_peaks_at_zone_center() {
        let scorer = ReviewScorer::new(&EngineConfig::default());
        let peak = scorer.priority(0.25, 0, 100_000);
        let edge = scorer.priority(0.35, 0, 100_000);
        let out = scorer.priority(0.9, 0, 100_000);
        assert!((peak - 1.0).abs() < 1e-12);
        assert!(edge < peak && edge > 0.0);
        assert_eq!(out, 0.0);
        assert_eq!(scorer.priority(0.0, 0, 100_000), 0.0);
    }

    #[test]
    fn test_recently_touched_suppressed() {
        let scorer = ReviewScorer::new(&EngineConfig::default());
        assert_eq!(scorer.priority(0.25, 99_000, 100_000), 0.0);
        assert!(scorer.priority(0.25, 90_000, 100_000) > 0.0);
    }

    #[test]
    fn test_blend_slots_rounds_up() {
        let scorer = ReviewScorer::new(&EngineConfig::default());
        assert_eq!(scorer.blend_slots(10), 3);
        assert_eq!(scorer.blend_slots(1), 1);
        assert_eq!(scorer.blend_slots(0), 0);
    }
}
