//! Engine configuration
//!
//! One resolved parameter set covering decay, lifecycle thresholds, review,
//! clustering, and storage. Constructed once, validated once, then shared
//! read-only by every subsystem.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Seconds per day, used whenever a knob is expressed in days.
pub const SECONDS_PER_DAY: f64 = 86_400.0;

// ============================================================================
// DECAY MODEL SELECTION
// ============================================================================

/// Which forgetting curve drives relevance scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecayModelKind {
    /// `exp(-lambda * dt)`
    Exponential,
    /// `(1 + dt/t0)^(-alpha)` - heavier tail, the default
    #[default]
    PowerLaw,
    /// Weighted sum of a fast and a slow exponential
    TwoComponent,
}

impl DecayModelKind {
    /// String name used in config files and stats output.
    pub fn as_str(&self) -> &'static str {
        match self {
            DecayModelKind::Exponential => "exponential",
            DecayModelKind::PowerLaw => "power_law",
            DecayModelKind::TwoComponent => "two_component",
        }
    }
}

impl std::fmt::Display for DecayModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DecayModelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exponential" => Ok(DecayModelKind::Exponential),
            "power_law" | "powerlaw" => Ok(DecayModelKind::PowerLaw),
            "two_component" | "twocomponent" => Ok(DecayModelKind::TwoComponent),
            _ => Err(format!("Unknown decay model: {s}")),
        }
    }
}

// ============================================================================
// ENGINE CONFIG
// ============================================================================

/// Resolved engine parameters.
///
/// Defaults follow the shipped configuration; every field can be overridden
/// before the engine is constructed. [`EngineConfig::validate`] rejects
/// out-of-range combinations before anything touches disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory for the JSONL store and index files.
    /// `None` resolves to the platform data dir at engine construction.
    pub storage_root: Option<PathBuf>,
    /// Long-term vault directory (markdown notes). `None` disables promotion.
    pub vault_root: Option<PathBuf>,
    /// Subdirectory of the vault receiving promoted notes.
    pub promotion_subdir: String,

    // ========== Decay ==========
    /// Forgetting-curve family.
    pub decay_model: DecayModelKind,
    /// Half-life in days; derives lambda (exponential) or t0 (power law).
    pub half_life_days: f64,
    /// Power-law shape parameter.
    pub alpha: f64,
    /// Two-component fast decay rate (per second).
    pub tc_lambda_fast: f64,
    /// Two-component slow decay rate (per second).
    pub tc_lambda_slow: f64,
    /// Two-component weight on the fast term.
    pub tc_weight_fast: f64,
    /// Use-count exponent (sub-linear weighting of repeated access).
    pub beta: f64,

    // ========== Lifecycle thresholds ==========
    /// Score below which an active record is eligible for GC.
    pub forget_threshold: f64,
    /// Score at or above which a record qualifies for promotion.
    pub promote_threshold: f64,
    /// Use count that qualifies for promotion inside the time window.
    pub promote_use_count: u32,
    /// Promotion window in days for the use-count path.
    pub promote_time_window_days: f64,
    /// Strength at or above which a record is immune to GC.
    pub pinned_strength_floor: f64,

    // ========== Reinforcement & review ==========
    /// Strength added by an explicit boost on touch.
    pub touch_boost: f64,
    /// Strength added on cross-domain reuse.
    pub cross_domain_boost: f64,
    /// Jaccard similarity below which an observation counts as cross-domain.
    pub cross_domain_threshold: f64,
    /// Fraction of search slots reserved for review candidates.
    pub review_blend_ratio: f64,
    /// Score band where review is most valuable: [low, high].
    pub review_danger_zone: [f64; 2],
    /// Seconds after a touch during which review priority is suppressed.
    pub review_recency_window_secs: i64,

    // ========== Clustering ==========
    /// Similarity at or above which two records are linked.
    pub cluster_link_threshold: f64,
    /// Largest allowed cluster; weakest edges are cut beyond it.
    pub cluster_max_size: usize,
    /// Seconds within which two records count as temporally adjacent.
    pub cluster_temporal_window_secs: i64,

    // ========== Search ==========
    /// Rank weight applied to long-term vault results.
    pub ltm_source_weight: f64,

    // ========== Maintenance ==========
    /// Tombstone ratio above which compaction is recommended.
    pub compaction_tombstone_ratio: f64,
    /// Background maintenance cadence in seconds.
    pub maintenance_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_root: None,
            vault_root: None,
            promotion_subdir: "memories".to_string(),
            decay_model: DecayModelKind::PowerLaw,
            half_life_days: 3.0,
            alpha: 1.1,
            tc_lambda_fast: 1.603e-5,
            tc_lambda_slow: 1.147e-6,
            tc_weight_fast: 0.7,
            beta: 0.6,
            forget_threshold: 0.05,
            promote_threshold: 0.65,
            promote_use_count: 5,
            promote_time_window_days: 14.0,
            pinned_strength_floor: 1.8,
            touch_boost: 0.1,
            cross_domain_boost: 0.15,
            cross_domain_threshold: 0.3,
            review_blend_ratio: 0.3,
            review_danger_zone: [0.15, 0.35],
            review_recency_window_secs: 3_600,
            cluster_link_threshold: 0.83,
            cluster_max_size: 12,
            cluster_temporal_window_secs: 3_600,
            ltm_source_weight: 0.8,
            compaction_tombstone_ratio: 0.3,
            maintenance_interval_secs: 3_600,
        }
    }
}

impl EngineConfig {
    /// Reject parameter combinations that would make scoring or lifecycle
    /// decisions meaningless.
    pub fn validate(&self) -> Result<()> {
        fn ensure(cond: bool, msg: &str) -> Result<()> {
            if cond {
                Ok(())
            } else {
                Err(EngineError::Invalid(msg.to_string()))
            }
        }

        ensure(self.half_life_days > 0.0, "half_life_days must be > 0")?;
        ensure(self.alpha > 0.0, "alpha must be > 0")?;
        ensure(
            self.tc_lambda_fast > 0.0 && self.tc_lambda_slow > 0.0,
            "two-component lambdas must be > 0",
        )?;
        ensure(
            (0.0..=1.0).contains(&self.tc_weight_fast),
            "tc_weight_fast must be in [0, 1]",
        )?;
        ensure((0.0..=2.0).contains(&self.beta), "beta must be in [0, 2]")?;
        ensure(
            self.forget_threshold >= 0.0 && self.forget_threshold < self.promote_threshold,
            "forget_threshold must be >= 0 and below promote_threshold",
        )?;
        ensure(
            (0.0..=2.0).contains(&self.pinned_strength_floor),
            "pinned_strength_floor must be in [0, 2]",
        )?;
        ensure(
            (0.0..=1.0).contains(&self.cross_domain_threshold),
            "cross_domain_threshold must be in [0, 1]",
        )?;
        ensure(
            (0.0..=1.0).contains(&self.review_blend_ratio),
            "review_blend_ratio must be in [0, 1]",
        )?;
        ensure(
            self.review_danger_zone[0] < self.review_danger_zone[1],
            "review_danger_zone must be a non-empty interval",
        )?;
        ensure(
            (0.0..=1.0).contains(&self.cluster_link_threshold),
            "cluster_link_threshold must be in [0, 1]",
        )?;
        ensure(self.cluster_max_size >= 2, "cluster_max_size must be >= 2")?;
        ensure(
            (0.0..=1.0).contains(&self.compaction_tombstone_ratio),
            "compaction_tombstone_ratio must be in [0, 1]",
        )?;
        Ok(())
    }

    /// Half-life converted to seconds.
    pub fn half_life_secs(&self) -> f64 {
        self.half_life_days * SECONDS_PER_DAY
    }

    /// Exponential decay rate derived from the half-life: `ln 2 / H`.
    pub fn exponential_lambda(&self) -> f64 {
        std::f64::consts::LN_2 / self.half_life_secs()
    }

    /// Power-law time scale derived so that retention at the half-life is
    /// exactly 0.5: `t0 = H / (2^(1/alpha) - 1)`.
    pub fn power_law_t0(&self) -> f64 {
        self.half_life_secs() / (2f64.powf(1.0 / self.alpha) - 1.0)
    }

    /// Promotion window converted to seconds.
    pub fn promote_window_secs(&self) -> i64 {
        (self.promote_time_window_days * SECONDS_PER_DAY) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_decay_model_roundtrip() {
        for kind in [
            DecayModelKind::Exponential,
            DecayModelKind::PowerLaw,
            DecayModelKind::TwoComponent,
        ] {
            assert_eq!(kind.as_str().parse::<DecayModelKind>().unwrap(), kind);
        }
        assert!("linear".parse::<DecayModelKind>().is_err());
    }

    #[test]
    fn test_power_law_t0_hits_half_life() {
        let config = EngineConfig {
            half_life_days: 3.0,
            alpha: 1.1,
            ..Default::default()
        };
        let t0 = config.power_law_t0();
        let h = config.half_life_secs();
        let retention = (1.0 + h / t0).powf(-config.alpha);
        assert!((retention - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let config = EngineConfig {
            forget_threshold: 0.9,
            promote_threshold: 0.65,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_beta() {
        let config = EngineConfig {
            beta: 2.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
