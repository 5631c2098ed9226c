//! Clustering
//!
//! Groups near-duplicate memories for consolidation review:
//!
//! 1. Normalize content and auto-cluster exact duplicates by hash
//! 2. Score remaining pairs under the configured similarity strategy
//! 3. Link pairs at or above the threshold, strongest edges first, capping
//!    cluster size by refusing the weakest links
//! 4. Emit single-linkage components with their cohesion and a
//!    merge/review/keep classification

mod minhash;

pub use minhash::{MinHashSignature, MinHasher, SHINGLE_LEN, SIGNATURE_LEN};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::embeddings::cosine_similarity;
use crate::error::Result;
use crate::memory::{MemoryRecord, content_hash, normalize_content};
use crate::review::jaccard;

// ============================================================================
// OPTIONS & OUTPUT TYPES
// ============================================================================

/// How pairwise similarity is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityStrategy {
    /// Embedding cosine when both sides have vectors, MinHash otherwise
    #[default]
    Similarity,
    /// Jaccard over tag sets
    TagOverlap,
    /// 1 when created within the temporal window, else 0
    Temporal,
    /// `0.6 * semantic + 0.25 * tag + 0.15 * temporal`
    Hybrid,
}

/// Clustering parameters, defaulted from [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    pub strategy: SimilarityStrategy,
    pub link_threshold: f64,
    pub max_cluster_size: usize,
    pub temporal_window_secs: i64,
}

impl ClusterOptions {
    /// Options from the engine config with the given strategy.
    pub fn from_config(config: &EngineConfig, strategy: SimilarityStrategy) -> Self {
        Self {
            strategy,
            link_threshold: config.cluster_link_threshold,
            max_cluster_size: config.cluster_max_size,
            temporal_window_secs: config.cluster_temporal_window_secs,
        }
    }
}

/// What to do with a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterClass {
    /// Cohesion >= 0.9: safe to merge without review
    AutoMerge,
    /// Cohesion >= 0.75: surface for review
    Review,
    /// Below review cohesion: leave alone
    KeepSeparate,
}

impl ClusterClass {
    fn from_cohesion(cohesion: f64) -> Self {
        if cohesion >= 0.9 {
            ClusterClass::AutoMerge
        } else if cohesion >= 0.75 {
            ClusterClass::Review
        } else {
            ClusterClass::KeepSeparate
        }
    }
}

/// One cluster of near-duplicate records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Identifier valid until the next clustering run
    pub id: String,
    /// Member record ids
    pub member_ids: Vec<String>,
    /// Mean intra-cluster similarity
    pub cohesion: f64,
    /// Merge/review/keep decision
    pub classification: ClusterClass,
}

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Clustering-grade normalization: the record normalization plus URL query
/// strings stripped, so tracking parameters do not defeat duplicate
/// detection.
pub fn normalize_for_clustering(content: &str) -> String {
    let normalized = normalize_content(content);
    normalized
        .split(' ')
        .map(|token| {
            if token.starts_with("http://") || token.starts_with("https://") {
                token.split('?').next().unwrap_or(token)
            } else {
                token
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// CLUSTERING PIPELINE
// ============================================================================

/// Cluster `records` for consolidation review.
///
/// Only clusters with at least two members are returned. The cancellation
/// token is checked once per pairwise-similarity row.
pub fn cluster_records(
    records: &[MemoryRecord],
    options: &ClusterOptions,
    cancel: &CancelToken,
) -> Result<Vec<Cluster>> {
    // Exact duplicates short-circuit the pairwise pass entirely.
    let mut by_hash: HashMap<u64, Vec<usize>> = HashMap::new();
    for (i, record) in records.iter().enumerate() {
        let hash = content_hash(&normalize_for_clustering(&record.content));
        by_hash.entry(hash).or_default().push(i);
    }

    let mut clusters: Vec<Cluster> = Vec::new();
    let mut remainder: Vec<usize> = Vec::new();
    for indices in by_hash.into_values() {
        if indices.len() > 1 {
            clusters.push(build_cluster(records, &indices, 1.0));
        } else {
            remainder.extend(indices);
        }
    }

    // Pairwise similarity over the remainder.
    let hasher = MinHasher::default();
    let signatures: Vec<MinHashSignature> = remainder
        .iter()
        .map(|&i| hasher.signature(&normalize_for_clustering(&records[i].content)))
        .collect();

    let n = remainder.len();
    let mut sims: HashMap<(usize, usize), f64> = HashMap::new();
    let mut edges: Vec<(f64, usize, usize)> = Vec::new();
    for a in 0..n {
        cancel.check()?;
        for b in (a + 1)..n {
            let sim = pair_similarity(
                &records[remainder[a]],
                &records[remainder[b]],
                &signatures[a],
                &signatures[b],
                options,
            );
            sims.insert((a, b), sim);
            if sim >= options.link_threshold {
                edges.push((sim, a, b));
            }
        }
    }

    // Strongest links first; a link that would blow the size cap is the
    // weakest in its would-be cluster and is dropped.
    edges.sort_by(|x, y| y.0.partial_cmp(&x.0).unwrap_or(std::cmp::Ordering::Equal));
    let mut dsu = DisjointSet::new(n);
    for (_, a, b) in edges {
        if dsu.size(a) + dsu.size(b) <= options.max_cluster_size {
            dsu.union(a, b);
        }
    }

    let mut components: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..n {
        components.entry(dsu.find(i)).or_default().push(i);
    }

    for members in components.into_values() {
        if members.len() < 2 {
            continue;
        }
        let cohesion = mean_pairwise(&members, &sims);
        let indices: Vec<usize> = members.iter().map(|&i| remainder[i]).collect();
        clusters.push(build_cluster(records, &indices, cohesion));
    }

    // Stable output order: largest and tightest first, then by first member.
    clusters.sort_by(|x, y| {
        (y.member_ids.len(), y.cohesion)
            .partial_cmp(&(x.member_ids.len(), x.cohesion))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| x.member_ids.cmp(&y.member_ids))
    });
    for (i, cluster) in clusters.iter_mut().enumerate() {
        cluster.id = format!("c-{}", i + 1);
    }
    Ok(clusters)
}

fn build_cluster(records: &[MemoryRecord], indices: &[usize], cohesion: f64) -> Cluster {
    let mut member_ids: Vec<String> = indices.iter().map(|&i| records[i].id.clone()).collect();
    member_ids.sort();
    Cluster {
        id: String::new(),
        member_ids,
        cohesion,
        classification: ClusterClass::from_cohesion(cohesion),
    }
}

fn pair_similarity(
    a: &MemoryRecord,
    b: &MemoryRecord,
    sig_a: &MinHashSignature,
    sig_b: &MinHashSignature,
    options: &ClusterOptions,
) -> f64 {
    let semantic = || match (&a.embed, &b.embed) {
        (Some(va), Some(vb)) => f64::from(cosine_similarity(va, vb)).clamp(0.0, 1.0),
        _ => sig_a.estimate_jaccard(sig_b),
    };
    let tag = || jaccard(&a.tags, &b.tags);
    let temporal = || {
        if (a.created_at - b.created_at).abs() < options.temporal_window_secs {
            1.0
        } else {
            0.0
        }
    };

    match options.strategy {
        SimilarityStrategy::Similarity => semantic(),
        SimilarityStrategy::TagOverlap => tag(),
        SimilarityStrategy::Temporal => temporal(),
        SimilarityStrategy::Hybrid => 0.6 * semantic() + 0.25 * tag() + 0.15 * temporal(),
    }
}

fn mean_pairwise(members: &[usize], sims: &HashMap<(usize, usize), f64>) -> f64 {
    let mut total = 0.0;
    let mut pairs = 0usize;
    for (i, &a) in members.iter().enumerate() {
        for &b in &members[i + 1..] {
            let key = if a < b { (a, b) } else { (b, a) };
            if let Some(sim) = sims.get(&key) {
                total += sim;
                pairs += 1;
            }
        }
    }
    if pairs == 0 { 0.0 } else { total / pairs as f64 }
}

// ============================================================================
// DISJOINT SET
// ============================================================================

struct DisjointSet {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn size(&mut self, x: usize) -> usize {
        let root = self.find(x);
        self.size[root]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
    }
}

// ============================================================================
// TESTS
// ============================================================================
