//! Similarity matching and thresholding.
//!
//! A candidate matches when ANY of its faces matches ANY reference face: its
//! pairwise scores are reduced to the single most favorable one before the
//! threshold applies.

use std::cmp::Ordering;
use std::collections::HashSet;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::Embedding;

/// How two embeddings are scored. Distance and similarity thresholds are not
/// interchangeable; a deployment picks one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// `||r - c||₂`, lower is more similar.
    Euclidean,
    /// `r · c`, higher is more similar. Cosine when embeddings are normalized.
    #[default]
    #[value(aliases = ["inner_product", "cosine"])]
    InnerProduct,
}

impl Metric {
    pub fn default_threshold(self) -> f32 {
        match self {
            Metric::Euclidean => 0.6,
            Metric::InnerProduct => 0.7,
        }
    }

    /// Score a pair of equal-dimension embeddings.
    fn score(self, r: &Embedding, c: &Embedding) -> f32 {
        let score = match self {
            Metric::Euclidean => r.euclidean_distance(c),
            Metric::InnerProduct => r.inner_product(c),
        };
        score.unwrap_or(f32::NAN)
    }

    /// Keep the more favorable of two scores. A finite score beats NaN and
    /// infinity.
    fn best(self, a: f32, b: f32) -> f32 {
        match (a.is_finite(), b.is_finite()) {
            (true, false) => a,
            (false, true) => b,
            _ => match self {
                Metric::Euclidean => a.min(b),
                Metric::InnerProduct => a.max(b),
            },
        }
    }

    /// Non-finite scores never match.
    pub fn accepts(self, score: f32, threshold: f32) -> bool {
        score.is_finite()
            && match self {
                Metric::Euclidean => score < threshold,
                Metric::InnerProduct => score >= threshold,
            }
    }

    /// Most similar first.
    fn rank_order(self, a: f32, b: f32) -> Ordering {
        match self {
            Metric::Euclidean => a.total_cmp(&b),
            Metric::InnerProduct => b.total_cmp(&a),
        }
    }
}

/// Metric plus the threshold that goes with it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchPolicy {
    pub metric: Metric,
    pub threshold: f32,
}

impl MatchPolicy {
    pub fn new(metric: Metric, threshold: f32) -> Self {
        Self { metric, threshold }
    }
}

impl From<Metric> for MatchPolicy {
    fn from(metric: Metric) -> Self {
        Self::new(metric, metric.default_threshold())
    }
}

/// An identifier (URL, path, photo key) and the faces found in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(alias = "url")]
    pub id: String,
    #[serde(default, alias = "encoding", alias = "encodings")]
    pub embeddings: Vec<Embedding>,
}

impl Candidate {
    pub fn new(id: impl Into<String>, embeddings: Vec<Embedding>) -> Self {
        Self {
            id: id.into(),
            embeddings,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub id: String,
    pub score: f32,
    /// 1-based position in the result list.
    pub rank: usize,
}

/// A candidate left out of matching because its data could not be compared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedCandidate {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    #[serde(rename = "matched")]
    pub matches: Vec<MatchResult>,
    pub skipped: Vec<SkippedCandidate>,
}

/// Rank the candidates whose best score against `reference` passes the
/// policy threshold.
///
/// Fails with [`Error::NoFaceDetected`] on an empty reference. A candidate
/// with an embedding of the wrong dimensionality is skipped and reported in
/// [`MatchOutcome::skipped`] unless another candidate with the same id
/// matched; candidates without embeddings are ignored.
pub fn match_candidates(
    reference: &[Embedding],
    candidates: &[Candidate],
    policy: MatchPolicy,
) -> Result<MatchOutcome> {
    let dim = reference.first().ok_or(Error::NoFaceDetected)?.dim();
    if let Some(odd) = reference.iter().find(|e| e.dim() != dim) {
        return Err(Error::DimensionMismatch {
            expected: dim,
            actual: odd.dim(),
        });
    }
    if !policy.threshold.is_finite() {
        return Err(Error::InvalidInput(format!(
            "threshold must be a finite number, got {}",
            policy.threshold
        )));
    }

    let metric = policy.metric;
    let mut scored: Vec<(&str, f32)> = Vec::new();
    let mut skipped = Vec::new();

    for candidate in candidates {
        match best_score(reference, dim, &candidate.embeddings, metric) {
            Ok(Some(score)) if metric.accepts(score, policy.threshold) => {
                scored.push((candidate.id.as_str(), score))
            }
            Ok(Some(score)) => debug!("{}: best score {:.4} rejected", candidate.id, score),
            Ok(None) => debug!("{}: no embeddings, skipping", candidate.id),
            Err(e) => {
                warn!("skipping candidate {}: {}", candidate.id, e);
                skipped.push(SkippedCandidate {
                    id: candidate.id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    // Stable: equal scores keep candidate order.
    scored.sort_by(|a, b| metric.rank_order(a.1, b.1));

    let mut seen = HashSet::new();
    let matches: Vec<MatchResult> = scored
        .into_iter()
        .filter(|(id, _)| seen.insert(*id))
        .enumerate()
        .map(|(idx, (id, score))| MatchResult {
            id: id.to_string(),
            score,
            rank: idx + 1,
        })
        .collect();

    // An identifier is reported once: a match hides skips under the same id.
    skipped.retain(|s: &SkippedCandidate| !seen.contains(s.id.as_str()));

    if !skipped.is_empty() {
        warn!("{} candidate(s) skipped for incompatible embeddings", skipped.len());
    }
    Ok(MatchOutcome { matches, skipped })
}

/// Best-of reduction over every (reference, candidate) pair. `None` when the
/// candidate has no embeddings.
fn best_score(
    reference: &[Embedding],
    dim: usize,
    embeddings: &[Embedding],
    metric: Metric,
) -> Result<Option<f32>> {
    if let Some(odd) = embeddings.iter().find(|e| e.dim() != dim) {
        return Err(Error::DimensionMismatch {
            expected: dim,
            actual: odd.dim(),
        });
    }
    Ok(reference
        .iter()
        .flat_map(|r| embeddings.iter().map(move |c| metric.score(r, c)))
        .reduce(|a, b| metric.best(a, b)))
}
