//! Ranker: retrieval plus confidence shaping
//!
//! Raw cosine similarities from large embedding models bunch tightly, which
//! reads as "everything is an 82% match". The ranker min-max normalizes the
//! returned set and applies a concave transform into a capped band so the
//! visual spread is readable without implying calibrated probabilities.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use fundmatch_common::{FundingMatch, Opportunity};
use fundmatch_index::{distance_to_similarity, QueryResult, VectorIndex};

use crate::store::{MatchStore, StoreError};

/// Confidence-shaping constants. UX-tuned; carried in configuration.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceCurve {
    pub exponent: f64,
    pub floor: f64,
    pub ceiling: f64,
}

impl Default for ConfidenceCurve {
    fn default() -> Self {
        Self {
            exponent: 0.7,
            floor: 20.0,
            ceiling: 95.0,
        }
    }
}

impl ConfidenceCurve {
    /// Map a normalized [0, 1] score into the confidence band, rounded to
    /// one decimal.
    pub fn apply(&self, normalized: f64) -> f64 {
        // powf of a negative base is NaN; cosine similarity can dip below 0
        let normalized = normalized.clamp(0.0, 1.0);
        let confidence = self.floor + (self.ceiling - self.floor) * normalized.powf(self.exponent);
        let clamped = confidence.clamp(self.floor, self.ceiling);
        (clamped * 10.0).round() / 10.0
    }
}

/// Ranking failures.
#[derive(Debug, Error)]
pub enum RankError {
    #[error("unknown user: {0}")]
    UnknownUser(String),

    #[error(transparent)]
    Index(#[from] fundmatch_index::IndexError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Ranks opportunities for a stored researcher profile.
pub struct Ranker {
    index: Arc<VectorIndex>,
    store: MatchStore,
    curve: ConfidenceCurve,
}

impl Ranker {
    pub fn new(index: Arc<VectorIndex>, store: MatchStore, curve: ConfidenceCurve) -> Self {
        Self {
            index,
            store,
            curve,
        }
    }

    /// Rank the top-`k` opportunities for `user_id` and persist the list.
    ///
    /// An empty opportunities collection yields an empty list, not an
    /// error. A missing user is `UnknownUser`.
    pub async fn rank(
        &self,
        user_id: &str,
        k: usize,
        filter: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<FundingMatch>, RankError> {
        let user = self
            .index
            .researchers
            .get(&[user_id.to_string()])
            .value()
            .and_then(|mut records| records.pop())
            .flatten()
            .filter(|record| !record.embedding.is_empty())
            .ok_or_else(|| RankError::UnknownUser(user_id.to_string()))?;

        let result = self
            .index
            .opportunities
            .query(&user.embedding, k, filter)?
            .unwrap_or(QueryResult::default());

        let matches = self.shape(user_id, &result);

        if let Err(e) = self.store.save(user_id, &matches).await {
            // Ranking still succeeded; the cached list is best-effort
            warn!(user_id, error = %e, "failed to persist ranked matches");
        }

        debug!(user_id, count = matches.len(), "ranked opportunities");
        Ok(matches)
    }

    fn shape(&self, user_id: &str, result: &QueryResult) -> Vec<FundingMatch> {
        if result.ids.is_empty() {
            return Vec::new();
        }

        let similarities: Vec<f64> = result
            .distances
            .iter()
            .map(|&d| distance_to_similarity(d) as f64)
            .collect();

        let s_min = similarities.iter().cloned().fold(f64::INFINITY, f64::min);
        let s_max = similarities.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let range = s_max - s_min;

        let mut matches: Vec<FundingMatch> = result
            .ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let similarity = similarities[i];
                let normalized = if range > f64::EPSILON {
                    (similarity - s_min) / range
                } else {
                    similarity
                };
                let confidence = self.curve.apply(normalized);

                let opportunity: Opportunity =
                    serde_json::from_str(&result.documents[i]).unwrap_or_default();
                let metadata = &result.metadatas[i];

                let title = non_empty(&opportunity.title)
                    .or_else(|| metadata.get("title").cloned())
                    .unwrap_or_else(|| "Unknown".to_string());
                let agency = non_empty(&opportunity.agency)
                    .or_else(|| metadata.get("agency").cloned())
                    .unwrap_or_else(|| "Unknown".to_string());

                FundingMatch {
                    user_id: user_id.to_string(),
                    opportunity_id: id.clone(),
                    title,
                    agency,
                    deadline: opportunity.close_date.to_string(),
                    url: opportunity.url,
                    description: description_preview(&opportunity.description),
                    keywords: opportunity.keywords.into_iter().take(5).collect(),
                    confidence_score: confidence,
                    similarity_score: (similarity * 10_000.0).round() / 10_000.0,
                    created_at: None,
                }
            })
            .collect();

        matches.sort_by(|a, b| {
            b.confidence_score
                .partial_cmp(&a.confidence_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.similarity_score
                        .partial_cmp(&a.similarity_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.title.cmp(&b.title))
        });

        matches
    }
}

fn non_empty(text: &str) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn description_preview(description: &str) -> String {
    let preview: String = description.chars().take(200).collect();
    if description.chars().count() > 200 {
        format!("{preview}...")
    } else {
        preview
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fundmatch_common::CloseDate;
    use tempfile::tempdir;

    const DIM: usize = 2;

    async fn setup(root: &std::path::Path) -> (Arc<VectorIndex>, Ranker) {
        let index = Arc::new(
            VectorIndex::open(
                &root.join("index_researchers"),
                &root.join("index_opportunities"),
                &root.join("index_proposals"),
                DIM,
            )
            .unwrap(),
        );
        let store = MatchStore::open(&root.join("matches.db")).await.unwrap();
        let ranker = Ranker::new(index.clone(), store, ConfidenceCurve::default());
        (index, ranker)
    }

    /// Unit vector at cosine similarity `s` to [1, 0].
    fn vector_with_similarity(s: f32) -> Vec<f32> {
        vec![s, (1.0 - s * s).sqrt()]
    }

    fn opportunity_doc(title: &str) -> String {
        let opp = Opportunity {
            title: title.to_string(),
            agency: "NASA".to_string(),
            close_date: CloseDate::from_label("2099-01-15"),
            ..Default::default()
        };
        serde_json::to_string(&opp).unwrap()
    }

    fn seed_user(index: &VectorIndex, user_id: &str) {
        index
            .researchers
            .upsert(user_id, vec![1.0, 0.0], BTreeMap::new(), "{}".into())
            .unwrap();
    }

    #[tokio::test]
    async fn test_spread_on_bunched_similarities() {
        let tmp = tempdir().unwrap();
        let (index, ranker) = setup(tmp.path()).await;
        seed_user(&index, "u1");

        for (i, s) in [0.82f32, 0.81, 0.805, 0.80, 0.795].iter().enumerate() {
            index
                .opportunities
                .upsert(
                    &format!("opp{i}"),
                    vector_with_similarity(*s),
                    BTreeMap::new(),
                    opportunity_doc(&format!("Opportunity {i}")),
                )
                .unwrap();
        }

        let matches = ranker.rank("u1", 5, None).await.unwrap();
        assert_eq!(matches.len(), 5);

        let confidences: Vec<f64> = matches.iter().map(|m| m.confidence_score).collect();
        assert_eq!(confidences[0], 95.0);
        assert_eq!(confidences[4], 20.0);
        for pair in confidences.windows(2) {
            assert!(pair[0] > pair[1], "not strictly decreasing: {confidences:?}");
        }
        // The middle value sits in the widened center of the band
        assert!(confidences[2] > 50.0 && confidences[2] < 80.0, "{}", confidences[2]);
    }

    #[tokio::test]
    async fn test_confidences_bounded_and_sorted() {
        let tmp = tempdir().unwrap();
        let (index, ranker) = setup(tmp.path()).await;
        seed_user(&index, "u1");

        for (i, s) in [0.9f32, 0.1, 0.5, 0.3, 0.7].iter().enumerate() {
            index
                .opportunities
                .upsert(
                    &format!("opp{i}"),
                    vector_with_similarity(*s),
                    BTreeMap::new(),
                    opportunity_doc(&format!("Opportunity {i}")),
                )
                .unwrap();
        }

        let matches = ranker.rank("u1", 5, None).await.unwrap();
        for m in &matches {
            assert!(m.confidence_score >= 20.0 && m.confidence_score <= 95.0);
        }
        for pair in matches.windows(2) {
            assert!(pair[0].confidence_score >= pair[1].confidence_score);
        }
    }

    #[tokio::test]
    async fn test_identical_similarities_share_confidence() {
        let tmp = tempdir().unwrap();
        let (index, ranker) = setup(tmp.path()).await;
        seed_user(&index, "u1");

        for i in 0..3 {
            index
                .opportunities
                .upsert(
                    &format!("opp{i}"),
                    vector_with_similarity(0.6),
                    BTreeMap::new(),
                    opportunity_doc(&format!("Opportunity {i}")),
                )
                .unwrap();
        }

        let matches = ranker.rank("u1", 3, None).await.unwrap();
        let confidences: Vec<f64> = matches.iter().map(|m| m.confidence_score).collect();
        assert!(confidences.windows(2).all(|p| p[0] == p[1]), "{confidences:?}");
        assert!(confidences[0] >= 20.0 && confidences[0] <= 95.0);

        // Identical confidence and similarity: title ascending decides
        let titles: Vec<&str> = matches.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["Opportunity 0", "Opportunity 1", "Opportunity 2"]);
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let tmp = tempdir().unwrap();
        let (_index, ranker) = setup(tmp.path()).await;

        let result = ranker.rank("nobody", 5, None).await;
        assert!(matches!(result, Err(RankError::UnknownUser(_))));
    }

    #[tokio::test]
    async fn test_empty_opportunities_is_empty_list() {
        let tmp = tempdir().unwrap();
        let (index, ranker) = setup(tmp.path()).await;
        seed_user(&index, "u1");

        let matches = ranker.rank("u1", 5, None).await.unwrap();
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn test_ranked_list_persisted_to_store() {
        let tmp = tempdir().unwrap();
        let (index, ranker) = setup(tmp.path()).await;
        seed_user(&index, "u1");

        index
            .opportunities
            .upsert(
                "opp0",
                vector_with_similarity(0.8),
                BTreeMap::new(),
                opportunity_doc("Stored Opportunity"),
            )
            .unwrap();

        let matches = ranker.rank("u1", 5, None).await.unwrap();
        assert_eq!(matches.len(), 1);

        let store = MatchStore::open(&tmp.path().join("matches.db")).await.unwrap();
        let persisted = store.get("u1", None).await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].title, "Stored Opportunity");
        assert_eq!(persisted[0].deadline, "2099-01-15");
    }

    #[test]
    fn test_curve_guards_negative_normalized() {
        let curve = ConfidenceCurve::default();
        assert_eq!(curve.apply(-0.5), 20.0);
        assert_eq!(curve.apply(0.0), 20.0);
        assert_eq!(curve.apply(1.0), 95.0);
        assert_eq!(curve.apply(2.0), 95.0);
    }
}
