//! Retrieval quality metrics over a ranked result list and a set of
//! ground-truth relevant ids. Ranks are 0-based; ids without a relevance
//! label count as irrelevant.

use std::collections::{BTreeMap, HashSet};

use common::config::MetricKind;

/// Compute the requested metrics at cutoff `k`.
pub fn compute_metrics(
    metrics: &[MetricKind],
    retrieved: &[String],
    relevant: &[String],
    k: usize,
) -> BTreeMap<String, f64> {
    let relevant_set: HashSet<&str> = relevant.iter().map(String::as_str).collect();
    let top_k: Vec<&str> = retrieved.iter().take(k).map(String::as_str).collect();
    let hits = top_k
        .iter()
        .filter(|id| relevant_set.contains(**id))
        .count();

    let mut scores = BTreeMap::new();
    for metric in metrics {
        let value = match metric {
            MetricKind::Precision => {
                if k == 0 {
                    0.0
                } else {
                    hits as f64 / k as f64
                }
            }
            MetricKind::Recall => {
                if relevant_set.is_empty() {
                    0.0
                } else {
                    hits as f64 / relevant_set.len() as f64
                }
            }
            // Hit when any relevant id appears in the top-k.
            MetricKind::HitRate => {
                if hits > 0 {
                    1.0
                } else {
                    0.0
                }
            }
            MetricKind::Mrr => top_k
                .iter()
                .position(|id| relevant_set.contains(*id))
                .map(|rank| 1.0 / (rank as f64 + 1.0))
                .unwrap_or(0.0),
            MetricKind::Ndcg => ndcg(&top_k, &relevant_set, k),
        };
        scores.insert(metric_label(*metric).to_string(), value);
    }
    scores
}

fn ndcg(top_k: &[&str], relevant: &HashSet<&str>, k: usize) -> f64 {
    let dcg: f64 = top_k
        .iter()
        .enumerate()
        .filter(|(_, id)| relevant.contains(**id))
        .map(|(rank, _)| 1.0 / ((rank as f64 + 2.0).log2()))
        .sum();

    let ideal_hits = relevant.len().min(k);
    let idcg: f64 = (0..ideal_hits)
        .map(|rank| 1.0 / ((rank as f64 + 2.0).log2()))
        .sum();

    if idcg > 0.0 {
        dcg / idcg
    } else {
        0.0
    }
}

pub fn metric_label(metric: MetricKind) -> &'static str {
    match metric {
        MetricKind::Precision => "precision",
        MetricKind::Recall => "recall",
        MetricKind::HitRate => "hit-rate",
        MetricKind::Mrr => "mrr",
        MetricKind::Ndcg => "ndcg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    const ALL: [MetricKind; 5] = [
        MetricKind::Precision,
        MetricKind::Recall,
        MetricKind::HitRate,
        MetricKind::Mrr,
        MetricKind::Ndcg,
    ];

    #[test]
    fn perfect_ranking_scores_one_everywhere() {
        let retrieved = ids(&["a", "b"]);
        let relevant = ids(&["a", "b"]);
        let scores = compute_metrics(&ALL, &retrieved, &relevant, 2);

        assert!((scores["precision"] - 1.0).abs() < 1e-9);
        assert!((scores["recall"] - 1.0).abs() < 1e-9);
        assert!((scores["hit-rate"] - 1.0).abs() < 1e-9);
        assert!((scores["mrr"] - 1.0).abs() < 1e-9);
        assert!((scores["ndcg"] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn no_relevant_results_scores_zero() {
        let retrieved = ids(&["x", "y", "z"]);
        let relevant = ids(&["a"]);
        let scores = compute_metrics(&ALL, &retrieved, &relevant, 3);
        assert!(scores.values().all(|value| *value == 0.0));
    }

    #[test]
    fn single_hit_at_rank_one() {
        // Relevant id at 0-based rank 1 of 4 retrieved, two relevant total.
        let retrieved = ids(&["x", "a", "y", "z"]);
        let relevant = ids(&["a", "b"]);
        let scores = compute_metrics(&ALL, &retrieved, &relevant, 4);

        assert!((scores["precision"] - 0.25).abs() < 1e-9);
        assert!((scores["recall"] - 0.5).abs() < 1e-9);
        assert!((scores["hit-rate"] - 1.0).abs() < 1e-9);
        assert!((scores["mrr"] - 0.5).abs() < 1e-9);

        // DCG = 1/log2(3); IDCG = 1/log2(2) + 1/log2(3)
        let dcg = 1.0 / 3.0f64.log2();
        let idcg = 1.0 + 1.0 / 3.0f64.log2();
        assert!((scores["ndcg"] - dcg / idcg).abs() < 1e-9);
    }

    #[test]
    fn cutoff_limits_what_counts() {
        let retrieved = ids(&["x", "y", "a"]);
        let relevant = ids(&["a"]);
        let scores = compute_metrics(&ALL, &retrieved, &relevant, 2);
        assert_eq!(scores["hit-rate"], 0.0);
        assert_eq!(scores["mrr"], 0.0);

        let wider = compute_metrics(&ALL, &retrieved, &relevant, 3);
        assert_eq!(wider["hit-rate"], 1.0);
        assert!((wider["mrr"] - (1.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn only_requested_metrics_are_computed() {
        let scores = compute_metrics(
            &[MetricKind::Precision],
            &ids(&["a"]),
            &ids(&["a"]),
            1,
        );
        assert_eq!(scores.len(), 1);
        assert!(scores.contains_key("precision"));
    }
}
