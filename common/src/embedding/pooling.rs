//! Pooling of sub-chunk vectors back into a single embedding.

use crate::config::PoolingStrategy;
use crate::error::PipelineError;

const L2_EPSILON: f32 = 1e-8;
const SMOOTH_DECAY_FACTOR: f32 = 0.9;

/// L2-normalise a vector so cosine similarity equals dot product.
pub fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt() + L2_EPSILON;
    for value in &mut vector {
        *value /= norm;
    }
    vector
}

/// Merge sub-chunk vectors with the configured strategy. `weights` are only
/// consulted for the weighted strategy and are normalised to sum to one.
pub fn pool(
    vectors: &[Vec<f32>],
    strategy: PoolingStrategy,
    weights: Option<&[f32]>,
) -> Result<Vec<f32>, PipelineError> {
    let first = vectors
        .first()
        .ok_or_else(|| PipelineError::Internal("cannot pool zero vectors".to_string()))?;
    let dimension = first.len();
    if vectors.iter().any(|vector| vector.len() != dimension) {
        return Err(PipelineError::Internal(
            "cannot pool vectors of differing dimensionality".to_string(),
        ));
    }

    let pooled = match strategy {
        PoolingStrategy::Mean => {
            let mut out = vec![0.0f32; dimension];
            for vector in vectors {
                for (slot, value) in out.iter_mut().zip(vector) {
                    *slot += value;
                }
            }
            let count = vectors.len() as f32;
            out.iter_mut().for_each(|slot| *slot /= count);
            out
        }
        PoolingStrategy::Max => {
            let mut out = vec![f32::NEG_INFINITY; dimension];
            for vector in vectors {
                for (slot, value) in out.iter_mut().zip(vector) {
                    *slot = slot.max(*value);
                }
            }
            out
        }
        PoolingStrategy::Weighted => {
            let raw: Vec<f32> = match weights {
                Some(weights) if weights.len() == vectors.len() => weights.to_vec(),
                _ => vec![1.0; vectors.len()],
            };
            weighted_sum(vectors, &raw, dimension)
        }
        PoolingStrategy::SmoothDecay => {
            // Exponential decay by sub-chunk index; earlier chunks weigh more.
            let raw: Vec<f32> = (0..vectors.len())
                .map(|i| SMOOTH_DECAY_FACTOR.powi(i as i32))
                .collect();
            weighted_sum(vectors, &raw, dimension)
        }
    };

    Ok(pooled)
}

fn weighted_sum(vectors: &[Vec<f32>], raw_weights: &[f32], dimension: usize) -> Vec<f32> {
    let total: f32 = raw_weights.iter().sum();
    let total = if total > 0.0 { total } else { 1.0 };

    let mut out = vec![0.0f32; dimension];
    for (vector, weight) in vectors.iter().zip(raw_weights) {
        let weight = weight / total;
        for (slot, value) in out.iter_mut().zip(vector) {
            *slot += weight * value;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(vector: &[f32]) -> f32 {
        vector.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    #[test]
    fn mean_of_unit_vectors_stays_in_unit_ball() {
        let vectors = vec![
            l2_normalize(vec![1.0, 0.0, 0.0]),
            l2_normalize(vec![0.0, 1.0, 0.0]),
            l2_normalize(vec![0.0, 0.0, 1.0]),
        ];
        let pooled = pool(&vectors, PoolingStrategy::Mean, None).unwrap();
        assert!(norm(&pooled) <= 1.0 + 1e-6);
    }

    #[test]
    fn weighted_with_normalized_weights_stays_in_unit_ball() {
        let vectors = vec![
            l2_normalize(vec![1.0, 1.0, 0.0]),
            l2_normalize(vec![0.0, 1.0, 1.0]),
        ];
        let pooled = pool(&vectors, PoolingStrategy::Weighted, Some(&[0.25, 0.75])).unwrap();
        assert!(norm(&pooled) <= 1.0 + 1e-6);
    }

    #[test]
    fn max_components_bounded_by_one_for_unit_vectors() {
        let vectors = vec![
            l2_normalize(vec![3.0, 4.0]),
            l2_normalize(vec![-1.0, 2.0]),
        ];
        let pooled = pool(&vectors, PoolingStrategy::Max, None).unwrap();
        assert!(pooled.iter().all(|component| *component <= 1.0 + 1e-6));
    }

    #[test]
    fn smooth_decay_weights_favor_earlier_chunks() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let pooled = pool(&vectors, PoolingStrategy::SmoothDecay, None).unwrap();
        // 1.0 / 1.9 vs 0.9 / 1.9
        assert!(pooled[0] > pooled[1]);
        assert!((pooled[0] + pooled[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn pooling_empty_input_is_an_error() {
        assert!(pool(&[], PoolingStrategy::Mean, None).is_err());
    }

    #[test]
    fn l2_normalized_vector_has_unit_norm() {
        let normalized = l2_normalize(vec![3.0, 4.0]);
        assert!((norm(&normalized) - 1.0).abs() < 1e-4);
    }
}
