//! PCA projection with a train-once / load-many lifecycle.
//!
//! The fitted transform is persisted as a JSON artifact `{model, meta}`;
//! query-time reduction must load the exact artifact written at ingest so
//! stored and query vectors live in the same space.

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Axis};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{config::DimensionReduction, error::PipelineError};

use super::super::pooling::l2_normalize;

pub const ARTIFACT_VERSION: u32 = 1;

const POWER_ITERATIONS: usize = 200;
const CONVERGENCE_EPSILON: f64 = 1e-10;

/// The fitted transform: per-feature mean and the principal axes, stored as
/// f32 so the on-disk artifact reproduces in-memory outputs bit for bit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcaModel {
    pub mean: Vec<f32>,
    pub components: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcaMeta {
    pub target_dim: usize,
    pub seed: u64,
    pub version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PcaArtifact {
    model: PcaModel,
    meta: PcaMeta,
}

pub struct PcaReducer {
    config: DimensionReduction,
    model: Option<PcaModel>,
}

impl PcaReducer {
    pub fn new(config: DimensionReduction) -> Self {
        Self {
            config,
            model: None,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    pub fn target_dim(&self) -> usize {
        self.config.dims
    }

    pub fn artifact_path(&self) -> PathBuf {
        PathBuf::from(self.config.artifact_path())
    }

    /// Fit the projection on raw embedding vectors. Requires at least one
    /// vector and uniform dimensionality.
    pub fn fit(&mut self, vectors: &[Vec<f32>]) -> Result<(), PipelineError> {
        let first = vectors.first().ok_or_else(|| {
            PipelineError::Internal("PCA fit requires at least one vector".to_string())
        })?;
        let input_dim = first.len();
        if input_dim == 0 || vectors.iter().any(|vector| vector.len() != input_dim) {
            return Err(PipelineError::Internal(
                "PCA fit requires uniform, non-empty vectors".to_string(),
            ));
        }

        info!(
            samples = vectors.len(),
            input_dim,
            target_dim = self.config.dims,
            "Fitting PCA"
        );

        let n = vectors.len();
        let mut data = Array2::<f64>::zeros((n, input_dim));
        for (row, vector) in vectors.iter().enumerate() {
            for (col, value) in vector.iter().enumerate() {
                data[[row, col]] = f64::from(*value);
            }
        }

        let mean = data.mean_axis(Axis(0)).ok_or_else(|| {
            PipelineError::Internal("PCA mean computation failed".to_string())
        })?;
        let centered = &data - &mean.view().insert_axis(Axis(0));

        let denominator = (n.max(2) - 1) as f64;
        let mut covariance = centered.t().dot(&centered) / denominator;

        let n_components = self.config.dims.min(input_dim);
        if n_components < self.config.dims {
            warn!(
                requested = self.config.dims,
                effective = n_components,
                "Target dimension exceeds input dimension; capping components"
            );
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut components: Vec<Vec<f32>> = Vec::with_capacity(n_components);
        for _ in 0..n_components {
            let axis = dominant_eigenvector(&covariance, &mut rng);
            let eigenvalue = axis.dot(&covariance.dot(&axis));

            // Deflate so the next iteration finds the next axis.
            let outer = axis
                .view()
                .insert_axis(Axis(1))
                .dot(&axis.view().insert_axis(Axis(0)));
            covariance = covariance - eigenvalue * outer;

            components.push(axis.iter().map(|value| *value as f32).collect());
        }

        self.model = Some(PcaModel {
            mean: mean.iter().map(|value| *value as f32).collect(),
            components,
        });

        Ok(())
    }

    /// Project vectors into the target space; every output is L2-normalised
    /// so cosine similarity equals dot product.
    pub fn transform(&self, vectors: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, PipelineError> {
        vectors
            .iter()
            .map(|vector| self.transform_one(vector))
            .collect()
    }

    pub fn transform_one(&self, vector: &[f32]) -> Result<Vec<f32>, PipelineError> {
        let model = self.model.as_ref().ok_or_else(|| {
            PipelineError::ReducerMismatch(
                "PCA model is neither fitted nor loaded".to_string(),
            )
        })?;
        if vector.len() != model.mean.len() {
            return Err(PipelineError::ReducerMismatch(format!(
                "input vector has {} components, the fitted model expects {}",
                vector.len(),
                model.mean.len()
            )));
        }

        let centered: Vec<f32> = vector
            .iter()
            .zip(&model.mean)
            .map(|(value, mean)| value - mean)
            .collect();

        let projected: Vec<f32> = model
            .components
            .iter()
            .map(|axis| axis.iter().zip(&centered).map(|(a, c)| a * c).sum())
            .collect();

        Ok(l2_normalize(projected))
    }

    /// `fit` followed by `transform` on the same input.
    pub fn fit_transform(
        &mut self,
        vectors: &[Vec<f32>],
    ) -> Result<Vec<Vec<f32>>, PipelineError> {
        self.fit(vectors)?;
        self.transform(vectors)
    }

    /// Persist the fitted model, atomically (write-temp-then-rename).
    pub fn save(&self, path: Option<&Path>) -> Result<(), PipelineError> {
        let model = self.model.as_ref().ok_or_else(|| {
            PipelineError::Internal("nothing to save: fit a model first".to_string())
        })?;
        let target = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.artifact_path());
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let artifact = PcaArtifact {
            model: model.clone(),
            meta: PcaMeta {
                target_dim: self.config.dims,
                seed: self.config.seed,
                version: ARTIFACT_VERSION,
            },
        };

        let temp = target.with_extension("tmp");
        std::fs::write(&temp, serde_json::to_vec(&artifact)?)?;
        std::fs::rename(&temp, &target)?;
        info!(path = %target.display(), "Saved PCA artifact");
        Ok(())
    }

    /// Restore a fitted model, verifying artifact compatibility against the
    /// run configuration.
    pub fn load(&mut self, path: Option<&Path>) -> Result<(), PipelineError> {
        let source = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.artifact_path());
        if !source.exists() {
            return Err(PipelineError::ArtifactNotFound(
                source.display().to_string(),
            ));
        }

        let raw = std::fs::read_to_string(&source)?;
        let artifact: PcaArtifact = serde_json::from_str(&raw)?;

        if artifact.meta.version != ARTIFACT_VERSION {
            return Err(PipelineError::ArtifactIncompatible(format!(
                "artifact version {} does not match expected {ARTIFACT_VERSION}",
                artifact.meta.version
            )));
        }
        if artifact.meta.target_dim != self.config.dims {
            return Err(PipelineError::ArtifactIncompatible(format!(
                "artifact targets {} dimensions, configuration expects {}",
                artifact.meta.target_dim, self.config.dims
            )));
        }

        info!(path = %source.display(), "Loaded PCA artifact");
        self.model = Some(artifact.model);
        Ok(())
    }
}

/// Power iteration for the dominant eigenvector of a symmetric matrix,
/// deterministically initialised from the reducer seed.
fn dominant_eigenvector(matrix: &Array2<f64>, rng: &mut StdRng) -> Array1<f64> {
    let dim = matrix.nrows();
    let mut vector = Array1::from_iter((0..dim).map(|_| rng.gen_range(-1.0f64..1.0f64)));
    let mut norm = vector.dot(&vector).sqrt();
    if norm <= f64::EPSILON {
        vector[0] = 1.0;
        norm = 1.0;
    }
    vector /= norm;

    let mut previous = f64::NEG_INFINITY;
    for _ in 0..POWER_ITERATIONS {
        let next = matrix.dot(&vector);
        let next_norm = next.dot(&next).sqrt();
        if next_norm <= f64::EPSILON {
            // Deflated to (numerical) zero; keep the current direction.
            break;
        }
        vector = next / next_norm;

        let rayleigh = vector.dot(&matrix.dot(&vector));
        if (rayleigh - previous).abs() < CONVERGENCE_EPSILON {
            break;
        }
        previous = rayleigh;
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reduction(dims: usize, path: Option<String>) -> DimensionReduction {
        DimensionReduction {
            kind: "pca".to_string(),
            dims,
            seed: 42,
            path,
        }
    }

    fn sample_vectors() -> Vec<Vec<f32>> {
        // Spread along a dominant axis with small off-axis noise.
        (0..40)
            .map(|i| {
                let t = i as f32 / 4.0;
                vec![t, 2.0 * t, 0.01 * (i % 3) as f32, -t]
            })
            .collect()
    }

    #[test]
    fn transform_outputs_target_dim_unit_vectors() {
        let mut reducer = PcaReducer::new(reduction(2, None));
        let reduced = reducer.fit_transform(&sample_vectors()).unwrap();

        assert_eq!(reduced.len(), 40);
        for vector in &reduced {
            assert_eq!(vector.len(), 2);
            let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-3, "norm was {norm}");
        }
    }

    #[test]
    fn transform_before_fit_fails() {
        let reducer = PcaReducer::new(reduction(2, None));
        assert!(matches!(
            reducer.transform_one(&[1.0, 2.0, 3.0, 4.0]),
            Err(PipelineError::ReducerMismatch(_))
        ));
    }

    #[test]
    fn fit_requires_uniform_vectors() {
        let mut reducer = PcaReducer::new(reduction(2, None));
        assert!(reducer.fit(&[]).is_err());
        assert!(reducer
            .fit(&[vec![1.0, 2.0], vec![1.0, 2.0, 3.0]])
            .is_err());
    }

    #[test]
    fn save_then_load_reproduces_transform_bitwise() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("pca_2.json");
        let config = reduction(2, Some(artifact.to_string_lossy().into_owned()));

        let vectors = sample_vectors();
        let mut fitted = PcaReducer::new(config.clone());
        fitted.fit(&vectors).unwrap();
        let before = fitted.transform(&vectors).unwrap();
        fitted.save(None).unwrap();

        let mut loaded = PcaReducer::new(config);
        loaded.load(None).unwrap();
        let after = loaded.transform(&vectors).unwrap();

        assert_eq!(before, after);
    }

    #[test]
    fn load_rejects_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("pca.json");

        let mut fitted =
            PcaReducer::new(reduction(2, Some(artifact.to_string_lossy().into_owned())));
        fitted.fit(&sample_vectors()).unwrap();
        fitted.save(None).unwrap();

        let mut incompatible =
            PcaReducer::new(reduction(3, Some(artifact.to_string_lossy().into_owned())));
        assert!(matches!(
            incompatible.load(None),
            Err(PipelineError::ArtifactIncompatible(_))
        ));
    }

    #[test]
    fn load_of_missing_artifact_fails() {
        let mut reducer = PcaReducer::new(reduction(2, Some("/nonexistent/pca.json".to_string())));
        assert!(matches!(
            reducer.load(None),
            Err(PipelineError::ArtifactNotFound(_))
        ));
    }

    #[test]
    fn fitting_is_deterministic_for_a_fixed_seed() {
        let vectors = sample_vectors();

        let mut first = PcaReducer::new(reduction(2, None));
        let mut second = PcaReducer::new(reduction(2, None));
        let a = first.fit_transform(&vectors).unwrap();
        let b = second.fit_transform(&vectors).unwrap();
        assert_eq!(a, b);
    }
}
