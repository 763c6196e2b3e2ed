//! Dimensional reduction of raw embedding vectors.

mod pca;

pub use pca::{PcaReducer, ARTIFACT_VERSION};

use crate::{config::DimensionReduction, error::PipelineError};

/// Construct the reducer named by the configuration. Only PCA is
/// implemented; the remaining kinds are reserved.
pub fn build_reducer(config: &DimensionReduction) -> Result<PcaReducer, PipelineError> {
    match config.kind.to_lowercase().as_str() {
        "pca" => Ok(PcaReducer::new(config.clone())),
        other => Err(PipelineError::NotImplemented(format!(
            "{other} dimensional reduction is not implemented"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pca_is_constructible() {
        let pca = DimensionReduction {
            kind: "PCA".to_string(),
            dims: 8,
            seed: 42,
            path: None,
        };
        assert!(build_reducer(&pca).is_ok());

        let umap = DimensionReduction {
            kind: "UMAP".to_string(),
            dims: 8,
            seed: 42,
            path: None,
        };
        assert!(matches!(
            build_reducer(&umap),
            Err(PipelineError::NotImplemented(_))
        ));
    }
}
