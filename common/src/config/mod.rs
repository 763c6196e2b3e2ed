//! Declarative run configuration, loaded once from YAML and validated
//! before any I/O happens.

mod embedding;
mod eval;
mod parser;
mod storage;

pub use embedding::{
    DimensionReduction, EmbeddingConfig, EmbeddingProviderKind, PoolingStrategy,
};
pub use eval::{
    EvaluationConfig, LlmConfig, LlmEvalType, McpConfig, MetricKind, RerankConfig, TestCase,
    TestConfig, DEFAULT_TEST_PATH,
};
pub use parser::{ParserConfig, ProcessConfig, SplitStrategy, StepConfig};
pub use storage::{StorageConfig, TextStoreClient, TextStoreConfig, VectorConfig};

use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetProvider {
    Local,
    S3,
}

impl Default for DatasetProvider {
    fn default() -> Self {
        Self::Local
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    #[serde(default)]
    pub provider: DatasetProvider,
    pub path: String,
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
}

fn default_allowed_types() -> Vec<String> {
    vec!["txt".to_string()]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadingConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

fn default_max_workers() -> usize {
    4
}

impl Default for ThreadingConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

/// Root of the declarative run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_run_id")]
    pub run_id: String,
    pub task: String,
    #[serde(default)]
    pub dataset: Option<DatasetConfig>,
    #[serde(default)]
    pub threading: Option<ThreadingConfig>,
    #[serde(default)]
    pub parser: Option<ParserConfig>,
    #[serde(default)]
    pub embedding: Option<EmbeddingConfig>,
    #[serde(default)]
    pub storage: Option<StorageConfig>,
    #[serde(default)]
    pub eval: Option<EvaluationConfig>,
}

fn default_run_id() -> String {
    Uuid::new_v4().simple().to_string()
}

impl RunConfig {
    /// Load and validate a configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            PipelineError::ConfigInvalid(format!(
                "cannot read config file {}: {err}",
                path.display()
            ))
        })?;
        let config = Self::from_yaml_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, PipelineError> {
        serde_yaml::from_str(raw)
            .map_err(|err| PipelineError::ConfigInvalid(format!("invalid YAML config: {err}")))
    }

    /// Serialise the effective configuration for the run report echo.
    pub fn to_yaml_string(&self) -> Result<String, PipelineError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn max_workers(&self) -> usize {
        self.threading.unwrap_or_default().max_workers.max(1)
    }

    /// Semantic validation: every referenced adapter must exist, referenced
    /// local paths must exist, and splitter patterns must compile.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.task.trim().is_empty() {
            return Err(PipelineError::ConfigInvalid(
                "`task` must not be empty".to_string(),
            ));
        }

        if let Some(dataset) = &self.dataset {
            if dataset.provider == DatasetProvider::Local
                && !Path::new(&dataset.path).exists()
            {
                return Err(PipelineError::ConfigInvalid(format!(
                    "dataset path does not exist: {}",
                    dataset.path
                )));
            }
        }

        if let Some(parser) = &self.parser {
            for process in &parser.processes {
                for step in &process.steps {
                    if step.chunk_size.is_some() && step.chunk_overlap.is_none() {
                        return Err(PipelineError::ConfigInvalid(format!(
                            "process `{}`: `chunk_overlap` is required when `chunk_size` is set",
                            process.name
                        )));
                    }
                    if step.strategy == SplitStrategy::Regex {
                        let pattern = step.regex_pattern.as_deref().ok_or_else(|| {
                            PipelineError::ConfigInvalid(format!(
                                "process `{}`: regex step without `regex_pattern`",
                                process.name
                            ))
                        })?;
                        // Surface pattern errors before any I/O.
                        regex::RegexBuilder::new(pattern)
                            .case_insensitive(step.ignore_case)
                            .build()?;
                    }
                }
            }
        }

        if let Some(embedding) = &self.embedding {
            if let Some(reduction) = &embedding.dimension_reduction {
                match reduction.kind.to_lowercase().as_str() {
                    "pca" => {
                        if reduction.dims == 0 {
                            return Err(PipelineError::ConfigInvalid(
                                "dimension_reduction.dims must be greater than zero".to_string(),
                            ));
                        }
                    }
                    "umap" | "t-sne" | "tsne" => {
                        return Err(PipelineError::NotImplemented(format!(
                            "{} dimensional reduction is reserved but not implemented",
                            reduction.kind
                        )));
                    }
                    other => {
                        return Err(PipelineError::ConfigInvalid(format!(
                            "unknown dimensional reduction type: {other}"
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
run_id: test-run
task: unit-test
parser:
  processes:
    - name: chars
      steps:
        - strategy: character
          chunk_size: 200
          chunk_overlap: 50
embedding:
  provider: openai
  model: text-embedding-3-small
  pooling_strategy: mean
storage:
  vector:
    provider: flat
    dimension: 1536
    upload: true
  text_store:
    client: sqlite
    upload: true
eval:
  top_k: 5
  metrics: [precision, recall, hit-rate, mrr, ndcg]
  test:
    tests:
      - type: human
        name: sanity
        query: what is revenue
"#
    }

    #[test]
    fn parses_a_full_config() {
        let config = RunConfig::from_yaml_str(minimal_yaml()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.run_id, "test-run");
        let parser = config.parser.unwrap();
        assert_eq!(parser.processes.len(), 1);
        assert_eq!(parser.processes[0].steps[0].chunk_size, Some(200));
        assert_eq!(parser.processes[0].steps[0].chunk_overlap, Some(50));

        let eval = config.eval.unwrap();
        assert_eq!(eval.top_k, 5);
        assert_eq!(eval.metrics.len(), 5);
        let test = eval.test.unwrap();
        assert_eq!(test.tests.len(), 1);
        assert_eq!(test.tests[0].kind(), "human");
    }

    #[test]
    fn missing_chunk_overlap_is_rejected() {
        let yaml = r#"
task: t
parser:
  processes:
    - name: p
      steps:
        - strategy: character
          chunk_size: 100
"#;
        let config = RunConfig::from_yaml_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, PipelineError::ConfigInvalid(_)));
    }

    #[test]
    fn invalid_regex_pattern_is_rejected() {
        let yaml = r#"
task: t
parser:
  processes:
    - name: p
      steps:
        - strategy: regex
          regex_pattern: "[unclosed"
"#;
        let config = RunConfig::from_yaml_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, PipelineError::RegexInvalid(_)));
    }

    #[test]
    fn reserved_reduction_kinds_fail_not_implemented() {
        let yaml = r#"
task: t
embedding:
  provider: openai
  model: text-embedding-3-small
  dimension_reduction:
    type: UMAP
    dims: 64
"#;
        let config = RunConfig::from_yaml_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, PipelineError::NotImplemented(_)));
    }

    #[test]
    fn agent_test_cases_deserialize_with_mcp_descriptor() {
        let yaml = r#"
task: t
eval:
  test:
    tests:
      - type: agent
        name: tool-use
        query: latest filing
        mcp:
          type: stdio
          command: ./stub-server
          args: ["--echo"]
        timeout: 5
"#;
        let config = RunConfig::from_yaml_str(yaml).unwrap();
        let tests = config.eval.unwrap().test.unwrap().tests;
        match &tests[0] {
            TestCase::Agent { mcp, timeout, max_turns, .. } => {
                assert_eq!(*timeout, 5);
                assert_eq!(*max_turns, 10);
                assert!(matches!(mcp, McpConfig::Stdio { command, .. } if command == "./stub-server"));
            }
            other => panic!("expected agent test, got {}", other.kind()),
        }
    }

    #[test]
    fn run_id_defaults_to_a_fresh_id() {
        let a = RunConfig::from_yaml_str("task: t").unwrap();
        let b = RunConfig::from_yaml_str("task: t").unwrap();
        assert!(!a.run_id.is_empty());
        assert_ne!(a.run_id, b.run_id);
    }

    #[test]
    fn yaml_echo_round_trips() {
        let config = RunConfig::from_yaml_str(minimal_yaml()).unwrap();
        let echoed = config.to_yaml_string().unwrap();
        let reparsed = RunConfig::from_yaml_str(&echoed).unwrap();
        assert_eq!(config, reparsed);
    }
}
