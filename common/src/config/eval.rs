//! Evaluation configuration and declarative test cases.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Default location for the JSON test-case file.
pub const DEFAULT_TEST_PATH: &str = "data/tests/default.json";

/// MCP server descriptor for agent tests: a locally spawned stdio process or
/// a remote SSE endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        cwd: Option<String>,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default = "default_sse_timeout")]
        timeout: f64,
        #[serde(default = "default_sse_read_timeout")]
        sse_read_timeout: f64,
    },
}

fn default_sse_timeout() -> f64 {
    30.0
}

fn default_sse_read_timeout() -> f64 {
    300.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmEvalType {
    Single,
    Pairwise,
}

fn default_eval_types() -> Vec<LlmEvalType> {
    vec![LlmEvalType::Single]
}

/// A declarative test case, discriminated by its `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TestCase {
    Human {
        name: String,
        query: String,
        /// Ground-truth chunk ids, when labelled; enables metric computation.
        #[serde(default)]
        relevant_ids: Vec<String>,
    },
    Llm {
        name: String,
        query: String,
        /// Judge prompt handed to the LLM together with the retrieved contexts.
        #[serde(default)]
        prompt: Option<String>,
        #[serde(default = "default_eval_types")]
        eval_type: Vec<LlmEvalType>,
        #[serde(default)]
        relevant_ids: Vec<String>,
    },
    Agent {
        name: String,
        query: String,
        #[serde(default)]
        prompt: Option<String>,
        mcp: McpConfig,
        #[serde(default = "default_agent_timeout")]
        timeout: u64,
        #[serde(default = "default_max_turns")]
        max_turns: usize,
        /// Per-test overrides of the global LLM configuration.
        #[serde(default)]
        agent_model: Option<String>,
        #[serde(default)]
        agent_instructions: Option<String>,
    },
}

fn default_agent_timeout() -> u64 {
    60
}

fn default_max_turns() -> usize {
    10
}

impl TestCase {
    pub fn name(&self) -> &str {
        match self {
            Self::Human { name, .. } | Self::Llm { name, .. } | Self::Agent { name, .. } => name,
        }
    }

    pub fn query(&self) -> &str {
        match self {
            Self::Human { query, .. } | Self::Llm { query, .. } | Self::Agent { query, .. } => {
                query
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Human { .. } => "human",
            Self::Llm { .. } => "llm",
            Self::Agent { .. } => "agent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankConfig {
    #[serde(default = "default_rerank_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

fn default_rerank_provider() -> String {
    "huggingface".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_llm_provider() -> String {
    "openai".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
    /// Path to a JSON file with additional test cases.
    #[serde(default = "default_load_test")]
    pub load_test: Option<String>,
    #[serde(default)]
    pub tests: Vec<TestCase>,
}

fn default_load_test() -> Option<String> {
    Some(DEFAULT_TEST_PATH.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetricKind {
    Precision,
    Recall,
    HitRate,
    Mrr,
    Ndcg,
}

fn default_metrics() -> Vec<MetricKind> {
    vec![MetricKind::Ndcg, MetricKind::Precision, MetricKind::Recall]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub rerank: Option<RerankConfig>,
    #[serde(default)]
    pub llm: Option<LlmConfig>,
    #[serde(default = "default_true")]
    pub evaluations: bool,
    #[serde(default = "default_metrics")]
    pub metrics: Vec<MetricKind>,
    #[serde(default)]
    pub test: Option<TestConfig>,
}

fn default_top_k() -> usize {
    10
}

fn default_true() -> bool {
    true
}
