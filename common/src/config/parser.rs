//! Parser (text splitting) configuration.

use serde::{Deserialize, Serialize};

/// Splitting strategy for a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitStrategy {
    Character,
    Word,
    Sentence,
    Paragraph,
    Regex,
    Separator,
}

impl Default for SplitStrategy {
    fn default() -> Self {
        Self::Character
    }
}

/// Configuration for a single step in a process chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    #[serde(default)]
    pub strategy: SplitStrategy,
    /// Maximum chunk size in strategy units; a step without one is a no-op
    /// for the windowed strategies.
    #[serde(default)]
    pub chunk_size: Option<usize>,
    /// Mandatory whenever `chunk_size` is set; there is no implicit default.
    #[serde(default)]
    pub chunk_overlap: Option<usize>,
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default)]
    pub regex_pattern: Option<String>,
    #[serde(default)]
    pub keep_separator: bool,
    #[serde(default)]
    pub ignore_case: bool,
    #[serde(default)]
    pub keep_empty: bool,
    #[serde(default = "default_true")]
    pub trim_whitespace: bool,
    /// Optional tag attached to every chunk the step produces.
    #[serde(default)]
    pub type_chunk: Option<String>,
}

fn default_separator() -> String {
    "\n\n".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            strategy: SplitStrategy::default(),
            chunk_size: None,
            chunk_overlap: None,
            separator: default_separator(),
            regex_pattern: None,
            keep_separator: false,
            ignore_case: false,
            keep_empty: false,
            trim_whitespace: true,
            type_chunk: None,
        }
    }
}

/// A named pipeline of steps applied sequentially to the chunks produced so
/// far; the initial chunk list is the whole document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub name: String,
    pub steps: Vec<StepConfig>,
}

/// One or more independent processes; their outputs are concatenated in
/// declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserConfig {
    pub processes: Vec<ProcessConfig>,
}
