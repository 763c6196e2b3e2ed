//! Test-case loading: a JSON file of cases plus the inline cases from the
//! run configuration.

use std::path::Path;

use tracing::{error, info, warn};

use common::{
    config::{TestCase, TestConfig, DEFAULT_TEST_PATH},
    error::PipelineError,
};

/// Load all test cases: file-loaded cases first, inline cases appended.
///
/// A missing file at the *default* location just means no file was provided;
/// an explicitly configured path that does not exist is an error.
pub fn load_all_tests(config: &TestConfig) -> Result<Vec<TestCase>, PipelineError> {
    let mut tests = Vec::new();

    if let Some(path) = config.load_test.as_deref() {
        if Path::new(path).exists() {
            tests.extend(load_from_file(path)?);
        } else if path == DEFAULT_TEST_PATH {
            info!(path, "No test file at the default location; skipping");
        } else {
            return Err(PipelineError::PathNotFound(format!("test file {path}")));
        }
    }

    tests.extend(config.tests.iter().cloned());

    if tests.is_empty() {
        warn!("No tests loaded from any source");
    } else {
        info!(tests = tests.len(), "Loaded test cases");
    }
    Ok(tests)
}

/// Accepts `test_cases`, then `tests`, then the first list-valued key.
/// Individual cases that fail to parse are logged and skipped.
fn load_from_file(path: &str) -> Result<Vec<TestCase>, PipelineError> {
    let raw = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&raw).map_err(|err| {
        PipelineError::ConfigInvalid(format!("invalid JSON in test file {path}: {err}"))
    })?;

    let object = value.as_object().ok_or_else(|| {
        PipelineError::ConfigInvalid(format!("test file {path} is not a JSON object"))
    })?;

    let entries = if let Some(list) = object.get("test_cases").and_then(|v| v.as_array()) {
        list.clone()
    } else if let Some(list) = object.get("tests").and_then(|v| v.as_array()) {
        list.clone()
    } else if let Some((key, list)) = object
        .iter()
        .find_map(|(key, v)| v.as_array().filter(|list| !list.is_empty()).map(|list| (key, list)))
    {
        warn!(key = key.as_str(), path, "Using tests from fallback key");
        list.clone()
    } else {
        return Err(PipelineError::ConfigInvalid(format!(
            "no test data found in {path}: expected `test_cases`, `tests`, or any list key"
        )));
    };

    let mut tests = Vec::with_capacity(entries.len());
    for entry in entries {
        let name = entry
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("unnamed")
            .to_string();
        match serde_json::from_value::<TestCase>(entry) {
            Ok(test) => tests.push(test),
            Err(err) => error!(name = name.as_str(), error = %err, "Failed to parse test case"),
        }
    }
    Ok(tests)
}
