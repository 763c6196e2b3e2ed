//! Evaluation driver: loads test cases, routes them by kind, writes one
//! JSON report per test and the run-level config reports.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use common::{
    config::{EvaluationConfig, LlmEvalType, RunConfig, TestCase},
    error::PipelineError,
};
use retrieval_pipeline::{RetrievalResponse, RetrievalService};

use crate::{
    agent::run_agent_test,
    cases::load_all_tests,
    judge::LlmJudge,
    metrics::compute_metrics,
    report::{write_config_reports, ReportPaths},
};

pub struct EvalSummary {
    pub tests_run: usize,
    /// Per-test failures; they never abort the run.
    pub failures: Vec<String>,
    pub report: ReportPaths,
}

pub struct EvaluationDriver {
    config: RunConfig,
    eval: EvaluationConfig,
    retrieval: Option<Arc<RetrievalService>>,
    judge: LlmJudge,
    output_dir: PathBuf,
    dry_run: bool,
}

impl EvaluationDriver {
    pub fn new(
        config: RunConfig,
        retrieval: Option<Arc<RetrievalService>>,
        dry_run: bool,
    ) -> Result<Self, PipelineError> {
        Self::new_with_output_root(config, retrieval, dry_run, Path::new("output"))
    }

    pub fn new_with_output_root(
        config: RunConfig,
        retrieval: Option<Arc<RetrievalService>>,
        dry_run: bool,
        output_root: &Path,
    ) -> Result<Self, PipelineError> {
        let eval = config.eval.clone().ok_or_else(|| {
            PipelineError::ConfigInvalid("evaluation driver requires an `eval` section".to_string())
        })?;
        let judge = LlmJudge::new(&eval.llm.clone().unwrap_or_default(), dry_run);
        let output_dir = output_root.join(&config.run_id);
        std::fs::create_dir_all(&output_dir)?;

        Ok(Self {
            config,
            eval,
            retrieval,
            judge,
            output_dir,
            dry_run,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Run every test in deterministic order (file-loaded first, inline
    /// appended), then emit the run-level reports.
    pub async fn run(&self) -> Result<EvalSummary, PipelineError> {
        let tests = load_all_tests(&self.eval.test.clone().unwrap_or_default())?;
        let mut failures = Vec::new();
        let mut metric_sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();

        // Pairwise judging compares against the previous LLM test's result
        // set within the same run.
        let mut previous_llm_contexts: Option<Vec<String>> = None;

        for test in &tests {
            info!(test = test.name(), kind = test.kind(), "Running test case");
            let outcome = self
                .run_test(test, &mut previous_llm_contexts)
                .await;

            let (payload, failure) = match outcome {
                Ok(payload) => (payload, None),
                Err(err) => {
                    warn!(test = test.name(), error = %err, "Test case failed");
                    let failure = format!("{}: {err}", test.name());
                    (
                        json!({
                            "name": test.name(),
                            "type": test.kind(),
                            "error": err.to_string(),
                        }),
                        Some(failure),
                    )
                }
            };
            failures.extend(failure);

            if let Some(metrics) = payload.get("metrics").and_then(|value| value.as_object()) {
                for (metric, value) in metrics {
                    if let Some(value) = value.as_f64() {
                        let slot = metric_sums.entry(metric.clone()).or_insert((0.0, 0));
                        slot.0 += value;
                        slot.1 += 1;
                    }
                }
            }

            let path = self.output_dir.join(format!("{}.json", file_stem(test.name())));
            std::fs::write(&path, serde_json::to_vec_pretty(&payload)?)?;
        }

        self.write_summary(tests.len(), &failures, &metric_sums)?;
        let report = write_config_reports(&self.config, &self.output_dir)?;

        info!(
            tests = tests.len(),
            failures = failures.len(),
            output = %self.output_dir.display(),
            "Evaluation finished"
        );

        Ok(EvalSummary {
            tests_run: tests.len(),
            failures,
            report,
        })
    }

    /// Aggregate view of the run: counts plus mean metric values over every
    /// test that carried ground truth.
    fn write_summary(
        &self,
        tests_run: usize,
        failures: &[String],
        metric_sums: &BTreeMap<String, (f64, usize)>,
    ) -> Result<(), PipelineError> {
        let means: BTreeMap<&str, f64> = metric_sums
            .iter()
            .map(|(metric, (sum, count))| (metric.as_str(), sum / (*count).max(1) as f64))
            .collect();

        let summary = json!({
            "run_id": self.config.run_id,
            "task": self.config.task,
            "tests_run": tests_run,
            "failures": failures,
            "mean_metrics": means,
        });
        std::fs::write(
            self.output_dir.join("summary.json"),
            serde_json::to_vec_pretty(&summary)?,
        )?;
        Ok(())
    }

    async fn run_test(
        &self,
        test: &TestCase,
        previous_llm_contexts: &mut Option<Vec<String>>,
    ) -> Result<serde_json::Value, PipelineError> {
        match test {
            TestCase::Human {
                name,
                query,
                relevant_ids,
            } => {
                let search = self.search(query).await?;
                let metrics = self.maybe_metrics(&search, relevant_ids);
                Ok(json!({
                    "name": name,
                    "type": "human",
                    "query": query,
                    "search": search,
                    "metrics": metrics,
                }))
            }
            TestCase::Llm {
                name,
                query,
                prompt,
                eval_type,
                relevant_ids,
            } => {
                let search = self.search(query).await?;
                let contexts = hydrated_texts(&search);

                let mut judge_output = serde_json::Map::new();
                for kind in eval_type {
                    match kind {
                        LlmEvalType::Single => {
                            let verdict = self
                                .judge
                                .grade_single(prompt.as_deref(), query, &contexts)
                                .await?;
                            judge_output.insert("single".to_string(), json!(verdict));
                        }
                        LlmEvalType::Pairwise => match previous_llm_contexts.as_deref() {
                            Some(paired) => {
                                let verdict = self
                                    .judge
                                    .grade_pairwise(prompt.as_deref(), query, paired, &contexts)
                                    .await?;
                                judge_output.insert("pairwise".to_string(), json!(verdict));
                            }
                            None => {
                                warn!(
                                    test = name.as_str(),
                                    "Pairwise eval without a paired result set; skipping"
                                );
                                judge_output.insert(
                                    "pairwise".to_string(),
                                    json!("skipped: no paired result set in this run"),
                                );
                            }
                        },
                    }
                }

                *previous_llm_contexts = Some(contexts);
                let metrics = self.maybe_metrics(&search, relevant_ids);
                Ok(json!({
                    "name": name,
                    "type": "llm",
                    "query": query,
                    "judge_output": judge_output,
                    "search": search,
                    "metrics": metrics,
                }))
            }
            TestCase::Agent {
                name,
                query,
                prompt,
                mcp,
                timeout,
                max_turns,
                agent_model,
                agent_instructions,
            } => {
                let model = agent_model
                    .clone()
                    .or_else(|| self.eval.llm.as_ref().map(|llm| llm.model.clone()))
                    .unwrap_or_else(|| "gpt-4o-mini".to_string());
                let user_message = prompt.as_deref().unwrap_or(query);

                let outcome = run_agent_test(
                    name,
                    mcp,
                    user_message,
                    agent_instructions.as_deref(),
                    &model,
                    *timeout,
                    *max_turns,
                    self.dry_run,
                )
                .await;

                Ok(json!({
                    "test_name": name,
                    "type": "agent",
                    "status": outcome.status,
                    "query": query,
                    "prompt": user_message,
                    "response": outcome.response,
                    "tools_called": outcome.tools_called,
                    "model": outcome.model,
                    "error": outcome.error,
                }))
            }
        }
    }

    async fn search(&self, query: &str) -> Result<RetrievalResponse, PipelineError> {
        let retrieval = self.retrieval.as_ref().ok_or_else(|| {
            PipelineError::ConfigInvalid(
                "retrieval tests require embedding and vector storage sections".to_string(),
            )
        })?;
        retrieval.search(query, None).await
    }

    fn maybe_metrics(
        &self,
        search: &RetrievalResponse,
        relevant_ids: &[String],
    ) -> Option<serde_json::Value> {
        if !self.eval.evaluations || relevant_ids.is_empty() {
            return None;
        }
        let retrieved: Vec<String> = search
            .matches
            .iter()
            .map(|candidate| candidate.id.clone())
            .collect();
        let scores = compute_metrics(&self.eval.metrics, &retrieved, relevant_ids, self.eval.top_k);
        serde_json::to_value(scores).ok()
    }
}

fn hydrated_texts(search: &RetrievalResponse) -> Vec<String> {
    search
        .matches
        .iter()
        .filter_map(|candidate| candidate.metadata.as_ref())
        .map(|metadata| metadata.text.clone())
        .collect()
}

/// Test names become file names; keep them filesystem-safe.
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
