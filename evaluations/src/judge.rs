//! LLM judging of retrieval output: grade a single result set, or compare
//! two result sets pairwise.

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use tracing::warn;

use common::{config::LlmConfig, error::PipelineError};

const DEFAULT_JUDGE_PROMPT: &str = "You are grading retrieval quality. Given a query and the \
retrieved contexts, judge whether the contexts answer the query. Reply with a short verdict \
and a 1-5 score.";

enum JudgeBackend {
    OpenAi {
        client: Client<OpenAIConfig>,
        model: String,
    },
    Mock,
}

pub struct LlmJudge {
    backend: JudgeBackend,
}

impl LlmJudge {
    pub fn new(config: &LlmConfig, dry_run: bool) -> Self {
        if dry_run {
            return Self {
                backend: JudgeBackend::Mock,
            };
        }

        if config.provider != "openai" {
            warn!(
                provider = config.provider.as_str(),
                "Unknown LLM provider; using the OpenAI-compatible client"
            );
        }

        let openai_config = match config.api_key.as_deref() {
            Some(key) => OpenAIConfig::new().with_api_key(key),
            None => OpenAIConfig::default(),
        };

        Self {
            backend: JudgeBackend::OpenAi {
                client: Client::with_config(openai_config),
                model: config.model.clone(),
            },
        }
    }

    pub fn model_label(&self) -> &str {
        match &self.backend {
            JudgeBackend::OpenAi { model, .. } => model,
            JudgeBackend::Mock => "mock",
        }
    }

    /// Grade one result set against the query.
    pub async fn grade_single(
        &self,
        judge_prompt: Option<&str>,
        query: &str,
        contexts: &[String],
    ) -> Result<String, PipelineError> {
        let user = format!(
            "Query:\n{query}\n\nRetrieved contexts:\n{}",
            numbered(contexts)
        );
        self.complete(judge_prompt.unwrap_or(DEFAULT_JUDGE_PROMPT), &user)
            .await
    }

    /// Compare two result sets for the same query.
    pub async fn grade_pairwise(
        &self,
        judge_prompt: Option<&str>,
        query: &str,
        first: &[String],
        second: &[String],
    ) -> Result<String, PipelineError> {
        let user = format!(
            "Query:\n{query}\n\nResult set A:\n{}\n\nResult set B:\n{}\n\n\
             Which result set answers the query better: A, B, or tie?",
            numbered(first),
            numbered(second)
        );
        self.complete(judge_prompt.unwrap_or(DEFAULT_JUDGE_PROMPT), &user)
            .await
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, PipelineError> {
        match &self.backend {
            JudgeBackend::Mock => Ok(format!(
                "mock judge verdict (prompt: {} chars, input: {} chars)",
                system.len(),
                user.len()
            )),
            JudgeBackend::OpenAi { client, model } => {
                let request = CreateChatCompletionRequestArgs::default()
                    .model(model)
                    .messages([
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(system)
                            .build()?
                            .into(),
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(user)
                            .build()?
                            .into(),
                    ])
                    .build()?;

                let response = client.chat().create(request).await?;
                Ok(response
                    .choices
                    .first()
                    .and_then(|choice| choice.message.content.clone())
                    .unwrap_or_default())
            }
        }
    }
}

fn numbered(contexts: &[String]) -> String {
    if contexts.is_empty() {
        return "(no contexts retrieved)".to_string();
    }
    contexts
        .iter()
        .enumerate()
        .map(|(i, context)| format!("[{}] {context}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_judge_is_deterministic() {
        let judge = LlmJudge::new(&LlmConfig::default(), true);
        let contexts = vec!["ctx one".to_string()];
        let a = judge.grade_single(None, "q", &contexts).await.unwrap();
        let b = judge.grade_single(None, "q", &contexts).await.unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("mock judge verdict"));
    }
}
