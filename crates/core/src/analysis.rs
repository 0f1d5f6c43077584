//! Feedback generation via an OpenAI-compatible chat API.
//!
//! The analysis collaborator turns the local capture (transcript plus
//! screenshots) and the session's opaque content payload into a structured
//! feedback report. The coordination layer stores the report as an opaque
//! JSON value; only this module knows its shape.

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::module::ModuleKind;
use crate::room::TranscriptEntry;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("missing prompt template: '{0}'")]
    MissingPrompt(String),
    #[error("analysis service error: {0}")]
    Upstream(String),
    #[error("could not parse feedback from model output: {0}")]
    Malformed(String),
}

/// Input to one analysis run, assembled by the coordinator from the session
/// record and the local room artifacts.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub module: ModuleKind,
    /// The local participant's role in this session.
    pub role: String,
    pub context: Value,
    pub scenario: Value,
    pub transcript: Vec<TranscriptEntry>,
    /// Screenshots are not sent to the text model; the count is included so
    /// prompts can reference visual material that was captured.
    pub screenshot_count: usize,
}

/// The structured report the model is asked to produce.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FeedbackReport {
    /// Overall score, 0-100.
    pub score: u8,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub next_steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl FeedbackReport {
    pub fn into_value(self) -> Value {
        serde_json::to_value(self).expect("feedback report serializes")
    }
}

/// Produces one feedback report per analysis request. Implementations must
/// be all-or-nothing: an error here means no report exists, never a partial
/// one.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<Value, AnalysisError>;
}

/// Analysis over any OpenAI-compatible chat endpoint.
pub struct OpenAiAnalysisClient {
    client: Client<OpenAIConfig>,
    model: String,
    prompts: HashMap<String, String>,
}

impl OpenAiAnalysisClient {
    /// `prompts` maps each module's `analysis_prompt_key` to a template.
    /// Templates may reference `{role}`, `{context}`, `{scenario}` and
    /// `{transcript}`.
    pub fn new(config: OpenAIConfig, model: String, prompts: HashMap<String, String>) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            prompts,
        }
    }

    fn render_prompt(&self, request: &AnalysisRequest) -> Result<String, AnalysisError> {
        let key = request.module.profile().analysis_prompt_key;
        let template = self
            .prompts
            .get(key)
            .ok_or_else(|| AnalysisError::MissingPrompt(key.to_string()))?;
        Ok(template
            .replace("{role}", &request.role)
            .replace("{context}", &request.context.to_string())
            .replace("{scenario}", &request.scenario.to_string())
            .replace("{transcript}", &render_transcript(&request.transcript)))
    }
}

fn render_transcript(transcript: &[TranscriptEntry]) -> String {
    transcript
        .iter()
        .map(|entry| format!("{}: {}", entry.speaker, entry.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pulls the first JSON object out of model output, tolerating prose or
/// markdown fences around it.
fn extract_report(content: &str) -> Result<FeedbackReport, AnalysisError> {
    if let Ok(report) = serde_json::from_str::<FeedbackReport>(content.trim()) {
        return Ok(report);
    }
    let start = content.find('{');
    let end = content.rfind('}');
    if let (Some(start), Some(end)) = (start, end) {
        if start < end {
            if let Ok(report) = serde_json::from_str::<FeedbackReport>(&content[start..=end]) {
                return Ok(report);
            }
        }
    }
    Err(AnalysisError::Malformed(
        content.chars().take(200).collect(),
    ))
}

#[async_trait]
impl AnalysisClient for OpenAiAnalysisClient {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<Value, AnalysisError> {
        let prompt = self.render_prompt(request)?;

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(
                        "You are an expert practice coach. Respond with a single JSON object \
                         with fields: score (0-100), strengths, improvements, next_steps \
                         (arrays of strings) and an optional summary string.",
                    )
                    .build()
                    .map_err(|e| AnalysisError::Upstream(e.to_string()))?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()
                    .map_err(|e| AnalysisError::Upstream(e.to_string()))?
                    .into(),
            ])
            .build()
            .map_err(|e| AnalysisError::Upstream(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(|e| AnalysisError::Upstream(e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .ok_or_else(|| AnalysisError::Upstream("empty completion".to_string()))?;

        Ok(extract_report(content)?.into_value())
    }
}

/// Deterministic analysis for development and integration testing.
pub struct MockAnalysisClient;

#[async_trait]
impl AnalysisClient for MockAnalysisClient {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<Value, AnalysisError> {
        Ok(FeedbackReport {
            score: 75,
            strengths: vec![format!("Clear {} presence", request.role)],
            improvements: vec!["Tighten the opening".to_string()],
            next_steps: vec!["Schedule another round".to_string()],
            summary: Some(format!(
                "Reviewed {} transcript lines for the {} module.",
                request.transcript.len(),
                request.module
            )),
        }
        .into_value())
    }
}
