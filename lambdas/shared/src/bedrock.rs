//! Foundation model calls: query embeddings and short text extraction.

use async_trait::async_trait;
use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_bedrockruntime::types::{
    ContentBlock, ConversationRole, ConverseOutput, InferenceConfiguration, Message,
};
use aws_sdk_bedrockruntime::Client as BedrockRuntimeClient;
use serde::Deserialize;
use serde_json::json;

use crate::{Error, Result};

/// Reply the extraction prompts use for "not mentioned".
pub const NONE_MARKER: &str = "NONE";

#[async_trait]
pub trait TextModel: Send + Sync {
    /// Dense embedding of `text`.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Single-turn completion, trimmed.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Titan embeddings plus a small chat model for extraction.
pub struct BedrockModels {
    client: BedrockRuntimeClient,
    chat_model_id: String,
    embedding_model_id: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl BedrockModels {
    pub fn new(
        client: BedrockRuntimeClient,
        chat_model_id: impl Into<String>,
        embedding_model_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            chat_model_id: chat_model_id.into(),
            embedding_model_id: embedding_model_id.into(),
        }
    }
}

#[async_trait]
impl TextModel for BedrockModels {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::to_vec(&json!({ "inputText": text }))?;

        let output = self
            .client
            .invoke_model()
            .model_id(&self.embedding_model_id)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(body))
            .send()
            .await
            .map_err(|e| Error::from_sdk("Failed to generate embedding", e))?;

        let parsed: EmbeddingResponse = serde_json::from_slice(output.body().as_ref())?;
        Ok(parsed.embedding)
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let message = Message::builder()
            .role(ConversationRole::User)
            .content(ContentBlock::Text(prompt.to_string()))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build prompt: {}", e)))?;

        let output = self
            .client
            .converse()
            .model_id(&self.chat_model_id)
            .messages(message)
            .inference_config(
                InferenceConfiguration::builder()
                    .max_tokens(128)
                    .temperature(0.1)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| Error::from_sdk("Failed to call model", e))?;

        let Some(ConverseOutput::Message(message)) = output.output else {
            return Err(Error::Aws("No message in model response".to_string()));
        };

        match message.content().first() {
            Some(ContentBlock::Text(text)) => Ok(text.trim().to_string()),
            _ => Err(Error::Aws("Model response has no text".to_string())),
        }
    }
}

/// Optional search refinements pulled from free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    Level,
    Duration,
    PriceRange,
}

impl ParameterKind {
    pub const ALL: [ParameterKind; 3] = [
        ParameterKind::Level,
        ParameterKind::Duration,
        ParameterKind::PriceRange,
    ];

    fn description(self) -> &'static str {
        match self {
            ParameterKind::Level => "difficulty level (beginner, intermediate, or expert)",
            ParameterKind::Duration => "course duration (e.g., '4 weeks', '2 months')",
            ParameterKind::PriceRange => "price range or budget (e.g., 'under $100', 'free')",
        }
    }
}

pub fn subject_prompt(input_text: &str) -> String {
    format!(
        r#"
<instruction>
Extract the main subject or topic the user is interested in learning from the following text:
"{input_text}"

Return ONLY the subject or topic as a single word or short phrase, nothing else.
</instruction>
"#
    )
}

pub fn parameter_prompt(input_text: &str, kind: ParameterKind) -> String {
    let description = kind.description();
    format!(
        r#"
<instruction>
Extract the {description} from the following text:
"{input_text}"

If the {description} is mentioned, return ONLY that value as a short phrase.
If not mentioned, return "{NONE_MARKER}".
</instruction>
"#
    )
}

/// Map the model's answer to an optional value.
pub fn parse_parameter(answer: &str) -> Option<String> {
    let answer = answer.trim().trim_matches('"');
    if answer.is_empty() || answer.eq_ignore_ascii_case(NONE_MARKER) {
        None
    } else {
        Some(answer.to_string())
    }
}

/// Subject used when the model cannot be reached.
pub fn fallback_subject(input_text: &str) -> String {
    input_text
        .split_whitespace()
        .next()
        .unwrap_or("general")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompts_embed_input() {
        let prompt = subject_prompt("I want to learn Rust");
        assert!(prompt.contains("\"I want to learn Rust\""));

        let prompt = parameter_prompt("cheap python course", ParameterKind::PriceRange);
        assert!(prompt.contains("price range or budget"));
        assert!(prompt.contains("return \"NONE\""));
    }

    #[test]
    fn test_parse_parameter() {
        assert_eq!(parse_parameter("NONE"), None);
        assert_eq!(parse_parameter(" \"none\" "), None);
        assert_eq!(parse_parameter(""), None);
        assert_eq!(parse_parameter("beginner\n"), Some("beginner".to_string()));
    }

    #[test]
    fn test_fallback_subject() {
        assert_eq!(fallback_subject("python for data"), "python");
        assert_eq!(fallback_subject("   "), "general");
    }
}
