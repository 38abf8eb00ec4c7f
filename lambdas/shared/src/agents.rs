//! Conversational agent client.

use async_trait::async_trait;
use aws_sdk_bedrockagentruntime::types::ResponseStream;
use aws_sdk_bedrockagentruntime::Client as BedrockAgentClient;
use serde::Deserialize;
use tracing::debug;

use crate::config::AgentSettings;
use crate::{Error, Result};

/// Something that turns user text into a reply within a session.
#[async_trait]
pub trait ConversationalAgent: Send + Sync {
    /// Send `text` in the conversation identified by `session_id`.
    async fn ask(&self, session_id: &str, text: &str) -> Result<String>;
}

/// Client for the hosted agent.
pub struct AgentClient {
    client: BedrockAgentClient,
    settings: AgentSettings,
}

impl AgentClient {
    pub fn new(client: BedrockAgentClient, settings: AgentSettings) -> Self {
        Self { client, settings }
    }
}

#[async_trait]
impl ConversationalAgent for AgentClient {
    async fn ask(&self, session_id: &str, text: &str) -> Result<String> {
        let mut output = self
            .client
            .invoke_agent()
            .agent_id(&self.settings.agent_id)
            .agent_alias_id(&self.settings.agent_alias_id)
            .session_id(session_id)
            .input_text(text)
            .enable_trace(true)
            .send()
            .await
            .map_err(|e| Error::from_sdk("Failed to invoke agent", e))?;

        // Chunks may split multi-byte characters, so decode once at the end.
        let mut completion = Vec::new();
        let mut last_trace = None;

        while let Some(event) = output
            .completion
            .recv()
            .await
            .map_err(|e| Error::from_sdk("Failed to read agent response", e))?
        {
            match event {
                ResponseStream::Chunk(part) => {
                    if let Some(bytes) = part.bytes() {
                        completion.extend_from_slice(bytes.as_ref());
                    }
                }
                ResponseStream::Trace(trace) => last_trace = Some(trace),
                _ => {}
            }
        }

        if let Some(trace) = last_trace {
            debug!(trace = ?trace, "Agent trace");
        }

        Ok(String::from_utf8_lossy(&completion).into_owned())
    }
}

/// Structured marker the action group returns for greetings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomFormat {
    message_format: Option<String>,
    response_type: Option<String>,
}

/// How the agent's completion should be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentReply {
    /// Send the course catalog carousel instead of text
    Carousel,
    /// Send the completion verbatim
    Text(String),
}

impl AgentReply {
    pub fn classify(completion: &str) -> Self {
        match serde_json::from_str::<CustomFormat>(completion) {
            Ok(CustomFormat {
                message_format: Some(format),
                response_type: Some(kind),
            }) if format == "custom" && kind == "carousel" => AgentReply::Carousel,
            _ => AgentReply::Text(completion.to_string()),
        }
    }
}
