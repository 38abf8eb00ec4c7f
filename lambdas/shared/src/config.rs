//! Configuration management for Lambda functions.
//!
//! Every function reads its settings from environment variables set by the
//! deployment. `from_lookup` takes the lookup as a closure so tests can feed
//! values without touching the process environment.

use std::env;

use crate::{Error, Result};

/// Default search index holding the course documents.
pub const DEFAULT_INDEX: &str = "courses";

/// Model used to pull the subject and filters out of a user query.
pub const DEFAULT_CHAT_MODEL: &str = "apac.anthropic.claude-3-haiku-20240307-v1:0";

/// Model used to embed queries for k-NN search.
pub const DEFAULT_EMBEDDING_MODEL: &str = "amazon.titan-embed-text-v2:0";

/// Region of the messaging gateway used for outbound replies.
pub const DEFAULT_MESSAGING_REGION: &str = "ap-south-1";

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    lookup(key)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| Error::Config(format!("{} not set", key)))
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|value| !value.trim().is_empty())
}

fn process_env(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Identifiers of the deployed conversational agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    pub agent_id: String,
    pub agent_alias_id: String,
}

/// Configuration for the WhatsApp forwarder.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// `None` until the deployment has written both agent identifiers
    pub agent: Option<AgentSettings>,
    /// Region the messaging gateway lives in
    pub messaging_region: String,
}

impl ForwarderConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let agent = match (
            optional(&lookup, "AGENT_ID"),
            optional(&lookup, "AGENT_ALIAS_ID"),
        ) {
            (Some(agent_id), Some(agent_alias_id)) => Some(AgentSettings {
                agent_id,
                agent_alias_id,
            }),
            _ => None,
        };

        Self {
            agent,
            messaging_region: optional(&lookup, "SOCIAL_MESSAGING_REGION")
                .unwrap_or_else(|| DEFAULT_MESSAGING_REGION.to_string()),
        }
    }
}

/// Configuration for the agent action group function.
#[derive(Debug, Clone)]
pub struct ActionsConfig {
    /// Search collection endpoint host
    pub opensearch_endpoint: String,
    /// Index holding course documents
    pub opensearch_index: String,
    /// Model used for query understanding
    pub chat_model_id: String,
    /// Model used for query embeddings
    pub embedding_model_id: String,
}

impl ActionsConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            opensearch_endpoint: required(&lookup, "OPENSEARCH_ENDPOINT")?,
            opensearch_index: optional(&lookup, "OPENSEARCH_INDEX")
                .unwrap_or_else(|| DEFAULT_INDEX.to_string()),
            chat_model_id: optional(&lookup, "CHAT_MODEL_ID")
                .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            embedding_model_id: optional(&lookup, "EMBEDDING_MODEL_ID")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
        })
    }
}

/// Configuration for the analytics writer.
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    /// Bucket receiving one JSON object per message event
    pub bucket_name: String,
}

impl AnalyticsConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            bucket_name: required(&lookup, "BUCKET_NAME")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_forwarder_without_agent_ids() {
        let config = ForwarderConfig::from_lookup(lookup(&[("AGENT_ID", ""), ("AGENT_ALIAS_ID", "")]));
        assert!(config.agent.is_none());
        assert_eq!(config.messaging_region, DEFAULT_MESSAGING_REGION);
    }

    #[test]
    fn test_forwarder_with_agent_ids() {
        let config = ForwarderConfig::from_lookup(lookup(&[
            ("AGENT_ID", "AGENT123"),
            ("AGENT_ALIAS_ID", "ALIAS456"),
            ("SOCIAL_MESSAGING_REGION", "us-east-1"),
        ]));
        let agent = config.agent.unwrap();
        assert_eq!(agent.agent_id, "AGENT123");
        assert_eq!(agent.agent_alias_id, "ALIAS456");
        assert_eq!(config.messaging_region, "us-east-1");
    }

    #[test]
    fn test_actions_requires_endpoint() {
        let err = ActionsConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let config =
            ActionsConfig::from_lookup(lookup(&[("OPENSEARCH_ENDPOINT", "abc.aoss.amazonaws.com")]))
                .unwrap();
        assert_eq!(config.opensearch_index, DEFAULT_INDEX);
        assert_eq!(config.embedding_model_id, DEFAULT_EMBEDDING_MODEL);
    }

    #[test]
    fn test_analytics_requires_bucket() {
        assert!(AnalyticsConfig::from_lookup(lookup(&[])).is_err());
        let config = AnalyticsConfig::from_lookup(lookup(&[("BUCKET_NAME", "msgs")])).unwrap();
        assert_eq!(config.bucket_name, "msgs");
    }
}
