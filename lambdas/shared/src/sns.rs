//! SNS event envelope delivered to subscribed Lambda functions.

use serde::Deserialize;

/// SNS Event wrapper
#[derive(Debug, Deserialize)]
pub struct SnsEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<SnsRecord>,
}

#[derive(Debug, Deserialize)]
pub struct SnsRecord {
    #[serde(rename = "Sns")]
    pub sns: SnsMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnsMessage {
    #[serde(default)]
    pub message_id: String,
    /// ISO-8601 publish time, e.g. `2025-03-14T09:26:53.589Z`
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub topic_arn: String,
    pub message: String,
}
