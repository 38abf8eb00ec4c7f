//! Shared library for the course recommender Lambda functions.
//!
//! This crate provides the wire types, service clients and record formats used
//! across the forwarder, action group, analytics and tooling binaries.

pub mod agents;
pub mod analytics;
pub mod bedrock;
pub mod config;
pub mod courses;
pub mod error;
pub mod messaging;
pub mod reports;
pub mod retry;
pub mod sns;
pub mod whatsapp;

pub use agents::{AgentClient, AgentReply, ConversationalAgent};
pub use analytics::{AnalyticsRecord, RecordStore, S3RecordStore};
pub use bedrock::{BedrockModels, TextModel};
pub use config::{ActionsConfig, AgentSettings, AnalyticsConfig, ForwarderConfig};
pub use courses::{Course, CourseIndex, OpenSearchCourseIndex, SearchPage, SearchRequest};
pub use error::{Error, Result};
pub use messaging::{SocialMessagingSender, WhatsAppSender};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use sns::{SnsEvent, SnsMessage, SnsRecord};
pub use whatsapp::{EumNotification, InboundMessage, Origination, OutboundMessage};
