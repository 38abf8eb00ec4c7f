//! WhatsApp Forwarder Lambda - Relays WhatsApp messages to the course agent.
//!
//! This Lambda is subscribed to the messaging gateway's SNS topic and:
//! 1. Unwraps the webhook entry from each SNS record
//! 2. Extracts the text of every inbound message
//! 3. Asks the agent, using the sender's number as the session id
//! 4. Replies with the agent's text, or the course catalog for greetings
//!
//! Each inbound message gets exactly one reply. Bad records are logged and
//! counted; they never fail the invocation.

use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde::Serialize;
use shared::{
    AgentClient, AgentReply, ConversationalAgent, EumNotification, ForwarderConfig,
    InboundMessage, Origination, OutboundMessage, SnsEvent, SocialMessagingSender,
    WhatsAppSender,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const NOT_CONFIGURED_REPLY: &str =
    "Sorry, the system is not properly configured. Please try again later.";
const AGENT_ERROR_REPLY: &str =
    "Sorry, I encountered an error processing your message. Please try again later.";

#[derive(Debug, Serialize)]
struct ForwarderResponse {
    #[serde(rename = "statusCode")]
    status_code: u16,
    body: String,
    messages_forwarded: u32,
    errors: u32,
}

/// Application state
struct AppState {
    /// `None` until the deployment has written the agent identifiers
    agent: Option<Arc<dyn ConversationalAgent>>,
    sender: Arc<dyn WhatsAppSender>,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let settings = ForwarderConfig::from_env();

        let agent = settings.agent.map(|agent| {
            let client = aws_sdk_bedrockagentruntime::Client::new(&config);
            Arc::new(AgentClient::new(client, agent)) as Arc<dyn ConversationalAgent>
        });

        if agent.is_none() {
            warn!("AGENT_ID or AGENT_ALIAS_ID not configured");
        }

        let messaging_config = aws_sdk_socialmessaging::config::Builder::from(&config)
            .region(aws_sdk_socialmessaging::config::Region::new(
                settings.messaging_region,
            ))
            .build();
        let sender = SocialMessagingSender::new(aws_sdk_socialmessaging::Client::from_conf(
            messaging_config,
        ));

        Ok(Self {
            agent,
            sender: Arc::new(sender),
        })
    }
}

/// Outcome of handling one inbound message.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Replied,
    Skipped,
}

async fn send_reply(state: &AppState, origination: &Origination, message: &OutboundMessage) {
    if let Err(e) = state
        .sender
        .send(&origination.phone_number_arn, message)
        .await
    {
        error!(recipient = %message.recipient(), error = %e, "Failed to send WhatsApp reply");
    }
}

async fn process_message(
    state: &AppState,
    message: &InboundMessage,
    origination: &Origination,
) -> Outcome {
    let Some(phone_number) = message.from.as_deref().filter(|p| !p.is_empty()) else {
        error!(message_id = %message.id, "No phone number found in message");
        return Outcome::Skipped;
    };

    let Some(text) = message.text() else {
        error!(message_id = %message.id, message_type = %message.message_type, "No message text extracted");
        return Outcome::Skipped;
    };

    let Some(agent) = &state.agent else {
        error!("Agent ID or Agent Alias ID not configured");
        let reply = OutboundMessage::text_reply(&message.id, phone_number, NOT_CONFIGURED_REPLY);
        send_reply(state, origination, &reply).await;
        return Outcome::Replied;
    };

    info!(message_id = %message.id, text = %text, "Forwarding message to agent");

    let reply = match agent.ask(phone_number, &text).await {
        Ok(completion) => {
            info!(message_id = %message.id, completion = %completion, "Agent response");
            match AgentReply::classify(&completion) {
                AgentReply::Carousel => OutboundMessage::course_catalog(phone_number),
                AgentReply::Text(text) => {
                    OutboundMessage::text_reply(&message.id, phone_number, &text)
                }
            }
        }
        Err(e) => {
            error!(message_id = %message.id, error = %e, "Agent invocation failed");
            OutboundMessage::text_reply(&message.id, phone_number, AGENT_ERROR_REPLY)
        }
    };

    send_reply(state, origination, &reply).await;
    Outcome::Replied
}

async fn handler(
    state: Arc<AppState>,
    event: LambdaEvent<SnsEvent>,
) -> Result<ForwarderResponse, Error> {
    let mut messages_forwarded = 0u32;
    let mut errors = 0u32;

    for record in &event.payload.records {
        let notification = match EumNotification::parse(&record.sns.message) {
            Ok(n) => n,
            Err(e) => {
                error!(sns_message_id = %record.sns.message_id, error = %e, "Failed to parse SNS message");
                errors += 1;
                continue;
            }
        };

        let entry = match notification.webhook_entry() {
            Ok(entry) => entry,
            Err(e) => {
                error!(sns_message_id = %record.sns.message_id, error = %e, "Failed to parse webhook entry");
                errors += 1;
                continue;
            }
        };

        let origination = notification.origination();

        // Status callbacks share the topic; only the first change carries messages.
        let Some(change) = entry.changes.first() else {
            continue;
        };

        for message in &change.value.messages {
            match process_message(&state, message, &origination).await {
                Outcome::Replied => messages_forwarded += 1,
                Outcome::Skipped => errors += 1,
            }
        }
    }

    info!(
        forwarded = messages_forwarded,
        errors = errors,
        "WhatsApp forwarder complete"
    );

    Ok(ForwarderResponse {
        status_code: 200,
        body: "Message processed successfully".to_string(),
        messages_forwarded,
        errors,
    })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new().await?);

    run(service_fn(move |event| {
        let state = Arc::clone(&state);
        async move { handler(state, event).await }
    }))
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lambda_runtime::Context;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    struct ScriptedAgent {
        reply: shared::Result<String>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedAgent {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err(shared::Error::Aws("agent unavailable".to_string())),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ConversationalAgent for ScriptedAgent {
        async fn ask(&self, session_id: &str, text: &str) -> shared::Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((session_id.to_string(), text.to_string()));
            match &self.reply {
                Ok(reply) => Ok(reply.clone()),
                Err(e) => Err(shared::Error::Aws(e.to_string())),
            }
        }
    }

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl WhatsAppSender for RecordingSender {
        async fn send(&self, origination_arn: &str, message: &OutboundMessage) -> shared::Result<()> {
            self.sent.lock().unwrap().push((
                origination_arn.to_string(),
                serde_json::to_value(message).unwrap(),
            ));
            Ok(())
        }
    }

    fn sns_record(message: &str) -> Value {
        json!({"Sns": {"MessageId": "sns-1", "Timestamp": "2025-03-04T09:26:53.589Z", "Message": message}})
    }

    fn inbound(messages: Value) -> String {
        let entry = json!({"changes": [{"field": "messages", "value": {"messages": messages}}]});
        json!({
            "context": {"MetaPhoneNumberIds": [{"metaPhoneNumberId": "pn-1", "arn": "arn:pn-1"}]},
            "whatsAppWebhookEntry": entry.to_string(),
            "aws_account_id": "123456789012"
        })
        .to_string()
    }

    fn event(records: Vec<Value>) -> LambdaEvent<SnsEvent> {
        let payload: SnsEvent = serde_json::from_value(json!({ "Records": records })).unwrap();
        LambdaEvent::new(payload, Context::default())
    }

    fn state(
        agent: Option<Arc<ScriptedAgent>>,
        sender: Arc<RecordingSender>,
    ) -> Arc<AppState> {
        Arc::new(AppState {
            agent: agent.map(|a| a as Arc<dyn ConversationalAgent>),
            sender,
        })
    }

    fn text_message(id: &str, from: &str, body: &str) -> Value {
        json!({"id": id, "from": from, "type": "text", "text": {"body": body}})
    }

    #[tokio::test]
    async fn test_text_message_gets_one_reply() {
        let agent = Arc::new(ScriptedAgent::replying("Try *Cloud Architecture on AWS*"));
        let sender = Arc::new(RecordingSender::default());

        let response = handler(
            state(Some(agent.clone()), sender.clone()),
            event(vec![sns_record(&inbound(json!([text_message("wamid.1", "15551234567", "aws courses")])))]),
        )
        .await
        .unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.messages_forwarded, 1);
        assert_eq!(response.errors, 0);

        let calls = agent.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[("15551234567".to_string(), "aws courses".to_string())]);

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "arn:pn-1");
        assert_eq!(sent[0].1["to"], "+15551234567");
        assert_eq!(sent[0].1["context"]["message_id"], "wamid.1");
        assert_eq!(sent[0].1["text"]["body"], "Try *Cloud Architecture on AWS*");
    }

    #[tokio::test]
    async fn test_greeting_sends_catalog() {
        let agent = Arc::new(ScriptedAgent::replying(
            r#"{"messageFormat": "custom", "responseType": "carousel", "message": "Welcome"}"#,
        ));
        let sender = Arc::new(RecordingSender::default());

        handler(
            state(Some(agent), sender.clone()),
            event(vec![sns_record(&inbound(json!([text_message("wamid.2", "15551234567", "hi")])))]),
        )
        .await
        .unwrap();

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1["type"], "template");
        assert_eq!(sent[0].1["template"]["name"], "course_catalog_v10");
    }

    #[tokio::test]
    async fn test_agent_failure_sends_apology() {
        let sender = Arc::new(RecordingSender::default());

        let response = handler(
            state(Some(Arc::new(ScriptedAgent::failing())), sender.clone()),
            event(vec![sns_record(&inbound(json!([text_message("wamid.3", "15551234567", "help")])))]),
        )
        .await
        .unwrap();

        assert_eq!(response.messages_forwarded, 1);
        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1["text"]["body"], AGENT_ERROR_REPLY);
    }

    #[tokio::test]
    async fn test_unconfigured_agent_sends_notice() {
        let sender = Arc::new(RecordingSender::default());

        handler(
            state(None, sender.clone()),
            event(vec![sns_record(&inbound(json!([text_message("wamid.4", "15551234567", "hello")])))]),
        )
        .await
        .unwrap();

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1["text"]["body"], NOT_CONFIGURED_REPLY);
    }

    #[tokio::test]
    async fn test_malformed_records_are_counted_not_fatal() {
        let agent = Arc::new(ScriptedAgent::replying("ok"));
        let sender = Arc::new(RecordingSender::default());

        let broken_entry = json!({"whatsAppWebhookEntry": "{not json"}).to_string();
        let response = handler(
            state(Some(agent.clone()), sender.clone()),
            event(vec![
                sns_record("this is not json"),
                sns_record(&broken_entry),
                sns_record(&inbound(json!([text_message("wamid.5", "15551234567", "python")]))),
            ]),
        )
        .await
        .unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.errors, 2);
        assert_eq!(response.messages_forwarded, 1);
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_messages_without_sender_or_text_are_skipped() {
        let agent = Arc::new(ScriptedAgent::replying("ok"));
        let sender = Arc::new(RecordingSender::default());

        let response = handler(
            state(Some(agent.clone()), sender.clone()),
            event(vec![sns_record(&inbound(json!([
                {"id": "wamid.6", "type": "text", "text": {"body": "no sender"}},
                {"id": "wamid.7", "from": "15551234567", "type": "text", "text": {"body": ""}}
            ])))]),
        )
        .await
        .unwrap();

        assert_eq!(response.errors, 2);
        assert!(agent.calls.lock().unwrap().is_empty());
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_only_notifications_are_ignored() {
        let agent = Arc::new(ScriptedAgent::replying("ok"));
        let sender = Arc::new(RecordingSender::default());

        let entry = json!({"changes": [{"field": "messages", "value": {"statuses": [{"status": "read"}]}}]});
        let body = json!({"whatsAppWebhookEntry": entry.to_string()}).to_string();

        let response = handler(state(Some(agent), sender.clone()), event(vec![sns_record(&body)]))
            .await
            .unwrap();

        assert_eq!(response.messages_forwarded, 0);
        assert_eq!(response.errors, 0);
        assert!(sender.sent.lock().unwrap().is_empty());
    }
}
