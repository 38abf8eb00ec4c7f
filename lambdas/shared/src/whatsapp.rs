//! WhatsApp wire types.
//!
//! Inbound events arrive from the messaging gateway as an SNS message whose
//! body wraps the Meta webhook entry as a JSON *string*. Outbound messages are
//! Meta Cloud API payloads handed to the gateway as raw bytes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::Result;

/// Template shown in reply to greetings.
pub const COURSE_CATALOG_TEMPLATE: &str = "course_catalog_v10";

/// Notification published by the messaging gateway for every webhook call.
#[derive(Debug, Deserialize)]
pub struct EumNotification {
    #[serde(default)]
    pub context: NotificationContext,
    #[serde(rename = "whatsAppWebhookEntry")]
    pub whatsapp_webhook_entry: String,
    #[serde(default)]
    pub aws_account_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationContext {
    #[serde(rename = "MetaPhoneNumberIds", default)]
    pub meta_phone_number_ids: Vec<MetaPhoneNumberId>,
}

#[derive(Debug, Deserialize)]
pub struct MetaPhoneNumberId {
    #[serde(rename = "metaPhoneNumberId", default)]
    pub meta_phone_number_id: String,
    #[serde(default)]
    pub arn: String,
}

/// Phone number the business side sends from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Origination {
    pub phone_number_id: String,
    pub phone_number_arn: String,
}

impl EumNotification {
    /// Parse the notification body of an SNS record.
    pub fn parse(message: &str) -> Result<Self> {
        Ok(serde_json::from_str(message)?)
    }

    /// Parse the embedded webhook entry.
    pub fn webhook_entry(&self) -> Result<WebhookEntry> {
        Ok(serde_json::from_str(&self.whatsapp_webhook_entry)?)
    }

    /// The first registered origination number, or empty identifiers.
    pub fn origination(&self) -> Origination {
        self.context
            .meta_phone_number_ids
            .first()
            .map(|ids| Origination {
                phone_number_id: ids.meta_phone_number_id.clone(),
                phone_number_arn: ids.arn.clone(),
            })
            .unwrap_or_default()
    }
}

/// Meta webhook entry.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
    #[serde(default)]
    pub statuses: Vec<MessageStatus>,
    /// Template review outcome (`message_template_status_update` only)
    pub event: Option<String>,
    pub message_template_name: Option<String>,
    pub message_template_language: Option<String>,
}

/// Delivery status update for a previously sent message.
#[derive(Debug, Default, Deserialize)]
pub struct MessageStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub recipient_id: String,
    pub conversation: Option<Conversation>,
    pub pricing: Option<Pricing>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Conversation {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Pricing {
    #[serde(default)]
    pub billable: bool,
    #[serde(default)]
    pub pricing_model: String,
    #[serde(default)]
    pub category: String,
}

/// Message sent by a WhatsApp user.
#[derive(Debug, Default, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub id: String,
    /// Sender phone number without the leading `+`
    pub from: Option<String>,
    #[serde(rename = "type", default)]
    pub message_type: String,
    pub text: Option<TextBody>,
    pub button: Option<ButtonBody>,
    pub interactive: Option<Interactive>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TextBody {
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ButtonBody {
    #[serde(default)]
    pub payload: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Interactive {
    #[serde(rename = "type", default)]
    pub interactive_type: String,
    pub button_reply: Option<Reply>,
    pub list_reply: Option<Reply>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Reply {
    #[serde(default)]
    pub title: String,
}

impl InboundMessage {
    /// Text to forward to the agent, `None` when nothing usable was sent.
    pub fn text(&self) -> Option<String> {
        let text = match self.message_type.as_str() {
            "text" => self.text.as_ref().map(|t| t.body.clone()).unwrap_or_default(),
            "button" => self
                .button
                .as_ref()
                .map(|b| b.payload.clone())
                .unwrap_or_default(),
            "interactive" => match &self.interactive {
                Some(interactive) => match interactive.interactive_type.as_str() {
                    "button_reply" => format!(
                        "Button: {}",
                        title_of(interactive.button_reply.as_ref())
                    ),
                    "list_reply" => format!(
                        "List selection: {}",
                        title_of(interactive.list_reply.as_ref())
                    ),
                    _ => String::new(),
                },
                None => String::new(),
            },
            other => format!("[Received {} message]", other),
        };

        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

fn title_of(reply: Option<&Reply>) -> &str {
    reply.map(|r| r.title.as_str()).unwrap_or("")
}

/// Outbound message payload in Meta Cloud API format.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Text(TextReply),
    Template(Value),
}

#[derive(Debug, Clone, Serialize)]
pub struct TextReply {
    pub messaging_product: String,
    pub recipient_type: String,
    pub context: ReplyContext,
    pub to: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub text: ReplyText,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplyContext {
    pub message_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplyText {
    pub preview_url: bool,
    pub body: String,
}

/// Card shown in the course catalog carousel.
struct CatalogCard {
    category: &'static str,
    image_id: &'static str,
}

const CATALOG_CARDS: &[CatalogCard] = &[
    CatalogCard {
        category: "Programming",
        image_id: "1068347741892049",
    },
    CatalogCard {
        category: "Cloud Computing",
        image_id: "704959258834752",
    },
    CatalogCard {
        category: "Data Science",
        image_id: "1282410307004034",
    },
    CatalogCard {
        category: "Machine Learning",
        image_id: "722423164071961",
    },
];

const CATALOG_HIGHLIGHTS: &[&str] = &["Cloud Computing", "Machine Learning", "Data Science"];

impl OutboundMessage {
    /// Text reply quoting the inbound message.
    pub fn text_reply(reply_to: &str, phone_number: &str, body: &str) -> Self {
        OutboundMessage::Text(TextReply {
            messaging_product: "whatsapp".to_string(),
            recipient_type: "individual".to_string(),
            context: ReplyContext {
                message_id: reply_to.to_string(),
            },
            to: format!("+{}", phone_number),
            message_type: "text".to_string(),
            text: ReplyText {
                preview_url: false,
                body: body.to_string(),
            },
        })
    }

    /// Carousel template listing the technical course categories.
    pub fn course_catalog(phone_number: &str) -> Self {
        let highlights: Vec<Value> = CATALOG_HIGHLIGHTS
            .iter()
            .map(|text| json!({"type": "text", "text": text}))
            .collect();

        let cards: Vec<Value> = CATALOG_CARDS
            .iter()
            .enumerate()
            .map(|(index, card)| {
                json!({
                    "card_index": index,
                    "components": [
                        {
                            "type": "header",
                            "parameters": [{"type": "image", "image": {"id": card.image_id}}]
                        },
                        {
                            "type": "body",
                            "parameters": [{"type": "text", "text": card.category}]
                        },
                        {
                            "type": "button",
                            "sub_type": "quick_reply",
                            "index": "0",
                            "parameters": [{
                                "type": "text",
                                "text": format!("Show me some {} courses", card.category)
                            }]
                        }
                    ]
                })
            })
            .collect();

        OutboundMessage::Template(json!({
            "messaging_product": "whatsapp",
            "to": format!("+{}", phone_number),
            "type": "template",
            "template": {
                "name": COURSE_CATALOG_TEMPLATE,
                "language": {"code": "en"},
                "components": [
                    {"type": "body", "parameters": highlights},
                    {"type": "carousel", "cards": cards}
                ]
            }
        }))
    }

    /// Recipient in `+<number>` form.
    pub fn recipient(&self) -> &str {
        match self {
            OutboundMessage::Text(reply) => &reply.to,
            OutboundMessage::Template(value) => value["to"].as_str().unwrap_or(""),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(json: Value) -> InboundMessage {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_notification_envelope() {
        let body = json!({
            "context": {"MetaPhoneNumberIds": [{"metaPhoneNumberId": "pn-1", "arn": "arn:aws:social-messaging:ap-south-1:123:phone-number-id/pn-1"}]},
            "whatsAppWebhookEntry": "{\"changes\":[{\"field\":\"messages\",\"value\":{\"messages\":[{\"id\":\"wamid.1\",\"from\":\"15551234567\",\"type\":\"text\",\"text\":{\"body\":\"hi\"}}]}}]}",
            "aws_account_id": "123456789012"
        })
        .to_string();

        let notification = EumNotification::parse(&body).unwrap();
        assert_eq!(notification.origination().phone_number_id, "pn-1");

        let entry = notification.webhook_entry().unwrap();
        let inbound = &entry.changes[0].value.messages[0];
        assert_eq!(inbound.from.as_deref(), Some("15551234567"));
        assert_eq!(inbound.text().as_deref(), Some("hi"));
    }

    #[test]
    fn test_missing_origination_is_empty() {
        let notification =
            EumNotification::parse(r#"{"whatsAppWebhookEntry": "{}"}"#).unwrap();
        assert_eq!(notification.origination(), Origination::default());
    }

    #[test]
    fn test_text_extraction_by_type() {
        let button = message(json!({"type": "button", "button": {"payload": "Show me AWS"}}));
        assert_eq!(button.text().as_deref(), Some("Show me AWS"));

        let button_reply = message(json!({
            "type": "interactive",
            "interactive": {"type": "button_reply", "button_reply": {"title": "Yes"}}
        }));
        assert_eq!(button_reply.text().as_deref(), Some("Button: Yes"));

        let list_reply = message(json!({
            "type": "interactive",
            "interactive": {"type": "list_reply", "list_reply": {"title": "Python"}}
        }));
        assert_eq!(list_reply.text().as_deref(), Some("List selection: Python"));

        let image = message(json!({"type": "image"}));
        assert_eq!(image.text().as_deref(), Some("[Received image message]"));
    }

    #[test]
    fn test_empty_text_is_none() {
        assert!(message(json!({"type": "text", "text": {"body": ""}})).text().is_none());
        assert!(message(json!({"type": "interactive", "interactive": {"type": "nfm_reply"}}))
            .text()
            .is_none());
    }

    #[test]
    fn test_text_reply_payload() {
        let reply = OutboundMessage::text_reply("wamid.1", "15551234567", "Hello!");
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["to"], "+15551234567");
        assert_eq!(value["context"]["message_id"], "wamid.1");
        assert_eq!(value["text"]["preview_url"], false);
        assert_eq!(value["text"]["body"], "Hello!");
    }

    #[test]
    fn test_course_catalog_has_four_cards() {
        let catalog = OutboundMessage::course_catalog("15551234567");
        assert_eq!(catalog.recipient(), "+15551234567");

        let value = serde_json::to_value(&catalog).unwrap();
        assert_eq!(value["template"]["name"], COURSE_CATALOG_TEMPLATE);
        let cards = value["template"]["components"][1]["cards"].as_array().unwrap();
        assert_eq!(cards.len(), 4);
        assert_eq!(
            cards[2]["components"][2]["parameters"][0]["text"],
            "Show me some Data Science courses"
        );
    }
}
