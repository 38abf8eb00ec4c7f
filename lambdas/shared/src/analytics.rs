//! Message analytics records.
//!
//! Every gateway notification becomes one flat JSON object in the messages
//! bucket, partitioned by publish date so the catalog table can prune by
//! `year`/`month`/`day`.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::whatsapp::{EumNotification, WebhookEntry};
use crate::{Error, Result};

/// One row of the analytics table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    pub message_id: String,
    /// `YYYY-MM-DD`
    pub event_date: String,
    /// `HH:MM:SS`
    pub event_time: String,
    pub aws_account_id: String,
    pub status: Option<String>,
    pub recipient_id: Option<String>,
    pub conversation_id: Option<String>,
    pub billable: Option<bool>,
    pub pricing_model: Option<String>,
    pub pricing_category: Option<String>,
    pub template_name: Option<String>,
    pub template_language: Option<String>,
}

/// Delivery details carried by the webhook entry.
#[derive(Debug, Default, PartialEq)]
struct DeliveryFields {
    status: Option<String>,
    recipient_id: Option<String>,
    conversation_id: Option<String>,
    billable: Option<bool>,
    pricing_model: Option<String>,
    pricing_category: Option<String>,
    template_name: Option<String>,
    template_language: Option<String>,
}

/// Later changes overwrite earlier ones, so the last recognised change wins.
fn delivery_fields(entry: &WebhookEntry) -> DeliveryFields {
    let mut fields = DeliveryFields::default();

    for change in &entry.changes {
        match change.field.as_str() {
            "messages" => {
                if let Some(status) = change.value.statuses.first() {
                    let pricing = status.pricing.as_ref();
                    fields = DeliveryFields {
                        status: Some(status.status.clone()),
                        recipient_id: Some(status.recipient_id.clone()),
                        conversation_id: Some(
                            status
                                .conversation
                                .as_ref()
                                .map(|c| c.id.clone())
                                .unwrap_or_default(),
                        ),
                        billable: Some(pricing.map(|p| p.billable).unwrap_or(false)),
                        pricing_model: Some(
                            pricing.map(|p| p.pricing_model.clone()).unwrap_or_default(),
                        ),
                        pricing_category: Some(
                            pricing.map(|p| p.category.clone()).unwrap_or_default(),
                        ),
                        template_name: None,
                        template_language: None,
                    };
                }
            }
            "message_template_status_update" => {
                let value = &change.value;
                fields = DeliveryFields {
                    status: Some(format!(
                        "TEMPLATE_{}",
                        value.event.as_deref().unwrap_or_default()
                    )),
                    template_name: Some(value.message_template_name.clone().unwrap_or_default()),
                    template_language: Some(
                        value.message_template_language.clone().unwrap_or_default(),
                    ),
                    billable: Some(false),
                    ..DeliveryFields::default()
                };
            }
            _ => {}
        }
    }

    fields
}

/// Parse an SNS publish timestamp such as `2025-03-14T09:26:53.589Z`.
pub fn parse_timestamp(timestamp: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::MalformedEvent(format!("Invalid timestamp '{}': {}", timestamp, e)))
}

impl AnalyticsRecord {
    /// Build the record for one SNS delivery.
    pub fn from_notification(
        sns_message_id: &str,
        published_at: DateTime<Utc>,
        notification: &EumNotification,
    ) -> Result<Self> {
        let entry = notification.webhook_entry()?;
        let fields = delivery_fields(&entry);

        Ok(Self {
            message_id: sns_message_id.to_string(),
            event_date: published_at.format("%Y-%m-%d").to_string(),
            event_time: published_at.format("%H:%M:%S").to_string(),
            aws_account_id: notification.aws_account_id.clone(),
            status: fields.status,
            recipient_id: fields.recipient_id,
            conversation_id: fields.conversation_id,
            billable: fields.billable,
            pricing_model: fields.pricing_model,
            pricing_category: fields.pricing_category,
            template_name: fields.template_name,
            template_language: fields.template_language,
        })
    }
}

/// Object key `year=YYYY/month=MM/day=DD/<id>.json`.
pub fn partition_key(published_at: DateTime<Utc>, object_id: Uuid) -> String {
    format!(
        "year={}/month={:02}/day={:02}/{}.json",
        published_at.year(),
        published_at.month(),
        published_at.day(),
        object_id
    )
}

/// Records published on `date`.
pub fn filter_by_date(records: &[AnalyticsRecord], date: NaiveDate) -> Vec<AnalyticsRecord> {
    let date = date.format("%Y-%m-%d").to_string();
    records
        .iter()
        .filter(|record| record.event_date == date)
        .cloned()
        .collect()
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put(&self, key: &str, record: &AnalyticsRecord) -> Result<()>;
}

/// Writes records as JSON objects into a bucket.
pub struct S3RecordStore {
    client: S3Client,
    bucket: String,
}

impl S3RecordStore {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl RecordStore for S3RecordStore {
    async fn put(&self, key: &str, record: &AnalyticsRecord) -> Result<()> {
        let body = serde_json::to_vec(record)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| Error::from_sdk("Failed to store analytics record", e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn notification(entry: serde_json::Value) -> EumNotification {
        EumNotification::parse(
            &json!({
                "whatsAppWebhookEntry": entry.to_string(),
                "aws_account_id": "123456789012"
            })
            .to_string(),
        )
        .unwrap()
    }

    fn published() -> DateTime<Utc> {
        parse_timestamp("2025-03-04T09:26:53.589Z").unwrap()
    }

    #[test]
    fn test_status_update_record() {
        let entry = json!({"changes": [{"field": "messages", "value": {"statuses": [{
            "id": "wamid.1",
            "status": "delivered",
            "recipient_id": "15551234567",
            "conversation": {"id": "conv-1"},
            "pricing": {"billable": true, "pricing_model": "CBP", "category": "service"}
        }]}}]});

        let record =
            AnalyticsRecord::from_notification("sns-1", published(), &notification(entry)).unwrap();

        assert_eq!(record.message_id, "sns-1");
        assert_eq!(record.event_date, "2025-03-04");
        assert_eq!(record.event_time, "09:26:53");
        assert_eq!(record.aws_account_id, "123456789012");
        assert_eq!(record.status.as_deref(), Some("delivered"));
        assert_eq!(record.recipient_id.as_deref(), Some("15551234567"));
        assert_eq!(record.conversation_id.as_deref(), Some("conv-1"));
        assert_eq!(record.billable, Some(true));
        assert_eq!(record.pricing_model.as_deref(), Some("CBP"));
        assert_eq!(record.pricing_category.as_deref(), Some("service"));
        assert_eq!(record.template_name, None);
    }

    #[test]
    fn test_template_update_record() {
        let entry = json!({"changes": [{"field": "message_template_status_update", "value": {
            "event": "APPROVED",
            "message_template_name": "course_catalog_v10",
            "message_template_language": "en"
        }}]});

        let record =
            AnalyticsRecord::from_notification("sns-2", published(), &notification(entry)).unwrap();

        assert_eq!(record.status.as_deref(), Some("TEMPLATE_APPROVED"));
        assert_eq!(record.template_name.as_deref(), Some("course_catalog_v10"));
        assert_eq!(record.template_language.as_deref(), Some("en"));
        assert_eq!(record.billable, Some(false));
        assert_eq!(record.recipient_id, None);
    }

    #[test]
    fn test_inbound_message_has_no_delivery_fields() {
        let entry = json!({"changes": [{"field": "messages", "value": {"messages": [{"id": "wamid.2", "type": "text"}]}}]});
        let record =
            AnalyticsRecord::from_notification("sns-3", published(), &notification(entry)).unwrap();

        assert_eq!(record.status, None);
        let value = serde_json::to_value(&record).unwrap();
        assert!(value["status"].is_null());
        assert_eq!(value.as_object().unwrap().len(), 12);
    }

    #[test]
    fn test_partition_key() {
        let id = Uuid::nil();
        assert_eq!(
            partition_key(published(), id),
            "year=2025/month=03/day=04/00000000-0000-0000-0000-000000000000.json"
        );
    }

    #[test]
    fn test_bad_timestamp() {
        assert!(matches!(
            parse_timestamp("04/03/2025"),
            Err(Error::MalformedEvent(_))
        ));
    }

    #[test]
    fn test_filter_by_date() {
        let on = |date: &str| AnalyticsRecord {
            event_date: date.to_string(),
            ..AnalyticsRecord::default()
        };
        let records = vec![on("2025-03-04"), on("2025-03-05"), on("2025-03-04")];

        let matched = filter_by_date(&records, NaiveDate::from_ymd_opt(2025, 3, 4).unwrap());
        assert_eq!(matched.len(), 2);
        assert!(matched.iter().all(|r| r.event_date == "2025-03-04"));
    }
}
