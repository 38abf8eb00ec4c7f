//! WhatsApp to S3 Lambda - Stores one analytics record per gateway event.
//!
//! Subscribed to the same SNS topic as the forwarder. Each record is written
//! to `year=YYYY/month=MM/day=DD/<uuid>.json` in the messages bucket. Any
//! failure fails the invocation so SNS redelivers the batch; records are not
//! deduplicated.

use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde::Serialize;
use shared::analytics::{parse_timestamp, partition_key};
use shared::{
    AnalyticsConfig, AnalyticsRecord, EumNotification, RecordStore, S3RecordStore, SnsEvent,
    SnsMessage,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct WriterResponse {
    #[serde(rename = "statusCode")]
    status_code: u16,
    body: String,
    records_written: u32,
}

struct AppState {
    store: Arc<dyn RecordStore>,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let settings = AnalyticsConfig::from_env()?;

        Ok(Self {
            store: Arc::new(S3RecordStore::new(
                aws_sdk_s3::Client::new(&config),
                settings.bucket_name,
            )),
        })
    }
}

/// Build the record for one SNS message and its object key.
fn record_for(sns: &SnsMessage) -> shared::Result<(String, AnalyticsRecord)> {
    let notification = EumNotification::parse(&sns.message)?;
    let published_at = parse_timestamp(&sns.timestamp)?;
    let record = AnalyticsRecord::from_notification(&sns.message_id, published_at, &notification)?;

    Ok((partition_key(published_at, Uuid::new_v4()), record))
}

async fn handler(state: Arc<AppState>, event: LambdaEvent<SnsEvent>) -> Result<WriterResponse, Error> {
    let mut records_written = 0u32;

    for record in &event.payload.records {
        let (key, analytics) = record_for(&record.sns).map_err(|e| {
            error!(sns_message_id = %record.sns.message_id, error = %e, "Error processing message");
            e
        })?;

        state.store.put(&key, &analytics).await.map_err(|e| {
            error!(key = %key, error = %e, "Error storing message");
            e
        })?;

        info!(message_id = %analytics.message_id, key = %key, "Successfully processed message");
        records_written += 1;
    }

    Ok(WriterResponse {
        status_code: 200,
        body: "Messages processed successfully".to_string(),
        records_written,
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
