//! Outbound WhatsApp delivery through the messaging gateway.

use async_trait::async_trait;
use aws_sdk_socialmessaging::primitives::Blob;
use aws_sdk_socialmessaging::Client as SocialMessagingClient;
use tracing::info;

use crate::whatsapp::OutboundMessage;
use crate::{Error, Result};

/// Meta Graph API version the payloads are written against.
pub const META_API_VERSION: &str = "v20.0";

#[async_trait]
pub trait WhatsAppSender: Send + Sync {
    /// Send `message` from the origination number identified by `origination_arn`.
    async fn send(&self, origination_arn: &str, message: &OutboundMessage) -> Result<()>;
}

pub struct SocialMessagingSender {
    client: SocialMessagingClient,
}

impl SocialMessagingSender {
    pub fn new(client: SocialMessagingClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WhatsAppSender for SocialMessagingSender {
    async fn send(&self, origination_arn: &str, message: &OutboundMessage) -> Result<()> {
        let response = self
            .client
            .send_whats_app_message()
            .origination_phone_number_id(origination_arn)
            .meta_api_version(META_API_VERSION)
            .message(Blob::new(message.to_bytes()?))
            .send()
            .await
            .map_err(|e| Error::from_sdk("Failed to send WhatsApp message", e))?;

        info!(
            recipient = %message.recipient(),
            message_id = response.message_id().unwrap_or_default(),
            "WhatsApp message sent"
        );
        Ok(())
    }
}
