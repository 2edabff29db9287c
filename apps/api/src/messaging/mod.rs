//! Messaging transport envelopes and the outbound send capability.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

/// Inbound envelope delivered by the transport webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub from: String,
    pub text: String,
    pub origin_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub to: String,
    pub text: String,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transport rejected message (status {status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Sends one outbound message. Implementations do not retry.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError>;
}

/// Posts `{to, text}` as JSON to the transport's send endpoint.
#[derive(Clone)]
pub struct HttpMessageSender {
    client: Client,
    send_url: String,
    api_token: Option<String>,
}

impl HttpMessageSender {
    pub fn new(
        send_url: String,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            send_url,
            api_token,
        })
    }
}

#[async_trait]
impl MessageSender for HttpMessageSender {
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let mut request = self.client.post(&self.send_url).json(message);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "transport send failed: {body}");
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                message: body,
            });
        }

        debug!("outbound message delivered");
        Ok(())
    }
}
