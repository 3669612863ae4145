//! SMS escalation over an HTTP gateway.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::PipelineError;

/// One text message to one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmsMessage {
    /// Recipient phone number.
    pub to: String,
    /// Message body.
    pub message: String,
}

/// Sends SMS messages through some gateway.
#[async_trait]
pub trait SmsGateway: Send + Sync + std::fmt::Debug {
    /// Delivers one message via the gateway at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Notification`] when the gateway is
    /// unreachable or rejects the message.
    async fn send(&self, endpoint: &str, sms: &SmsMessage) -> Result<(), PipelineError>;
}

/// Gateway that `POST`s `{ "to": ..., "message": ... }` as JSON.
#[derive(Debug, Clone, Default)]
pub struct HttpSmsGateway {
    client: reqwest::Client,
}

impl HttpSmsGateway {
    /// Creates a gateway sharing an existing HTTP client.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SmsGateway for HttpSmsGateway {
    async fn send(&self, endpoint: &str, sms: &SmsMessage) -> Result<(), PipelineError> {
        let failed = |reason: String| PipelineError::Notification {
            recipient: sms.to.clone(),
            reason,
        };

        let response = self
            .client
            .post(endpoint)
            .json(sms)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("gateway answered {status}")));
        }
        tracing::debug!(recipient = %sms.to, "sms delivered");
        Ok(())
    }
}
