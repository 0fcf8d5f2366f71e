use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};

use super::Notifier;
use crate::error::NotifyError;
use crate::sanitize::redact_url;
use crate::scheduler::InvoiceNotification;

const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Posts notifications as JSON to the URL carried by each notification.
pub struct WebhookNotifier {
    client: Client,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("invoiceflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

/// Only absolute http(s) URLs are deliverable.
pub fn parse_webhook_url(url: &str) -> Result<Url, NotifyError> {
    let parsed = Url::parse(url).map_err(|e| NotifyError::InvalidUrl {
        url: redact_url(url),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(NotifyError::InvalidUrl {
            url: redact_url(url),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, notification: &InvoiceNotification) -> Result<(), NotifyError> {
        let url = parse_webhook_url(&notification.webhook_url)?;

        let response = self
            .client
            .post(url)
            .json(notification)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        if status.is_success() {
            log::debug!(
                "Delivered {:?} notification for invoice {} to {}",
                notification.event,
                notification.invoice_id,
                redact_url(&notification.webhook_url)
            );
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let body = match body.char_indices().nth(MAX_ERROR_BODY_LENGTH) {
            Some((idx, _)) => format!("{}... (truncated)", &body[..idx]),
            None => body,
        };
        Err(NotifyError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
