//! Usage reporting for billing.
//!
//! Events are POSTed to an external collector after the response has
//! fully completed. The call is fire-and-forget with a short timeout;
//! failures are logged and discarded and never block delivery.

use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

use crate::config::BillingConfig;
use crate::error::{GatewayError, Result};
use crate::models::Usage;

#[derive(Debug, Clone, Serialize)]
pub struct UsageEvent {
    pub request_id: String,
    pub api_key_hash: String,
    pub model: String,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Streamed responses report a chunk-count approximation instead of
    /// provider-reported usage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_count_approx: Option<u64>,
    pub elapsed_ms: u64,
}

#[derive(Clone)]
pub struct UsageReporter {
    client: Client,
    callback_url: Option<String>,
    callback_auth: Option<String>,
}

impl UsageReporter {
    pub fn new(config: &BillingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                GatewayError::ConfigError(format!("Failed to create billing client: {}", e))
            })?;

        Ok(Self {
            client,
            callback_url: config.callback_url.clone(),
            callback_auth: config.callback_auth.clone(),
        })
    }

    /// Whether a collector is configured at all.
    pub fn enabled(&self) -> bool {
        self.callback_url.is_some()
    }

    /// Post a usage event. Never returns an error; failures are logged
    /// with the request id and dropped.
    pub async fn report(&self, event: UsageEvent) {
        let Some(url) = &self.callback_url else {
            return;
        };

        let mut request = self.client.post(url).json(&event);
        if let Some(auth) = &self.callback_auth {
            request = request.header("Authorization", auth);
        }

        if let Err(e) = request.send().await {
            warn!(
                request_id = %event.request_id,
                error = %e,
                "Usage callback failed"
            );
        }
    }
}
