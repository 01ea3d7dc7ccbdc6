//! HTTP callback sink.
//!
//! POSTs the callback payload as JSON. Delivery is best effort: the caller
//! decides what a failure means.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{CallbackPayload, CallbackSink};

/// Callback sink using reqwest
pub struct HttpCallbackSink {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpCallbackSink {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl CallbackSink for HttpCallbackSink {
    async fn post(
        &self,
        callback_uri: &str,
        payload: &CallbackPayload,
        cancellation: &CancellationToken,
    ) -> Result<()> {
        let request = self
            .client
            .post(callback_uri)
            .timeout(self.timeout)
            .json(payload)
            .send();

        let response = tokio::select! {
            _ = cancellation.cancelled() => anyhow::bail!("Callback to {} cancelled", callback_uri),
            response = request => response.with_context(|| format!("Failed to send callback to {}", callback_uri))?,
        };

        response
            .error_for_status()
            .with_context(|| format!("Callback endpoint {} rejected the notification", callback_uri))?;

        Ok(())
    }
}
