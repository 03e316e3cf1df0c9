//! HTTP handler: POSTs the stage document to a URL and returns the JSON reply.

use super::{StageContext, StageHandler};
use crate::core::StageKind;
use crate::pipeline::Configuration;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use tracing::debug;

/// Calls an HTTP endpoint for each attempt.
///
/// The stage configuration must set `url`; `headers` may hold an object of
/// string header values.
#[derive(Debug, Clone, Default)]
pub struct HttpHandler {
    client: reqwest::Client,
}

impl HttpHandler {
    /// Creates a handler with a default client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handler around an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StageHandler for HttpHandler {
    async fn handle(
        &self,
        kind: StageKind,
        configuration: &Configuration,
        ctx: &StageContext,
    ) -> anyhow::Result<serde_json::Value> {
        let url = configuration
            .get("url")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| anyhow!("no 'url' configured for HTTP stage"))?;

        let mut request = self.client.post(url).json(&ctx.to_document(configuration));
        if let Some(headers) = configuration.get("headers").and_then(serde_json::Value::as_object) {
            for (name, value) in headers {
                let value = value
                    .as_str()
                    .ok_or_else(|| anyhow!("header '{name}' must be a string"))?;
                request = request.header(name.as_str(), value);
            }
        }

        debug!(stage_id = %ctx.stage_id, %kind, url = %url, "Calling HTTP stage");

        let response = request
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()?;
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body).with_context(|| format!("{url} did not return valid JSON"))
    }
}
