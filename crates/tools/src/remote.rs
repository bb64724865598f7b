//! Remote tool catalog: tools served by an HTTP endpoint.
//!
//! The endpoint exposes two routes:
//! - `GET  {endpoint}/tools` → `{"tools": [{"name", "description", "parameters"}]}`
//! - `POST {endpoint}/execute` with `{"tool", "arguments"}` → `{"output": ...}`
//!
//! Every catalog entry becomes a `RemoteTool` in the registry. Non-2xx
//! answers are `ExecutionFailed`; transport failures are `Unreachable`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use toolrelay_core::error::ToolError;
use toolrelay_core::provider::ToolDefinition;
use toolrelay_core::tool::Tool;
use tracing::{debug, warn};

/// HTTP client for one tool catalog endpoint.
pub struct RemoteCatalog {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl RemoteCatalog {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ToolError::Unreachable(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Fetch the tool definitions the endpoint serves.
    pub async fn discover(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        let url = format!("{}/tools", self.endpoint);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ToolError::Unreachable(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Unreachable(format!(
                "tool catalog returned {status}: {body}"
            )));
        }

        let listing: CatalogListing = response
            .json()
            .await
            .map_err(|e| ToolError::Unreachable(format!("invalid tool catalog: {e}")))?;

        debug!(endpoint = %self.endpoint, count = listing.tools.len(), "Discovered remote tools");
        Ok(listing.tools)
    }

    /// Invoke a tool by name.
    pub async fn execute(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let url = format!("{}/execute", self.endpoint);
        let response = self
            .authorized(self.client.post(&url))
            .json(&ExecuteRequest { tool, arguments })
            .send()
            .await
            .map_err(|e| ToolError::Unreachable(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(tool, %status, "Remote tool call failed");
            return Err(ToolError::ExecutionFailed {
                tool_name: tool.to_string(),
                reason: format!("status {}: {body}", status.as_u16()),
            });
        }

        let body: serde_json::Value = response.json().await.map_err(|e| ToolError::ExecutionFailed {
            tool_name: tool.to_string(),
            reason: format!("invalid response body: {e}"),
        })?;

        Ok(match body {
            serde_json::Value::Object(mut map) if map.contains_key("output") => {
                map.remove("output").unwrap_or_default()
            }
            other => other,
        })
    }

    /// Discover the catalog and wrap every entry as a `RemoteTool`.
    pub async fn into_tools(self) -> Result<Vec<RemoteTool>, ToolError> {
        let definitions = self.discover().await?;
        let catalog = Arc::new(self);
        Ok(definitions
            .into_iter()
            .map(|definition| RemoteTool {
                definition,
                catalog: Arc::clone(&catalog),
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct CatalogListing {
    #[serde(default)]
    tools: Vec<ToolDefinition>,
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    tool: &'a str,
    arguments: serde_json::Value,
}

/// One tool of a remote catalog.
pub struct RemoteTool {
    definition: ToolDefinition,
    catalog: Arc<RemoteCatalog>,
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn description(&self) -> &str {
        &self.definition.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.definition.parameters.clone()
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        self.catalog.execute(&self.definition.name, arguments).await
    }
}
