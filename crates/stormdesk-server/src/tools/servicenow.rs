use async_trait::async_trait;
use reqwest::header::ACCEPT;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use stormdesk_core::{
    content::Content,
    handler::{generate_schema, ToolError, ToolHandler, ToolResult},
};

/// Connection details for a ServiceNow instance.
#[derive(Clone)]
pub struct ServiceNowCredentials {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

impl ServiceNowCredentials {
    /// Read `SERVICENOW_BASE_URL` / `SERVICENOW_USERNAME` /
    /// `SERVICENOW_PASSWORD`, reporting the first one that is missing.
    pub fn from_env() -> Result<Self, &'static str> {
        Ok(Self {
            base_url: env_var("SERVICENOW_BASE_URL")?,
            username: env_var("SERVICENOW_USERNAME")?,
            password: env_var("SERVICENOW_PASSWORD")?,
        })
    }
}

fn env_var(name: &'static str) -> Result<String, &'static str> {
    std::env::var(name).map_err(|_| name)
}

fn default_short_description() -> String {
    "test123fromClaude".to_string()
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct IncidentParams {
    /// Short description for the incident
    #[serde(default = "default_short_description")]
    pub short_description: String,
}

/// `create-servicenow-incident`: opens a record in the ServiceNow `incident`
/// table over its REST API.
///
/// Credentials are read from the environment on every call, so a fixed
/// variable takes effect without restarting the server.
pub struct IncidentTool {
    http: reqwest::Client,
    credentials: Option<ServiceNowCredentials>,
}

impl Default for IncidentTool {
    fn default() -> Self {
        Self::new()
    }
}

impl IncidentTool {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials: None,
        }
    }

    /// Pin the instance and credentials instead of reading the environment.
    pub fn with_credentials(credentials: ServiceNowCredentials) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials: Some(credentials),
        }
    }

    fn credentials(&self) -> Result<ServiceNowCredentials, &'static str> {
        match &self.credentials {
            Some(fixed) => Ok(fixed.clone()),
            None => ServiceNowCredentials::from_env(),
        }
    }
}

#[async_trait]
impl ToolHandler for IncidentTool {
    fn name(&self) -> &'static str {
        "create-servicenow-incident"
    }

    fn description(&self) -> &'static str {
        "Creates an incident in ServiceNow (table: incident) via REST API"
    }

    fn schema(&self) -> Value {
        generate_schema::<IncidentParams>()
            .unwrap_or_else(|_| serde_json::json!({"type": "object"}))
    }

    async fn call(&self, params: Value) -> ToolResult<Vec<Content>> {
        let params: IncidentParams = serde_json::from_value(params)
            .map_err(|e| ToolError::InvalidParameters(e.to_string()))?;
        if params.short_description.is_empty() {
            return Err(ToolError::InvalidParameters(
                "short_description must not be empty".into(),
            ));
        }

        let credentials = match self.credentials() {
            Ok(credentials) => credentials,
            Err(missing) => {
                tracing::error!(variable = missing, "ServiceNow credentials missing");
                return Ok(vec![Content::text(format!(
                    "ServiceNow is not configured: {missing} is not set"
                ))]);
            }
        };

        let url = format!("{}/api/now/table/incident", credentials.base_url);
        tracing::info!(%url, short_description = %params.short_description, "creating ServiceNow incident");

        let response = match self
            .http
            .post(&url)
            .basic_auth(&credentials.username, Some(&credentials.password))
            .header(ACCEPT, "application/json")
            .json(&json!({"short_description": params.short_description}))
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(%error, "ServiceNow request failed");
                return Ok(vec![Content::text(format!(
                    "Error calling ServiceNow: {error}"
                ))]);
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(error) => {
                tracing::error!(%error, "ServiceNow response unreadable");
                return Ok(vec![Content::text(format!(
                    "Error calling ServiceNow: {error}"
                ))]);
            }
        };

        if !status.is_success() {
            tracing::warn!(status = %status, "ServiceNow rejected the incident");
            return Ok(vec![Content::text(format!(
                "ServiceNow POST failed: HTTP {} {}\n{body}",
                status.as_u16(),
                status.canonical_reason().unwrap_or_default(),
            ))]);
        }

        let parsed = serde_json::from_str::<Value>(&body).ok();
        let number = parsed
            .as_ref()
            .and_then(|v| v["result"]["number"].as_str())
            .unwrap_or("(missing number)")
            .to_string();
        let sys_id = parsed
            .as_ref()
            .and_then(|v| v["result"]["sys_id"].as_str())
            .unwrap_or("(missing sys_id)")
            .to_string();

        tracing::info!(%number, %sys_id, "incident created");

        let raw = parsed.unwrap_or(Value::String(body));
        let pretty = serde_json::to_string_pretty(&raw).unwrap_or_else(|_| raw.to_string());
        Ok(vec![Content::text(format!(
            "Created ServiceNow incident\nnumber: {number}\nsys_id: {sys_id}\n\nRaw response:\n{pretty}"
        ))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_short_description_falls_back_to_the_default() {
        let params: IncidentParams = serde_json::from_value(json!({})).unwrap();
        assert_eq!(params.short_description, "test123fromClaude");
    }

    #[tokio::test]
    async fn empty_short_description_is_rejected() {
        let tool = IncidentTool::new();

        let err = tool
            .call(json!({"short_description": ""}))
            .await
            .unwrap_err();

        assert!(matches!(err, ToolError::InvalidParameters(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn missing_credentials_become_failure_text() {
        std::env::remove_var("SERVICENOW_BASE_URL");
        std::env::remove_var("SERVICENOW_USERNAME");
        std::env::remove_var("SERVICENOW_PASSWORD");
        let tool = IncidentTool::new();

        let content = tool.call(json!({})).await.unwrap();

        let text = content[0].as_text().unwrap();
        assert!(text.contains("not configured"), "got {text}");
        assert!(text.contains("SERVICENOW_BASE_URL"));
    }

    #[test]
    fn schema_does_not_require_short_description() {
        let tool = IncidentTool::new();
        let schema = tool.schema();

        assert_eq!(schema["type"], "object");
        let required = schema["required"].as_array();
        assert!(required.map_or(true, |req| !req.iter().any(|v| v == "short_description")));
    }
}
