use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use stormdesk_core::{
    content::Content,
    handler::{generate_schema, ToolError, ToolHandler, ToolResult},
};

pub const NWS_API_BASE: &str = "https://api.weather.gov";

const NWS_USER_AGENT: &str = concat!("stormdesk/", env!("CARGO_PKG_VERSION"));

/// Thin client for the National Weather Service API. The base URL is
/// injectable so tests can point it at a local fixture.
#[derive(Clone)]
pub struct NwsClient {
    http: reqwest::Client,
    base_url: String,
}

impl Default for NwsClient {
    fn default() -> Self {
        Self::new()
    }
}

impl NwsClient {
    pub fn new() -> Self {
        Self::with_base_url(NWS_API_BASE)
    }

    pub fn with_base_url<S: Into<String>>(base_url: S) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn alerts(&self, state: &str) -> Result<AlertsResponse, reqwest::Error> {
        self.get_json(&format!("{}/alerts?area={}", self.base_url, state))
            .await
    }

    pub async fn points(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<PointsResponse, reqwest::Error> {
        self.get_json(&format!(
            "{}/points/{:.4},{:.4}",
            self.base_url, latitude, longitude
        ))
        .await
    }

    /// The forecast endpoint has no fixed path; its URL comes back in the
    /// points response.
    pub async fn forecast(&self, url: &str) -> Result<ForecastResponse, reqwest::Error> {
        self.get_json(url).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, reqwest::Error> {
        let response = self
            .http
            .get(url)
            .header(USER_AGENT, NWS_USER_AGENT)
            .header(ACCEPT, "application/geo+json")
            .send()
            .await?
            .error_for_status()?;
        response.json().await
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertsResponse {
    #[serde(default)]
    pub features: Vec<AlertFeature>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertFeature {
    #[serde(default)]
    pub properties: AlertProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertProperties {
    pub event: Option<String>,
    pub area_desc: Option<String>,
    pub severity: Option<String>,
    pub status: Option<String>,
    pub headline: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PointsResponse {
    #[serde(default)]
    pub properties: PointsProperties,
}

#[derive(Debug, Default, Deserialize)]
pub struct PointsProperties {
    pub forecast: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ForecastResponse {
    #[serde(default)]
    pub properties: ForecastProperties,
}

#[derive(Debug, Default, Deserialize)]
pub struct ForecastProperties {
    #[serde(default)]
    pub periods: Vec<ForecastPeriod>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastPeriod {
    pub name: Option<String>,
    pub temperature: Option<f64>,
    pub temperature_unit: Option<String>,
    pub wind_speed: Option<String>,
    pub wind_direction: Option<String>,
    pub short_forecast: Option<String>,
}

fn format_alert(feature: &AlertFeature) -> String {
    let props = &feature.properties;
    [
        format!("Event: {}", props.event.as_deref().unwrap_or("Unknown")),
        format!("Area: {}", props.area_desc.as_deref().unwrap_or("Unknown")),
        format!("Severity: {}", props.severity.as_deref().unwrap_or("Unknown")),
        format!("Status: {}", props.status.as_deref().unwrap_or("Unknown")),
        format!(
            "Headline: {}",
            props.headline.as_deref().unwrap_or("No headline")
        ),
        "---".to_string(),
    ]
    .join("\n")
}

fn format_period(period: &ForecastPeriod) -> String {
    let temperature = period
        .temperature
        .map(|t| t.to_string())
        .unwrap_or_else(|| "?".to_string());
    [
        format!("{}:", period.name.as_deref().unwrap_or("Unknown")),
        format!(
            "Temperature: {}°{}",
            temperature,
            period.temperature_unit.as_deref().unwrap_or("F")
        ),
        format!(
            "Wind: {} {}",
            period.wind_speed.as_deref().unwrap_or("?"),
            period.wind_direction.as_deref().unwrap_or("")
        ),
        period
            .short_forecast
            .as_deref()
            .unwrap_or("No forecast")
            .to_string(),
        "---".to_string(),
    ]
    .join("\n")
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AlertsParams {
    /// Two-letter state code (e.g. CA, NY)
    pub state: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ForecastParams {
    /// Latitude of the location
    pub latitude: f64,
    /// Longitude of the location
    pub longitude: f64,
}

/// `get-alerts`: active NWS alerts for a US state.
pub struct AlertsTool {
    nws: NwsClient,
}

impl AlertsTool {
    pub fn new(nws: NwsClient) -> Self {
        Self { nws }
    }
}

#[async_trait]
impl ToolHandler for AlertsTool {
    fn name(&self) -> &'static str {
        "get-alerts"
    }

    fn description(&self) -> &'static str {
        "Get weather alerts for a state"
    }

    fn schema(&self) -> Value {
        generate_schema::<AlertsParams>().unwrap_or_else(|_| serde_json::json!({"type": "object"}))
    }

    async fn call(&self, params: Value) -> ToolResult<Vec<Content>> {
        let params: AlertsParams = serde_json::from_value(params)
            .map_err(|e| ToolError::InvalidParameters(e.to_string()))?;
        if params.state.chars().count() != 2 {
            return Err(ToolError::InvalidParameters(
                "state must be a two-letter code".into(),
            ));
        }
        let state = params.state.to_uppercase();

        let alerts = match self.nws.alerts(&state).await {
            Ok(alerts) => alerts,
            Err(error) => {
                tracing::error!(%error, %state, "alerts request failed");
                return Ok(vec![Content::text("Failed to retrieve alerts data")]);
            }
        };

        tracing::info!(%state, count = alerts.features.len(), "alerts retrieved");
        if alerts.features.is_empty() {
            return Ok(vec![Content::text(format!("No active alerts for {state}"))]);
        }

        let formatted: Vec<String> = alerts.features.iter().map(format_alert).collect();
        Ok(vec![Content::text(format!(
            "Active alerts for {state}:\n\n{}",
            formatted.join("\n")
        ))])
    }
}

/// `get-forecast`: the NWS period forecast for a coordinate. Two requests,
/// the second at a URL the first one hands back.
pub struct ForecastTool {
    nws: NwsClient,
}

impl ForecastTool {
    pub fn new(nws: NwsClient) -> Self {
        Self { nws }
    }
}

#[async_trait]
impl ToolHandler for ForecastTool {
    fn name(&self) -> &'static str {
        "get-forecast"
    }

    fn description(&self) -> &'static str {
        "Get weather forecast for a location"
    }

    fn schema(&self) -> Value {
        generate_schema::<ForecastParams>()
            .unwrap_or_else(|_| serde_json::json!({"type": "object"}))
    }

    async fn call(&self, params: Value) -> ToolResult<Vec<Content>> {
        let params: ForecastParams = serde_json::from_value(params)
            .map_err(|e| ToolError::InvalidParameters(e.to_string()))?;
        let ForecastParams {
            latitude,
            longitude,
        } = params;
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(ToolError::InvalidParameters(
                "latitude must be between -90 and 90".into(),
            ));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(ToolError::InvalidParameters(
                "longitude must be between -180 and 180".into(),
            ));
        }

        let points = match self.nws.points(latitude, longitude).await {
            Ok(points) => points,
            Err(error) => {
                tracing::error!(%error, latitude, longitude, "grid point request failed");
                return Ok(vec![Content::text(format!(
                    "Failed to retrieve grid point data for {latitude}, {longitude}. Only US locations are supported."
                ))]);
            }
        };

        let Some(forecast_url) = points.properties.forecast else {
            return Ok(vec![Content::text(
                "Failed to get forecast URL from grid point data",
            )]);
        };

        let forecast = match self.nws.forecast(&forecast_url).await {
            Ok(forecast) => forecast,
            Err(error) => {
                tracing::error!(%error, url = %forecast_url, "forecast request failed");
                return Ok(vec![Content::text("Failed to retrieve forecast data")]);
            }
        };

        let periods = forecast.properties.periods;
        tracing::info!(latitude, longitude, count = periods.len(), "forecast retrieved");
        if periods.is_empty() {
            return Ok(vec![Content::text("No forecast periods available")]);
        }

        let formatted: Vec<String> = periods.iter().map(format_period).collect();
        Ok(vec![Content::text(format!(
            "Forecast for {latitude}, {longitude}:\n\n{}",
            formatted.join("\n")
        ))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn alert_formatting_fills_in_fallbacks() {
        let feature: AlertFeature = serde_json::from_value(json!({
            "properties": {"event": "Tornado Warning", "severity": "Extreme"}
        }))
        .unwrap();

        let block = format_alert(&feature);

        assert!(block.starts_with("Event: Tornado Warning\n"));
        assert!(block.contains("Area: Unknown"));
        assert!(block.contains("Severity: Extreme"));
        assert!(block.contains("Headline: No headline"));
        assert!(block.ends_with("---"));
    }

    #[test]
    fn period_formatting_prints_whole_degrees_without_decimals() {
        let period: ForecastPeriod = serde_json::from_value(json!({
            "name": "Tonight",
            "temperature": 58.0,
            "temperatureUnit": "F",
            "windSpeed": "5 mph",
            "windDirection": "SW",
            "shortForecast": "Clear",
        }))
        .unwrap();

        let block = format_period(&period);

        assert!(block.starts_with("Tonight:\n"));
        assert!(block.contains("Temperature: 58°F"));
        assert!(block.contains("Wind: 5 mph SW"));
        assert!(block.contains("Clear"));
    }

    #[tokio::test]
    async fn alerts_rejects_long_state_codes() {
        let tool = AlertsTool::new(NwsClient::with_base_url("http://127.0.0.1:9"));

        let err = tool.call(json!({"state": "California"})).await.unwrap_err();

        assert!(matches!(err, ToolError::InvalidParameters(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn forecast_rejects_out_of_range_coordinates() {
        let tool = ForecastTool::new(NwsClient::with_base_url("http://127.0.0.1:9"));

        let err = tool
            .call(json!({"latitude": 91.0, "longitude": 0.0}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)), "got {err:?}");

        let err = tool
            .call(json!({"latitude": 0.0, "longitude": -200.0}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)), "got {err:?}");
    }

    #[test]
    fn schemas_describe_object_parameters() {
        let alerts = AlertsTool::new(NwsClient::new());
        let schema = alerts.schema();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"].get("state").is_some());

        let forecast = ForecastTool::new(NwsClient::new());
        let schema = forecast.schema();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"].get("latitude").is_some());
    }
}
