//! Weather tools against a local NWS fixture.

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{
    header::{ACCEPT, USER_AGENT},
    HeaderMap, StatusCode,
};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use stormdesk_core::handler::ToolHandler;
use stormdesk_server::tools::{AlertsTool, ForecastTool, NwsClient};

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn alerts_render_each_feature_block() {
    async fn alerts() -> Json<Value> {
        Json(json!({
            "features": [
                {"properties": {
                    "event": "Flood Warning",
                    "areaDesc": "Sacramento County",
                    "severity": "Moderate",
                    "status": "Actual",
                    "headline": "Flood Warning issued for Sacramento County",
                }},
                {"properties": {"event": "Wind Advisory"}},
            ]
        }))
    }

    let app = Router::new().route("/alerts", get(alerts));
    let base = serve(app).await;

    let tool = AlertsTool::new(NwsClient::with_base_url(base));
    let content = tool.call(json!({"state": "ca"})).await.unwrap();

    let text = content[0].as_text().unwrap();
    assert!(text.starts_with("Active alerts for CA:\n\n"), "got {text}");
    assert!(text.contains("Event: Flood Warning"));
    assert!(text.contains("Area: Sacramento County"));
    assert!(text.contains("Severity: Moderate"));
    assert!(text.contains("Headline: Flood Warning issued for Sacramento County"));
    // the second feature fills in fallbacks
    assert!(text.contains("Event: Wind Advisory"));
    assert!(text.contains("Headline: No headline"));
}

#[tokio::test]
async fn no_features_yields_the_quiet_message() {
    async fn alerts() -> Json<Value> {
        Json(json!({"features": []}))
    }

    let app = Router::new().route("/alerts", get(alerts));
    let base = serve(app).await;

    let tool = AlertsTool::new(NwsClient::with_base_url(base));
    let content = tool.call(json!({"state": "NY"})).await.unwrap();

    assert_eq!(content[0].as_text(), Some("No active alerts for NY"));
}

#[tokio::test]
async fn upstream_failure_yields_fixed_alerts_text() {
    async fn alerts() -> (StatusCode, Json<Value>) {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "upstream exploded"})),
        )
    }

    let app = Router::new().route("/alerts", get(alerts));
    let base = serve(app).await;

    let tool = AlertsTool::new(NwsClient::with_base_url(base));
    let content = tool.call(json!({"state": "tx"})).await.unwrap();

    assert_eq!(content[0].as_text(), Some("Failed to retrieve alerts data"));
}

#[tokio::test]
async fn requests_carry_nws_headers() {
    type Seen = Arc<Mutex<Option<(String, String)>>>;

    async fn alerts(State(seen): State<Seen>, headers: HeaderMap) -> Json<Value> {
        let pick = |name| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        *seen.lock().unwrap() = Some((pick(USER_AGENT), pick(ACCEPT)));
        Json(json!({"features": []}))
    }

    let seen: Seen = Arc::new(Mutex::new(None));
    let app = Router::new()
        .route("/alerts", get(alerts))
        .with_state(seen.clone());
    let base = serve(app).await;

    let tool = AlertsTool::new(NwsClient::with_base_url(base));
    tool.call(json!({"state": "wa"})).await.unwrap();

    let (user_agent, accept) = seen.lock().unwrap().clone().unwrap();
    assert!(user_agent.starts_with("stormdesk/"), "got {user_agent}");
    assert_eq!(accept, "application/geo+json");
}

#[tokio::test]
async fn forecast_renders_periods_from_the_pointed_url() {
    async fn points(State(base): State<String>) -> Json<Value> {
        Json(json!({"properties": {"forecast": format!("{base}/forecast")}}))
    }

    async fn forecast() -> Json<Value> {
        Json(json!({"properties": {"periods": [
            {
                "name": "Tonight",
                "temperature": 58,
                "temperatureUnit": "F",
                "windSpeed": "5 mph",
                "windDirection": "SW",
                "shortForecast": "Partly cloudy",
            },
            {"name": "Saturday"},
        ]}}))
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let app = Router::new()
        .route("/points/{coords}", get(points))
        .route("/forecast", get(forecast))
        .with_state(base.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let tool = ForecastTool::new(NwsClient::with_base_url(base));
    let content = tool
        .call(json!({"latitude": 38.58, "longitude": -121.49}))
        .await
        .unwrap();

    let text = content[0].as_text().unwrap();
    assert!(text.starts_with("Forecast for 38.58, -121.49:\n\n"), "got {text}");
    assert!(text.contains("Tonight:"));
    assert!(text.contains("Temperature: 58°F"));
    assert!(text.contains("Wind: 5 mph SW"));
    assert!(text.contains("Partly cloudy"));
    // the sparse period falls back field by field
    assert!(text.contains("Saturday:"));
    assert!(text.contains("Temperature: ?°F"));
    assert!(text.contains("No forecast"));
}

#[tokio::test]
async fn non_us_location_fails_with_the_support_note() {
    // no points route at all, like NWS answering 404 for foreign coordinates
    let app = Router::new();
    let base = serve(app).await;

    let tool = ForecastTool::new(NwsClient::with_base_url(base));
    let content = tool
        .call(json!({"latitude": 51.5, "longitude": -0.12}))
        .await
        .unwrap();

    assert_eq!(
        content[0].as_text(),
        Some("Failed to retrieve grid point data for 51.5, -0.12. Only US locations are supported.")
    );
}

#[tokio::test]
async fn missing_forecast_url_is_its_own_failure() {
    async fn points() -> Json<Value> {
        Json(json!({"properties": {}}))
    }

    let app = Router::new().route("/points/{coords}", get(points));
    let base = serve(app).await;

    let tool = ForecastTool::new(NwsClient::with_base_url(base));
    let content = tool
        .call(json!({"latitude": 38.58, "longitude": -121.49}))
        .await
        .unwrap();

    assert_eq!(
        content[0].as_text(),
        Some("Failed to get forecast URL from grid point data")
    );
}

#[tokio::test]
async fn empty_periods_yield_the_no_forecast_message() {
    async fn points(State(base): State<String>) -> Json<Value> {
        Json(json!({"properties": {"forecast": format!("{base}/forecast")}}))
    }

    async fn forecast() -> Json<Value> {
        Json(json!({"properties": {"periods": []}}))
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let app = Router::new()
        .route("/points/{coords}", get(points))
        .route("/forecast", get(forecast))
        .with_state(base.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let tool = ForecastTool::new(NwsClient::with_base_url(base));
    let content = tool
        .call(json!({"latitude": 38.58, "longitude": -121.49}))
        .await
        .unwrap();

    assert_eq!(content[0].as_text(), Some("No forecast periods available"));
}
