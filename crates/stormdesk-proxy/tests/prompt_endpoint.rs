//! Status mapping of `POST /prompt` around the shared session slot.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use stormdesk_client::client::{
    ClientCapabilities, ClientInfo, Error as ClientError, ToolClientTrait,
};
use stormdesk_client::model::{
    ContentBlock, MessagesRequest, MessagesResponse, ModelApi, ModelError,
};
use stormdesk_client::session::{ChatSession, SessionConfig};
use stormdesk_core::protocol::{CallToolResult, InitializeResult, ListToolsResult};
use stormdesk_proxy::{app, session_slot, SharedSession};

/// Pops one scripted response per completion call.
struct ScriptedModel {
    responses: Mutex<Vec<MessagesResponse>>,
}

impl ScriptedModel {
    fn new(responses: Vec<MessagesResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
        })
    }
}

#[async_trait]
impl ModelApi for ScriptedModel {
    async fn complete(&self, _request: MessagesRequest) -> Result<MessagesResponse, ModelError> {
        Ok(self.responses.lock().unwrap().remove(0))
    }
}

struct FailingModel;

#[async_trait]
impl ModelApi for FailingModel {
    async fn complete(&self, _request: MessagesRequest) -> Result<MessagesResponse, ModelError> {
        Err(ModelError::Api {
            status: 500,
            body: "overloaded".to_string(),
        })
    }
}

/// Pre-initialized tool client; these exchanges never reach a tool.
struct IdleTools;

#[async_trait]
impl ToolClientTrait for IdleTools {
    async fn initialize(
        &mut self,
        _info: ClientInfo,
        _capabilities: ClientCapabilities,
    ) -> Result<InitializeResult, ClientError> {
        unimplemented!("idle tool client is already initialized")
    }

    async fn list_tools(&self, _next_cursor: Option<String>) -> Result<ListToolsResult, ClientError> {
        Ok(ListToolsResult {
            tools: vec![],
            next_cursor: None,
        })
    }

    async fn call_tool(&self, _name: &str, _arguments: Value) -> Result<CallToolResult, ClientError> {
        unimplemented!("no tool calls expected")
    }
}

fn text_response(text: &str) -> MessagesResponse {
    MessagesResponse {
        content: vec![ContentBlock::Text {
            text: text.to_string(),
        }],
        stop_reason: Some("end_turn".to_string()),
        usage: None,
    }
}

async fn install(sessions: &SharedSession, model: Arc<dyn ModelApi>) {
    let session = ChatSession::new(model, Arc::new(IdleTools), vec![], SessionConfig::default());
    sessions.write().await.replace(session);
}

fn prompt_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/prompt")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn prompts_before_the_session_is_ready_draw_503() {
    let app = app(session_slot());

    let response = app
        .oneshot(prompt_request(json!({"prompt": "hello"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        body_json(response).await,
        json!({"error": "MCP client not ready yet"})
    );
}

#[tokio::test]
async fn an_installed_session_answers_and_keeps_answering() {
    let sessions = session_slot();
    let app = app(sessions.clone());

    install(
        &sessions,
        ScriptedModel::new(vec![
            text_response("Two alerts are active in CA."),
            text_response("Still two."),
        ]),
    )
    .await;

    let first = app
        .clone()
        .oneshot(prompt_request(json!({"prompt": "alerts in CA?"})))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(
        body_json(first).await,
        json!({"response": "Two alerts are active in CA."})
    );

    // the slot stays filled; 503 never comes back once the session landed
    let second = app
        .oneshot(prompt_request(json!({"prompt": "and now?"})))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(body_json(second).await, json!({"response": "Still two."}));
}

#[tokio::test]
async fn query_failures_surface_as_500_not_503() {
    let sessions = session_slot();
    let app = app(sessions.clone());

    install(&sessions, Arc::new(FailingModel)).await;

    let response = app
        .clone()
        .oneshot(prompt_request(json!({"prompt": "hello"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await,
        json!({"error": "Anthropic API error (500): overloaded"})
    );

    // a failed query does not empty the slot
    let retry = app
        .oneshot(prompt_request(json!({"prompt": "again"})))
        .await
        .unwrap();
    assert_eq!(retry.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn requests_without_a_prompt_are_rejected_as_unprocessable() {
    let response = app(session_slot())
        .oneshot(prompt_request(json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
