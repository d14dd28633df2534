//! `POST /api/chat`: one customer turn per request.

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use autoxloo_agent::Orchestrator;
use autoxloo_core::domain::conversation::ConversationId;
use autoxloo_core::domain::routing::AgentKind;
use autoxloo_core::domain::tool::ActionRecord;
use autoxloo_core::errors::{ApplicationError, InterfaceError};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Clone)]
pub struct ChatState {
    orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    pub conversation_id: String,
    pub agents_used: Vec<AgentKind>,
    pub actions_taken: Vec<ActionRecord>,
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new().route("/api/chat", post(chat)).with_state(ChatState { orchestrator })
}

pub async fn chat(
    State(state): State<ChatState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let conversation_id = request
        .conversation_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .map(ConversationId);

    info!(
        event_name = "api.chat.received",
        correlation_id = %correlation_id,
        conversation_id = conversation_id.as_ref().map(|id| id.0.as_str()).unwrap_or("new"),
        chars = request.message.chars().count(),
        "chat message received"
    );

    // The turn runs on its own task so a dropped connection cannot cancel a
    // booking that is already in flight.
    let orchestrator = Arc::clone(&state.orchestrator);
    let message = request.message;
    let turn =
        tokio::spawn(async move { orchestrator.handle_turn(conversation_id, &message).await });

    let outcome = match turn.await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(rejected)) => {
            return Err(ApiError(ApplicationError::from(rejected).into_interface(correlation_id)));
        }
        Err(join_error) => {
            error!(
                event_name = "api.chat.turn_panicked",
                correlation_id = %correlation_id,
                error = %join_error,
                "chat turn task did not complete"
            );
            return Err(ApiError(InterfaceError::Internal {
                message: "chat turn did not complete".to_string(),
                correlation_id,
            }));
        }
    };

    Ok(Json(ChatResponse {
        response: outcome.reply,
        conversation_id: outcome.conversation_id.0,
        agents_used: outcome.agents_used,
        actions_taken: outcome.actions_taken,
    }))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::bootstrap::tests::{test_application, workspace};

    async fn post_chat(app: &Router, body: Value) -> (StatusCode, Value) {
        let request = Request::post("/api/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    #[tokio::test]
    async fn chat_returns_reply_and_manifest_in_camel_case() {
        let dir = workspace();
        let app = test_application(&dir).await;
        let router = super::router(app.orchestrator.clone());

        let (status, body) =
            post_chat(&router, json!({ "message": "Show me SUVs under $35k" })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["agentsUsed"], json!(["research"]));
        assert_eq!(body["actionsTaken"], json!([]));
        assert!(body["response"].as_str().expect("response").contains("AX10001"));
        let conversation_id = body["conversationId"].as_str().expect("id").to_string();

        let (status, follow_up) = post_chat(
            &router,
            json!({
                "message": "Schedule a test drive for stock AX10000 next Saturday 10am",
                "conversationId": conversation_id,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(follow_up["conversationId"], json!(conversation_id));
        assert_eq!(follow_up["agentsUsed"], json!(["scheduler"]));
        let actions = follow_up["actionsTaken"].as_array().expect("actions");
        assert!(actions.iter().any(|action| action["type"] == "confirm_booking"));
    }

    #[tokio::test]
    async fn blank_message_is_a_bad_request_with_correlation_id() {
        let dir = workspace();
        let app = test_application(&dir).await;
        let router = super::router(app.orchestrator.clone());

        let (status, body) = post_chat(&router, json!({ "message": "   " })).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "message must not be empty");
        assert!(!body["correlationId"].as_str().expect("correlation id").is_empty());
    }
}
