//! HTTP surface for the persona advisor
//!
//! `POST /ask` streams the reply as chunked `text/plain`. Internal failures
//! never become non-200s: they arrive as persona-voiced text in the body.
//! Tool activity is logged server-side and not surfaced to the caller.

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::chat::ChatOrchestrator;
use crate::models::{ConversationTurn, StreamEvent};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub history: Vec<ConversationTurn>,
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<ChatOrchestrator>,
}

/// =============================
/// Handlers
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Text the caller should see for one orchestrator event, if any.
fn event_to_chunk(event: StreamEvent) -> Option<Bytes> {
    match event {
        StreamEvent::TextDelta(text) => Some(Bytes::from(text)),
        StreamEvent::Error(message) => Some(Bytes::from(message)),
        StreamEvent::ToolInvocation { name, .. } => {
            info!(tool = %name, "버핏이 데이터를 분석 중입니다...");
            None
        }
        StreamEvent::ToolResult { .. } | StreamEvent::End => None,
    }
}

async fn ask(State(state): State<ApiState>, Json(req): Json<AskRequest>) -> impl IntoResponse {
    info!(turns = req.history.len(), "Received /ask request");

    let events = state.orchestrator.stream_reply(req.history);
    let body = Body::from_stream(ReceiverStream::new(events).filter_map(|event| async move {
        event_to_chunk(event).map(Ok::<_, Infallible>)
    }));

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<ChatOrchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/ask", post(ask))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<ChatOrchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_to_chunk_forwards_text_and_errors() {
        assert_eq!(
            event_to_chunk(StreamEvent::TextDelta("Hello".to_string())),
            Some(Bytes::from("Hello"))
        );
        assert_eq!(
            event_to_chunk(StreamEvent::Error("에러가 발생했네: boom".to_string())),
            Some(Bytes::from("에러가 발생했네: boom"))
        );
    }

    #[test]
    fn test_event_to_chunk_hides_tool_traffic() {
        let invocation = StreamEvent::ToolInvocation {
            name: "get_current_stock_summary".to_string(),
            args: json!({ "ticker": "KO" }),
        };
        assert_eq!(event_to_chunk(invocation), None);

        let result = StreamEvent::ToolResult {
            name: "get_current_stock_summary".to_string(),
            value: json!({ "error": "down" }),
        };
        assert_eq!(event_to_chunk(result), None);
        assert_eq!(event_to_chunk(StreamEvent::End), None);
    }

    #[test]
    fn test_ask_request_wire_format() {
        let req: AskRequest = serde_json::from_value(json!({
            "history": [
                { "role": "user", "parts": "hello" },
                { "role": "model", "parts": "hi" }
            ]
        }))
        .unwrap();
        assert_eq!(req.history.len(), 2);
        assert_eq!(req.history[1].parts, "hi");
    }
}
