// src/api/http/chat.rs
// Turn Orchestrator (C7) SSE endpoint. Grounded on the teacher's
// `web/chat/stream.rs`: the handler owns only the axum/Sse plumbing,
// translating `TurnEvent`s from the orchestrator's mpsc channel into
// `axum::response::sse::Event`s and the literal `[DONE]` terminator.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::post;
use axum_extra::extract::CookieJar;
use futures_util::Stream;
use serde::Deserialize;

use crate::error::AppResult;
use crate::metrics;
use crate::orchestrator::{TurnEvent, TurnParams};
use crate::state::AppState;
use crate::store::models::ViewerFile;

use super::middleware::require_role;

pub fn router() -> axum::Router<Arc<AppState>> {
    axum::Router::new().route("/stream", post(chat_stream))
}

#[derive(Deserialize)]
struct ChatMessage {
    #[allow(dead_code)]
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatStreamRequest {
    messages: Vec<ChatMessage>,
    #[serde(rename = "roleId")]
    #[allow(dead_code)]
    role_id: Option<String>,
    timezone: Option<String>,
    locale: Option<String>,
    #[serde(rename = "viewerFile")]
    viewer_file: Option<ViewerFile>,
}

async fn chat_stream(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: axum::http::HeaderMap,
    axum::Json(req): axum::Json<ChatStreamRequest>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let role_ctx = require_role(&state, &jar, &headers).await?;
    metrics::record_request("chat_stream");

    // §6's contract is a single new user message per call — the last
    // entry in `messages` is what the turn actually runs on; the rest
    // is the client's own optimistic history, already persisted.
    let user_message = req
        .messages
        .last()
        .map(|m| m.content.clone())
        .unwrap_or_default();

    let params = TurnParams {
        timezone: req.timezone,
        locale: req.locale,
        viewer_file: req.viewer_file,
    };

    let (tx, mut rx) = tokio::sync::mpsc::channel(256);
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        orchestrator.run_turn(&role_ctx, &user_message, params, tx).await;
    });

    metrics::connection_opened();
    let event_stream = stream! {
        while let Some(event) = rx.recv().await {
            match event {
                TurnEvent::StreamEnd => {
                    yield Ok(Event::default().data("[DONE]"));
                    break;
                }
                other => {
                    if let Some(json) = other.to_json() {
                        yield Ok(Event::default().data(json.to_string()));
                    }
                }
            }
        }
        metrics::connection_closed();
    };

    Ok(Sse::new(event_stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
