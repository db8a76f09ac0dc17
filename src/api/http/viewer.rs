// src/api/http/viewer.rs
// Viewer Attachment (C9): download-then-serve. `GET /files/:id` streams
// straight off disk rather than buffering through JSON, since the file
// may be arbitrarily large binary content.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::store::models::ViewerFile;

use super::middleware::require_user;

pub fn router() -> axum::Router<Arc<AppState>> {
    axum::Router::new()
        .route("/download", post(download))
        .route("/files/{id}", get(serve_file))
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    data: T,
}

#[derive(Deserialize)]
struct DownloadRequest {
    url: String,
    filename: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
}

async fn download(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<DownloadRequest>,
) -> AppResult<Json<Envelope<ViewerFile>>> {
    let user = require_user(&state, &jar).await?;
    let file = state
        .viewer_service
        .download(&user.id, &req.url, &req.filename, &req.mime_type)
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(Envelope { success: true, data: file }))
}

async fn serve_file(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let Some((path, mime_type)) = state.viewer_service.resolve(&id) else {
        return (StatusCode::NOT_FOUND, "viewer file not found").into_response();
    };

    match tokio::fs::File::open(&path).await {
        Ok(file) => {
            let stream = ReaderStream::new(file);
            let body = Body::from_stream(stream);
            Response::builder()
                .header(header::CONTENT_TYPE, mime_type)
                .body(body)
                .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR).into_response())
        }
        Err(_) => (StatusCode::NOT_FOUND, "viewer file no longer on disk").into_response(),
    }
}
