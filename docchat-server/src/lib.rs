//! HTTP transport for chat sessions.
//!
//! | Method | Path | |
//! |---|---|---|
//! | `GET` | `/health` | index size and live sessions |
//! | `POST` | `/sessions` | start a session, returns the greeting events |
//! | `POST` | `/sessions/:id/files` | multipart upload, field `file` |
//! | `POST` | `/sessions/:id/messages` | ask a question, answered over SSE |
//! | `DELETE` | `/sessions/:id` | end the session |

use std::convert::Infallible;
use std::future::Future;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use docchat_core::ChatEvent;
use docchat_rag::adapters::sse::{event_name, event_payload};
use docchat_rag::{DocChat, RagError, SessionEvent, SessionHandle, SessionManager, UploadedFile};

mod error;

pub use error::ApiError;

/// Room for multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    manager: SessionManager,
}

impl AppState {
    pub fn new(manager: SessionManager) -> Self {
        Self { manager }
    }

    pub fn from_app(app: DocChat) -> Self {
        Self::new(SessionManager::new(app))
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    async fn session(&self, id: &str) -> Result<SessionHandle, ApiError> {
        match self.manager.get(id).await {
            Some(handle) if !handle.is_ended() => Ok(handle),
            _ => Err(ApiError::session_not_found(id)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionEventsResponse {
    pub session_id: String,
    pub events: Vec<ChatEvent>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub indexed_chunks: usize,
    pub sessions: usize,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub content: String,
}

pub fn create_app(state: AppState) -> Router {
    let body_limit = state.manager.app().config().max_upload_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .route("/health", get(health_handler))
        .route("/sessions", post(create_session_handler))
        .route("/sessions/:id", delete(end_session_handler))
        .route("/sessions/:id/files", post(upload_handler))
        .route("/sessions/:id/messages", post(message_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves until `shutdown` resolves, then ends every open session.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let manager = state.manager.clone();
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "docchat server listening");
    }

    axum::serve(listener, create_app(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    manager.end_all().await;
    tracing::info!("docchat server stopped");
    Ok(())
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        indexed_chunks: state.manager.app().index().len().await,
        sessions: state.manager.len().await,
    })
}

async fn create_session_handler(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SessionEventsResponse>), ApiError> {
    let (session_id, events) = state.manager.create().await?;
    tracing::debug!(%session_id, "session created");
    Ok((
        StatusCode::CREATED,
        Json(SessionEventsResponse { session_id, events }),
    ))
}

async fn upload_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<SessionEventsResponse>, ApiError> {
    let handle = state.session(&id).await?;

    let mut file = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::new(err.status(), err.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let mime_type = field.content_type().unwrap_or_default().to_string();
        let content = field
            .bytes()
            .await
            .map_err(|err| ApiError::new(err.status(), err.body_text()))?;
        file = Some(UploadedFile {
            name,
            mime_type,
            content: Some(content.to_vec()),
        });
        break;
    }

    // No `file` field goes through the session so the user sees the usual rejection.
    let file = file.unwrap_or(UploadedFile {
        name: String::new(),
        mime_type: String::new(),
        content: None,
    });
    let events = handle.dispatch(SessionEvent::Upload(file)).await?;
    Ok(Json(SessionEventsResponse {
        session_id: id,
        events,
    }))
}

async fn message_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<MessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let handle = state.session(&id).await?;
    let events = handle.send(SessionEvent::Message(request.content)).await?;

    Ok(Sse::new(sse_stream(events)).keep_alive(KeepAlive::default()))
}

fn sse_stream<S>(events: S) -> impl Stream<Item = Result<Event, Infallible>>
where
    S: Stream<Item = Result<ChatEvent, RagError>> + Send + 'static,
{
    events
        .map(|event| {
            let event = match event {
                Ok(event) => event,
                Err(err) => ChatEvent::Error {
                    message: err.to_string(),
                    step: 0,
                    recoverable: false,
                    source: Some(err.stage().to_string()),
                },
            };
            Ok(Event::default()
                .event(event_name(&event))
                .data(event_payload(&event).to_string()))
        })
        .chain(stream::once(async {
            Ok(Event::default().event("done").data("{}"))
        }))
}

async fn end_session_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.manager.end(&id).await {
        None => Err(ApiError::session_not_found(&id)),
        Some(Ok(_)) | Some(Err(RagError::SessionEnded)) => Ok(StatusCode::NO_CONTENT),
        Some(Err(err)) => Err(err.into()),
    }
}
