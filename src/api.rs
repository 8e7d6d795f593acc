//! HTTP surface.
//!
//! Read-side queries plus bulk deletion, alongside the `/ws` upgrade.
//! Every `/api/chat` route acts on behalf of the identity in the
//! `X-User-Id` header; resolving that identity from a session belongs to
//! whatever fronts this service.
//!
//! Responses use one envelope:
//!
//! ```json
//! { "ok": true,  "data": ... }
//! { "ok": false, "error": "...", "code": "not_found" }
//! ```

use std::collections::BTreeMap;

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{Error, ErrorKind};
use crate::handler;
use crate::protocol::DeleteScope;
use crate::router::ChatContact;
use crate::state::ChatState;
use crate::store::Message;

/// Header carrying the caller's identity.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Build the full application router.
pub fn app(state: ChatState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(handler::ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/api/chat/history/:counterpart_id", get(history_handler))
        .route("/api/chat/users", get(users_handler))
        .route("/api/chat/unread-counts", get(unread_counts_handler))
        .route("/api/chat/online", get(online_handler))
        .route("/api/chat/messages", delete(delete_messages_handler))
        .route("/api/chat/delete-all", delete(delete_all_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Envelope ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Json<Self> {
        Json(Self {
            ok: true,
            data: Some(data),
            error: None,
            code: None,
        })
    }
}

fn error_response(status: StatusCode, code: &'static str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            ok: false,
            data: None,
            error: Some(msg.to_string()),
            code: Some(code),
        }),
    )
        .into_response()
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Authorization => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Storage details stay in the logs
        let msg = match self.kind() {
            ErrorKind::Storage => "internal storage error".to_string(),
            _ => self.to_string(),
        };
        error_response(status, self.code(), &msg)
    }
}

type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, Error>;

// ── Caller identity ───────────────────────────────────────────────────────────

/// The identity a request acts for. Rejects with 401 when the header is
/// absent and 403 when it names no active identity.
#[derive(Debug, Clone)]
pub struct Caller(pub String);

#[async_trait]
impl FromRequestParts<ChatState> for Caller {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ChatState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let Some(user_id) = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        else {
            return Err(error_response(
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "X-User-Id header is required",
            ));
        };

        match state.router.require_active_user(user_id).await {
            Ok(user) => Ok(Caller(user.id)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(error_response(
                StatusCode::FORBIDDEN,
                "unauthorized",
                "unknown or inactive user",
            )),
            Err(e) => {
                e.log("authenticate", user_id);
                Err(e.into_response())
            }
        }
    }
}

// ── Request / Response Types ──────────────────────────────────────────────────

/// DELETE /api/chat/messages
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessagesRequest {
    pub message_ids: Vec<i64>,
    pub delete_type: DeleteScope,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedMessages {
    pub deleted_ids: Vec<i64>,
    pub delete_type: DeleteScope,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedCount {
    pub deleted_count: usize,
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "almahriah-chat",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn stats_handler(State(state): State<ChatState>) -> Response {
    match state.router.message_count().await {
        Ok(stored) => Json(json!({
            "online_clients": state.online_count(),
            "stored_messages": stored,
            "uptime_secs": state.uptime_secs(),
        }))
        .into_response(),
        Err(e) => {
            e.log("stats", "-");
            e.into_response()
        }
    }
}

/// GET /api/chat/history/:counterpartId: the caller's conversation with
/// one counterpart, oldest first.
async fn history_handler(
    State(state): State<ChatState>,
    Caller(caller): Caller,
    Path(counterpart_id): Path<String>,
) -> ApiResult<Vec<Message>> {
    let messages = state
        .router
        .history(&caller, &counterpart_id)
        .await
        .inspect_err(|e| e.log("history", &caller))?;
    Ok(ApiResponse::success(messages))
}

/// GET /api/chat/users: everyone the caller can chat with.
async fn users_handler(
    State(state): State<ChatState>,
    Caller(caller): Caller,
) -> ApiResult<Vec<ChatContact>> {
    let contacts = state
        .router
        .contacts(&caller)
        .await
        .inspect_err(|e| e.log("users", &caller))?;
    Ok(ApiResponse::success(contacts))
}

/// GET /api/chat/unread-counts: unread messages per sender.
async fn unread_counts_handler(
    State(state): State<ChatState>,
    Caller(caller): Caller,
) -> ApiResult<BTreeMap<String, u64>> {
    let counts = state
        .router
        .unread_counts(&caller)
        .await
        .inspect_err(|e| e.log("unreadCounts", &caller))?;
    Ok(ApiResponse::success(counts))
}

async fn online_handler(
    State(state): State<ChatState>,
    Caller(_caller): Caller,
) -> ApiResult<Vec<String>> {
    Ok(ApiResponse::success(
        state.presence.snapshot().into_iter().collect(),
    ))
}

/// DELETE /api/chat/messages: same rules and notifications as the
/// `deleteMessage` event.
async fn delete_messages_handler(
    State(state): State<ChatState>,
    Caller(caller): Caller,
    Json(req): Json<DeleteMessagesRequest>,
) -> ApiResult<DeletedMessages> {
    let deleted_ids = state
        .router
        .delete(&req.message_ids, &caller, req.delete_type)
        .await
        .inspect_err(|e| e.log("deleteMessages", &caller))?;
    Ok(ApiResponse::success(DeletedMessages {
        deleted_ids,
        delete_type: req.delete_type,
    }))
}

/// DELETE /api/chat/delete-all: administrators only.
async fn delete_all_handler(
    State(state): State<ChatState>,
    Caller(caller): Caller,
) -> ApiResult<DeletedCount> {
    let deleted_count = state
        .router
        .delete_all(&caller)
        .await
        .inspect_err(|e| e.log("deleteAll", &caller))?;
    Ok(ApiResponse::success(DeletedCount { deleted_count }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
