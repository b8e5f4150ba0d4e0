//! API routes

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::{wire, ChatError, ChatTurnRequest};
use crate::AppState;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn chat(State(state): State<AppState>, Json(request): Json<ChatTurnRequest>) -> Response {
    match state.orchestrator.handle(request).await {
        Ok(frames) => {
            let body = Body::from_stream(
                frames.map(|frame| Ok::<_, std::convert::Infallible>(frame.encode())),
            );
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
                    (header::CACHE_CONTROL, "no-cache"),
                    (
                        HeaderName::from_static(wire::DATA_STREAM_HEADER),
                        wire::DATA_STREAM_VERSION,
                    ),
                ],
                body,
            )
                .into_response()
        }
        Err(err) => chat_error_response(err, state.config.production()),
    }
}

fn chat_error_response(err: ChatError, production: bool) -> Response {
    match err {
        ChatError::InvalidRequest | ChatError::Configuration => {
            let status = match err {
                ChatError::InvalidRequest => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(json!({ "error": err.to_string() }))).into_response()
        }
        ChatError::Provider(err) => {
            tracing::error!(error = %err, "chat turn failed");
            let mut body = json!({ "error": "Internal server error" });
            if !production {
                body["message"] = json!(err.to_string());
            }
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    next: Option<String>,
}

const CALLBACK_FAILURE: &str = "/?error=email_confirmation_failed";

/// Exchange the email-confirmation code for a session, then send the
/// browser on its way.
async fn auth_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Redirect {
    let next = query.next.unwrap_or_else(|| "/".to_string());

    let Some(code) = query.code else {
        return Redirect::to(CALLBACK_FAILURE);
    };
    let Some(auth) = state.auth.as_ref() else {
        tracing::warn!("auth callback hit with no auth backend configured");
        return Redirect::to(CALLBACK_FAILURE);
    };

    match auth.exchange_code(&code).await {
        Ok(_) => Redirect::to(&next),
        Err(err) => {
            tracing::warn!(error = %err, "auth code exchange failed");
            Redirect::to(CALLBACK_FAILURE)
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat))
        .route("/auth/callback", get(auth_callback))
}
