//! Route handlers
//!
//! Every handler validates its query first and only then touches the
//! broker, so a rejected request never registers a waiter or publishes.

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use relay_core::messages::json_array;
use relay_core::params::validate_channel_id;
use relay_core::{BrokerStats, ChatProvider, RawParams};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::server::AppState;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

const INDEX_HTML: &str = r#"<html><body><h1>relay</h1>
<ul>
	<li><b><a href="/wait">/wait</a></b>: long-poll for the next message (use ?id=&lt;channel&gt;&amp;after=&lt;RFC3339&gt;)</li>
	<li><b><a href="/recent">/recent</a></b>: recent messages in a channel, newest first</li>
	<li><b>/ask</b>: POST a user message (use ?id=&lt;channel&gt;&amp;model=&lt;model&gt;)</li>
	<li><b><a href="/health">/health</a></b>: broker statistics</li>
</ul></body></html>"#;

// ============================================================================
// Query Types
// ============================================================================

/// `?id=&after=` as sent to `/wait` and `/recent`
#[derive(Debug, Default, Deserialize)]
pub struct ChannelQuery {
    /// Channel identifier
    #[serde(default)]
    pub id: String,
    /// RFC 3339 cursor
    #[serde(default)]
    pub after: Option<String>,
}

impl ChannelQuery {
    fn channel(&self) -> Result<&str, ApiError> {
        validate_channel_id(&self.id)?;
        Ok(&self.id)
    }

    fn cursor(&self) -> Result<Option<DateTime<Utc>>, ApiError> {
        match self.after.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(|_| ApiError::BadRequest("after must be RFC3339".to_string())),
        }
    }
}

/// `?id=&model=&temp=&top_p=&top_k=&max_tokens=` as sent to `/ask`
#[derive(Debug, Default, Deserialize)]
pub struct AskQuery {
    /// Channel identifier
    #[serde(default)]
    pub id: String,
    /// Model name; empty picks the configured default
    #[serde(default)]
    pub model: String,
    /// Raw generation parameters
    #[serde(flatten)]
    pub params: RawParams,
}

/// `/health` response body
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always "ok" while the daemon serves requests
    pub status: &'static str,
    /// Crate version
    pub version: &'static str,
    /// Broker counters
    pub broker: BrokerStats,
    /// Providers with a configured backend
    pub providers: Vec<ChatProvider>,
}

// ============================================================================
// Handlers
// ============================================================================

/// `GET /`
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// `GET /wait`
///
/// Parks until the next message after the cursor, the long-poll timeout, or
/// shutdown. A client that disconnects drops this future, which deregisters
/// its waiter.
pub async fn wait(
    State(state): State<AppState>,
    Query(query): Query<ChannelQuery>,
) -> Result<Response, ApiError> {
    let channel = query.channel()?;
    let after = query.cursor()?;

    let subscription = state.broker().subscribe(channel, after);
    let delivery = subscription
        .wait_or_cancel(state.long_poll_timeout, &state.shutdown)
        .await
        .ok_or(ApiError::ShuttingDown)?;

    Ok(json_response(delivery.json().to_owned()))
}

/// `GET /recent`
pub async fn recent(
    State(state): State<AppState>,
    Query(query): Query<ChannelQuery>,
) -> Result<Response, ApiError> {
    let channel = query.channel()?;
    let after = query.cursor()?;

    let envelopes = state.broker().snapshot(channel, after);
    Ok(json_response(json_array(envelopes.iter().map(|e| e.json()))))
}

/// `POST /ask`
///
/// Publishes the user turn and starts the generation in the background;
/// the reply streams into the channel for `/wait` to pick up.
pub async fn ask(
    State(state): State<AppState>,
    Query(query): Query<AskQuery>,
    body: Result<Bytes, BytesRejection>,
) -> Result<StatusCode, ApiError> {
    let body = body.map_err(|rejection| match rejection.status() {
        StatusCode::PAYLOAD_TOO_LARGE => ApiError::PayloadTooLarge,
        _ => ApiError::BadRequest(rejection.body_text()),
    })?;
    let body = String::from_utf8(body.to_vec())
        .map_err(|_| ApiError::BadRequest("body must be UTF-8 text".to_string()))?;

    let handle = state
        .relay
        .ask(&query.id, body, &query.model, &query.params)?;

    tracing::debug!(generation = %handle.id(), "Ask accepted");
    Ok(StatusCode::ACCEPTED)
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        broker: state.broker().stats(),
        providers: state.relay.providers(),
    })
}

fn json_response(body: String) -> Response {
    ([(header::CONTENT_TYPE, JSON_CONTENT_TYPE)], body).into_response()
}
