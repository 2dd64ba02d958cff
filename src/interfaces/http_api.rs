use std::convert::Infallible;
use std::sync::Arc;

use async_stream::stream as async_stream;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, Sse},
    },
    routing::{get, patch, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    application::{
        AppError, Clock,
        usecases::{
            AdminService, CooldownEngine, DedupReason, IngestOutcome, QueryService, ResetOutcome,
            TenantStatus,
        },
    },
    domain::{ActorId, BumpObservation, ConfigPatch, IdError, TenantConfig, TenantId, TimeRemaining},
    infrastructure::{
        event_bus::EventBus,
        relay_source::{BumpDetector, RelayMessage},
    },
};

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<CooldownEngine>,
    pub queries: Arc<QueryService>,
    pub admin: Arc<AdminService>,
    pub clock: Arc<dyn Clock>,
    pub detector: BumpDetector,
    pub api_token: Option<String>,
    pub event_bus: Option<EventBus>,
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tenants/{tenant}/status", get(status))
        .route("/tenants/{tenant}/history", get(history))
        .route("/tenants/{tenant}/actors/{actor}/count", get(count_by_actor))
        .route("/tenants/{tenant}/bumps", post(observe_bump))
        .route("/tenants/{tenant}/messages", post(observe_message))
        .route("/tenants/{tenant}/reset", post(reset))
        .route("/tenants/{tenant}/config", patch(update_config))
        .route("/tenants/{tenant}/detection/toggle", post(toggle_detection))
        .route("/events/stream", get(stream_announcements))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[derive(Debug, Serialize)]
struct StatusDto {
    tenant: TenantId,
    ready: bool,
    remaining_seconds: u64,
    last_actor: Option<ActorId>,
    last_bump: Option<DateTime<Utc>>,
    next_deadline: Option<DateTime<Utc>>,
    config: Option<TenantConfig>,
}

impl From<TenantStatus> for StatusDto {
    fn from(s: TenantStatus) -> Self {
        let (ready, remaining_seconds) = match s.remaining {
            TimeRemaining::Ready => (true, 0),
            TimeRemaining::Waiting(d) => (false, d.as_secs()),
        };
        Self {
            tenant: s.tenant,
            ready,
            remaining_seconds,
            last_actor: s.last_actor,
            last_bump: s.last_bump,
            next_deadline: s.next_deadline,
            config: s.config,
        }
    }
}

async fn status(State(state): State<ApiState>, Path(tenant): Path<String>) -> Response {
    let tenant = match TenantId::parse(&tenant) {
        Ok(t) => t,
        Err(e) => return bad_id(e),
    };
    match state.queries.status(&tenant).await {
        Ok(s) => Json(StatusDto::from(s)).into_response(),
        Err(e) => app_error(e),
    }
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
}

async fn history(
    State(state): State<ApiState>,
    Path(tenant): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> Response {
    let tenant = match TenantId::parse(&tenant) {
        Ok(t) => t,
        Err(e) => return bad_id(e),
    };
    match state.queries.history(&tenant, q.limit).await {
        Ok(v) => Json(v).into_response(),
        Err(e) => app_error(e),
    }
}

#[derive(Serialize)]
struct CountDto {
    tenant: TenantId,
    actor: ActorId,
    count: u64,
}

async fn count_by_actor(
    State(state): State<ApiState>,
    Path((tenant, actor)): Path<(String, String)>,
) -> Response {
    let (tenant, actor) = match (TenantId::parse(&tenant), ActorId::parse(&actor)) {
        (Ok(t), Ok(a)) => (t, a),
        (Err(e), _) | (_, Err(e)) => return bad_id(e),
    };
    match state.queries.count_by_actor(&tenant, &actor).await {
        Ok(count) => Json(CountDto {
            tenant,
            actor,
            count,
        })
        .into_response(),
        Err(e) => app_error(e),
    }
}

#[derive(Debug, Default, Serialize)]
struct IngestDto {
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_deadline: Option<DateTime<Utc>>,
}

impl From<IngestOutcome> for IngestDto {
    fn from(outcome: IngestOutcome) -> Self {
        match outcome {
            IngestOutcome::Accepted(a) => Self {
                outcome: "accepted",
                generation: Some(a.generation),
                next_deadline: Some(a.next_deadline),
                ..Default::default()
            },
            IngestOutcome::Deduplicated(reason) => Self {
                outcome: "deduplicated",
                reason: Some(match reason {
                    DedupReason::WithinTolerance => "within_tolerance",
                    DedupReason::SamePass => "same_pass",
                }),
                ..Default::default()
            },
            IngestOutcome::Stale => Self {
                outcome: "stale",
                ..Default::default()
            },
            IngestOutcome::FromFuture => Self {
                outcome: "from_future",
                ..Default::default()
            },
        }
    }
}

#[derive(Deserialize)]
struct BumpBody {
    actor: String,
    /// Defaults to the time the request is handled.
    observed_at: Option<DateTime<Utc>>,
}

async fn observe_bump(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(tenant): Path<String>,
    Json(body): Json<BumpBody>,
) -> Response {
    if let Err((code, msg)) = check_auth(&headers, &state.api_token) {
        return (code, msg).into_response();
    }
    let (tenant, actor) = match (TenantId::parse(&tenant), ActorId::parse(&body.actor)) {
        (Ok(t), Ok(a)) => (t, a),
        (Err(e), _) | (_, Err(e)) => return bad_id(e),
    };
    let observation = BumpObservation {
        tenant,
        actor,
        observed_at: body.observed_at.unwrap_or_else(|| state.clock.now()),
        pass: None,
    };
    match state.engine.ingest(observation).await {
        Ok(outcome) => Json(IngestDto::from(outcome)).into_response(),
        Err(e) => app_error(e),
    }
}

/// Passive detection: the gateway forwards every new message in a watched
/// channel and only bump confirmations reach the engine.
async fn observe_message(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(tenant): Path<String>,
    Json(msg): Json<RelayMessage>,
) -> Response {
    if let Err((code, msg)) = check_auth(&headers, &state.api_token) {
        return (code, msg).into_response();
    }
    let tenant = match TenantId::parse(&tenant) {
        Ok(t) => t,
        Err(e) => return bad_id(e),
    };
    let Some(bump) = state.detector.detect(&msg) else {
        return Json(IngestDto {
            outcome: "ignored",
            ..Default::default()
        })
        .into_response();
    };
    let observation = BumpObservation {
        tenant,
        actor: bump.actor,
        observed_at: bump.observed_at,
        pass: None,
    };
    match state.engine.ingest(observation).await {
        Ok(outcome) => Json(IngestDto::from(outcome)).into_response(),
        Err(e) => app_error(e),
    }
}

#[derive(Deserialize, Default)]
struct ResetBody {
    by: Option<String>,
}

async fn reset(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(tenant): Path<String>,
    body: Bytes,
) -> Response {
    if let Err((code, msg)) = check_auth(&headers, &state.api_token) {
        return (code, msg).into_response();
    }
    let tenant = match TenantId::parse(&tenant) {
        Ok(t) => t,
        Err(e) => return bad_id(e),
    };
    // the body is optional
    let body: ResetBody = if body.is_empty() {
        ResetBody::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(b) => b,
            Err(e) => return (StatusCode::BAD_REQUEST, format!("invalid body: {e}")).into_response(),
        }
    };
    let by = match body.by.as_deref().map(ActorId::parse).transpose() {
        Ok(by) => by,
        Err(e) => return bad_id(e),
    };
    match state.admin.reset(&tenant, by).await {
        Ok(ResetOutcome::Cleared) => Json(serde_json::json!({ "outcome": "cleared" })).into_response(),
        Ok(ResetOutcome::NothingActive) => {
            Json(serde_json::json!({ "outcome": "nothing_active" })).into_response()
        }
        Err(e) => app_error(e),
    }
}

async fn update_config(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(tenant): Path<String>,
    Json(patch): Json<ConfigPatch>,
) -> Response {
    if let Err((code, msg)) = check_auth(&headers, &state.api_token) {
        return (code, msg).into_response();
    }
    let tenant = match TenantId::parse(&tenant) {
        Ok(t) => t,
        Err(e) => return bad_id(e),
    };
    match state.admin.update(&tenant, patch).await {
        Ok(config) => Json(config).into_response(),
        Err(e) => app_error(e),
    }
}

async fn toggle_detection(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(tenant): Path<String>,
) -> Response {
    if let Err((code, msg)) = check_auth(&headers, &state.api_token) {
        return (code, msg).into_response();
    }
    let tenant = match TenantId::parse(&tenant) {
        Ok(t) => t,
        Err(e) => return bad_id(e),
    };
    match state.admin.toggle_detection(&tenant).await {
        Ok(config) => Json(config).into_response(),
        Err(e) => app_error(e),
    }
}

#[derive(Deserialize, Clone)]
struct StreamQuery {
    tenant: Option<String>,
    replay: Option<u32>, // recent bumps of `tenant` sent before live announcements
}

async fn stream_announcements(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<StreamQuery>,
) -> Response {
    if let Err((code, msg)) = check_auth(&headers, &state.api_token) {
        return (code, msg).into_response();
    }

    let Some(bus) = state.event_bus.clone() else {
        return (
            StatusCode::NOT_IMPLEMENTED,
            "announcement stream not enabled".to_string(),
        )
            .into_response();
    };

    let tenant = match q.tenant.as_deref().map(TenantId::parse).transpose() {
        Ok(t) => t,
        Err(e) => return bad_id(e),
    };

    let history = match (&tenant, q.replay) {
        (Some(t), Some(n)) if n > 0 => match state.queries.history(t, Some(n)).await {
            Ok(mut items) => {
                // oldest first on the wire
                items.reverse();
                items
            }
            Err(e) => return app_error(e),
        },
        _ => vec![],
    };

    let rx = bus.subscribe();
    let live = BroadcastStream::new(rx).filter_map(move |msg| {
        // lagged receivers just skip ahead
        let announcement = msg.ok()?;
        if let Some(t) = &tenant {
            if announcement.tenant() != t {
                return None;
            }
        }
        let data = serde_json::to_string(&announcement).ok()?;
        Some(Ok::<SseEvent, Infallible>(
            SseEvent::default().event(announcement.kind()).data(data),
        ))
    });

    let out_stream = async_stream! {
        for entry in history {
            let data = serde_json::to_string(&entry).unwrap_or_else(|_| "{}".to_string());
            yield Ok::<SseEvent, Infallible>(SseEvent::default().event("replay").data(data));
        }

        tokio::pin!(live);
        while let Some(item) = live.next().await {
            yield item;
        }
    };

    Sse::new(out_stream).into_response()
}

fn app_error(e: AppError) -> Response {
    let code = match &e {
        AppError::StoreUnavailable(_) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                "storage unavailable, try again".to_string(),
            )
                .into_response();
        }
        AppError::InvalidCommand(_) | AppError::Config(_) => StatusCode::BAD_REQUEST,
        AppError::Source(_) | AppError::Notifier(_) => StatusCode::BAD_GATEWAY,
    };
    (code, e.to_string()).into_response()
}

fn bad_id(e: IdError) -> Response {
    (StatusCode::BAD_REQUEST, e.to_string()).into_response()
}

fn check_auth(headers: &HeaderMap, token: &Option<String>) -> Result<(), (StatusCode, String)> {
    // no token configured: privileged routes are open
    let Some(expected) = token else {
        return Ok(());
    };
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if auth == format!("Bearer {}", expected) {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "unauthorized".to_string()))
    }
}
