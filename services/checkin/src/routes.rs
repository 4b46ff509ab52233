//! Check-in service routes

use std::convert::Infallible;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{
        Html, IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{delete, get, post},
};
use chrono::{Datelike, Local};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    attendance::AttendanceView,
    error::{CheckinError, CheckinResult},
    feed::FeedEvent,
    household::search_households,
    labels::render_print_job,
    middleware::auth_middleware,
    models::{CheckinDetail, GuestProfile, Operator},
    service::{self, ChildSelection},
    session::{get_or_create_session, today},
    state::AppState,
    store::SharedStore,
    suggestion::suggest_location,
};

/// Sessions listed by `GET /sessions`
const RECENT_SESSIONS: u32 = 20;

/// Create the router for the check-in service
pub fn create_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/households", get(find_households))
        .route("/households/:id", get(get_household))
        .route("/locations", get(get_locations))
        .route("/locations/suggest", get(get_suggested_location))
        .route("/sessions", get(get_sessions))
        .route("/sessions/today", post(open_today_session))
        .route("/sessions/:id/checkins", post(check_in_children))
        .route("/sessions/:id/guests", post(check_in_guest))
        .route(
            "/sessions/:id/checkout/:code",
            get(get_checkout).post(check_out),
        )
        .route("/sessions/:id/attendance", get(get_attendance))
        .route("/sessions/:id/attendance/events", get(attendance_events))
        .route("/sessions/:id/labels/:code", get(print_labels))
        .route("/checkins/:id", delete(delete_checkin))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(protected_routes)
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "checkin-service"
    }))
}

#[derive(Debug, Deserialize)]
pub struct PhoneQuery {
    pub digits: String,
}

/// Search households by the last four digits of a phone number
pub async fn find_households(
    State(state): State<AppState>,
    Query(query): Query<PhoneQuery>,
) -> CheckinResult<impl IntoResponse> {
    let matches = search_households(state.store.as_ref(), &query.digits).await?;
    Ok(Json(matches))
}

/// Get one household with its contacts and children
pub async fn get_household(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> CheckinResult<impl IntoResponse> {
    let household = state
        .store
        .household(id)
        .await?
        .ok_or_else(|| CheckinError::NotFound(format!("Household {}", id)))?;
    Ok(Json(household))
}

/// Active locations in display order
pub async fn get_locations(State(state): State<AppState>) -> CheckinResult<impl IntoResponse> {
    let locations = state.store.locations(true).await?;
    Ok(Json(locations))
}

#[derive(Debug, Deserialize)]
pub struct SuggestQuery {
    pub birth_year: i32,
}

/// Suggest a room for a child born in `birth_year`
pub async fn get_suggested_location(
    State(state): State<AppState>,
    Query(query): Query<SuggestQuery>,
) -> CheckinResult<impl IntoResponse> {
    let locations = state.store.locations(true).await?;
    let suggestion = suggest_location(query.birth_year, today().year(), &locations).cloned();
    Ok(Json(suggestion))
}

/// Recent sessions, newest first
pub async fn get_sessions(State(state): State<AppState>) -> CheckinResult<impl IntoResponse> {
    let sessions = state.store.sessions(RECENT_SESSIONS).await?;
    Ok(Json(sessions))
}

/// Resolve today's session, creating it when none is active
pub async fn open_today_session(
    State(state): State<AppState>,
    Extension(operator): Extension<Operator>,
) -> CheckinResult<impl IntoResponse> {
    let session = get_or_create_session(
        state.store.as_ref(),
        &operator,
        &state.settings.session,
        today(),
    )
    .await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
pub struct CheckinRequest {
    pub household_id: Uuid,
    pub selections: Vec<ChildSelection>,
}

/// Check in the selected children of one household under a shared code
pub async fn check_in_children(
    State(state): State<AppState>,
    Extension(operator): Extension<Operator>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<CheckinRequest>,
) -> CheckinResult<impl IntoResponse> {
    let household = state
        .store
        .household(payload.household_id)
        .await?
        .ok_or_else(|| CheckinError::NotFound(format!("Household {}", payload.household_id)))?;

    let outcome = service::check_in_household(
        state.store.as_ref(),
        &operator,
        session_id,
        &household,
        &payload.selections,
    )
    .await?;

    let status = if outcome.is_complete() {
        StatusCode::CREATED
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct GuestRequest {
    pub location_id: Option<Uuid>,
    #[serde(flatten)]
    pub guest: GuestProfile,
}

/// Check in a visiting child with no household record
pub async fn check_in_guest(
    State(state): State<AppState>,
    Extension(operator): Extension<Operator>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<GuestRequest>,
) -> CheckinResult<impl IntoResponse> {
    let detail = service::check_in_guest(
        state.store.as_ref(),
        &operator,
        session_id,
        payload.location_id,
        &payload.guest,
        today().year(),
        &state.settings.guest,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// Active check-ins a pickup code can release
pub async fn get_checkout(
    State(state): State<AppState>,
    Path((session_id, code)): Path<(Uuid, String)>,
) -> CheckinResult<impl IntoResponse> {
    let candidates = service::find_checkout(state.store.as_ref(), session_id, &code).await?;
    Ok(Json(candidates))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    /// Rows to release; all active rows for the code when omitted
    #[serde(default)]
    pub checkin_ids: Option<Vec<Uuid>>,
}

/// Check out children matched by a pickup code
pub async fn check_out(
    State(state): State<AppState>,
    Extension(operator): Extension<Operator>,
    Path((session_id, code)): Path<(Uuid, String)>,
    Json(payload): Json<CheckoutRequest>,
) -> CheckinResult<impl IntoResponse> {
    let store = state.store.as_ref();
    let outcome = match payload.checkin_ids {
        Some(ids) => service::check_out(store, &operator, session_id, &code, &ids).await?,
        None => service::check_out_group(store, &operator, session_id, &code).await?,
    };
    Ok(Json(outcome))
}

/// Attendance snapshot: occupancy per room plus present and departed rows
pub async fn get_attendance(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> CheckinResult<impl IntoResponse> {
    let locations = state.store.locations(false).await?;
    let details = state.store.checkins_for_session(session_id).await?;
    let view = AttendanceView::new(
        session_id,
        locations,
        details.iter().map(|d| d.checkin.clone()).collect(),
    );

    let (present, checked_out): (Vec<CheckinDetail>, Vec<CheckinDetail>) =
        details.into_iter().partition(|d| d.checkin.is_active());

    Ok(Json(json!({
        "summary": view.summary(),
        "occupancy": view.occupancy(),
        "present": present,
        "checked_out": checked_out,
    })))
}

fn snapshot_event(view: &AttendanceView) -> Event {
    Event::default()
        .event("snapshot")
        .json_data(json!({
            "summary": view.summary(),
            "occupancy": view.occupancy(),
            "rows": view.rows(),
        }))
        .unwrap_or_else(|e| {
            error!("Failed to serialize attendance snapshot: {}", e);
            Event::default().comment("snapshot unavailable")
        })
}

/// Live attendance over Server-Sent Events
///
/// Sends a `snapshot` first, then one `change` event per ledger mutation
/// in the session. A lagging subscriber gets a fresh `snapshot`.
pub async fn attendance_events(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> CheckinResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    // Subscribe before loading so nothing written in between is missed
    let subscription = state.store.ledger_feed().subscribe(session_id);
    let view = AttendanceView::load(state.store.as_ref(), session_id).await?;
    info!(
        "Attendance stream {} opened for session {}",
        subscription.token(),
        session_id
    );

    let initial = stream::iter(vec![Ok::<_, Infallible>(snapshot_event(&view))]);
    let store: SharedStore = state.store.clone();

    let updates = stream::unfold(
        (store, view, subscription),
        |(store, mut view, mut subscription)| async move {
            let event = match subscription.recv().await? {
                FeedEvent::Change(change) => {
                    view.apply(&change);
                    Event::default()
                        .event("change")
                        .json_data(json!({
                            "change": change,
                            "summary": view.summary(),
                            "occupancy": view.occupancy(),
                        }))
                        .unwrap_or_else(|e| {
                            error!("Failed to serialize ledger change: {}", e);
                            Event::default().comment("change unavailable")
                        })
                }
                FeedEvent::Lagged(_) => {
                    if let Err(e) = view.reload(store.as_ref()).await {
                        error!("Failed to reload attendance after lag: {}", e);
                    }
                    snapshot_event(&view)
                }
            };
            Some((Ok::<_, Infallible>(event), (store, view, subscription)))
        },
    );

    Ok(Sse::new(initial.chain(updates)).keep_alive(KeepAlive::default()))
}

/// Printable labels for every child under a code, plus the parent ticket
pub async fn print_labels(
    State(state): State<AppState>,
    Path((session_id, code)): Path<(Uuid, String)>,
) -> CheckinResult<impl IntoResponse> {
    let rows = service::reprint(state.store.as_ref(), session_id, &code).await?;
    if rows.is_empty() {
        return Err(CheckinError::NotFound(format!("No check-ins for code {}", code)));
    }

    let date = rows
        .first()
        .map(|d| d.checkin.checked_in_at.with_timezone(&Local).date_naive())
        .unwrap_or_else(today);
    Ok(Html(render_print_job(&rows, date)))
}

/// Remove a check-in row entirely
pub async fn delete_checkin(
    State(state): State<AppState>,
    Extension(operator): Extension<Operator>,
    Path(id): Path<Uuid>,
) -> CheckinResult<impl IntoResponse> {
    service::remove_checkin(state.store.as_ref(), &operator, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
