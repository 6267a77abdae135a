//! services/api/src/web/classes.rs
//!
//! Axum handlers for the class schedule endpoints: creation, schedule edits,
//! and listing with time-derived status.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::state::AppState;
use rehab_core::domain::{Cadence, Class, ClassKind, RecordStatus, SessionStatus};
use rehab_core::ports::CoreError;
use rehab_core::schedule;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// Payload for creating a class. Times are wall-clock "HH:MM" strings in the
/// program timezone; cadence is one of "daily", "weekly", "monthly".
#[derive(Deserialize, ToSchema)]
pub struct CreateClassRequest {
    pub title: String,
    pub theme: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub cadence: String,
    pub start_time: String,
    pub end_time: String,
    pub location_id: Uuid,
    pub instructor_id: Uuid,
    pub kind: String,
}

/// Payload for editing a class. Omitted fields keep their current value.
/// Changing any schedule field regenerates every session with fresh ids.
#[derive(Deserialize, ToSchema)]
pub struct UpdateClassRequest {
    pub title: Option<String>,
    pub theme: Option<String>,
    pub tags: Option<Vec<String>>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub cadence: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub status: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct SessionView {
    pub id: Uuid,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    /// Upcoming, Live or Ended at the moment of the request.
    pub status: String,
}

/// A class with its time-derived status attached. Status is never stored;
/// it is recomputed from the session list on every read.
#[derive(Serialize, ToSchema)]
pub struct ClassView {
    pub id: Uuid,
    pub title: String,
    pub theme: String,
    pub tags: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub cadence: String,
    pub start_time: String,
    pub end_time: String,
    pub location_id: Uuid,
    pub instructor_id: Uuid,
    pub kind: String,
    pub status: String,
    pub sessions: Vec<SessionView>,
}

impl ClassView {
    pub fn from_class(class: &Class, now: chrono::DateTime<chrono::Utc>) -> Self {
        let status = match schedule::evaluate_class(&class.sessions, now) {
            SessionStatus::Upcoming => "Upcoming",
            SessionStatus::Live => "Live",
            SessionStatus::Ended => "Ended",
        };
        Self {
            id: class.id,
            title: class.title.clone(),
            theme: class.theme.clone(),
            tags: class.tags.clone(),
            start_date: class.start_date,
            end_date: class.end_date,
            cadence: cadence_str(class.cadence).to_string(),
            start_time: class.start_time.format("%H:%M").to_string(),
            end_time: class.end_time.format("%H:%M").to_string(),
            location_id: class.location_id,
            instructor_id: class.instructor_id,
            kind: kind_str(class.kind).to_string(),
            status: status.to_string(),
            sessions: class
                .sessions
                .iter()
                .map(|s| SessionView {
                    id: s.id,
                    date: s.date,
                    start_time: s.start_time.format("%H:%M").to_string(),
                    end_time: s.end_time.format("%H:%M").to_string(),
                    status: match schedule::evaluate_session(s, now) {
                        SessionStatus::Upcoming => "Upcoming".to_string(),
                        SessionStatus::Live => "Live".to_string(),
                        SessionStatus::Ended => "Ended".to_string(),
                    },
                })
                .collect(),
        }
    }
}

//=========================================================================================
// Payload parsing helpers
//=========================================================================================

fn parse_hhmm(field: &str, value: &str) -> Result<chrono::NaiveTime, ApiError> {
    chrono::NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| chrono::NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| ApiError::BadRequest(format!("{field} must be an HH:MM time")))
}

fn parse_cadence(value: &str) -> Result<Cadence, ApiError> {
    match value {
        "daily" => Ok(Cadence::Daily),
        "weekly" => Ok(Cadence::Weekly),
        "monthly" => Ok(Cadence::Monthly),
        _ => Err(ApiError::BadRequest(
            "cadence must be one of daily, weekly, monthly".to_string(),
        )),
    }
}

fn cadence_str(cadence: Cadence) -> &'static str {
    match cadence {
        Cadence::Daily => "daily",
        Cadence::Weekly => "weekly",
        Cadence::Monthly => "monthly",
    }
}

fn parse_kind(value: &str) -> Result<ClassKind, ApiError> {
    match value {
        "Regular Class" => Ok(ClassKind::Regular),
        "Workshop" => Ok(ClassKind::Workshop),
        "Special Event" => Ok(ClassKind::SpecialEvent),
        _ => Err(ApiError::BadRequest(
            "kind must be one of 'Regular Class', 'Workshop', 'Special Event'".to_string(),
        )),
    }
}

fn kind_str(kind: ClassKind) -> &'static str {
    match kind {
        ClassKind::Regular => "Regular Class",
        ClassKind::Workshop => "Workshop",
        ClassKind::SpecialEvent => "Special Event",
    }
}

fn parse_record_status(value: &str) -> Result<RecordStatus, ApiError> {
    match value {
        "Active" => Ok(RecordStatus::Active),
        "Blocked" => Ok(RecordStatus::Blocked),
        _ => Err(ApiError::BadRequest(
            "status must be Active or Blocked".to_string(),
        )),
    }
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Create a class, generating its full session list from the schedule.
#[utoipa::path(
    post,
    path = "/classes",
    request_body = CreateClassRequest,
    responses(
        (status = 201, description = "Class created with generated sessions", body = ClassView),
        (status = 400, description = "Invalid schedule or payload")
    )
)]
pub async fn create_class_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<CreateClassRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title is required".to_string()));
    }
    let cadence = parse_cadence(&payload.cadence)?;
    let kind = parse_kind(&payload.kind)?;
    let start_time = parse_hhmm("start_time", &payload.start_time)?;
    let end_time = parse_hhmm("end_time", &payload.end_time)?;

    let sessions = schedule::generate_sessions(
        payload.start_date,
        payload.end_date,
        cadence,
        start_time,
        end_time,
    )?;

    let class = Class {
        id: Uuid::new_v4(),
        title: payload.title,
        theme: payload.theme,
        tags: payload.tags,
        start_date: payload.start_date,
        end_date: payload.end_date,
        cadence,
        start_time,
        end_time,
        location_id: payload.location_id,
        instructor_id: payload.instructor_id,
        kind,
        status: RecordStatus::Active,
        sessions,
    };
    app_state.classes.insert(&class).await?;

    let now = app_state.clock.now();
    Ok((StatusCode::CREATED, Json(ClassView::from_class(&class, now))))
}

/// Edit a class. A change to any schedule field (dates, cadence, times)
/// regenerates the session list with fresh ids; stored attendance then
/// references stale ids until reconciliation repairs them, which is kicked
/// off here as a best-effort follow-up.
#[utoipa::path(
    put,
    path = "/classes/{class_id}",
    request_body = UpdateClassRequest,
    responses(
        (status = 200, description = "Class updated", body = ClassView),
        (status = 400, description = "Invalid payload"),
        (status = 404, description = "Class not found")
    ),
    params(
        ("class_id" = Uuid, Path, description = "The class to edit.")
    )
)]
pub async fn update_class_handler(
    State(app_state): State<Arc<AppState>>,
    Path(class_id): Path<Uuid>,
    Json(payload): Json<UpdateClassRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut class = app_state
        .classes
        .get(class_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("class {class_id}")))?;

    if let Some(title) = payload.title {
        class.title = title;
    }
    if let Some(theme) = payload.theme {
        class.theme = theme;
    }
    if let Some(tags) = payload.tags {
        class.tags = tags;
    }
    if let Some(status) = payload.status.as_deref() {
        class.status = parse_record_status(status)?;
    }

    let mut schedule_changed = false;
    if let Some(start_date) = payload.start_date {
        schedule_changed |= class.start_date != start_date;
        class.start_date = start_date;
    }
    if let Some(end_date) = payload.end_date {
        schedule_changed |= class.end_date != end_date;
        class.end_date = end_date;
    }
    if let Some(cadence) = payload.cadence.as_deref() {
        let cadence = parse_cadence(cadence)?;
        schedule_changed |= class.cadence != cadence;
        class.cadence = cadence;
    }
    if let Some(start_time) = payload.start_time.as_deref() {
        let start_time = parse_hhmm("start_time", start_time)?;
        schedule_changed |= class.start_time != start_time;
        class.start_time = start_time;
    }
    if let Some(end_time) = payload.end_time.as_deref() {
        let end_time = parse_hhmm("end_time", end_time)?;
        schedule_changed |= class.end_time != end_time;
        class.end_time = end_time;
    }

    if schedule_changed {
        class.sessions = schedule::generate_sessions(
            class.start_date,
            class.end_date,
            class.cadence,
            class.start_time,
            class.end_time,
        )?;
    }
    app_state.classes.update(&class).await?;

    if schedule_changed {
        if let Err(err) = app_state.attendance.reconcile(class_id).await {
            // A class with no ledger yet has nothing to repair.
            if !matches!(err, CoreError::NotFound(_)) {
                warn!(%class_id, %err, "reconcile after schedule edit failed");
            }
        }
    }

    let now = app_state.clock.now();
    Ok(Json(ClassView::from_class(&class, now)))
}

/// List active classes with their current time-derived status.
#[utoipa::path(
    get,
    path = "/classes",
    responses(
        (status = 200, description = "Active classes", body = [ClassView])
    )
)]
pub async fn list_classes_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let now = app_state.clock.now();
    let classes = app_state.classes.list_active().await?;
    let views: Vec<ClassView> = classes
        .iter()
        .map(|c| ClassView::from_class(c, now))
        .collect();
    Ok(Json(views))
}

/// Toggle a class between Active and Blocked. Blocked classes drop out of
/// the active listing and their sessions never count as live.
#[utoipa::path(
    post,
    path = "/classes/{class_id}/block",
    responses(
        (status = 200, description = "New status", body = ClassView),
        (status = 404, description = "Class not found")
    ),
    params(
        ("class_id" = Uuid, Path, description = "The class to block or unblock.")
    )
)]
pub async fn block_class_handler(
    State(app_state): State<Arc<AppState>>,
    Path(class_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let mut class = app_state
        .classes
        .get(class_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("class {class_id}")))?;
    class.status = match class.status {
        RecordStatus::Active => RecordStatus::Blocked,
        RecordStatus::Blocked => RecordStatus::Active,
    };
    for session in class.sessions.iter_mut() {
        session.status = class.status;
    }
    app_state.classes.update(&class).await?;
    let now = app_state.clock.now();
    Ok(Json(ClassView::from_class(&class, now)))
}

/// Fetch one class with per-session statuses.
#[utoipa::path(
    get,
    path = "/classes/{class_id}",
    responses(
        (status = 200, description = "The class", body = ClassView),
        (status = 404, description = "Class not found")
    ),
    params(
        ("class_id" = Uuid, Path, description = "The class to fetch.")
    )
)]
pub async fn get_class_handler(
    State(app_state): State<Arc<AppState>>,
    Path(class_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let class = app_state
        .classes
        .get(class_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("class {class_id}")))?;
    let now = app_state.clock.now();
    Ok(Json(ClassView::from_class(&class, now)))
}
