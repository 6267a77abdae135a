//! services/api/src/web/attendance.rs
//!
//! Axum handlers for registration and the two attendance-recording paths,
//! plus roster reads and explicit reconciliation.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::state::AppState;
use rehab_core::attendance::RosterMark;
use rehab_core::domain::{AttendanceStatus, AttendanceSubject};

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub user_id: Uuid,
}

#[derive(Deserialize, ToSchema)]
pub struct SelfAttendanceRequest {
    pub user_id: Uuid,
}

/// One roster line: the subject's id (assigned user or active prisoner,
/// resolved server-side) and "Present" or "Absent".
#[derive(Deserialize, ToSchema)]
pub struct AttendanceLine {
    pub id: Uuid,
    pub status: String,
}

#[derive(Deserialize, ToSchema)]
pub struct RosterRequest {
    pub instructor_id: Uuid,
    pub attendance_list: Vec<AttendanceLine>,
}

#[derive(Serialize, ToSchema)]
pub struct RosterResponse {
    pub session_id: Uuid,
    pub updated: usize,
    pub already_marked: usize,
}

#[derive(Serialize, ToSchema)]
pub struct RosterLineView {
    pub id: Uuid,
    pub subject_type: String,
    pub status: String,
}

#[derive(Serialize, ToSchema)]
pub struct RosterEntryView {
    pub instructor_id: Uuid,
    pub session_id: Uuid,
    pub taken_at: DateTime<Utc>,
    pub roster: Vec<RosterLineView>,
}

#[derive(Serialize, ToSchema)]
pub struct ReconcileResponse {
    pub instructor_fixed: usize,
    pub registration_fixed: usize,
}

fn parse_marks(lines: &[AttendanceLine]) -> Result<Vec<RosterMark>, ApiError> {
    lines
        .iter()
        .map(|line| {
            let status = match line.status.as_str() {
                "Present" => AttendanceStatus::Present,
                "Absent" => AttendanceStatus::Absent,
                _ => {
                    return Err(ApiError::BadRequest(
                        "status must be Present or Absent".to_string(),
                    ))
                }
            };
            Ok(RosterMark {
                id: line.id,
                status,
            })
        })
        .collect()
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Register a user to a class.
///
/// The user's location must match the class's; the registration is created
/// with an Absent placeholder per existing session and the user is assigned
/// to the class instructor.
#[utoipa::path(
    post,
    path = "/classes/{class_id}/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registered"),
        (status = 404, description = "Class or user not found"),
        (status = 409, description = "Already registered, or location mismatch")
    ),
    params(
        ("class_id" = Uuid, Path, description = "The class to register into.")
    )
)]
pub async fn register_handler(
    State(app_state): State<Arc<AppState>>,
    Path(class_id): Path<Uuid>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    app_state
        .attendance
        .register_user(class_id, payload.user_id)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "message": "User registered successfully" })),
    ))
}

/// Record the user's own Present mark for a session. Only allowed while the
/// session is live.
#[utoipa::path(
    post,
    path = "/classes/{class_id}/sessions/{session_id}/attendance",
    request_body = SelfAttendanceRequest,
    responses(
        (status = 200, description = "Marked Present"),
        (status = 404, description = "Class, session or registration not found"),
        (status = 409, description = "Already marked, or session not live")
    ),
    params(
        ("class_id" = Uuid, Path, description = "The class."),
        ("session_id" = Uuid, Path, description = "The session to mark.")
    )
)]
pub async fn self_attendance_handler(
    State(app_state): State<Arc<AppState>>,
    Path((class_id, session_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<SelfAttendanceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    app_state
        .attendance
        .mark_self_attendance(class_id, session_id, payload.user_id)
        .await?;
    Ok(Json(json!({ "success": true, "message": "Attendance marked" })))
}

/// Instructor roster attendance against the class's currently live session.
/// A submission that changes nothing is rejected with 409; use the edit
/// endpoint to rewrite an existing roster.
#[utoipa::path(
    post,
    path = "/classes/{class_id}/roster-attendance",
    request_body = RosterRequest,
    responses(
        (status = 200, description = "Roster recorded", body = RosterResponse),
        (status = 400, description = "Empty attendance list"),
        (status = 404, description = "Class not found"),
        (status = 409, description = "No live session, or everything already marked")
    ),
    params(
        ("class_id" = Uuid, Path, description = "The class.")
    )
)]
pub async fn roster_attendance_handler(
    State(app_state): State<Arc<AppState>>,
    Path(class_id): Path<Uuid>,
    Json(payload): Json<RosterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let marks = parse_marks(&payload.attendance_list)?;
    let outcome = app_state
        .attendance
        .mark_roster_attendance(class_id, payload.instructor_id, &marks)
        .await?;
    Ok(Json(RosterResponse {
        session_id: outcome.session_id,
        updated: outcome.updated,
        already_marked: outcome.already_marked,
    }))
}

/// Rewrite the roster for an explicit session, with no live-window gate.
#[utoipa::path(
    put,
    path = "/classes/{class_id}/sessions/{session_id}/roster-attendance",
    request_body = RosterRequest,
    responses(
        (status = 200, description = "Roster replaced"),
        (status = 400, description = "Empty attendance list"),
        (status = 404, description = "Class or session not found")
    ),
    params(
        ("class_id" = Uuid, Path, description = "The class."),
        ("session_id" = Uuid, Path, description = "The session whose roster to replace.")
    )
)]
pub async fn edit_roster_handler(
    State(app_state): State<Arc<AppState>>,
    Path((class_id, session_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<RosterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let marks = parse_marks(&payload.attendance_list)?;
    let count = app_state
        .attendance
        .edit_roster_attendance(class_id, session_id, payload.instructor_id, &marks)
        .await?;
    Ok(Json(json!({ "success": true, "count": count })))
}

/// Read the instructor-taken rosters for one session.
#[utoipa::path(
    get,
    path = "/classes/{class_id}/sessions/{session_id}/roster",
    responses(
        (status = 200, description = "Rosters for the session", body = [RosterEntryView]),
        (status = 404, description = "Class or session not found")
    ),
    params(
        ("class_id" = Uuid, Path, description = "The class."),
        ("session_id" = Uuid, Path, description = "The session.")
    )
)]
pub async fn session_roster_handler(
    State(app_state): State<Arc<AppState>>,
    Path((class_id, session_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let entries = app_state
        .attendance
        .session_roster(class_id, session_id)
        .await?;
    let views: Vec<RosterEntryView> = entries
        .iter()
        .map(|entry| RosterEntryView {
            instructor_id: entry.instructor_id,
            session_id: entry.session_id,
            taken_at: entry.taken_at,
            roster: entry
                .roster
                .iter()
                .map(|line| RosterLineView {
                    id: line.subject.id(),
                    subject_type: match line.subject {
                        AttendanceSubject::User(_) => "user".to_string(),
                        AttendanceSubject::Prisoner(_) => "prisoner".to_string(),
                    },
                    status: match line.status {
                        AttendanceStatus::Present => "Present".to_string(),
                        AttendanceStatus::Absent => "Absent".to_string(),
                    },
                })
                .collect(),
        })
        .collect();
    Ok(Json(views))
}

/// Repair stale session-id references in the class's ledger after a
/// schedule edit. Safe to call repeatedly; a second pass fixes nothing.
#[utoipa::path(
    post,
    path = "/classes/{class_id}/reconcile",
    responses(
        (status = 200, description = "Repair counts", body = ReconcileResponse),
        (status = 404, description = "Class or ledger not found")
    ),
    params(
        ("class_id" = Uuid, Path, description = "The class to reconcile.")
    )
)]
pub async fn reconcile_handler(
    State(app_state): State<Arc<AppState>>,
    Path(class_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let report = app_state.attendance.reconcile(class_id).await?;
    Ok(Json(ReconcileResponse {
        instructor_fixed: report.instructor_fixed,
        registration_fixed: report.registration_fixed,
    }))
}
