//! services/api/src/web/deletion.rs
//!
//! Axum handlers for the admin-only permanent deletion endpoint and its
//! audit log.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::state::AppState;
use rehab_core::domain::{MutationAction, UserDeletionLog};

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct DeleteUserRequest {
    /// The deleted account's role, recorded in the audit log.
    pub role: String,
    /// Why the account is being removed. Required.
    pub reason: String,
}

#[derive(Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub offset: u64,
    pub limit: Option<u64>,
}

#[derive(Serialize, ToSchema)]
pub struct AffectedView {
    pub collection: String,
    pub action: String,
    pub affected_count: u64,
}

#[derive(Serialize, ToSchema)]
pub struct DeletionLogView {
    pub id: Uuid,
    pub deleted_user_id: Uuid,
    pub user_name: String,
    pub user_role: String,
    pub deleted_by: String,
    pub reason: String,
    pub affected: Vec<AffectedView>,
    pub deleted_at: DateTime<Utc>,
}

impl DeletionLogView {
    fn from_log(log: &UserDeletionLog) -> Self {
        Self {
            id: log.id,
            deleted_user_id: log.deleted_user_id,
            user_name: log.user_name.clone(),
            user_role: log.user_role.clone(),
            deleted_by: log.deleted_by.clone(),
            reason: log.reason.clone(),
            affected: log
                .affected
                .iter()
                .map(|a| AffectedView {
                    collection: a.collection.name().to_string(),
                    action: match a.action {
                        MutationAction::Delete => "delete".to_string(),
                        MutationAction::Update => "update".to_string(),
                    },
                    affected_count: a.affected_count,
                })
                .collect(),
            deleted_at: log.deleted_at,
        }
    }
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Permanently delete a user and every record referencing them.
///
/// All-or-nothing: a failure partway through rolls every touched collection
/// back to its prior state. Success writes a permanent audit row.
#[utoipa::path(
    delete,
    path = "/admin/users/{user_id}",
    request_body = DeleteUserRequest,
    responses(
        (status = 200, description = "User deleted", body = DeletionLogView),
        (status = 400, description = "Missing role or reason"),
        (status = 404, description = "User not found")
    ),
    params(
        ("user_id" = Uuid, Path, description = "The user to delete.")
    )
)]
pub async fn delete_user_handler(
    State(app_state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<DeleteUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let log = app_state
        .deletion
        .delete_user_cascade(user_id, &payload.role, &payload.reason)
        .await?;
    Ok(Json(DeletionLogView::from_log(&log)))
}

/// Page through the permanent deletion audit log, newest first.
#[utoipa::path(
    get,
    path = "/admin/deletion-logs",
    responses(
        (status = 200, description = "Audit rows", body = [DeletionLogView])
    ),
    params(
        ("offset" = Option<u64>, Query, description = "Rows to skip."),
        ("limit" = Option<u64>, Query, description = "Page size, default 50.")
    )
)]
pub async fn deletion_logs_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let logs = app_state
        .deletion_logs
        .list(query.offset, query.limit.unwrap_or(50))
        .await?;
    let views: Vec<DeletionLogView> = logs.iter().map(DeletionLogView::from_log).collect();
    Ok(Json(views))
}
