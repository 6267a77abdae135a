pub mod attendance;
pub mod classes;
pub mod deletion;
pub mod rest;
pub mod state;

use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::Router;

use state::AppState;

/// Builds the REST router over the shared application state.
pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/classes",
            post(classes::create_class_handler).get(classes::list_classes_handler),
        )
        .route(
            "/classes/{class_id}",
            put(classes::update_class_handler).get(classes::get_class_handler),
        )
        .route(
            "/classes/{class_id}/block",
            post(classes::block_class_handler),
        )
        .route(
            "/classes/{class_id}/register",
            post(attendance::register_handler),
        )
        .route(
            "/classes/{class_id}/sessions/{session_id}/attendance",
            post(attendance::self_attendance_handler),
        )
        .route(
            "/classes/{class_id}/roster-attendance",
            post(attendance::roster_attendance_handler),
        )
        .route(
            "/classes/{class_id}/sessions/{session_id}/roster-attendance",
            put(attendance::edit_roster_handler),
        )
        .route(
            "/classes/{class_id}/sessions/{session_id}/roster",
            get(attendance::session_roster_handler),
        )
        .route(
            "/classes/{class_id}/reconcile",
            post(attendance::reconcile_handler),
        )
        .route(
            "/admin/users/{user_id}",
            delete(deletion::delete_user_handler),
        )
        .route(
            "/admin/deletion-logs",
            get(deletion::deletion_logs_handler),
        )
        .with_state(app_state)
}
