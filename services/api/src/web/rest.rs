//! services/api/src/web/rest.rs
//!
//! The master definition for the OpenAPI specification, aggregating every
//! REST handler and schema across the web modules.

use utoipa::OpenApi;

use crate::web::{attendance, classes, deletion};

#[derive(OpenApi)]
#[openapi(
    paths(
        classes::create_class_handler,
        classes::update_class_handler,
        classes::block_class_handler,
        classes::list_classes_handler,
        classes::get_class_handler,
        attendance::register_handler,
        attendance::self_attendance_handler,
        attendance::roster_attendance_handler,
        attendance::edit_roster_handler,
        attendance::session_roster_handler,
        attendance::reconcile_handler,
        deletion::delete_user_handler,
        deletion::deletion_logs_handler,
    ),
    components(
        schemas(
            classes::CreateClassRequest,
            classes::UpdateClassRequest,
            classes::ClassView,
            classes::SessionView,
            attendance::RegisterRequest,
            attendance::SelfAttendanceRequest,
            attendance::AttendanceLine,
            attendance::RosterRequest,
            attendance::RosterResponse,
            attendance::RosterEntryView,
            attendance::RosterLineView,
            attendance::ReconcileResponse,
            deletion::DeleteUserRequest,
            deletion::DeletionLogView,
            deletion::AffectedView,
        )
    ),
    tags(
        (name = "Rehab Platform API", description = "Class scheduling, attendance and account administration.")
    )
)]
pub struct ApiDoc;
