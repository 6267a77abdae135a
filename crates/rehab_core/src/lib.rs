pub mod attendance;
pub mod badges;
pub mod deletion;
pub mod docs;
pub mod domain;
pub mod memory;
pub mod ports;
pub mod schedule;

pub use attendance::{AttendanceService, ReconcileReport, RosterMark, RosterOutcome};
pub use badges::BadgeService;
pub use deletion::DeletionEngine;
pub use domain::{
    AttendanceStatus, AttendanceSubject, Cadence, Class, ClassKind, ClassSession,
    RegistrationLedger, SessionStatus, TargetCollection, UserDeletionLog, UserProfile,
};
pub use ports::{Conflict, CoreError, CoreResult, SystemClock};
pub use schedule::{evaluate_class, evaluate_session, find_live_session, generate_sessions, PROGRAM_TZ};
