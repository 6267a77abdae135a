//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use std::sync::Arc;

use crate::config::Config;
use rehab_core::attendance::AttendanceService;
use rehab_core::badges::BadgeService;
use rehab_core::deletion::DeletionEngine;
use rehab_core::ports::{ClassStore, Clock, DeletionLogStore, LedgerStore, UserStore};

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub classes: Arc<dyn ClassStore>,
    pub ledgers: Arc<dyn LedgerStore>,
    pub users: Arc<dyn UserStore>,
    pub attendance: Arc<AttendanceService>,
    pub badges: Arc<BadgeService>,
    pub deletion: Arc<DeletionEngine>,
    pub deletion_logs: Arc<dyn DeletionLogStore>,
    pub clock: Arc<dyn Clock>,
}
