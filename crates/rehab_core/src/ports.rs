//! crates/rehab_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! core to be independent of specific external implementations like the
//! document database, SMTP delivery, or push notification services.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    Class, DeletionSnapshot, Prisoner, RawDocument, RegistrationLedger, TargetCollection,
    UserDeletionLog, UserProfile,
};

//=========================================================================================
// Core Error and Result Types
//=========================================================================================

/// Business-rule conflicts: the request was well-formed and everything it
/// names exists, but the operation is not allowed in the current state.
/// Nothing is mutated when one of these is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Conflict {
    #[error("user already registered")]
    AlreadyRegistered,
    #[error("attendance already marked as Present for this session")]
    AlreadyPresent,
    #[error("session is not live for attendance marking")]
    SessionNotLive,
    #[error("no active session at this time")]
    NoActiveSession,
    #[error("attendance already marked for {already_marked} entries, use the edit endpoint")]
    AttendanceUnchanged { already_marked: usize },
    #[error("user location does not match class location")]
    LocationMismatch,
}

/// The error type shared by every core operation.
///
/// `Validation` and `NotFound` are detected before any mutation; `Conflict`
/// likewise performs no partial writes. `Integrity` signals a read-back
/// verification failure after a write already succeeded.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Conflict(#[from] Conflict),
    #[error("integrity failure: {0}")]
    Integrity(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// A convenience type alias for `Result<T, CoreError>`.
pub type CoreResult<T> = Result<T, CoreError>;

//=========================================================================================
// Time
//=========================================================================================

/// Source of the current instant. Always injected so that schedule math is
/// deterministically testable; production wires in [`SystemClock`].
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the system clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

//=========================================================================================
// Persistence Ports
//=========================================================================================

#[async_trait]
pub trait ClassStore: Send + Sync {
    async fn get(&self, class_id: Uuid) -> CoreResult<Option<Class>>;
    async fn insert(&self, class: &Class) -> CoreResult<()>;
    async fn update(&self, class: &Class) -> CoreResult<()>;
    async fn list_active(&self) -> CoreResult<Vec<Class>>;
}

/// Whole-document access to per-class registration ledgers.
///
/// `save` replaces the entire ledger document: two concurrent writers of the
/// same class race on a last-write-wins basis, which is the accepted
/// limitation of the single-instructor-per-class usage pattern. Adapters
/// must not silently weaken this to anything less than whole-document
/// atomicity.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn find_by_class(&self, class_id: Uuid) -> CoreResult<Option<RegistrationLedger>>;
    /// Every ledger containing a registration for the given user.
    async fn find_with_user(&self, user_id: Uuid) -> CoreResult<Vec<RegistrationLedger>>;
    async fn all(&self) -> CoreResult<Vec<RegistrationLedger>>;
    async fn save(&self, ledger: &RegistrationLedger) -> CoreResult<()>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, user_id: Uuid) -> CoreResult<Option<UserProfile>>;
    async fn set_last_badge(&self, user_id: Uuid, badge: u32) -> CoreResult<()>;
}

#[async_trait]
pub trait PrisonerStore: Send + Sync {
    async fn get(&self, prisoner_id: Uuid) -> CoreResult<Option<Prisoner>>;
}

/// Instructor-to-users assignment edges, with set semantics.
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn assigned_user_ids(&self, instructor_id: Uuid) -> CoreResult<Vec<Uuid>>;
    /// Idempotent union: adding an already-assigned user is a no-op.
    async fn add_user(&self, instructor_id: Uuid, user_id: Uuid) -> CoreResult<()>;
    async fn is_assigned(&self, instructor_id: Uuid, user_id: Uuid) -> CoreResult<bool>;
}

/// Mentorship-activity participation, consumed by the badge accumulator.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn attended_activity_count(&self, user_id: Uuid) -> CoreResult<u64>;
}

//=========================================================================================
// Deletion Engine Ports
//=========================================================================================

/// Raw-document view over every collection the deletion engine touches.
/// The engine never interprets document bodies; it only needs to find,
/// delete, mutate and restore them wholesale.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// All documents in `collection` that reference the user in any way.
    async fn find_referencing(
        &self,
        collection: TargetCollection,
        user_id: Uuid,
    ) -> CoreResult<Vec<RawDocument>>;

    /// Hard-delete documents fully owned by the user. Returns the count.
    async fn delete_owned_by(
        &self,
        collection: TargetCollection,
        user_id: Uuid,
    ) -> CoreResult<u64>;

    /// Remove the user's sub-elements (array entries, recipient lists)
    /// from shared documents without deleting the parents. Returns the
    /// number of parent documents changed.
    async fn pull_user_references(
        &self,
        collection: TargetCollection,
        user_id: Uuid,
    ) -> CoreResult<u64>;

    /// Bulk-reinsert previously deleted documents (rollback path).
    async fn insert_documents(
        &self,
        collection: TargetCollection,
        documents: &[RawDocument],
    ) -> CoreResult<()>;

    /// Upsert one document by id, replacing current state (rollback path).
    async fn replace_document(
        &self,
        collection: TargetCollection,
        document: &RawDocument,
    ) -> CoreResult<()>;
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &DeletionSnapshot) -> CoreResult<()>;
    async fn list_for_operation(&self, operation_id: Uuid) -> CoreResult<Vec<DeletionSnapshot>>;
    async fn purge_operation(&self, operation_id: Uuid) -> CoreResult<()>;
}

#[async_trait]
pub trait DeletionLogStore: Send + Sync {
    async fn append(&self, log: &UserDeletionLog) -> CoreResult<()>;
    async fn list(&self, offset: u64, limit: u64) -> CoreResult<Vec<UserDeletionLog>>;
}

//=========================================================================================
// Outbound Dispatch Ports (fire-and-forget)
//=========================================================================================

/// Push + persisted notification delivery. Callers treat every method as
/// fire-and-forget: a returned error is logged by the caller, never
/// propagated into the triggering operation.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn badge_unlocked(&self, user: &UserProfile, badge: u32, total_attended: u64)
        -> CoreResult<()>;
    async fn session_reminder(
        &self,
        user: &UserProfile,
        class: &Class,
        session_id: Uuid,
        message: &str,
    ) -> CoreResult<()>;
}

/// Outbound email, same fire-and-forget contract as notifications.
#[async_trait]
pub trait EmailDispatcher: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> CoreResult<()>;
}
