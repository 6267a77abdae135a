//! crates/rehab_core/src/deletion.rs
//!
//! The cascading user-deletion engine: snapshot every affected collection,
//! mutate, write a permanent audit row, and clean up, with full rollback of
//! all mutations when anything fails mid-pass.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{
    AffectedCollection, DeletionSnapshot, MutationAction, RawDocument, RestoreMode,
    TargetCollection, UserDeletionLog,
};
use crate::ports::{
    Clock, CoreError, CoreResult, DeletionLogStore, DocumentStore, EmailDispatcher, SnapshotStore,
};

/// Deletion plan: which collections are touched, in which way, in order.
/// `Insert`-mode collections hold documents fully owned by the user and are
/// hard-deleted; `Replace`-mode collections are shared and only have the
/// user's sub-elements pulled out. Notifications get both treatments (the
/// user may be the receiver of some and a mere recipient-list entry in
/// others), which `Replace` snapshots cover either way because restore
/// upserts by id.
const PLAN: &[(TargetCollection, RestoreMode)] = &[
    (TargetCollection::Users, RestoreMode::Insert),
    (TargetCollection::SupportTickets, RestoreMode::Insert),
    (TargetCollection::SupportMessages, RestoreMode::Insert),
    (TargetCollection::Journals, RestoreMode::Insert),
    (TargetCollection::Feedback, RestoreMode::Insert),
    (TargetCollection::RegistrationLedgers, RestoreMode::Replace),
    (TargetCollection::Notifications, RestoreMode::Replace),
    (TargetCollection::MentorshipActivities, RestoreMode::Replace),
    (TargetCollection::UserAssignments, RestoreMode::Replace),
    (TargetCollection::InstructorAssignments, RestoreMode::Replace),
    (TargetCollection::QuestionnaireResponses, RestoreMode::Replace),
];

pub struct DeletionEngine {
    docs: Arc<dyn DocumentStore>,
    snapshots: Arc<dyn SnapshotStore>,
    log: Arc<dyn DeletionLogStore>,
    mailer: Arc<dyn EmailDispatcher>,
    clock: Arc<dyn Clock>,
    /// Serializes concurrent deletions of the same user id; deletions of
    /// different users run in parallel.
    user_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl DeletionEngine {
    pub fn new(
        docs: Arc<dyn DocumentStore>,
        snapshots: Arc<dyn SnapshotStore>,
        log: Arc<dyn DeletionLogStore>,
        mailer: Arc<dyn EmailDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            docs,
            snapshots,
            log,
            mailer,
            clock,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Permanently deletes a user and every record referencing them.
    ///
    /// On success no document anywhere still references the user id and a
    /// permanent audit row records what happened. On any mutation failure
    /// every snapshot taken during the operation is restored, leaving the
    /// database observably unchanged, and the original error is returned.
    ///
    /// This is the hard-delete path; it is independent of the soft-delete
    /// flag used elsewhere and is reached only by explicit admin action.
    pub async fn delete_user_cascade(
        &self,
        user_id: Uuid,
        role: &str,
        reason: &str,
    ) -> CoreResult<UserDeletionLog> {
        if role.trim().is_empty() || reason.trim().is_empty() {
            return Err(CoreError::Validation(
                "role and reason are required".to_string(),
            ));
        }

        let lock = self.lock_for(user_id).await;
        let _guard = lock.lock().await;

        // The existence check doubles as the short-circuit for a duplicate
        // request that lost the race on the per-user lock.
        let user_doc = self
            .docs
            .find_referencing(TargetCollection::Users, user_id)
            .await?
            .into_iter()
            .find(|d| d.id == user_id)
            .ok_or_else(|| CoreError::NotFound(format!("user {user_id}")))?;
        let user_name = string_field(&user_doc.body, "name").unwrap_or_else(|| "N/A".to_string());
        let user_email = string_field(&user_doc.body, "email");

        let operation_id = Uuid::new_v4();
        let now = self.clock.now();
        let mut affected: Vec<AffectedCollection> = Vec::new();

        // Snapshot phase. Nothing has been mutated yet, so a failure here
        // needs no rollback.
        for &(collection, mode) in PLAN {
            let documents = self.docs.find_referencing(collection, user_id).await?;
            if documents.is_empty() {
                continue;
            }
            affected.push(AffectedCollection {
                collection,
                action: match mode {
                    RestoreMode::Insert => MutationAction::Delete,
                    RestoreMode::Replace => MutationAction::Update,
                },
                filter: format!("references user {user_id}"),
                affected_count: documents.len() as u64,
            });
            self.snapshots
                .save(&DeletionSnapshot {
                    operation_id,
                    collection,
                    restore_mode: mode,
                    documents,
                    created_at: now,
                })
                .await?;
        }

        // Mutation phase. Any error rolls back everything snapshotted.
        if let Err(err) = self.mutate(user_id).await {
            error!(%user_id, %operation_id, %err, "deletion failed, rolling back");
            self.rollback(operation_id).await;
            return Err(err);
        }

        let log = UserDeletionLog {
            id: Uuid::new_v4(),
            deleted_user_id: user_id,
            user_name,
            user_email: user_email.clone(),
            user_role: role.to_string(),
            deleted_by: "admin".to_string(),
            reason: reason.to_string(),
            affected,
            deleted_at: now,
        };
        self.log.append(&log).await?;
        self.snapshots.purge_operation(operation_id).await?;
        info!(%user_id, %operation_id, "user deleted");

        // Fire-and-forget farewell email; delivery failure never fails the
        // completed deletion.
        if let Some(email) = user_email.as_deref() {
            let body = deletion_email_body(&log.user_name, reason);
            if let Err(err) = self
                .mailer
                .send(email, "Your account has been removed", &body)
                .await
            {
                warn!(%user_id, %err, "deletion email failed");
            }
        }
        Ok(log)
    }

    async fn mutate(&self, user_id: Uuid) -> CoreResult<()> {
        // Owned documents first, then reference pulls, then the user record
        // itself last.
        for collection in [
            TargetCollection::SupportTickets,
            TargetCollection::SupportMessages,
            TargetCollection::Journals,
            TargetCollection::Feedback,
            TargetCollection::Notifications,
        ] {
            self.docs.delete_owned_by(collection, user_id).await?;
        }
        for collection in [
            TargetCollection::RegistrationLedgers,
            TargetCollection::Notifications,
            TargetCollection::MentorshipActivities,
            TargetCollection::UserAssignments,
            TargetCollection::InstructorAssignments,
            TargetCollection::QuestionnaireResponses,
        ] {
            self.docs.pull_user_references(collection, user_id).await?;
        }
        // An instructor or mentor owns whole assignment documents too.
        self.docs
            .delete_owned_by(TargetCollection::UserAssignments, user_id)
            .await?;
        self.docs
            .delete_owned_by(TargetCollection::InstructorAssignments, user_id)
            .await?;
        self.docs
            .delete_owned_by(TargetCollection::Users, user_id)
            .await?;
        Ok(())
    }

    /// Best-effort restore of every snapshot taken during the operation.
    /// A failure while rolling back is logged and skipped; it is not itself
    /// rolled back further.
    async fn rollback(&self, operation_id: Uuid) {
        let snapshots = match self.snapshots.list_for_operation(operation_id).await {
            Ok(snapshots) => snapshots,
            Err(err) => {
                error!(%operation_id, %err, "rollback could not list snapshots");
                return;
            }
        };
        for snapshot in snapshots {
            let result = match snapshot.restore_mode {
                RestoreMode::Insert => {
                    self.docs
                        .insert_documents(snapshot.collection, &snapshot.documents)
                        .await
                }
                RestoreMode::Replace => {
                    let mut result = Ok(());
                    for document in &snapshot.documents {
                        if let Err(err) =
                            self.docs.replace_document(snapshot.collection, document).await
                        {
                            result = Err(err);
                            break;
                        }
                    }
                    result
                }
            };
            if let Err(err) = result {
                error!(
                    %operation_id,
                    collection = snapshot.collection.name(),
                    %err,
                    "rollback restore failed for collection"
                );
            }
        }
    }

    async fn lock_for(&self, user_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks.entry(user_id).or_default().clone()
    }
}

fn string_field(body: &Value, field: &str) -> Option<String> {
    body.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn deletion_email_body(name: &str, reason: &str) -> String {
    format!(
        "<div><h2>Hello {name},</h2>\
         <p>Your account and associated records have been permanently removed \
         from the platform by an administrator.</p>\
         <p>Reason: {reason}</p></div>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::*;
    use crate::ports::SystemClock;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wraps a document store and fails the nth mutating call, to force a
    /// mid-pass abort.
    struct FailingDocumentStore {
        inner: Arc<InMemoryDocumentStore>,
        fail_after: usize,
        mutations: AtomicUsize,
    }

    impl FailingDocumentStore {
        fn new(inner: Arc<InMemoryDocumentStore>, fail_after: usize) -> Self {
            Self {
                inner,
                fail_after,
                mutations: AtomicUsize::new(0),
            }
        }

        fn trip(&self) -> CoreResult<()> {
            if self.mutations.fetch_add(1, Ordering::SeqCst) >= self.fail_after {
                Err(CoreError::Storage("injected failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl DocumentStore for FailingDocumentStore {
        async fn find_referencing(
            &self,
            collection: TargetCollection,
            user_id: Uuid,
        ) -> CoreResult<Vec<RawDocument>> {
            self.inner.find_referencing(collection, user_id).await
        }

        async fn delete_owned_by(
            &self,
            collection: TargetCollection,
            user_id: Uuid,
        ) -> CoreResult<u64> {
            self.trip()?;
            self.inner.delete_owned_by(collection, user_id).await
        }

        async fn pull_user_references(
            &self,
            collection: TargetCollection,
            user_id: Uuid,
        ) -> CoreResult<u64> {
            self.trip()?;
            self.inner.pull_user_references(collection, user_id).await
        }

        async fn insert_documents(
            &self,
            collection: TargetCollection,
            documents: &[RawDocument],
        ) -> CoreResult<()> {
            // Restores must succeed even after the failure tripped.
            self.inner.insert_documents(collection, documents).await
        }

        async fn replace_document(
            &self,
            collection: TargetCollection,
            document: &RawDocument,
        ) -> CoreResult<()> {
            self.inner.replace_document(collection, document).await
        }
    }

    fn raw(id: Uuid, body: serde_json::Value) -> RawDocument {
        RawDocument { id, body }
    }

    /// A user with documents across every dependent collection, plus
    /// bystander documents that must survive untouched.
    fn seed(docs: &InMemoryDocumentStore, user: Uuid) {
        let other = Uuid::new_v4();
        docs.put(
            TargetCollection::Users,
            raw(
                user,
                json!({ "id": user.to_string(), "name": "Dev", "email": "dev@example.org" }),
            ),
        );
        docs.put(
            TargetCollection::Users,
            raw(other, json!({ "id": other.to_string(), "name": "Other" })),
        );
        docs.put(
            TargetCollection::SupportTickets,
            raw(Uuid::new_v4(), json!({ "user_id": user.to_string(), "subject": "help" })),
        );
        docs.put(
            TargetCollection::SupportMessages,
            raw(Uuid::new_v4(), json!({ "sender_id": user.to_string(), "text": "hi" })),
        );
        docs.put(
            TargetCollection::Journals,
            raw(Uuid::new_v4(), json!({ "user_id": user.to_string(), "entry": "day 1" })),
        );
        docs.put(
            TargetCollection::Feedback,
            raw(Uuid::new_v4(), json!({ "user_id": user.to_string(), "rating": 5 })),
        );
        docs.put(
            TargetCollection::Notifications,
            raw(Uuid::new_v4(), json!({ "receiver_id": user.to_string(), "title": "hi" })),
        );
        docs.put(
            TargetCollection::Notifications,
            raw(
                Uuid::new_v4(),
                json!({
                    "receiver_id": other.to_string(),
                    "recipients": [user.to_string(), other.to_string()],
                    "read_by": [user.to_string()],
                }),
            ),
        );
        docs.put(
            TargetCollection::RegistrationLedgers,
            raw(
                Uuid::new_v4(),
                json!({
                    "class_id": Uuid::new_v4().to_string(),
                    "registrations": [
                        { "user_id": user.to_string(), "session_attendance": [] },
                        { "user_id": other.to_string(), "session_attendance": [] },
                    ],
                    "instructor_attendances": [{
                        "instructor_id": other.to_string(),
                        "session_id": Uuid::new_v4().to_string(),
                        "roster": [
                            { "subject": { "user": user.to_string() }, "status": "Present" },
                        ],
                    }],
                }),
            ),
        );
        docs.put(
            TargetCollection::MentorshipActivities,
            raw(
                Uuid::new_v4(),
                json!({
                    "assigned_users": [user.to_string(), other.to_string()],
                    "attended": [{ "user_id": user.to_string(), "note": "good" }],
                }),
            ),
        );
        docs.put(
            TargetCollection::UserAssignments,
            raw(
                Uuid::new_v4(),
                json!({
                    "instructor_id": other.to_string(),
                    "user_ids": [user.to_string(), other.to_string()],
                }),
            ),
        );
        docs.put(
            TargetCollection::InstructorAssignments,
            raw(
                Uuid::new_v4(),
                json!({
                    "mentor_id": other.to_string(),
                    "instructors": [{
                        "instructor_id": other.to_string(),
                        "user_ids": [user.to_string()],
                    }],
                }),
            ),
        );
        docs.put(
            TargetCollection::QuestionnaireResponses,
            raw(
                Uuid::new_v4(),
                json!({
                    "responses": [
                        { "user_id": user.to_string(), "answers": [1, 2] },
                        { "user_id": other.to_string(), "answers": [3] },
                    ],
                }),
            ),
        );
    }

    fn engine_with(docs: Arc<dyn DocumentStore>) -> (DeletionEngine, Arc<InMemorySnapshotStore>, Arc<InMemoryDeletionLogStore>, Arc<RecordingMailer>) {
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let log = Arc::new(InMemoryDeletionLogStore::new());
        let mailer = Arc::new(RecordingMailer::new());
        let engine = DeletionEngine::new(
            docs,
            snapshots.clone(),
            log.clone(),
            mailer.clone(),
            Arc::new(SystemClock),
        );
        (engine, snapshots, log, mailer)
    }

    #[tokio::test]
    async fn successful_deletion_leaves_no_references_and_audits() {
        let docs = Arc::new(InMemoryDocumentStore::new());
        let user = Uuid::new_v4();
        seed(&docs, user);
        let (engine, snapshots, log, mailer) = engine_with(docs.clone());

        let entry = engine
            .delete_user_cascade(user, "user", "left the program")
            .await
            .unwrap();
        assert_eq!(entry.deleted_user_id, user);
        assert!(!entry.affected.is_empty());

        // No document in any collection still references the user.
        for (collection, documents) in docs.dump() {
            for document in documents {
                assert!(
                    !crate::docs::references_user(&document.body, user),
                    "{} still references the deleted user",
                    collection.name()
                );
            }
        }
        // Bystanders survive: the other user's registration is intact.
        let ledgers = docs
            .find_referencing(TargetCollection::RegistrationLedgers, user)
            .await
            .unwrap();
        assert!(ledgers.is_empty());

        // Snapshots cleaned up, audit row written, email dispatched.
        assert_eq!(snapshots.remaining(), 0);
        assert_eq!(log.list(0, 10).await.unwrap().len(), 1);
        assert_eq!(mailer.sent.read().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_deletion_rolls_back_to_the_exact_prior_state() {
        let inner = Arc::new(InMemoryDocumentStore::new());
        let user = Uuid::new_v4();
        seed(&inner, user);
        let before = inner.dump();

        // Let a handful of mutations through, then fail mid-pass.
        let failing = Arc::new(FailingDocumentStore::new(inner.clone(), 4));
        let (engine, _snapshots, log, mailer) = engine_with(failing);

        let err = engine
            .delete_user_cascade(user, "user", "testing rollback")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Storage(_)));

        // Every collection is byte-for-byte identical to the pre-call state.
        assert_eq!(inner.dump(), before);
        // No audit row, no farewell email for a failed operation.
        assert!(log.list(0, 10).await.unwrap().is_empty());
        assert!(mailer.sent.read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_deletion_of_the_same_user_is_not_found() {
        let docs = Arc::new(InMemoryDocumentStore::new());
        let user = Uuid::new_v4();
        seed(&docs, user);
        let (engine, ..) = engine_with(docs.clone());

        engine
            .delete_user_cascade(user, "user", "first")
            .await
            .unwrap();
        let err = engine
            .delete_user_cascade(user, "user", "second")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn missing_role_or_reason_is_rejected_before_any_work() {
        let docs = Arc::new(InMemoryDocumentStore::new());
        let user = Uuid::new_v4();
        seed(&docs, user);
        let before = docs.dump();
        let (engine, snapshots, ..) = engine_with(docs.clone());

        let err = engine.delete_user_cascade(user, "user", "  ").await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(docs.dump(), before);
        assert_eq!(snapshots.remaining(), 0);
    }
}
