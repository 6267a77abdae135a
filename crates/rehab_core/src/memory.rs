//! crates/rehab_core/src/memory.rs
//!
//! In-memory implementations of every port. The test suites run the core
//! engines against these, and they double as a dev backend when no database
//! is available.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::docs;
use crate::domain::{
    Class, DeletionSnapshot, Prisoner, RawDocument, RegistrationLedger, TargetCollection,
    UserDeletionLog, UserProfile,
};
use crate::ports::{
    ActivityStore, AssignmentStore, ClassStore, Clock, CoreError, CoreResult, DeletionLogStore,
    DocumentStore, EmailDispatcher, LedgerStore, NotificationDispatcher, PrisonerStore,
    SnapshotStore, UserStore,
};

fn poisoned() -> CoreError {
    CoreError::Storage("memory store lock poisoned".to_string())
}

//=========================================================================================
// Clock
//=========================================================================================

/// A clock pinned to an explicit instant, settable by tests.
pub struct FixedClock {
    now: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write().unwrap() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap()
    }
}

//=========================================================================================
// Typed stores
//=========================================================================================

#[derive(Default)]
pub struct InMemoryClassStore {
    classes: RwLock<HashMap<Uuid, Class>>,
}

impl InMemoryClassStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClassStore for InMemoryClassStore {
    async fn get(&self, class_id: Uuid) -> CoreResult<Option<Class>> {
        Ok(self
            .classes
            .read()
            .map_err(|_| poisoned())?
            .get(&class_id)
            .cloned())
    }

    async fn insert(&self, class: &Class) -> CoreResult<()> {
        self.classes
            .write()
            .map_err(|_| poisoned())?
            .insert(class.id, class.clone());
        Ok(())
    }

    async fn update(&self, class: &Class) -> CoreResult<()> {
        self.insert(class).await
    }

    async fn list_active(&self) -> CoreResult<Vec<Class>> {
        Ok(self
            .classes
            .read()
            .map_err(|_| poisoned())?
            .values()
            .filter(|c| c.status == crate::domain::RecordStatus::Active)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryLedgerStore {
    ledgers: RwLock<HashMap<Uuid, RegistrationLedger>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn find_by_class(&self, class_id: Uuid) -> CoreResult<Option<RegistrationLedger>> {
        Ok(self
            .ledgers
            .read()
            .map_err(|_| poisoned())?
            .get(&class_id)
            .cloned())
    }

    async fn find_with_user(&self, user_id: Uuid) -> CoreResult<Vec<RegistrationLedger>> {
        Ok(self
            .ledgers
            .read()
            .map_err(|_| poisoned())?
            .values()
            .filter(|l| l.registration_for(user_id).is_some())
            .cloned()
            .collect())
    }

    async fn all(&self) -> CoreResult<Vec<RegistrationLedger>> {
        Ok(self
            .ledgers
            .read()
            .map_err(|_| poisoned())?
            .values()
            .cloned()
            .collect())
    }

    async fn save(&self, ledger: &RegistrationLedger) -> CoreResult<()> {
        self.ledgers
            .write()
            .map_err(|_| poisoned())?
            .insert(ledger.class_id, ledger.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<Uuid, UserProfile>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: UserProfile) {
        self.users.write().unwrap().insert(user.id, user);
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get(&self, user_id: Uuid) -> CoreResult<Option<UserProfile>> {
        Ok(self
            .users
            .read()
            .map_err(|_| poisoned())?
            .get(&user_id)
            .cloned())
    }

    async fn set_last_badge(&self, user_id: Uuid, badge: u32) -> CoreResult<()> {
        let mut users = self.users.write().map_err(|_| poisoned())?;
        let user = users
            .get_mut(&user_id)
            .ok_or_else(|| CoreError::NotFound(format!("user {user_id}")))?;
        user.last_badge_achieved = badge;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPrisonerStore {
    prisoners: RwLock<HashMap<Uuid, Prisoner>>,
}

impl InMemoryPrisonerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, prisoner: Prisoner) {
        self.prisoners.write().unwrap().insert(prisoner.id, prisoner);
    }
}

#[async_trait]
impl PrisonerStore for InMemoryPrisonerStore {
    async fn get(&self, prisoner_id: Uuid) -> CoreResult<Option<Prisoner>> {
        Ok(self
            .prisoners
            .read()
            .map_err(|_| poisoned())?
            .get(&prisoner_id)
            .cloned())
    }
}

#[derive(Default)]
pub struct InMemoryAssignmentStore {
    edges: RwLock<HashMap<Uuid, Vec<Uuid>>>,
}

impl InMemoryAssignmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssignmentStore for InMemoryAssignmentStore {
    async fn assigned_user_ids(&self, instructor_id: Uuid) -> CoreResult<Vec<Uuid>> {
        Ok(self
            .edges
            .read()
            .map_err(|_| poisoned())?
            .get(&instructor_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_user(&self, instructor_id: Uuid, user_id: Uuid) -> CoreResult<()> {
        let mut edges = self.edges.write().map_err(|_| poisoned())?;
        let users = edges.entry(instructor_id).or_default();
        if !users.contains(&user_id) {
            users.push(user_id);
        }
        Ok(())
    }

    async fn is_assigned(&self, instructor_id: Uuid, user_id: Uuid) -> CoreResult<bool> {
        Ok(self
            .edges
            .read()
            .map_err(|_| poisoned())?
            .get(&instructor_id)
            .map(|users| users.contains(&user_id))
            .unwrap_or(false))
    }
}

#[derive(Default)]
pub struct InMemoryActivityStore {
    counts: RwLock<HashMap<Uuid, u64>>,
}

impl InMemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_count(&self, user_id: Uuid, count: u64) {
        self.counts.write().unwrap().insert(user_id, count);
    }
}

#[async_trait]
impl ActivityStore for InMemoryActivityStore {
    async fn attended_activity_count(&self, user_id: Uuid) -> CoreResult<u64> {
        Ok(self
            .counts
            .read()
            .map_err(|_| poisoned())?
            .get(&user_id)
            .copied()
            .unwrap_or(0))
    }
}

//=========================================================================================
// Raw document store (deletion engine)
//=========================================================================================

#[derive(Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<TargetCollection, Vec<RawDocument>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, collection: TargetCollection, document: RawDocument) {
        self.collections
            .write()
            .unwrap()
            .entry(collection)
            .or_default()
            .push(document);
    }

    /// Full dump of every collection, sorted for stable comparison.
    pub fn dump(&self) -> HashMap<TargetCollection, Vec<RawDocument>> {
        let mut dump = self.collections.read().unwrap().clone();
        for docs in dump.values_mut() {
            docs.sort_by_key(|d| d.id);
        }
        dump
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn find_referencing(
        &self,
        collection: TargetCollection,
        user_id: Uuid,
    ) -> CoreResult<Vec<RawDocument>> {
        Ok(self
            .collections
            .read()
            .map_err(|_| poisoned())?
            .get(&collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| docs::references_user(&d.body, user_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_owned_by(
        &self,
        collection: TargetCollection,
        user_id: Uuid,
    ) -> CoreResult<u64> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        let Some(docs) = collections.get_mut(&collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|d| !docs::owned_by_user(collection, &d.body, user_id));
        Ok((before - docs.len()) as u64)
    }

    async fn pull_user_references(
        &self,
        collection: TargetCollection,
        user_id: Uuid,
    ) -> CoreResult<u64> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        let Some(docs) = collections.get_mut(&collection) else {
            return Ok(0);
        };
        let mut changed = 0;
        for doc in docs.iter_mut() {
            if docs::pull_user(&mut doc.body, user_id) {
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn insert_documents(
        &self,
        collection: TargetCollection,
        documents: &[RawDocument],
    ) -> CoreResult<()> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        collections
            .entry(collection)
            .or_default()
            .extend(documents.iter().cloned());
        Ok(())
    }

    async fn replace_document(
        &self,
        collection: TargetCollection,
        document: &RawDocument,
    ) -> CoreResult<()> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        let docs = collections.entry(collection).or_default();
        match docs.iter_mut().find(|d| d.id == document.id) {
            Some(existing) => *existing = document.clone(),
            None => docs.push(document.clone()),
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<Vec<DeletionSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remaining(&self) -> usize {
        self.snapshots.read().unwrap().len()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: &DeletionSnapshot) -> CoreResult<()> {
        self.snapshots
            .write()
            .map_err(|_| poisoned())?
            .push(snapshot.clone());
        Ok(())
    }

    async fn list_for_operation(&self, operation_id: Uuid) -> CoreResult<Vec<DeletionSnapshot>> {
        Ok(self
            .snapshots
            .read()
            .map_err(|_| poisoned())?
            .iter()
            .filter(|s| s.operation_id == operation_id)
            .cloned()
            .collect())
    }

    async fn purge_operation(&self, operation_id: Uuid) -> CoreResult<()> {
        self.snapshots
            .write()
            .map_err(|_| poisoned())?
            .retain(|s| s.operation_id != operation_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryDeletionLogStore {
    logs: RwLock<Vec<UserDeletionLog>>,
}

impl InMemoryDeletionLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeletionLogStore for InMemoryDeletionLogStore {
    async fn append(&self, log: &UserDeletionLog) -> CoreResult<()> {
        self.logs.write().map_err(|_| poisoned())?.push(log.clone());
        Ok(())
    }

    async fn list(&self, offset: u64, limit: u64) -> CoreResult<Vec<UserDeletionLog>> {
        Ok(self
            .logs
            .read()
            .map_err(|_| poisoned())?
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

//=========================================================================================
// Outbound dispatchers
//=========================================================================================

/// Records every dispatched notification so tests can assert exactly-once
/// behavior.
#[derive(Default)]
pub struct RecordingNotifier {
    pub badge_events: RwLock<Vec<(Uuid, u32)>>,
    pub reminders: RwLock<Vec<(Uuid, Uuid)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn badge_unlocked(
        &self,
        user: &UserProfile,
        badge: u32,
        _total_attended: u64,
    ) -> CoreResult<()> {
        self.badge_events
            .write()
            .map_err(|_| poisoned())?
            .push((user.id, badge));
        Ok(())
    }

    async fn session_reminder(
        &self,
        user: &UserProfile,
        _class: &Class,
        session_id: Uuid,
        _message: &str,
    ) -> CoreResult<()> {
        self.reminders
            .write()
            .map_err(|_| poisoned())?
            .push((user.id, session_id));
        Ok(())
    }
}

/// Records outbound email instead of sending it.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: RwLock<Vec<(String, String)>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EmailDispatcher for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, _html_body: &str) -> CoreResult<()> {
        self.sent
            .write()
            .map_err(|_| poisoned())?
            .push((to.to_string(), subject.to_string()));
        Ok(())
    }
}
