//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete
//! implementation of the persistence ports from the `rehab_core` crate. It
//! handles all interactions with the PostgreSQL database using `sqlx`.
//!
//! Storage model: every record is a whole JSONB document in a single
//! `documents` table keyed by `(collection, id)`, matching the
//! read-modify-write semantics the core engines are written against.
//! Deletion snapshots and audit logs get their own tables.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use rehab_core::docs;
use rehab_core::domain::{
    Class, DeletionSnapshot, Prisoner, RawDocument, RegistrationLedger, TargetCollection,
    UserDeletionLog, UserProfile,
};
use rehab_core::ports::{
    ActivityStore, AssignmentStore, ClassStore, CoreError, CoreResult, DeletionLogStore,
    DocumentStore, LedgerStore, PrisonerStore, SnapshotStore, UserStore,
};

// Collections outside the deletion engine's reach keep their names here.
const CLASSES: &str = "classes";
const PRISONERS: &str = "prisoners";

fn storage(e: sqlx::Error) -> CoreError {
    CoreError::Storage(e.to_string())
}

fn corrupt(e: serde_json::Error) -> CoreError {
    CoreError::Storage(format!("corrupt document: {e}"))
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements every persistence port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Deletes orphaned deletion snapshots older than a day. Snapshots are
    /// consumed by rollback within their operation; anything this old
    /// belongs to an operation that crashed between mutation and cleanup.
    pub async fn purge_expired_snapshots(&self) -> CoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM deletion_snapshots WHERE created_at < now() - interval '24 hours'",
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(result.rows_affected())
    }

    async fn fetch_one<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: Uuid,
    ) -> CoreResult<Option<T>> {
        let doc: Option<Value> = sqlx::query_scalar(
            "SELECT doc FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        doc.map(|d| serde_json::from_value(d).map_err(corrupt))
            .transpose()
    }

    async fn upsert<T: Serialize>(&self, collection: &str, id: Uuid, value: &T) -> CoreResult<()> {
        let doc = serde_json::to_value(value).map_err(corrupt)?;
        sqlx::query(
            "INSERT INTO documents (collection, id, doc) VALUES ($1, $2, $3)
             ON CONFLICT (collection, id) DO UPDATE SET doc = EXCLUDED.doc",
        )
        .bind(collection)
        .bind(id)
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn fetch_where<T: DeserializeOwned>(
        &self,
        query: &str,
        binds: &[String],
    ) -> CoreResult<Vec<T>> {
        let mut q = sqlx::query_scalar::<_, Value>(query);
        for bind in binds {
            q = q.bind(bind);
        }
        let rows = q.fetch_all(&self.pool).await.map_err(storage)?;
        rows.into_iter()
            .map(|d| serde_json::from_value(d).map_err(corrupt))
            .collect()
    }
}

//=========================================================================================
// Typed store implementations
//=========================================================================================

#[async_trait]
impl ClassStore for DbAdapter {
    async fn get(&self, class_id: Uuid) -> CoreResult<Option<Class>> {
        self.fetch_one(CLASSES, class_id).await
    }

    async fn insert(&self, class: &Class) -> CoreResult<()> {
        self.upsert(CLASSES, class.id, class).await
    }

    async fn update(&self, class: &Class) -> CoreResult<()> {
        self.upsert(CLASSES, class.id, class).await
    }

    async fn list_active(&self) -> CoreResult<Vec<Class>> {
        self.fetch_where(
            "SELECT doc FROM documents WHERE collection = $1 AND doc->>'status' = 'Active'",
            &[CLASSES.to_string()],
        )
        .await
    }
}

#[async_trait]
impl LedgerStore for DbAdapter {
    async fn find_by_class(&self, class_id: Uuid) -> CoreResult<Option<RegistrationLedger>> {
        // The ledger document is keyed by its class id.
        self.fetch_one(TargetCollection::RegistrationLedgers.name(), class_id)
            .await
    }

    async fn find_with_user(&self, user_id: Uuid) -> CoreResult<Vec<RegistrationLedger>> {
        self.fetch_where(
            "SELECT doc FROM documents WHERE collection = $1
             AND doc->'registrations' @> jsonb_build_array(jsonb_build_object('user_id', $2::text))",
            &[
                TargetCollection::RegistrationLedgers.name().to_string(),
                user_id.to_string(),
            ],
        )
        .await
    }

    async fn all(&self) -> CoreResult<Vec<RegistrationLedger>> {
        self.fetch_where(
            "SELECT doc FROM documents WHERE collection = $1",
            &[TargetCollection::RegistrationLedgers.name().to_string()],
        )
        .await
    }

    async fn save(&self, ledger: &RegistrationLedger) -> CoreResult<()> {
        self.upsert(
            TargetCollection::RegistrationLedgers.name(),
            ledger.class_id,
            ledger,
        )
        .await
    }
}

#[async_trait]
impl UserStore for DbAdapter {
    async fn get(&self, user_id: Uuid) -> CoreResult<Option<UserProfile>> {
        self.fetch_one(TargetCollection::Users.name(), user_id).await
    }

    async fn set_last_badge(&self, user_id: Uuid, badge: u32) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE documents SET doc = jsonb_set(doc, '{last_badge_achieved}', to_jsonb($3::bigint))
             WHERE collection = $1 AND id = $2",
        )
        .bind(TargetCollection::Users.name())
        .bind(user_id)
        .bind(badge as i64)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl PrisonerStore for DbAdapter {
    async fn get(&self, prisoner_id: Uuid) -> CoreResult<Option<Prisoner>> {
        self.fetch_one(PRISONERS, prisoner_id).await
    }
}

/// Assignment edges live as one document per instructor, keyed by the
/// instructor's id: `{"instructor_id": ..., "user_ids": [...]}`. The deletion
/// engine sees the same documents through the raw `DocumentStore` view.
#[derive(serde::Serialize, serde::Deserialize)]
struct AssignmentDoc {
    instructor_id: Uuid,
    user_ids: Vec<Uuid>,
}

#[async_trait]
impl AssignmentStore for DbAdapter {
    async fn assigned_user_ids(&self, instructor_id: Uuid) -> CoreResult<Vec<Uuid>> {
        let doc: Option<AssignmentDoc> = self
            .fetch_one(TargetCollection::UserAssignments.name(), instructor_id)
            .await?;
        Ok(doc.map(|d| d.user_ids).unwrap_or_default())
    }

    async fn add_user(&self, instructor_id: Uuid, user_id: Uuid) -> CoreResult<()> {
        let mut doc: AssignmentDoc = self
            .fetch_one(TargetCollection::UserAssignments.name(), instructor_id)
            .await?
            .unwrap_or(AssignmentDoc {
                instructor_id,
                user_ids: Vec::new(),
            });
        if !doc.user_ids.contains(&user_id) {
            doc.user_ids.push(user_id);
            self.upsert(TargetCollection::UserAssignments.name(), instructor_id, &doc)
                .await?;
        }
        Ok(())
    }

    async fn is_assigned(&self, instructor_id: Uuid, user_id: Uuid) -> CoreResult<bool> {
        Ok(self
            .assigned_user_ids(instructor_id)
            .await?
            .contains(&user_id))
    }
}

#[async_trait]
impl ActivityStore for DbAdapter {
    async fn attended_activity_count(&self, user_id: Uuid) -> CoreResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents WHERE collection = $1
             AND doc->'attended' @> jsonb_build_array(jsonb_build_object('user_id', $2::text))",
        )
        .bind(TargetCollection::MentorshipActivities.name())
        .bind(user_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;
        Ok(count as u64)
    }
}

//=========================================================================================
// Deletion engine stores
//=========================================================================================

#[async_trait]
impl DocumentStore for DbAdapter {
    async fn find_referencing(
        &self,
        collection: TargetCollection,
        user_id: Uuid,
    ) -> CoreResult<Vec<RawDocument>> {
        // Coarse text filter in SQL, exact check in Rust, so the reference
        // semantics stay identical to the in-memory store.
        let rows: Vec<(Uuid, Value)> = sqlx::query_as(
            "SELECT id, doc FROM documents WHERE collection = $1 AND doc::text LIKE '%' || $2 || '%'",
        )
        .bind(collection.name())
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        Ok(rows
            .into_iter()
            .filter(|(_, body)| docs::references_user(body, user_id))
            .map(|(id, body)| RawDocument { id, body })
            .collect())
    }

    async fn delete_owned_by(
        &self,
        collection: TargetCollection,
        user_id: Uuid,
    ) -> CoreResult<u64> {
        let Some(field) = docs::owner_field(collection) else {
            return Ok(0);
        };
        let result = sqlx::query(
            "DELETE FROM documents WHERE collection = $1 AND doc->>$2 = $3",
        )
        .bind(collection.name())
        .bind(field)
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(result.rows_affected())
    }

    async fn pull_user_references(
        &self,
        collection: TargetCollection,
        user_id: Uuid,
    ) -> CoreResult<u64> {
        let mut documents = self.find_referencing(collection, user_id).await?;
        let mut changed = 0;
        for document in documents.iter_mut() {
            if docs::pull_user(&mut document.body, user_id) {
                sqlx::query("UPDATE documents SET doc = $3 WHERE collection = $1 AND id = $2")
                    .bind(collection.name())
                    .bind(document.id)
                    .bind(&document.body)
                    .execute(&self.pool)
                    .await
                    .map_err(storage)?;
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
        for document in documents {
            self.replace_document(collection, document).await?;
        }
        Ok(())
    }

    async fn replace_document(
        &self,
        collection: TargetCollection,
        document: &RawDocument,
    ) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO documents (collection, id, doc) VALUES ($1, $2, $3)
             ON CONFLICT (collection, id) DO UPDATE SET doc = EXCLUDED.doc",
        )
        .bind(collection.name())
        .bind(document.id)
        .bind(&document.body)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for DbAdapter {
    async fn save(&self, snapshot: &DeletionSnapshot) -> CoreResult<()> {
        let body = serde_json::to_value(snapshot).map_err(corrupt)?;
        sqlx::query(
            "INSERT INTO deletion_snapshots (operation_id, collection, snapshot, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(snapshot.operation_id)
        .bind(snapshot.collection.name())
        .bind(body)
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn list_for_operation(&self, operation_id: Uuid) -> CoreResult<Vec<DeletionSnapshot>> {
        let rows: Vec<Value> = sqlx::query_scalar(
            "SELECT snapshot FROM deletion_snapshots WHERE operation_id = $1",
        )
        .bind(operation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.into_iter()
            .map(|d| serde_json::from_value(d).map_err(corrupt))
            .collect()
    }

    async fn purge_operation(&self, operation_id: Uuid) -> CoreResult<()> {
        sqlx::query("DELETE FROM deletion_snapshots WHERE operation_id = $1")
            .bind(operation_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }
}

#[async_trait]
impl DeletionLogStore for DbAdapter {
    async fn append(&self, log: &UserDeletionLog) -> CoreResult<()> {
        let body = serde_json::to_value(log).map_err(corrupt)?;
        sqlx::query(
            "INSERT INTO user_deletion_logs (id, log, deleted_at) VALUES ($1, $2, $3)",
        )
        .bind(log.id)
        .bind(body)
        .bind(log.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn list(&self, offset: u64, limit: u64) -> CoreResult<Vec<UserDeletionLog>> {
        let rows: Vec<Value> = sqlx::query_scalar(
            "SELECT log FROM user_deletion_logs ORDER BY deleted_at DESC OFFSET $1 LIMIT $2",
        )
        .bind(offset as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.into_iter()
            .map(|d| serde_json::from_value(d).map_err(corrupt))
            .collect()
    }
}
