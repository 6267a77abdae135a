//! services/api/src/adapters/notify.rs
//!
//! Persisted in-app notifications: each dispatch writes a notification
//! document that the user's dashboard reads later. Documents land in the
//! same `documents` table the deletion engine sweeps, so removing a user
//! also removes everything delivered to them.

use async_trait::async_trait;
use serde_json::json;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use rehab_core::domain::{Class, TargetCollection, UserProfile};
use rehab_core::ports::{CoreError, CoreResult, NotificationDispatcher};

pub struct DbNotifier {
    pool: PgPool,
}

impl DbNotifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn persist(&self, receiver_id: Uuid, kind: &str, title: &str, message: &str) -> CoreResult<()> {
        let body = json!({
            "receiver_id": receiver_id.to_string(),
            "kind": kind,
            "title": title,
            "message": message,
            "read": false,
            "created_at": chrono::Utc::now(),
        });
        sqlx::query(
            "INSERT INTO documents (collection, id, doc) VALUES ($1, $2, $3)",
        )
        .bind(TargetCollection::Notifications.name())
        .bind(Uuid::new_v4())
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl NotificationDispatcher for DbNotifier {
    async fn badge_unlocked(
        &self,
        user: &UserProfile,
        badge: u32,
        total_attended: u64,
    ) -> CoreResult<()> {
        let title = format!("Badge #{badge} Unlocked!");
        let message = format!(
            "You've attended {total_attended} sessions and activities. Keep it up!"
        );
        self.persist(user.id, "badge", &title, &message).await
    }

    async fn session_reminder(
        &self,
        user: &UserProfile,
        class: &Class,
        session_id: Uuid,
        message: &str,
    ) -> CoreResult<()> {
        if !user.notifications_enabled {
            debug!(user_id = %user.id, "reminder skipped, notifications disabled");
            return Ok(());
        }
        let title = format!("Reminder: {}", class.title);
        debug!(user_id = %user.id, %session_id, "session reminder");
        self.persist(user.id, "reminder", &title, message).await
    }
}
