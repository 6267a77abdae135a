//! services/api/src/jobs.rs
//!
//! Background jobs: the hourly session-reminder scan, snapshot cleanup, and
//! the twice-daily certificate-eligibility pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tracing::{info, warn};

use crate::adapters::db::DbAdapter;
use rehab_core::badges::BadgeService;
use rehab_core::domain::RecordStatus;
use rehab_core::ports::{
    ClassStore, Clock, CoreResult, LedgerStore, NotificationDispatcher, UserStore,
};
use rehab_core::schedule;

const REMINDER_TICK: Duration = Duration::from_secs(60 * 60);
const CERTIFICATE_TICK: Duration = Duration::from_secs(12 * 60 * 60);

/// One reminder pass over every active class.
///
/// Each upcoming session gets two reminders: one the day before and one
/// within the hour of its start. The scan runs hourly and each lead maps to
/// a one-hour-wide window, so a session falls into each window during
/// exactly one tick and no sent-flag is needed. Returns the number of
/// reminders dispatched.
pub async fn run_reminder_scan(
    classes: &dyn ClassStore,
    ledgers: &dyn LedgerStore,
    users: &dyn UserStore,
    notifier: &dyn NotificationDispatcher,
    clock: &dyn Clock,
) -> CoreResult<u64> {
    let now = clock.now();
    let mut sent = 0;
    for class in classes.list_active().await? {
        let Some(ledger) = ledgers.find_by_class(class.id).await? else {
            continue;
        };
        for session in &class.sessions {
            if session.status == RecordStatus::Blocked {
                continue;
            }
            let (start, _) = schedule::session_bounds(session);
            let lead = start - now;
            let message = if lead > ChronoDuration::hours(23) && lead <= ChronoDuration::hours(24)
            {
                format!("\"{}\" has a session tomorrow.", class.title)
            } else if lead > ChronoDuration::zero() && lead <= ChronoDuration::hours(1) {
                format!("\"{}\" starts within the hour.", class.title)
            } else {
                continue;
            };
            for registration in &ledger.registrations {
                let Some(user) = users.get(registration.user_id).await? else {
                    continue;
                };
                if let Err(err) = notifier
                    .session_reminder(&user, &class, session.id, &message)
                    .await
                {
                    warn!(user_id = %user.id, %err, "session reminder failed");
                    continue;
                }
                sent += 1;
            }
        }
    }
    Ok(sent)
}

/// Spawns the periodic background loops. Each loop logs and keeps running on
/// failure; a broken pass must not kill the scheduler.
pub fn spawn_periodic_jobs(
    db: Arc<DbAdapter>,
    classes: Arc<dyn ClassStore>,
    ledgers: Arc<dyn LedgerStore>,
    users: Arc<dyn UserStore>,
    notifier: Arc<dyn NotificationDispatcher>,
    badges: Arc<BadgeService>,
    clock: Arc<dyn Clock>,
) {
    {
        let db = db.clone();
        let classes = classes.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(REMINDER_TICK);
            loop {
                tick.tick().await;
                match run_reminder_scan(
                    classes.as_ref(),
                    ledgers.as_ref(),
                    users.as_ref(),
                    notifier.as_ref(),
                    clock.as_ref(),
                )
                .await
                {
                    Ok(sent) if sent > 0 => info!(sent, "session reminders dispatched"),
                    Ok(_) => {}
                    Err(err) => warn!(%err, "reminder scan failed"),
                }
                if let Err(err) = db.purge_expired_snapshots().await {
                    warn!(%err, "snapshot cleanup failed");
                }
            }
        });
    }

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(CERTIFICATE_TICK);
        loop {
            tick.tick().await;
            match badges.run_certificate_scan(classes.as_ref()).await {
                Ok(sent) if sent > 0 => info!(sent, "certificate emails sent"),
                Ok(_) => {}
                Err(err) => warn!(%err, "certificate scan failed"),
            }
        }
    });
}
