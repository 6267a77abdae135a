//! crates/rehab_core/src/badges.rs
//!
//! The registration & badge accumulator. Derives a monotonically-increasing
//! badge count from the union of Present session marks across every class
//! plus mentorship-activity participation, and decides class-completion
//! certificate eligibility.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{AttendanceStatus, Class, Registration};
use crate::ports::{
    ActivityStore, CoreResult, EmailDispatcher, LedgerStore, NotificationDispatcher, UserStore,
};

/// Sessions + activities needed per badge.
const ATTENDANCES_PER_BADGE: u64 = 10;

pub struct BadgeService {
    ledgers: Arc<dyn LedgerStore>,
    users: Arc<dyn UserStore>,
    activities: Arc<dyn ActivityStore>,
    notifier: Arc<dyn NotificationDispatcher>,
    mailer: Arc<dyn EmailDispatcher>,
}

impl BadgeService {
    pub fn new(
        ledgers: Arc<dyn LedgerStore>,
        users: Arc<dyn UserStore>,
        activities: Arc<dyn ActivityStore>,
        notifier: Arc<dyn NotificationDispatcher>,
        mailer: Arc<dyn EmailDispatcher>,
    ) -> Self {
        Self {
            ledgers,
            users,
            activities,
            notifier,
            mailer,
        }
    }

    /// Present session marks across every class the user is registered in,
    /// plus attended mentorship activities.
    pub async fn total_attended(&self, user_id: Uuid) -> CoreResult<u64> {
        let ledgers = self.ledgers.find_with_user(user_id).await?;
        let attended_sessions: u64 = ledgers
            .iter()
            .filter_map(|l| l.registration_for(user_id))
            .map(|r| {
                r.session_attendance
                    .iter()
                    .filter(|a| a.status == AttendanceStatus::Present)
                    .count() as u64
            })
            .sum();
        let attended_activities = self.activities.attended_activity_count(user_id).await?;
        Ok(attended_sessions + attended_activities)
    }

    /// Recomputes the user's badge count and, when it strictly exceeds the
    /// stored `last_badge_achieved`, persists the new value and fires one
    /// badge-unlocked notification and one email.
    ///
    /// The strictly-greater check makes retries idempotent: recomputing with
    /// no change in underlying attendance never re-notifies, and a badge
    /// number is announced at most once ever.
    pub async fn recompute(&self, user_id: Uuid) -> CoreResult<()> {
        let Some(user) = self.users.get(user_id).await? else {
            // The user can disappear between the attendance write and this
            // recomputation; nothing to do.
            return Ok(());
        };

        let total = self.total_attended(user_id).await?;
        let badges = (total / ATTENDANCES_PER_BADGE) as u32;
        if badges <= user.last_badge_achieved {
            return Ok(());
        }

        self.users.set_last_badge(user_id, badges).await?;
        info!(%user_id, badges, total, "badge unlocked");

        // Dispatch is fire-and-forget: delivery failure never fails the
        // attendance operation that triggered the recompute.
        if let Err(err) = self.notifier.badge_unlocked(&user, badges, total).await {
            warn!(%user_id, %err, "badge notification failed");
        }
        if let Some(email) = user.email.as_deref() {
            let subject = format!("New Achievement: Badge #{badges} Unlocked!");
            let body = badge_email_body(&user.name, badges, total);
            if let Err(err) = self.mailer.send(email, &subject, &body).await {
                warn!(%user_id, %err, "badge email failed");
            }
        }
        Ok(())
    }

    /// A user is certificate-eligible for a class iff every session
    /// *currently* embedded in the class has a Present mark. Regenerating
    /// the schedule therefore revokes eligibility until attendance catches
    /// up with the new session set.
    pub fn certificate_eligible(class: &Class, registration: &Registration) -> bool {
        !class.sessions.is_empty()
            && class.sessions.iter().all(|session| {
                registration
                    .attendance_for(session.id)
                    .map(|a| a.status == AttendanceStatus::Present)
                    .unwrap_or(false)
            })
    }

    /// Periodic certificate-eligibility pass over every ledger.
    ///
    /// Sends at most one certificate email per user per class across
    /// repeated runs: the `certificate_email_sent` flag is checked and set
    /// in the same pass. Returns the number of emails sent.
    pub async fn run_certificate_scan(
        &self,
        classes: &dyn crate::ports::ClassStore,
    ) -> CoreResult<u64> {
        let mut sent = 0;
        for mut ledger in self.ledgers.all().await? {
            let Some(class) = classes.get(ledger.class_id).await? else {
                continue;
            };
            let mut dirty = false;
            for registration in ledger.registrations.iter_mut() {
                if registration.certificate_email_sent
                    || !Self::certificate_eligible(&class, registration)
                {
                    continue;
                }
                let Some(user) = self.users.get(registration.user_id).await? else {
                    continue;
                };
                let Some(email) = user.email.as_deref() else {
                    continue;
                };

                let subject = format!("Certificate Eligibility Achieved for \"{}\"", class.title);
                let body = certificate_email_body(&user.name, &class);
                if let Err(err) = self.mailer.send(email, &subject, &body).await {
                    warn!(user_id = %user.id, %err, "certificate email failed");
                    continue;
                }
                registration.certificate_email_sent = true;
                dirty = true;
                sent += 1;
            }
            if dirty {
                self.ledgers.save(&ledger).await?;
            }
        }
        Ok(sent)
    }
}

fn badge_email_body(name: &str, badge: u32, total: u64) -> String {
    format!(
        "<div><h2>Hello {name},</h2>\
         <p>Congratulations! You've unlocked <strong>Badge #{badge}</strong>.</p>\
         <p>This means you've successfully attended <strong>{total}</strong> \
         combined sessions and activities.</p>\
         <p>Keep pushing forward, more badges await you.</p></div>"
    )
}

fn certificate_email_body(name: &str, class: &Class) -> String {
    format!(
        "<div><h2>Hello {name},</h2>\
         <p>Congratulations! You are eligible for an Appreciation Certificate \
         for successfully attending all sessions of the class \
         <strong>\"{}\"</strong>.</p>\
         <p>Class duration: {} to {}</p>\
         <p>Please log in to your dashboard to download your certificate.</p></div>",
        class.title, class.start_date, class.end_date
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::*;
    use crate::memory::*;
    use crate::ports::ClassStore;
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

    fn make_class(sessions: usize) -> Class {
        let start_date = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let sessions: Vec<ClassSession> = (0..sessions)
            .map(|i| ClassSession {
                id: Uuid::new_v4(),
                date: start_date + chrono::Duration::days(i as i64),
                start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
                status: RecordStatus::Active,
            })
            .collect();
        Class {
            id: Uuid::new_v4(),
            title: "Boxing Basics".to_string(),
            theme: "discipline".to_string(),
            tags: vec![],
            start_date,
            end_date: start_date + chrono::Duration::days(sessions.len() as i64),
            cadence: Cadence::Daily,
            start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            location_id: Uuid::new_v4(),
            instructor_id: Uuid::new_v4(),
            kind: ClassKind::Regular,
            status: RecordStatus::Active,
            sessions,
        }
    }

    fn registration_with_marks(user_id: Uuid, class: &Class, present: usize) -> Registration {
        Registration {
            user_id,
            session_attendance: class
                .sessions
                .iter()
                .enumerate()
                .map(|(i, s)| SessionAttendance {
                    session_id: s.id,
                    status: if i < present {
                        AttendanceStatus::Present
                    } else {
                        AttendanceStatus::Absent
                    },
                    marked_at: None,
                })
                .collect(),
            certificate_email_sent: false,
        }
    }

    struct Fixture {
        ledgers: Arc<InMemoryLedgerStore>,
        users: Arc<InMemoryUserStore>,
        activities: Arc<InMemoryActivityStore>,
        notifier: Arc<RecordingNotifier>,
        mailer: Arc<RecordingMailer>,
        service: BadgeService,
    }

    fn fixture() -> Fixture {
        let ledgers = Arc::new(InMemoryLedgerStore::new());
        let users = Arc::new(InMemoryUserStore::new());
        let activities = Arc::new(InMemoryActivityStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let mailer = Arc::new(RecordingMailer::new());
        let service = BadgeService::new(
            ledgers.clone(),
            users.clone(),
            activities.clone(),
            notifier.clone(),
            mailer.clone(),
        );
        Fixture {
            ledgers,
            users,
            activities,
            notifier,
            mailer,
            service,
        }
    }

    fn user(last_badge: u32) -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            name: "Asha".to_string(),
            email: Some("asha@example.org".to_string()),
            location_id: None,
            last_badge_achieved: last_badge,
            notifications_enabled: true,
        }
    }

    #[tokio::test]
    async fn totals_combine_sessions_and_activities() {
        let f = fixture();
        let u = user(0);
        f.users.insert(u.clone());

        let class = make_class(8);
        let mut ledger =
            RegistrationLedger::new(class.id, Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
        ledger
            .registrations
            .push(registration_with_marks(u.id, &class, 7));
        f.ledgers.save(&ledger).await.unwrap();
        f.activities.set_count(u.id, 4);

        assert_eq!(f.service.total_attended(u.id).await.unwrap(), 11);
    }

    #[tokio::test]
    async fn badge_notifies_exactly_once_per_number() {
        let f = fixture();
        let u = user(0);
        f.users.insert(u.clone());
        f.activities.set_count(u.id, 10);

        f.service.recompute(u.id).await.unwrap();
        // Retry with unchanged attendance: no second notification.
        f.service.recompute(u.id).await.unwrap();

        let events = f.notifier.badge_events.read().unwrap().clone();
        assert_eq!(events, vec![(u.id, 1)]);
        assert_eq!(f.mailer.sent.read().unwrap().len(), 1);
        assert_eq!(
            f.users.get(u.id).await.unwrap().unwrap().last_badge_achieved,
            1
        );
    }

    #[tokio::test]
    async fn badges_are_monotonic() {
        let f = fixture();
        let u = user(0);
        f.users.insert(u.clone());

        f.activities.set_count(u.id, 10);
        f.service.recompute(u.id).await.unwrap();
        f.activities.set_count(u.id, 31);
        f.service.recompute(u.id).await.unwrap();

        let events = f.notifier.badge_events.read().unwrap().clone();
        assert_eq!(events, vec![(u.id, 1), (u.id, 3)]);
    }

    #[tokio::test]
    async fn certificate_requires_full_attendance_of_current_sessions() {
        let user_id = Uuid::new_v4();
        let mut class = make_class(2);
        let registration = registration_with_marks(user_id, &class, 2);
        assert!(BadgeService::certificate_eligible(&class, &registration));

        // A schedule edit that regenerates sessions revokes eligibility.
        class.sessions.push(ClassSession {
            id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2025, 3, 20).unwrap(),
            start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            status: RecordStatus::Active,
        });
        assert!(!BadgeService::certificate_eligible(&class, &registration));
    }

    #[tokio::test]
    async fn certificate_scan_sends_at_most_once_per_user_per_class() {
        let f = fixture();
        let u = user(0);
        f.users.insert(u.clone());

        let class = make_class(2);
        let classes = InMemoryClassStore::new();
        classes.insert(&class).await.unwrap();

        let mut ledger =
            RegistrationLedger::new(class.id, Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
        ledger
            .registrations
            .push(registration_with_marks(u.id, &class, 2));
        f.ledgers.save(&ledger).await.unwrap();

        assert_eq!(f.service.run_certificate_scan(&classes).await.unwrap(), 1);
        // Second scan: flag already persisted, nothing sent.
        assert_eq!(f.service.run_certificate_scan(&classes).await.unwrap(), 0);
        assert_eq!(f.mailer.sent.read().unwrap().len(), 1);
    }
}
