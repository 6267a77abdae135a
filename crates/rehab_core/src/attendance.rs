//! crates/rehab_core/src/attendance.rs
//!
//! The attendance ledger: registration, the two recording paths (per-user
//! self attendance and instructor-taken roster attendance), and the
//! session-id reconciliation repair.
//!
//! Every operation is single-document read-modify-write on the class's
//! ledger; see `LedgerStore` for the accepted concurrency model.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::badges::BadgeService;
use crate::domain::{
    AttendanceStatus, AttendanceSubject, InstructorAttendance, RecordStatus, Registration,
    RegistrationLedger, RosterEntry, SessionAttendance, SessionStatus,
};
use crate::ports::{
    AssignmentStore, ClassStore, Clock, Conflict, CoreError, CoreResult, LedgerStore,
    PrisonerStore, UserStore,
};
use crate::schedule::{self, PROGRAM_TZ};

/// One submitted roster line: a bare id (user or prisoner, the service
/// resolves which) plus the status to record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RosterMark {
    pub id: Uuid,
    pub status: AttendanceStatus,
}

/// Result of a Live-gated roster submission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RosterOutcome {
    pub session_id: Uuid,
    pub updated: usize,
    pub already_marked: usize,
}

/// Counts of stale session-id references repaired by one reconcile pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub instructor_fixed: usize,
    pub registration_fixed: usize,
}

pub struct AttendanceService {
    classes: Arc<dyn ClassStore>,
    ledgers: Arc<dyn LedgerStore>,
    users: Arc<dyn UserStore>,
    prisoners: Arc<dyn PrisonerStore>,
    assignments: Arc<dyn AssignmentStore>,
    badges: Arc<BadgeService>,
    clock: Arc<dyn Clock>,
}

impl AttendanceService {
    pub fn new(
        classes: Arc<dyn ClassStore>,
        ledgers: Arc<dyn LedgerStore>,
        users: Arc<dyn UserStore>,
        prisoners: Arc<dyn PrisonerStore>,
        assignments: Arc<dyn AssignmentStore>,
        badges: Arc<BadgeService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            classes,
            ledgers,
            users,
            prisoners,
            assignments,
            badges,
            clock,
        }
    }

    /// Registers a user to a class, at most once.
    ///
    /// The user's location must match the class's. On success the
    /// registration carries an Absent placeholder for every existing
    /// session, and the user is unioned into the class instructor's
    /// assignment edge; the edge write is verified by read-back and a
    /// verification failure surfaces as `Integrity` even though the
    /// registration itself already persisted.
    pub async fn register_user(&self, class_id: Uuid, user_id: Uuid) -> CoreResult<()> {
        let class = self
            .classes
            .get(class_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("class {class_id}")))?;
        let user = self
            .users
            .get(user_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("user {user_id}")))?;

        if user.location_id != Some(class.location_id) {
            return Err(Conflict::LocationMismatch.into());
        }

        let now = self.clock.now();
        let mut ledger = self
            .ledgers
            .find_by_class(class_id)
            .await?
            .unwrap_or_else(|| RegistrationLedger::new(class_id, now));

        if ledger.registration_for(user_id).is_some() {
            return Err(Conflict::AlreadyRegistered.into());
        }

        ledger.registrations.push(Registration {
            user_id,
            session_attendance: class
                .sessions
                .iter()
                .map(|s| SessionAttendance {
                    session_id: s.id,
                    status: AttendanceStatus::Absent,
                    marked_at: None,
                })
                .collect(),
            certificate_email_sent: false,
        });
        self.ledgers.save(&ledger).await?;

        self.assignments
            .add_user(class.instructor_id, user_id)
            .await?;
        if !self
            .assignments
            .is_assigned(class.instructor_id, user_id)
            .await?
        {
            return Err(CoreError::Integrity(
                "instructor assignment failed to persist".to_string(),
            ));
        }
        info!(%class_id, %user_id, "user registered");
        Ok(())
    }

    /// Records a user's own Present mark for one session, gated on the
    /// session being Live right now. Triggers badge recomputation as a
    /// fire-and-forget side effect.
    pub async fn mark_self_attendance(
        &self,
        class_id: Uuid,
        session_id: Uuid,
        user_id: Uuid,
    ) -> CoreResult<()> {
        let class = self
            .classes
            .get(class_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("class {class_id}")))?;
        let session = class
            .sessions
            .iter()
            .find(|s| s.id == session_id)
            .ok_or_else(|| CoreError::NotFound(format!("session {session_id}")))?;

        let mut ledger = self
            .ledgers
            .find_by_class(class_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("registration".to_string()))?;
        let registration = ledger
            .registration_for_mut(user_id)
            .ok_or_else(|| CoreError::NotFound(format!("registration for user {user_id}")))?;

        // Double-mark check comes before the live gate, so a user who
        // already marked gets the conflict rather than a stale "not live".
        if registration
            .attendance_for(session_id)
            .map(|a| a.status == AttendanceStatus::Present)
            .unwrap_or(false)
        {
            return Err(Conflict::AlreadyPresent.into());
        }

        let now = self.clock.now();
        if schedule::evaluate_session(session, now) != SessionStatus::Live {
            return Err(Conflict::SessionNotLive.into());
        }

        match registration
            .session_attendance
            .iter_mut()
            .find(|a| a.session_id == session_id)
        {
            Some(record) => {
                record.status = AttendanceStatus::Present;
                record.marked_at = Some(now);
            }
            None => registration.session_attendance.push(SessionAttendance {
                session_id,
                status: AttendanceStatus::Present,
                marked_at: Some(now),
            }),
        }
        self.ledgers.save(&ledger).await?;

        if let Err(err) = self.badges.recompute(user_id).await {
            warn!(%user_id, %err, "badge recompute failed after attendance mark");
        }
        Ok(())
    }

    /// Instructor-taken roster attendance for the class's single currently
    /// live session.
    ///
    /// Each submitted id resolves to either a user assigned to the
    /// instructor or an Active prisoner; anything else is silently skipped.
    /// A submission in which every line already matches stored state is
    /// rejected as a no-op conflict, steering callers to the edit path.
    pub async fn mark_roster_attendance(
        &self,
        class_id: Uuid,
        instructor_id: Uuid,
        marks: &[RosterMark],
    ) -> CoreResult<RosterOutcome> {
        if marks.is_empty() {
            return Err(CoreError::Validation(
                "attendanceList must be a non-empty array".to_string(),
            ));
        }
        let class = self
            .classes
            .get(class_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("class {class_id}")))?;

        let now = self.clock.now();
        let live = schedule::find_live_session(&class.sessions, now)
            .ok_or(Conflict::NoActiveSession)?;
        let session_id = live.id;

        let assigned = self.assignments.assigned_user_ids(instructor_id).await?;
        let mut ledger = self
            .ledgers
            .find_by_class(class_id)
            .await?
            .unwrap_or_else(|| RegistrationLedger::new(class_id, now));

        if !ledger
            .instructor_attendances
            .iter()
            .any(|e| e.instructor_id == instructor_id && e.session_id == session_id)
        {
            ledger.instructor_attendances.push(InstructorAttendance {
                instructor_id,
                session_id,
                roster: Vec::new(),
                taken_at: now,
            });
        }
        // Unwrap is fine immediately after the insert above.
        let entry = ledger
            .instructor_attendances
            .iter_mut()
            .find(|e| e.instructor_id == instructor_id && e.session_id == session_id)
            .ok_or_else(|| CoreError::Integrity("roster entry vanished".to_string()))?;

        let mut updated = 0;
        let mut already_marked = 0;
        for mark in marks {
            let Some(subject) = self.resolve_subject(&assigned, mark.id).await? else {
                continue;
            };
            match entry.roster.iter_mut().find(|r| r.subject == subject) {
                Some(line) if line.status == mark.status => already_marked += 1,
                Some(line) => {
                    line.status = mark.status;
                    updated += 1;
                }
                None => {
                    entry.roster.push(RosterEntry {
                        subject,
                        status: mark.status,
                    });
                    updated += 1;
                }
            }
        }

        if updated == 0 && already_marked > 0 {
            return Err(Conflict::AttendanceUnchanged { already_marked }.into());
        }
        self.ledgers.save(&ledger).await?;

        // Auto-repair after every roster mutation so session-id drift never
        // persists visibly. Best-effort: failure must not undo the mark.
        if let Err(err) = self.reconcile(class_id).await {
            warn!(%class_id, %err, "auto reconcile failed after roster write");
        }

        Ok(RosterOutcome {
            session_id,
            updated,
            already_marked,
        })
    }

    /// Wholesale replacement of one (instructor, session) roster, with the
    /// session given explicitly and no Live gate. Returns the number of
    /// lines retained after id filtering.
    pub async fn edit_roster_attendance(
        &self,
        class_id: Uuid,
        session_id: Uuid,
        instructor_id: Uuid,
        marks: &[RosterMark],
    ) -> CoreResult<usize> {
        if marks.is_empty() {
            return Err(CoreError::Validation(
                "attendanceList must be a non-empty array".to_string(),
            ));
        }
        let class = self
            .classes
            .get(class_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("class {class_id}")))?;
        if !class.sessions.iter().any(|s| s.id == session_id) {
            return Err(CoreError::NotFound(format!("session {session_id}")));
        }

        let now = self.clock.now();
        let assigned = self.assignments.assigned_user_ids(instructor_id).await?;
        let mut ledger = self
            .ledgers
            .find_by_class(class_id)
            .await?
            .unwrap_or_else(|| RegistrationLedger::new(class_id, now));

        ledger
            .instructor_attendances
            .retain(|e| !(e.instructor_id == instructor_id && e.session_id == session_id));

        let mut roster: Vec<RosterEntry> = Vec::new();
        for mark in marks {
            let Some(subject) = self.resolve_subject(&assigned, mark.id).await? else {
                continue;
            };
            match roster.iter_mut().find(|r| r.subject == subject) {
                // Duplicate ids in one payload: last status wins.
                Some(line) => line.status = mark.status,
                None => roster.push(RosterEntry {
                    subject,
                    status: mark.status,
                }),
            }
        }
        let count = roster.len();

        ledger.instructor_attendances.push(InstructorAttendance {
            instructor_id,
            session_id,
            roster,
            taken_at: now,
        });
        self.ledgers.save(&ledger).await?;
        Ok(count)
    }

    async fn resolve_subject(
        &self,
        assigned: &[Uuid],
        id: Uuid,
    ) -> CoreResult<Option<AttendanceSubject>> {
        if assigned.contains(&id) {
            return Ok(Some(AttendanceSubject::User(id)));
        }
        match self.prisoners.get(id).await? {
            Some(p) if p.status == RecordStatus::Active => {
                Ok(Some(AttendanceSubject::Prisoner(id)))
            }
            _ => Ok(None),
        }
    }

    /// Heuristic repair of stale session-id references.
    ///
    /// Editing a class's schedule regenerates its embedded session list
    /// with fresh ids, stranding the ids stored in the ledger. On the
    /// theory that attendance is almost always recorded same-day, each
    /// attendance record is re-pointed at the current session whose
    /// calendar day (in the program timezone) equals the record's creation
    /// day. When a regenerated schedule puts several sessions on one day
    /// the map is lossy and the last session for that day wins; this is a
    /// best-effort repair, not a correctness guarantee.
    pub async fn reconcile(&self, class_id: Uuid) -> CoreResult<ReconcileReport> {
        let class = self
            .classes
            .get(class_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("class {class_id}")))?;
        let mut ledger = self
            .ledgers
            .find_by_class(class_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("registration ledger".to_string()))?;

        let mut session_by_day = std::collections::HashMap::new();
        for session in &class.sessions {
            session_by_day.insert(session.date, session.id);
        }

        let mut report = ReconcileReport::default();
        for entry in ledger.instructor_attendances.iter_mut() {
            let day = entry.taken_at.with_timezone(&PROGRAM_TZ).date_naive();
            if let Some(&correct) = session_by_day.get(&day) {
                if entry.session_id != correct {
                    entry.session_id = correct;
                    report.instructor_fixed += 1;
                }
            }
        }
        let ledger_created = ledger.created_at;
        for registration in ledger.registrations.iter_mut() {
            for record in registration.session_attendance.iter_mut() {
                let created = record.marked_at.unwrap_or(ledger_created);
                let day = created.with_timezone(&PROGRAM_TZ).date_naive();
                if let Some(&correct) = session_by_day.get(&day) {
                    if record.session_id != correct {
                        record.session_id = correct;
                        report.registration_fixed += 1;
                    }
                }
            }
        }

        if report.instructor_fixed > 0 || report.registration_fixed > 0 {
            self.ledgers.save(&ledger).await?;
            info!(
                %class_id,
                instructor_fixed = report.instructor_fixed,
                registration_fixed = report.registration_fixed,
                "reconciled stale session ids"
            );
        }
        Ok(report)
    }

    /// Instructor-taken attendance entries for one session.
    pub async fn session_roster(
        &self,
        class_id: Uuid,
        session_id: Uuid,
    ) -> CoreResult<Vec<InstructorAttendance>> {
        let class = self
            .classes
            .get(class_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("class {class_id}")))?;
        if !class.sessions.iter().any(|s| s.id == session_id) {
            return Err(CoreError::NotFound(format!("session {session_id}")));
        }
        let ledger = self
            .ledgers
            .find_by_class(class_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("registration ledger".to_string()))?;
        Ok(ledger
            .instructor_attendances
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::*;
    use crate::memory::*;
    use crate::schedule::generate_sessions;
    use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

    struct Fixture {
        classes: Arc<InMemoryClassStore>,
        ledgers: Arc<InMemoryLedgerStore>,
        users: Arc<InMemoryUserStore>,
        prisoners: Arc<InMemoryPrisonerStore>,
        assignments: Arc<InMemoryAssignmentStore>,
        notifier: Arc<RecordingNotifier>,
        clock: Arc<FixedClock>,
        service: AttendanceService,
    }

    /// Program-zone wall clock instant.
    fn ist(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        PROGRAM_TZ
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn fixture(now: DateTime<Utc>) -> Fixture {
        let classes = Arc::new(InMemoryClassStore::new());
        let ledgers = Arc::new(InMemoryLedgerStore::new());
        let users = Arc::new(InMemoryUserStore::new());
        let prisoners = Arc::new(InMemoryPrisonerStore::new());
        let assignments = Arc::new(InMemoryAssignmentStore::new());
        let activities = Arc::new(InMemoryActivityStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let mailer = Arc::new(RecordingMailer::new());
        let clock = Arc::new(FixedClock::new(now));
        let badges = Arc::new(BadgeService::new(
            ledgers.clone(),
            users.clone(),
            activities.clone(),
            notifier.clone(),
            mailer.clone(),
        ));
        let service = AttendanceService::new(
            classes.clone(),
            ledgers.clone(),
            users.clone(),
            prisoners.clone(),
            assignments.clone(),
            badges,
            clock.clone(),
        );
        Fixture {
            classes,
            ledgers,
            users,
            prisoners,
            assignments,
            notifier,
            clock,
            service,
        }
    }

    /// Two-session fixture: S1 Mon 2025-03-10, S2 Wed 2025-03-12,
    /// both 10:00-11:00 IST.
    fn monday_wednesday_class(location_id: Uuid, instructor_id: Uuid) -> Class {
        let s1 = ClassSession {
            id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            status: RecordStatus::Active,
        };
        let s2 = ClassSession {
            id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2025, 3, 12).unwrap(),
            ..s1.clone()
        };
        Class {
            id: Uuid::new_v4(),
            title: "Back In The Ring".to_string(),
            theme: "resilience".to_string(),
            tags: vec![],
            start_date: s1.date,
            end_date: s2.date,
            cadence: Cadence::Daily,
            start_time: s1.start_time,
            end_time: s1.end_time,
            location_id,
            instructor_id,
            kind: ClassKind::Regular,
            status: RecordStatus::Active,
            sessions: vec![s1, s2],
        }
    }

    fn make_user(location_id: Option<Uuid>) -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            name: "Ravi".to_string(),
            email: Some("ravi@example.org".to_string()),
            location_id,
            last_badge_achieved: 0,
            notifications_enabled: true,
        }
    }

    #[tokio::test]
    async fn registration_is_at_most_once_with_one_assignment_edge() {
        let location = Uuid::new_v4();
        let instructor = Uuid::new_v4();
        let f = fixture(ist(2025, 3, 9, 12, 0));
        let class = monday_wednesday_class(location, instructor);
        f.classes.insert(&class).await.unwrap();
        let user = make_user(Some(location));
        f.users.insert(user.clone());

        f.service.register_user(class.id, user.id).await.unwrap();
        let err = f.service.register_user(class.id, user.id).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Conflict(Conflict::AlreadyRegistered)
        ));

        // Exactly one Absent placeholder per session.
        let ledger = f.ledgers.find_by_class(class.id).await.unwrap().unwrap();
        let reg = ledger.registration_for(user.id).unwrap();
        assert_eq!(reg.session_attendance.len(), 2);
        assert!(reg
            .session_attendance
            .iter()
            .all(|a| a.status == AttendanceStatus::Absent && a.marked_at.is_none()));

        // Edge created exactly once, set semantics.
        assert_eq!(
            f.assignments.assigned_user_ids(instructor).await.unwrap(),
            vec![user.id]
        );
    }

    #[tokio::test]
    async fn registration_rejects_location_mismatch() {
        let f = fixture(ist(2025, 3, 9, 12, 0));
        let class = monday_wednesday_class(Uuid::new_v4(), Uuid::new_v4());
        f.classes.insert(&class).await.unwrap();
        let user = make_user(Some(Uuid::new_v4()));
        f.users.insert(user.clone());

        let err = f.service.register_user(class.id, user.id).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Conflict(Conflict::LocationMismatch)
        ));
        assert!(f.ledgers.find_by_class(class.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn self_attendance_follows_the_live_window() {
        let location = Uuid::new_v4();
        let f = fixture(ist(2025, 3, 9, 12, 0));
        let class = monday_wednesday_class(location, Uuid::new_v4());
        f.classes.insert(&class).await.unwrap();
        let user = make_user(Some(location));
        f.users.insert(user.clone());
        f.service.register_user(class.id, user.id).await.unwrap();
        let s1 = class.sessions[0].id;

        // Monday 09:00: not live yet.
        f.clock.set(ist(2025, 3, 10, 9, 0));
        let err = f
            .service
            .mark_self_attendance(class.id, s1, user.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(Conflict::SessionNotLive)));

        // Monday 10:30: live, mark succeeds.
        f.clock.set(ist(2025, 3, 10, 10, 30));
        f.service
            .mark_self_attendance(class.id, s1, user.id)
            .await
            .unwrap();

        // Double-mark is a conflict even inside the live window.
        let err = f
            .service
            .mark_self_attendance(class.id, s1, user.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(Conflict::AlreadyPresent)));

        let ledger = f.ledgers.find_by_class(class.id).await.unwrap().unwrap();
        let record = ledger
            .registration_for(user.id)
            .unwrap()
            .attendance_for(s1)
            .unwrap();
        assert_eq!(record.status, AttendanceStatus::Present);
        assert!(record.marked_at.is_some());
    }

    #[tokio::test]
    async fn full_attendance_then_schedule_edit_revokes_certificate() {
        let location = Uuid::new_v4();
        let f = fixture(ist(2025, 3, 9, 12, 0));
        let mut class = monday_wednesday_class(location, Uuid::new_v4());
        f.classes.insert(&class).await.unwrap();
        let user = make_user(Some(location));
        f.users.insert(user.clone());
        f.service.register_user(class.id, user.id).await.unwrap();

        f.clock.set(ist(2025, 3, 10, 10, 30));
        f.service
            .mark_self_attendance(class.id, class.sessions[0].id, user.id)
            .await
            .unwrap();
        f.clock.set(ist(2025, 3, 12, 10, 30));
        f.service
            .mark_self_attendance(class.id, class.sessions[1].id, user.id)
            .await
            .unwrap();

        let ledger = f.ledgers.find_by_class(class.id).await.unwrap().unwrap();
        let reg = ledger.registration_for(user.id).unwrap();
        assert!(BadgeService::certificate_eligible(&class, reg));

        // Adding S3 via a schedule edit revokes eligibility.
        class.sessions.push(ClassSession {
            id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            start_time: class.start_time,
            end_time: class.end_time,
            status: RecordStatus::Active,
        });
        assert!(!BadgeService::certificate_eligible(&class, reg));
    }

    #[tokio::test]
    async fn roster_marking_covers_users_and_prisoners_and_rejects_pure_resubmits() {
        let location = Uuid::new_v4();
        let instructor = Uuid::new_v4();
        let f = fixture(ist(2025, 3, 10, 10, 15));
        let class = monday_wednesday_class(location, instructor);
        f.classes.insert(&class).await.unwrap();

        let user_a = Uuid::new_v4();
        f.assignments.add_user(instructor, user_a).await.unwrap();
        let prisoner = Prisoner {
            id: Uuid::new_v4(),
            code: "P-1042".to_string(),
            name: "K.".to_string(),
            instructor_id: instructor,
            location_id: location,
            status: RecordStatus::Active,
        };
        f.prisoners.insert(prisoner.clone());

        let marks = vec![
            RosterMark {
                id: user_a,
                status: AttendanceStatus::Present,
            },
            RosterMark {
                id: prisoner.id,
                status: AttendanceStatus::Present,
            },
        ];
        let outcome = f
            .service
            .mark_roster_attendance(class.id, instructor, &marks)
            .await
            .unwrap();
        assert_eq!(outcome.session_id, class.sessions[0].id);
        assert_eq!(outcome.updated, 2);
        assert_eq!(outcome.already_marked, 0);

        // Identical resubmission: no net change, rejected as a conflict.
        let err = f
            .service
            .mark_roster_attendance(class.id, instructor, &marks)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Conflict(Conflict::AttendanceUnchanged { already_marked: 2 })
        ));

        // The explicit-session edit path accepts the same payload.
        let count = f
            .service
            .edit_roster_attendance(class.id, class.sessions[0].id, instructor, &marks)
            .await
            .unwrap();
        assert_eq!(count, 2);

        let roster = f
            .service
            .session_roster(class.id, class.sessions[0].id)
            .await
            .unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].roster.len(), 2);
    }

    #[tokio::test]
    async fn roster_marking_requires_a_live_session_and_skips_unknown_ids() {
        let location = Uuid::new_v4();
        let instructor = Uuid::new_v4();
        let f = fixture(ist(2025, 3, 11, 10, 15));
        let class = monday_wednesday_class(location, instructor);
        f.classes.insert(&class).await.unwrap();

        // Tuesday: neither session is live.
        let marks = vec![RosterMark {
            id: Uuid::new_v4(),
            status: AttendanceStatus::Present,
        }];
        let err = f
            .service
            .mark_roster_attendance(class.id, instructor, &marks)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Conflict(Conflict::NoActiveSession)
        ));

        // Monday live window, but the id is unknown and a prisoner is
        // Blocked: both lines are silently skipped.
        f.clock.set(ist(2025, 3, 10, 10, 15));
        let blocked = Prisoner {
            id: Uuid::new_v4(),
            code: "P-9".to_string(),
            name: "B.".to_string(),
            instructor_id: instructor,
            location_id: location,
            status: RecordStatus::Blocked,
        };
        f.prisoners.insert(blocked.clone());
        let marks = vec![
            RosterMark {
                id: Uuid::new_v4(),
                status: AttendanceStatus::Present,
            },
            RosterMark {
                id: blocked.id,
                status: AttendanceStatus::Present,
            },
        ];
        let outcome = f
            .service
            .mark_roster_attendance(class.id, instructor, &marks)
            .await
            .unwrap();
        assert_eq!(outcome.updated, 0);
        assert_eq!(outcome.already_marked, 0);
        let roster = f
            .service
            .session_roster(class.id, class.sessions[0].id)
            .await
            .unwrap();
        assert!(roster[0].roster.is_empty());
    }

    #[tokio::test]
    async fn reconcile_repairs_drift_by_creation_day_and_is_idempotent() {
        let location = Uuid::new_v4();
        let instructor = Uuid::new_v4();
        let f = fixture(ist(2025, 3, 10, 10, 15));
        let mut class = monday_wednesday_class(location, instructor);
        f.classes.insert(&class).await.unwrap();

        let user = make_user(Some(location));
        f.users.insert(user.clone());
        f.service.register_user(class.id, user.id).await.unwrap();
        f.service
            .mark_self_attendance(class.id, class.sessions[0].id, user.id)
            .await
            .unwrap();
        let marks = vec![RosterMark {
            id: user.id,
            status: AttendanceStatus::Present,
        }];
        f.assignments.add_user(instructor, user.id).await.unwrap();
        f.service
            .mark_roster_attendance(class.id, instructor, &marks)
            .await
            .unwrap();

        // Schedule edit regenerates the sessions: same days, fresh ids.
        class.sessions = generate_sessions(
            class.start_date,
            class.end_date,
            Cadence::Daily,
            class.start_time,
            class.end_time,
        )
        .unwrap();
        f.classes.update(&class).await.unwrap();
        let monday_session = class
            .sessions
            .iter()
            .find(|s| s.date == NaiveDate::from_ymd_opt(2025, 3, 10).unwrap())
            .unwrap()
            .id;

        let report = f.service.reconcile(class.id).await.unwrap();
        assert_eq!(report.instructor_fixed, 1);
        // The Monday mark moves; the untouched Wednesday placeholder keys
        // off the ledger's creation day (Monday) and moves with it.
        assert_eq!(report.registration_fixed, 2);

        let ledger = f.ledgers.find_by_class(class.id).await.unwrap().unwrap();
        assert_eq!(ledger.instructor_attendances[0].session_id, monday_session);
        let reg = ledger.registration_for(user.id).unwrap();
        assert!(reg
            .session_attendance
            .iter()
            .all(|a| a.session_id == monday_session));

        // Second pass with no intervening writes repairs nothing.
        let report = f.service.reconcile(class.id).await.unwrap();
        assert_eq!(report.instructor_fixed, 0);
        assert_eq!(report.registration_fixed, 0);
    }

    #[tokio::test]
    async fn badge_fires_through_the_attendance_path() {
        let location = Uuid::new_v4();
        let f = fixture(ist(2025, 3, 9, 12, 0));
        let class = monday_wednesday_class(location, Uuid::new_v4());
        f.classes.insert(&class).await.unwrap();
        let user = make_user(Some(location));
        f.users.insert(user.clone());
        f.service.register_user(class.id, user.id).await.unwrap();

        // Nine prior attendances elsewhere; the tenth unlocks badge #1.
        let other_class = monday_wednesday_class(location, Uuid::new_v4());
        let mut other = RegistrationLedger::new(other_class.id, ist(2025, 3, 1, 0, 0));
        other.registrations.push(Registration {
            user_id: user.id,
            session_attendance: (0..9)
                .map(|_| SessionAttendance {
                    session_id: Uuid::new_v4(),
                    status: AttendanceStatus::Present,
                    marked_at: None,
                })
                .collect(),
            certificate_email_sent: false,
        });
        f.ledgers.save(&other).await.unwrap();

        f.clock.set(ist(2025, 3, 10, 10, 30));
        f.service
            .mark_self_attendance(class.id, class.sessions[0].id, user.id)
            .await
            .unwrap();

        let events = f.notifier.badge_events.read().unwrap().clone();
        assert_eq!(events, vec![(user.id, 1)]);
    }
}
