//! crates/rehab_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format
//! beyond the serde derives needed to store them as whole documents.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Time-derived state of a single session, or of a whole class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Upcoming,
    Live,
    Ended,
}

/// Attendance state of one subject for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
}

/// Lifecycle gate shared by classes, sessions and prisoners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    Active,
    Blocked,
}

/// Cadence of session generation between a class's start and end dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassKind {
    #[serde(rename = "Regular Class")]
    Regular,
    Workshop,
    #[serde(rename = "Special Event")]
    SpecialEvent,
}

/// One scheduled occurrence of a class: a calendar day plus a local
/// time-of-day window in the fixed program timezone.
///
/// Invariant: `start_time < end_time` within the same day. Sessions belong
/// to exactly one class and are regenerated wholesale (with fresh ids) when
/// a schedule-affecting field of the class changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassSession {
    pub id: Uuid,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub status: RecordStatus,
}

/// A recurring class owned by a single instructor at a single location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Class {
    pub id: Uuid,
    pub title: String,
    pub theme: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub cadence: Cadence,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub location_id: Uuid,
    pub instructor_id: Uuid,
    pub kind: ClassKind,
    pub status: RecordStatus,
    pub sessions: Vec<ClassSession>,
}

/// The subject of one roster line: either a platform user or an external
/// prisoner record. Exactly one of the two, enforced by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttendanceSubject {
    User(Uuid),
    Prisoner(Uuid),
}

impl AttendanceSubject {
    pub fn id(&self) -> Uuid {
        match *self {
            AttendanceSubject::User(id) | AttendanceSubject::Prisoner(id) => id,
        }
    }
}

/// One line of instructor-taken roster attendance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    pub subject: AttendanceSubject,
    pub status: AttendanceStatus,
}

/// Roster attendance taken by one instructor for one session. At most one
/// entry exists per (instructor, session) pair, and its `roster` holds at
/// most one line per subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructorAttendance {
    pub instructor_id: Uuid,
    pub session_id: Uuid,
    pub roster: Vec<RosterEntry>,
    pub taken_at: DateTime<Utc>,
}

/// A user's own attendance record for one session.
///
/// `marked_at` is set when the mark is actually made; the Absent
/// placeholders created at registration time carry `None` and
/// reconciliation falls back to the ledger's creation time for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAttendance {
    pub session_id: Uuid,
    pub status: AttendanceStatus,
    #[serde(default)]
    pub marked_at: Option<DateTime<Utc>>,
}

/// One user's registration in a class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub user_id: Uuid,
    pub session_attendance: Vec<SessionAttendance>,
    #[serde(default)]
    pub certificate_email_sent: bool,
}

impl Registration {
    pub fn attendance_for(&self, session_id: Uuid) -> Option<&SessionAttendance> {
        self.session_attendance
            .iter()
            .find(|a| a.session_id == session_id)
    }
}

/// The per-class attendance ledger: the sole authority on who attended
/// what. The class document itself never stores attendance.
///
/// Session ids referenced here must correspond to sessions currently
/// embedded in the owning class; after a schedule edit regenerates the
/// session list the references go stale until `reconcile` repairs them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationLedger {
    pub class_id: Uuid,
    pub registrations: Vec<Registration>,
    pub instructor_attendances: Vec<InstructorAttendance>,
    pub created_at: DateTime<Utc>,
}

impl RegistrationLedger {
    pub fn new(class_id: Uuid, created_at: DateTime<Utc>) -> Self {
        Self {
            class_id,
            registrations: Vec::new(),
            instructor_attendances: Vec::new(),
            created_at,
        }
    }

    pub fn registration_for(&self, user_id: Uuid) -> Option<&Registration> {
        self.registrations.iter().find(|r| r.user_id == user_id)
    }

    pub fn registration_for_mut(&mut self, user_id: Uuid) -> Option<&mut Registration> {
        self.registrations.iter_mut().find(|r| r.user_id == user_id)
    }
}

/// An attendee without a platform account, tracked by an external code and
/// tied to one instructor and one location. Only `Active` prisoners are
/// eligible for roster attendance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prisoner {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub instructor_id: Uuid,
    pub location_id: Uuid,
    pub status: RecordStatus,
}

/// The slice of the identity provider's user record the core consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub location_id: Option<Uuid>,
    #[serde(default)]
    pub last_badge_achieved: u32,
    #[serde(default)]
    pub notifications_enabled: bool,
}

//=========================================================================================
// Deletion engine records
//=========================================================================================

/// Every collection the cascading deletion engine may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetCollection {
    Users,
    SupportTickets,
    SupportMessages,
    Journals,
    Feedback,
    Notifications,
    MentorshipActivities,
    UserAssignments,
    InstructorAssignments,
    RegistrationLedgers,
    QuestionnaireResponses,
}

impl TargetCollection {
    /// Stable storage name, used as the collection key in the document store
    /// and in audit rows.
    pub fn name(&self) -> &'static str {
        match self {
            TargetCollection::Users => "users",
            TargetCollection::SupportTickets => "support_tickets",
            TargetCollection::SupportMessages => "support_messages",
            TargetCollection::Journals => "journals",
            TargetCollection::Feedback => "feedback",
            TargetCollection::Notifications => "notifications",
            TargetCollection::MentorshipActivities => "mentorship_activities",
            TargetCollection::UserAssignments => "user_assignments",
            TargetCollection::InstructorAssignments => "instructor_assignments",
            TargetCollection::RegistrationLedgers => "registration_ledgers",
            TargetCollection::QuestionnaireResponses => "questionnaire_responses",
        }
    }
}

/// How a snapshot is put back during rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestoreMode {
    /// The documents were hard-deleted; rollback bulk-reinserts them.
    Insert,
    /// The documents were partially mutated in place; rollback upserts the
    /// captured copies by id.
    Replace,
}

/// An opaque full-document capture, enough to reconstruct the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    pub id: Uuid,
    pub body: serde_json::Value,
}

/// Ephemeral per-operation capture of one collection's affected documents.
/// Expires on a TTL in the persistent store; consumed only by rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionSnapshot {
    pub operation_id: Uuid,
    pub collection: TargetCollection,
    pub restore_mode: RestoreMode,
    pub documents: Vec<RawDocument>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationAction {
    Delete,
    Update,
}

/// One audit row describing what the deletion engine did to a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffectedCollection {
    pub collection: TargetCollection,
    pub action: MutationAction,
    pub filter: String,
    pub affected_count: u64,
}

/// Permanent audit record of one completed user deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDeletionLog {
    pub id: Uuid,
    pub deleted_user_id: Uuid,
    pub user_name: String,
    pub user_email: Option<String>,
    pub user_role: String,
    pub deleted_by: String,
    pub reason: String,
    pub affected: Vec<AffectedCollection>,
    pub deleted_at: DateTime<Utc>,
}

//=========================================================================================
// Serde helper: session times travel as "HH:MM" strings on the wire
//=========================================================================================

pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(de)?;
        // Accept "HH:MM:SS" too, for documents written by older tooling.
        NaiveTime::parse_from_str(&s, FORMAT)
            .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    #[test]
    fn session_times_round_trip_as_hhmm() {
        let session = ClassSession {
            id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(11, 30, 0).unwrap(),
            status: RecordStatus::Active,
        };
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["start_time"], "10:00");
        assert_eq!(json["end_time"], "11:30");

        let back: ClassSession = serde_json::from_value(json).unwrap();
        assert_eq!(back.start_time, session.start_time);
    }

    #[test]
    fn roster_subject_is_tagged_never_two_nullable_fields() {
        let entry = RosterEntry {
            subject: AttendanceSubject::Prisoner(Uuid::new_v4()),
            status: AttendanceStatus::Present,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json["subject"].get("prisoner").is_some());
        assert!(json["subject"].get("user").is_none());
    }
}
