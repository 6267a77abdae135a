//! crates/rehab_core/src/docs.rs
//!
//! Shared raw-document semantics for the deletion engine's `DocumentStore`
//! port. Every adapter (in-memory and SQL) applies the same three rules so
//! that "references", "owned by" and "pull" mean one thing everywhere:
//!
//! - a document *references* a user when the user's id appears anywhere in
//!   its body;
//! - a document is *owned by* a user when its collection's owner field holds
//!   the user's id (owned documents are hard-deleted as a unit);
//! - *pulling* a user removes, bottom-up, every array element that is the
//!   user's id or an object directly keyed to it, leaving parents intact.

use serde_json::Value;
use uuid::Uuid;

use crate::domain::TargetCollection;

/// True when the user's id appears anywhere in the document body.
pub fn references_user(body: &Value, user_id: Uuid) -> bool {
    let needle = user_id.to_string();
    contains_value(body, &needle)
}

fn contains_value(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s == needle,
        Value::Array(items) => items.iter().any(|v| contains_value(v, needle)),
        Value::Object(map) => map.values().any(|v| contains_value(v, needle)),
        _ => false,
    }
}

/// The scalar field that marks a document as fully owned by a user, per
/// collection. Collections without an owner field are never hard-deleted.
pub fn owner_field(collection: TargetCollection) -> Option<&'static str> {
    match collection {
        TargetCollection::Users => Some("id"),
        TargetCollection::SupportTickets => Some("user_id"),
        TargetCollection::SupportMessages => Some("sender_id"),
        TargetCollection::Journals => Some("user_id"),
        TargetCollection::Feedback => Some("user_id"),
        TargetCollection::Notifications => Some("receiver_id"),
        TargetCollection::UserAssignments => Some("instructor_id"),
        TargetCollection::InstructorAssignments => Some("mentor_id"),
        TargetCollection::RegistrationLedgers
        | TargetCollection::MentorshipActivities
        | TargetCollection::QuestionnaireResponses => None,
    }
}

/// True when the document's owner field holds the user's id.
pub fn owned_by_user(collection: TargetCollection, body: &Value, user_id: Uuid) -> bool {
    let Some(field) = owner_field(collection) else {
        return false;
    };
    body.get(field)
        .and_then(Value::as_str)
        .map(|s| s == user_id.to_string())
        .unwrap_or(false)
}

/// Removes every reference to the user from the document body, bottom-up.
///
/// Inner arrays are cleaned first, then an array element is dropped when it
/// is the bare user id or an object still carrying the id in one of its
/// direct fields (a registration row, a roster line, an assignment edge).
/// Returns true when anything changed.
pub fn pull_user(body: &mut Value, user_id: Uuid) -> bool {
    let needle = user_id.to_string();
    pull_value(body, &needle)
}

fn pull_value(value: &mut Value, needle: &str) -> bool {
    match value {
        Value::Array(items) => {
            let mut changed = false;
            for item in items.iter_mut() {
                changed |= pull_value(item, needle);
            }
            let before = items.len();
            items.retain(|item| !element_matches(item, needle));
            changed || items.len() != before
        }
        Value::Object(map) => {
            let mut changed = false;
            for item in map.values_mut() {
                changed |= pull_value(item, needle);
            }
            changed
        }
        _ => false,
    }
}

fn element_matches(item: &Value, needle: &str) -> bool {
    match item {
        Value::String(s) => s == needle,
        Value::Object(map) => map.values().any(|v| direct_value_is(v, needle)),
        _ => false,
    }
}

fn direct_value_is(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s == needle,
        // One level of nesting covers tagged variants like {"user": "<id>"}.
        Value::Object(map) => map.values().any(|v| matches!(v, Value::String(s) if s == needle)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pull_removes_registration_rows_and_bare_ids() {
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut doc = json!({
            "registrations": [
                { "user_id": user.to_string(), "session_attendance": [] },
                { "user_id": other.to_string(), "session_attendance": [] },
            ],
            "recipients": [user.to_string(), other.to_string()],
        });

        assert!(pull_user(&mut doc, user));
        assert_eq!(doc["registrations"].as_array().unwrap().len(), 1);
        assert_eq!(doc["recipients"], json!([other.to_string()]));
        assert!(!references_user(&doc, user));
    }

    #[test]
    fn pull_keeps_parents_whose_inner_arrays_were_cleaned() {
        let user = Uuid::new_v4();
        let instructor = Uuid::new_v4();
        let mut doc = json!({
            "instructors": [
                { "instructor_id": instructor.to_string(), "user_ids": [user.to_string()] }
            ]
        });

        assert!(pull_user(&mut doc, user));
        // The instructor entry survives; only the inner edge is gone.
        assert_eq!(doc["instructors"].as_array().unwrap().len(), 1);
        assert_eq!(doc["instructors"][0]["user_ids"], json!([]));
    }

    #[test]
    fn pull_drops_roster_lines_with_tagged_subjects() {
        let user = Uuid::new_v4();
        let mut doc = json!({
            "instructor_attendances": [{
                "instructor_id": Uuid::new_v4().to_string(),
                "session_id": Uuid::new_v4().to_string(),
                "roster": [
                    { "subject": { "user": user.to_string() }, "status": "Present" },
                    { "subject": { "prisoner": Uuid::new_v4().to_string() }, "status": "Absent" },
                ],
            }]
        });

        assert!(pull_user(&mut doc, user));
        let roster = doc["instructor_attendances"][0]["roster"].as_array().unwrap();
        assert_eq!(roster.len(), 1);
        assert!(!references_user(&doc, user));
    }

    #[test]
    fn owner_predicates_match_only_the_owner_field() {
        let user = Uuid::new_v4();
        let ticket = json!({ "id": Uuid::new_v4().to_string(), "user_id": user.to_string() });
        assert!(owned_by_user(TargetCollection::SupportTickets, &ticket, user));
        assert!(!owned_by_user(TargetCollection::SupportMessages, &ticket, user));
        assert!(owner_field(TargetCollection::RegistrationLedgers).is_none());
    }
}
