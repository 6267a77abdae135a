//! crates/rehab_core/src/schedule.rs
//!
//! The schedule evaluator: pure functions deriving a session's temporal
//! status (Upcoming/Live/Ended) and a class's aggregate status from stored
//! schedules and an injected "now". All math happens in the fixed program
//! timezone, never the caller's local zone.

use chrono::{DateTime, Duration, LocalResult, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

use crate::domain::{Cadence, ClassSession, RecordStatus, SessionStatus};
use crate::ports::{CoreError, CoreResult};

/// The single fixed IANA timezone the program runs in.
pub const PROGRAM_TZ: Tz = chrono_tz::Asia::Kolkata;

/// Combines a calendar date with a local time-of-day into an absolute
/// instant in the program timezone.
fn local_instant(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    match PROGRAM_TZ.from_local_datetime(&date.and_time(time)) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        // A skipped local time (DST gap) cannot occur in the program zone,
        // but stay total: interpret the naive value as if it were UTC-offset
        // by the zone's standard offset via the UTC mapping.
        LocalResult::None => PROGRAM_TZ
            .from_utc_datetime(&date.and_time(time))
            .with_timezone(&Utc),
    }
}

/// Absolute start/end instants of a session.
pub fn session_bounds(session: &ClassSession) -> (DateTime<Utc>, DateTime<Utc>) {
    (
        local_instant(session.date, session.start_time),
        local_instant(session.date, session.end_time),
    )
}

/// Computes a session's status at the given instant.
///
/// Total over its inputs, with a half-open live window `[start, end)`:
/// `now < start` is Upcoming, `start <= now < end` is Live, `now >= end` is
/// Ended. The three outcomes partition the timeline with no gaps.
pub fn evaluate_session(session: &ClassSession, now: DateTime<Utc>) -> SessionStatus {
    let (start, end) = session_bounds(session);
    if now < start {
        SessionStatus::Upcoming
    } else if now < end {
        SessionStatus::Live
    } else {
        SessionStatus::Ended
    }
}

/// Aggregate status of a class from its full session list.
///
/// Any live session makes the class Live; otherwise any future session makes
/// it Upcoming; otherwise it has Ended. A class with zero sessions is
/// Upcoming by convention.
pub fn evaluate_class(sessions: &[ClassSession], now: DateTime<Utc>) -> SessionStatus {
    if sessions.is_empty() {
        return SessionStatus::Upcoming;
    }
    let mut any_upcoming = false;
    for session in sessions {
        match evaluate_session(session, now) {
            SessionStatus::Live => return SessionStatus::Live,
            SessionStatus::Upcoming => any_upcoming = true,
            SessionStatus::Ended => {}
        }
    }
    if any_upcoming {
        SessionStatus::Upcoming
    } else {
        SessionStatus::Ended
    }
}

/// The single session currently live, if any. Blocked sessions never count.
pub fn find_live_session(sessions: &[ClassSession], now: DateTime<Utc>) -> Option<&ClassSession> {
    sessions.iter().find(|s| {
        s.status == RecordStatus::Active && evaluate_session(s, now) == SessionStatus::Live
    })
}

/// Generates the embedded session list for a class from its schedule triple.
///
/// Walks from `start_date` to `end_date` inclusive at the given cadence,
/// stamping every generated session with the shared start/end time-of-day
/// and a fresh id. Fails validation when the times are inverted or the date
/// range produces no sessions.
pub fn generate_sessions(
    start_date: NaiveDate,
    end_date: NaiveDate,
    cadence: Cadence,
    start_time: NaiveTime,
    end_time: NaiveTime,
) -> CoreResult<Vec<ClassSession>> {
    if start_time >= end_time {
        return Err(CoreError::Validation(
            "startTime must be before endTime".to_string(),
        ));
    }

    let mut sessions = Vec::new();
    let mut current = start_date;
    while current <= end_date {
        sessions.push(ClassSession {
            id: Uuid::new_v4(),
            date: current,
            start_time,
            end_time,
            status: RecordStatus::Active,
        });
        current = match cadence {
            Cadence::Daily => current + Duration::days(1),
            Cadence::Weekly => current + Duration::days(7),
            Cadence::Monthly => match current.checked_add_months(Months::new(1)) {
                Some(next) => next,
                None => break,
            },
        };
    }

    if sessions.is_empty() {
        return Err(CoreError::Validation(
            "no session dates generated with the provided schedule".to_string(),
        ));
    }
    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(date: (i32, u32, u32), start: (u32, u32), end: (u32, u32)) -> ClassSession {
        ClassSession {
            id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            status: RecordStatus::Active,
        }
    }

    /// An instant expressed in program-zone wall-clock terms.
    fn at(date: (i32, u32, u32), h: u32, m: u32, s: u32) -> DateTime<Utc> {
        PROGRAM_TZ
            .with_ymd_and_hms(date.0, date.1, date.2, h, m, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn status_partitions_the_timeline() {
        let s = session((2025, 3, 10), (10, 0), (11, 0));

        assert_eq!(evaluate_session(&s, at((2025, 3, 10), 9, 59, 59)), SessionStatus::Upcoming);
        assert_eq!(evaluate_session(&s, at((2025, 3, 10), 10, 30, 0)), SessionStatus::Live);
        assert_eq!(evaluate_session(&s, at((2025, 3, 10), 11, 0, 1)), SessionStatus::Ended);
    }

    #[test]
    fn live_window_is_closed_at_start_open_at_end() {
        let s = session((2025, 3, 10), (10, 0), (11, 0));

        // Exact boundary instants: start is live, end is not.
        assert_eq!(evaluate_session(&s, at((2025, 3, 10), 10, 0, 0)), SessionStatus::Live);
        assert_eq!(evaluate_session(&s, at((2025, 3, 10), 11, 0, 0)), SessionStatus::Ended);
    }

    #[test]
    fn evaluation_uses_program_timezone_not_utc() {
        let s = session((2025, 3, 10), (1, 0), (2, 0));

        // 01:30 IST is still 2025-03-09 in UTC; the session must be live.
        let now = at((2025, 3, 10), 1, 30, 0);
        assert!(now.date_naive() < s.date);
        assert_eq!(evaluate_session(&s, now), SessionStatus::Live);
    }

    #[test]
    fn class_is_live_when_any_session_is() {
        let sessions = vec![
            session((2025, 3, 10), (10, 0), (11, 0)),
            session((2025, 3, 12), (10, 0), (11, 0)),
        ];
        assert_eq!(
            evaluate_class(&sessions, at((2025, 3, 10), 10, 30, 0)),
            SessionStatus::Live
        );
        assert_eq!(
            evaluate_class(&sessions, at((2025, 3, 11), 10, 30, 0)),
            SessionStatus::Upcoming
        );
        assert_eq!(
            evaluate_class(&sessions, at((2025, 3, 12), 12, 0, 0)),
            SessionStatus::Ended
        );
    }

    #[test]
    fn empty_class_is_upcoming_by_convention() {
        assert_eq!(evaluate_class(&[], at((2025, 3, 10), 10, 0, 0)), SessionStatus::Upcoming);
    }

    #[test]
    fn blocked_sessions_are_never_live_for_marking() {
        let mut s = session((2025, 3, 10), (10, 0), (11, 0));
        s.status = RecordStatus::Blocked;
        let sessions = vec![s];
        assert!(find_live_session(&sessions, at((2025, 3, 10), 10, 30, 0)).is_none());
    }

    #[test]
    fn daily_generation_covers_every_day_inclusive() {
        let sessions = generate_sessions(
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            Cadence::Daily,
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
        )
        .unwrap();
        assert_eq!(sessions.len(), 5);
        assert_eq!(sessions[4].date, NaiveDate::from_ymd_opt(2025, 3, 14).unwrap());
    }

    #[test]
    fn weekly_generation_steps_seven_days() {
        let sessions = generate_sessions(
            NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),
            Cadence::Weekly,
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        )
        .unwrap();
        assert_eq!(sessions.len(), 5);
    }

    #[test]
    fn monthly_generation_handles_month_ends() {
        let sessions = generate_sessions(
            NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
            NaiveDate::from_ymd_opt(2025, 4, 30).unwrap(),
            Cadence::Monthly,
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        )
        .unwrap();
        // Jan 31 -> Feb 28 -> Mar 28 -> Apr 28
        assert_eq!(sessions.len(), 4);
        assert_eq!(sessions[1].date, NaiveDate::from_ymd_opt(2025, 2, 28).unwrap());
    }

    #[test]
    fn generation_rejects_inverted_times_and_empty_ranges() {
        let start = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let err = generate_sessions(
            start,
            start,
            Cadence::Daily,
            NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        let err = generate_sessions(
            start,
            start - Duration::days(1),
            Cadence::Daily,
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
