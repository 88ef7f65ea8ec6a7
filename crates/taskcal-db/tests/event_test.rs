//! Event intervals, recurrence rule checks and conflict detection.

use chrono::{DateTime, TimeZone, Utc};
use taskcal_db::test_fixtures::TestDatabase;
use taskcal_db::{
    AuthContext, ConflictQuery, CreateCalendarRequest, CreateEventRequest,
    Database, EntityService, Event, EventFilter, EventService, UpdateEventRequest,
};
use uuid::Uuid;

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, hour, minute, 0).unwrap()
}

fn event(title: &str, calendar_id: Option<Uuid>, start: DateTime<Utc>, end: DateTime<Utc>) -> CreateEventRequest {
    CreateEventRequest {
        calendar_id,
        title: title.to_string(),
        description: None,
        location: None,
        start_time: start,
        end_time: end,
        all_day: false,
        recurrence_rule: None,
    }
}

fn window(start: DateTime<Utc>, end: DateTime<Utc>) -> ConflictQuery {
    ConflictQuery {
        start_time: start,
        end_time: end,
        exclude_event_id: None,
        calendar_id: None,
    }
}

async fn standup(db: &Database, ctx: &AuthContext) -> Event {
    let calendar = db
        .calendars
        .create(
            CreateCalendarRequest {
                name: "Work".to_string(),
                ..Default::default()
            },
            ctx,
        )
        .await
        .expect("create calendar");
    db.events
        .create(event("Standup", Some(calendar.id), at(10, 0), at(11, 0)), ctx)
        .await
        .expect("create event")
}

#[tokio::test]
async fn test_overlapping_candidate_reports_conflict() {
    let test_db = TestDatabase::new().await;
    let alice = test_db.user("alice");
    let existing = standup(&test_db.db, &alice).await;

    let conflicts = test_db
        .db
        .events
        .get_conflicts(
            ConflictQuery {
                calendar_id: Some(existing.calendar_id),
                ..window(at(10, 30), at(11, 30))
            },
            &alice,
        )
        .await
        .expect("conflicts");

    assert_eq!(conflicts.len(), 1);
    let conflict = &conflicts[0];
    assert_eq!(conflict.event.id, existing.id);
    assert_eq!(conflict.overlap_start, at(10, 30));
    assert_eq!(conflict.overlap_end, at(11, 0));
    assert_eq!(conflict.overlap_minutes, 30);
    assert_eq!(conflict.event.calendar.as_ref().unwrap().name, "Work");

    test_db.cleanup().await;
}

#[tokio::test]
async fn test_touching_intervals_do_not_conflict() {
    let test_db = TestDatabase::new().await;
    let alice = test_db.user("alice");
    standup(&test_db.db, &alice).await;

    for (start, end) in [(at(11, 0), at(12, 0)), (at(9, 0), at(10, 0))] {
        let conflicts = test_db
            .db
            .events
            .get_conflicts(window(start, end), &alice)
            .await
            .unwrap();
        assert!(conflicts.is_empty(), "{} - {} should not conflict", start, end);
    }

    test_db.cleanup().await;
}

#[tokio::test]
async fn test_conflicts_exclude_self_and_other_users() {
    let test_db = TestDatabase::new().await;
    let alice = test_db.user("alice");
    let bob = test_db.user("bob");
    let existing = standup(&test_db.db, &alice).await;
    standup(&test_db.db, &bob).await;

    let own = test_db
        .db
        .events
        .get_conflicts(
            ConflictQuery {
                exclude_event_id: Some(existing.id),
                ..window(at(10, 0), at(11, 0))
            },
            &alice,
        )
        .await
        .unwrap();
    assert!(own.is_empty());

    let all = test_db
        .db
        .events
        .get_conflicts(window(at(0, 0), at(23, 0)), &alice)
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].event.user_id, "alice");

    let err = test_db
        .db
        .events
        .get_conflicts(window(at(12, 0), at(12, 0)), &alice)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    test_db.cleanup().await;
}

#[tokio::test]
async fn test_interval_rules() {
    let test_db = TestDatabase::new().await;
    let alice = test_db.user("alice");
    let db = &test_db.db;

    let err = db
        .events
        .create(event("Empty", None, at(9, 0), at(9, 0)), &alice)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let all_day = db
        .events
        .create(
            CreateEventRequest {
                all_day: true,
                ..event("Holiday", None, at(0, 0), at(0, 0))
            },
            &alice,
        )
        .await
        .expect("all-day event may start and end together");
    assert!(all_day.all_day);
    // No calendar given: the default one is created on demand.
    assert_eq!(all_day.calendar.unwrap().name, "Personal");

    let timed = db
        .events
        .create(event("Review", None, at(14, 0), at(15, 0)), &alice)
        .await
        .unwrap();
    let err = db
        .events
        .update(
            timed.id,
            UpdateEventRequest {
                end_time: Some(at(13, 0)),
                ..Default::default()
            },
            &alice,
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let moved = db
        .events
        .update(
            timed.id,
            UpdateEventRequest {
                start_time: Some(at(12, 0)),
                end_time: Some(at(13, 0)),
                ..Default::default()
            },
            &alice,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(moved.start_time, at(12, 0));

    test_db.cleanup().await;
}

#[tokio::test]
async fn test_recurrence_rules_are_checked_and_stored_verbatim() {
    let test_db = TestDatabase::new().await;
    let alice = test_db.user("alice");
    let db = &test_db.db;

    let err = db
        .events
        .create(
            CreateEventRequest {
                recurrence_rule: Some("every tuesday".to_string()),
                ..event("Gym", None, at(18, 0), at(19, 0))
            },
            &alice,
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let weekly = db
        .events
        .create(
            CreateEventRequest {
                recurrence_rule: Some("RRULE:FREQ=WEEKLY;BYDAY=TU".to_string()),
                ..event("Gym", None, at(18, 0), at(19, 0))
            },
            &alice,
        )
        .await
        .unwrap();
    assert_eq!(
        weekly.recurrence_rule.as_deref(),
        Some("RRULE:FREQ=WEEKLY;BYDAY=TU")
    );

    let cleared = db
        .events
        .update(
            weekly.id,
            UpdateEventRequest {
                recurrence_rule: Some(None),
                ..Default::default()
            },
            &alice,
        )
        .await
        .unwrap()
        .unwrap();
    assert!(cleared.recurrence_rule.is_none());

    test_db.cleanup().await;
}

#[tokio::test]
async fn test_range_filter_and_ownership() {
    let test_db = TestDatabase::new().await;
    let alice = test_db.user("alice");
    let bob = test_db.user("bob");
    let db = &test_db.db;

    let existing = standup(db, &alice).await;
    db.events
        .create(event("Lunch", None, at(12, 0), at(13, 0)), &alice)
        .await
        .unwrap();

    let morning = db
        .events
        .find_all(
            EventFilter {
                from: Some(at(8, 0)),
                to: Some(at(11, 0)),
                ..Default::default()
            },
            &alice,
        )
        .await
        .unwrap();
    assert_eq!(morning.len(), 1);
    assert_eq!(morning[0].id, existing.id);

    let err = db
        .events
        .create(event("Intrude", Some(existing.calendar_id), at(8, 0), at(9, 0)), &bob)
        .await
        .unwrap_err();
    assert!(err.is_authorization());
    assert!(db.events.delete(existing.id, &bob).await.unwrap_err().is_authorization());
    assert!(db.events.delete(existing.id, &alice).await.unwrap());

    test_db.cleanup().await;
}
