use chrono::{TimeZone, Utc};
use taskcal_db::test_fixtures::TestDatabase;
use taskcal_db::{
    CalendarFilter, CalendarService, CreateCalendarRequest, CreateEventRequest, EntityService,
    UpdateCalendarRequest,
};

fn named(name: &str) -> CreateCalendarRequest {
    CreateCalendarRequest {
        name: name.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_first_calendar_becomes_default() {
    let test_db = TestDatabase::new().await;
    let alice = test_db.user("alice");
    let db = &test_db.db;

    let work = db.calendars.create(named("Work"), &alice).await.unwrap();
    assert!(work.is_default);
    assert!(work.is_visible);
    assert_eq!(work.color, "#10B981");

    let home = db.calendars.create(named("Home"), &alice).await.unwrap();
    assert!(!home.is_default);

    let fetched = db.calendars.get_default(&alice).await.unwrap();
    assert_eq!(fetched.id, work.id);

    test_db.cleanup().await;
}

#[tokio::test]
async fn test_exactly_one_default_after_switching() {
    let test_db = TestDatabase::new().await;
    let alice = test_db.user("alice");
    let db = &test_db.db;

    let work = db.calendars.create(named("Work"), &alice).await.unwrap();
    let home = db
        .calendars
        .create(
            CreateCalendarRequest {
                is_default: Some(true),
                ..named("Home")
            },
            &alice,
        )
        .await
        .unwrap();
    assert!(home.is_default);

    let all = db
        .calendars
        .find_all(CalendarFilter::default(), &alice)
        .await
        .unwrap();
    assert_eq!(all.iter().filter(|c| c.is_default).count(), 1);
    // Default first, then by name.
    assert_eq!(all[0].id, home.id);

    db.calendars
        .update(
            work.id,
            UpdateCalendarRequest {
                is_default: Some(true),
                ..Default::default()
            },
            &alice,
        )
        .await
        .unwrap();
    let all = db
        .calendars
        .find_all(CalendarFilter::default(), &alice)
        .await
        .unwrap();
    let defaults: Vec<_> = all.iter().filter(|c| c.is_default).collect();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].id, work.id);

    test_db.cleanup().await;
}

#[tokio::test]
async fn test_default_calendar_cannot_be_unset_or_deleted() {
    let test_db = TestDatabase::new().await;
    let alice = test_db.user("alice");
    let db = &test_db.db;

    let work = db.calendars.create(named("Work"), &alice).await.unwrap();
    let home = db.calendars.create(named("Home"), &alice).await.unwrap();

    let err = db
        .calendars
        .update(
            work.id,
            UpdateCalendarRequest {
                is_default: Some(false),
                ..Default::default()
            },
            &alice,
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = db.calendars.delete(work.id, &alice).await.unwrap_err();
    assert!(err.is_validation());
    assert_eq!(
        err.to_string(),
        "VALIDATION_ERROR: Cannot delete the default calendar"
    );

    // Deleting a non-default calendar takes its events with it.
    let day = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
    let event = db
        .events
        .create(
            CreateEventRequest {
                calendar_id: Some(home.id),
                title: "Dinner".to_string(),
                description: None,
                location: None,
                start_time: day,
                end_time: day + chrono::Duration::hours(1),
                all_day: false,
                recurrence_rule: None,
            },
            &alice,
        )
        .await
        .unwrap();
    assert!(db.calendars.delete(home.id, &alice).await.unwrap());
    assert!(db.events.find_by_id(event.id, &alice).await.unwrap().is_none());

    test_db.cleanup().await;
}

#[tokio::test]
async fn test_get_default_creates_personal_once() {
    let test_db = TestDatabase::new().await;
    let alice = test_db.user("alice");
    let db = &test_db.db;

    let first = db.calendars.get_default(&alice).await.unwrap();
    assert_eq!(first.name, "Personal");
    assert!(first.is_default);

    let second = db.calendars.get_default(&alice).await.unwrap();
    assert_eq!(second.id, first.id);

    let bob = test_db.user("bob");
    assert!(db
        .calendars
        .find_all(CalendarFilter::default(), &bob)
        .await
        .unwrap()
        .is_empty());
    let err = db
        .calendars
        .update(
            first.id,
            UpdateCalendarRequest {
                name: Some("Hijacked".to_string()),
                ..Default::default()
            },
            &bob,
        )
        .await
        .unwrap_err();
    assert!(err.is_authorization());

    test_db.cleanup().await;
}
