//! Task list lifecycle: last-list protection, reassignment on delete, and cache
//! invalidation.

use taskcal_db::test_fixtures::TestDatabase;
use taskcal_db::{
    CreateTaskListRequest, CreateTaskRequest, EntityService, TaskListFilter, TaskListService,
    UpdateTaskListRequest,
};
use uuid::Uuid;

fn list(name: &str) -> CreateTaskListRequest {
    CreateTaskListRequest {
        name: name.to_string(),
        ..Default::default()
    }
}

fn task_in(title: &str, list_id: Option<Uuid>) -> CreateTaskRequest {
    CreateTaskRequest {
        title: title.to_string(),
        task_list_id: list_id,
        ..Default::default()
    }
}

async fn tasks_referencing(test_db: &TestDatabase, list_id: Uuid) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM task WHERE task_list_id = $1")
        .bind(list_id)
        .fetch_one(&test_db.pool)
        .await
        .expect("count tasks")
}

#[tokio::test]
async fn test_deleting_only_list_fails() {
    let test_db = TestDatabase::new().await;
    let alice = test_db.user("alice");

    let work = test_db
        .db
        .task_lists
        .create(
            CreateTaskListRequest {
                name: "Work".to_string(),
                color: Some("#FF5722".to_string()),
                ..Default::default()
            },
            &alice,
        )
        .await
        .expect("create list");

    let err = test_db
        .db
        .task_lists
        .delete(work.id, &alice)
        .await
        .expect_err("only list must not be deletable");
    assert!(err.is_validation());
    assert_eq!(
        err.to_string(),
        "VALIDATION_ERROR: Cannot delete the only task list"
    );

    let remaining = test_db
        .db
        .task_lists
        .find_all(TaskListFilter::default(), &alice)
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);

    test_db.cleanup().await;
}

#[tokio::test]
async fn test_delete_reassigns_tasks_to_general() {
    let test_db = TestDatabase::new().await;
    let alice = test_db.user("alice");
    let db = &test_db.db;

    let general = db.task_lists.get_or_create_default(&alice).await.unwrap();
    let work = db.task_lists.create(list("Work"), &alice).await.unwrap();
    let t1 = db.tasks.create(task_in("Report", Some(work.id)), &alice).await.unwrap();
    let t2 = db.tasks.create(task_in("Slides", Some(work.id)), &alice).await.unwrap();

    assert!(db.task_lists.delete(work.id, &alice).await.unwrap());

    for id in [t1.id, t2.id] {
        let task = db.tasks.find_by_id(id, &alice).await.unwrap().unwrap();
        assert_eq!(task.task_list_id, general.id);
        assert_eq!(task.task_list.unwrap().name, "General");
    }
    assert_eq!(tasks_referencing(&test_db, work.id).await, 0);
    assert!(db.task_lists.find_by_id(work.id, &alice).await.unwrap().is_none());

    test_db.cleanup().await;
}

#[tokio::test]
async fn test_deleting_general_falls_back_to_oldest_list() {
    let test_db = TestDatabase::new().await;
    let alice = test_db.user("alice");
    let db = &test_db.db;

    let general = db.task_lists.get_or_create_default(&alice).await.unwrap();
    let work = db.task_lists.create(list("Work"), &alice).await.unwrap();
    let _home = db.task_lists.create(list("Home"), &alice).await.unwrap();
    let task = db.tasks.create(task_in("Inbox item", None), &alice).await.unwrap();
    assert_eq!(task.task_list_id, general.id);

    assert!(db.task_lists.delete(general.id, &alice).await.unwrap());

    let moved = db.tasks.find_by_id(task.id, &alice).await.unwrap().unwrap();
    assert_eq!(moved.task_list_id, work.id);

    test_db.cleanup().await;
}

#[tokio::test]
async fn test_delete_creates_general_when_missing() {
    let test_db = TestDatabase::new().await;
    let alice = test_db.user("alice");
    let db = &test_db.db;

    let _work = db.task_lists.create(list("Work"), &alice).await.unwrap();
    let home = db.task_lists.create(list("Home"), &alice).await.unwrap();
    let task = db.tasks.create(task_in("Laundry", Some(home.id)), &alice).await.unwrap();

    assert!(db.task_lists.delete(home.id, &alice).await.unwrap());

    let moved = db.tasks.find_by_id(task.id, &alice).await.unwrap().unwrap();
    let summary = moved.task_list.expect("enriched with list summary");
    assert_eq!(summary.name, "General");

    let names: Vec<String> = db
        .task_lists
        .find_all(TaskListFilter::default(), &alice)
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.name)
        .collect();
    assert_eq!(names, vec!["General".to_string(), "Work".to_string()]);

    test_db.cleanup().await;
}

#[tokio::test]
async fn test_duplicate_names_rejected_case_insensitively() {
    let test_db = TestDatabase::new().await;
    let alice = test_db.user("alice");
    let bob = test_db.user("bob");
    let db = &test_db.db;

    db.task_lists.create(list("Work"), &alice).await.unwrap();
    let err = db.task_lists.create(list("  work "), &alice).await.unwrap_err();
    assert!(err.is_validation());

    // Names are unique per user only.
    db.task_lists.create(list("Work"), &bob).await.unwrap();

    test_db.cleanup().await;
}

#[tokio::test]
async fn test_invalid_color_rejected() {
    let test_db = TestDatabase::new().await;
    let alice = test_db.user("alice");

    let err = test_db
        .db
        .task_lists
        .create(
            CreateTaskListRequest {
                name: "Work".to_string(),
                color: Some("orange".to_string()),
                ..Default::default()
            },
            &alice,
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());

    test_db.cleanup().await;
}

#[tokio::test]
async fn test_rename_invalidates_cached_summary() {
    let test_db = TestDatabase::new().await;
    let alice = test_db.user("alice");
    let db = &test_db.db;

    let work = db.task_lists.create(list("Work"), &alice).await.unwrap();
    let task = db.tasks.create(task_in("Report", Some(work.id)), &alice).await.unwrap();
    assert_eq!(task.task_list.as_ref().unwrap().name, "Work");

    // Second read is served from the cache.
    db.tasks.find_by_id(task.id, &alice).await.unwrap();
    assert!(db.cache.stats().await.hits >= 1);

    db.task_lists
        .update(
            work.id,
            UpdateTaskListRequest {
                name: Some("Office".to_string()),
                ..Default::default()
            },
            &alice,
        )
        .await
        .unwrap();

    let reread = db.tasks.find_by_id(task.id, &alice).await.unwrap().unwrap();
    assert_eq!(reread.task_list.unwrap().name, "Office");
    assert!(db.cache.stats().await.invalidations >= 2);

    test_db.cleanup().await;
}

#[tokio::test]
async fn test_mutations_are_owner_scoped() {
    let test_db = TestDatabase::new().await;
    let alice = test_db.user("alice");
    let bob = test_db.user("bob");
    let db = &test_db.db;

    let work = db.task_lists.create(list("Work"), &alice).await.unwrap();
    db.task_lists.create(list("Home"), &alice).await.unwrap();

    let err = db
        .task_lists
        .update(
            work.id,
            UpdateTaskListRequest {
                name: Some("Mine now".to_string()),
                ..Default::default()
            },
            &bob,
        )
        .await
        .unwrap_err();
    assert!(err.is_authorization());
    assert!(db.task_lists.delete(work.id, &bob).await.unwrap_err().is_authorization());

    // A missing row is reported exactly like a foreign one.
    let missing = db.task_lists.delete(Uuid::now_v7(), &alice).await.unwrap_err();
    assert!(missing.is_authorization());

    // Lookup by id is not owner-scoped.
    assert!(db.task_lists.find_by_id(work.id, &bob).await.unwrap().is_some());
    assert!(db
        .task_lists
        .find_all(TaskListFilter::default(), &bob)
        .await
        .unwrap()
        .is_empty());

    // Bob cannot file a task into Alice's list.
    let err = db
        .tasks
        .create(task_in("Sneaky", Some(work.id)), &bob)
        .await
        .unwrap_err();
    assert!(err.is_authorization());

    test_db.cleanup().await;
}
