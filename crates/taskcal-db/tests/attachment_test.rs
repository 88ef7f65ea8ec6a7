use taskcal_db::test_fixtures::TestDatabase;
use taskcal_db::{
    AttachmentFilter, AttachmentService, CreateAttachmentRequest, CreateTaskRequest,
    EntityService, UpdateAttachmentRequest,
};
use uuid::Uuid;

fn file(task_id: Uuid, name: &str, mime_type: &str, size_bytes: i64) -> CreateAttachmentRequest {
    CreateAttachmentRequest {
        task_id,
        filename: name.to_string(),
        url: format!("https://files.example.com/{}", name),
        mime_type: mime_type.to_string(),
        size_bytes,
    }
}

async fn task(test_db: &TestDatabase, user: &str, title: &str) -> Uuid {
    test_db
        .db
        .tasks
        .create(
            CreateTaskRequest {
                title: title.to_string(),
                ..Default::default()
            },
            &test_db.user(user),
        )
        .await
        .expect("create task")
        .id
}

#[tokio::test]
async fn test_attachment_carries_task_summary() {
    let test_db = TestDatabase::new().await;
    let alice = test_db.user("alice");
    let task_id = task(&test_db, "alice", "Expenses").await;

    let receipt = test_db
        .db
        .attachments
        .create(file(task_id, "receipt.pdf", "Application/PDF", 2048), &alice)
        .await
        .expect("create attachment");
    assert_eq!(receipt.mime_type, "application/pdf");
    let summary = receipt.task.expect("task summary");
    assert_eq!(summary.id, task_id);
    assert_eq!(summary.title, "Expenses");

    let reloaded = test_db
        .db
        .tasks
        .find_by_id(task_id, &alice)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.attachments.len(), 1);
    assert_eq!(reloaded.attachments[0].filename, "receipt.pdf");

    test_db.cleanup().await;
}

#[tokio::test]
async fn test_per_task_cap() {
    let test_db = TestDatabase::new().await;
    let alice = test_db.user("alice");
    let task_id = task(&test_db, "alice", "Photos").await;

    for i in 0..10 {
        test_db
            .db
            .attachments
            .create(file(task_id, &format!("img-{}.png", i), "image/png", 100), &alice)
            .await
            .unwrap();
    }

    let err = test_db
        .db
        .attachments
        .create(file(task_id, "img-10.png", "image/png", 100), &alice)
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(
        err.to_string(),
        "VALIDATION_ERROR: Task already has the maximum of 10 attachments"
    );

    // The cap is per task.
    let other = task(&test_db, "alice", "More photos").await;
    test_db
        .db
        .attachments
        .create(file(other, "img-0.png", "image/png", 100), &alice)
        .await
        .unwrap();

    test_db.cleanup().await;
}

#[tokio::test]
async fn test_input_validation() {
    let test_db = TestDatabase::new().await;
    let alice = test_db.user("alice");
    let task_id = task(&test_db, "alice", "Docs").await;
    let attachments = &test_db.db.attachments;

    let too_big = file(task_id, "huge.bin", "application/octet-stream", 10 * 1024 * 1024 + 1);
    assert!(attachments.create(too_big, &alice).await.unwrap_err().is_validation());

    let bad_mime = file(task_id, "notes.txt", "text", 10);
    assert!(attachments.create(bad_mime, &alice).await.unwrap_err().is_validation());

    let traversal = file(task_id, "../etc/passwd", "text/plain", 10);
    assert!(attachments.create(traversal, &alice).await.unwrap_err().is_validation());

    let bad_url = CreateAttachmentRequest {
        url: "ftp://files.example.com/a.txt".to_string(),
        ..file(task_id, "a.txt", "text/plain", 10)
    };
    assert!(attachments.create(bad_url, &alice).await.unwrap_err().is_validation());

    test_db.cleanup().await;
}

#[tokio::test]
async fn test_ownership_follows_task() {
    let test_db = TestDatabase::new().await;
    let alice = test_db.user("alice");
    let bob = test_db.user("bob");
    let task_id = task(&test_db, "alice", "Private").await;
    let attachments = &test_db.db.attachments;

    let err = attachments
        .create(file(task_id, "spy.txt", "text/plain", 1), &bob)
        .await
        .unwrap_err();
    assert!(err.is_authorization());

    let doc = attachments
        .create(file(task_id, "plan.txt", "text/plain", 1), &alice)
        .await
        .unwrap();

    let err = attachments
        .update(
            doc.id,
            UpdateAttachmentRequest {
                filename: Some("mine.txt".to_string()),
                ..Default::default()
            },
            &bob,
        )
        .await
        .unwrap_err();
    assert!(err.is_authorization());
    assert!(attachments
        .find_all(AttachmentFilter::default(), &bob)
        .await
        .unwrap()
        .is_empty());

    let renamed = attachments
        .update(
            doc.id,
            UpdateAttachmentRequest {
                filename: Some("final-plan.txt".to_string()),
                ..Default::default()
            },
            &alice,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(renamed.filename, "final-plan.txt");
    assert_eq!(renamed.url, doc.url);

    assert!(attachments.delete(doc.id, &alice).await.unwrap());
    assert!(attachments.find_by_id(doc.id, &alice).await.unwrap().is_none());

    test_db.cleanup().await;
}

#[tokio::test]
async fn test_storage_stats_by_category() {
    let test_db = TestDatabase::new().await;
    let alice = test_db.user("alice");
    let bob = test_db.user("bob");
    let task_id = task(&test_db, "alice", "Trip").await;
    let bobs_task = task(&test_db, "bob", "Elsewhere").await;
    let attachments = &test_db.db.attachments;

    attachments
        .create(file(task_id, "a.png", "image/png", 3000), &alice)
        .await
        .unwrap();
    attachments
        .create(file(task_id, "b.jpg", "image/jpeg", 2000), &alice)
        .await
        .unwrap();
    attachments
        .create(file(task_id, "c.pdf", "application/pdf", 4000), &alice)
        .await
        .unwrap();
    attachments
        .create(file(bobs_task, "d.pdf", "application/pdf", 9000), &bob)
        .await
        .unwrap();

    let stats = attachments.get_storage_stats(&alice).await.unwrap();
    assert_eq!(stats.total_files, 3);
    assert_eq!(stats.total_bytes, 9000);
    assert_eq!(stats.largest_file_bytes, 4000);
    assert_eq!(stats.by_category.len(), 2);
    assert_eq!(stats.by_category[0].category, "image");
    assert_eq!(stats.by_category[0].file_count, 2);
    assert_eq!(stats.by_category[0].total_bytes, 5000);
    assert_eq!(stats.by_category[1].category, "application");

    let images = attachments
        .find_all(
            AttachmentFilter {
                file_type: Some("IMAGE/PNG".to_string()),
                ..Default::default()
            },
            &alice,
        )
        .await
        .unwrap();
    assert_eq!(images.len(), 1);

    let empty = attachments.get_storage_stats(&test_db.user("carol")).await.unwrap();
    assert_eq!(empty.total_files, 0);
    assert_eq!(empty.total_bytes, 0);
    assert!(empty.by_category.is_empty());

    test_db.cleanup().await;
}
