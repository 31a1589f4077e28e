use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Extension, FromRequest, Multipart, Path, Query};
use axum::http::Request;
use axum::response::Response;
use sea_orm::{
    DatabaseBackend, DatabaseConnection, DbErr, MockDatabase, MockExecResult, Value,
};
use uuid::Uuid;

use vidtube_server::api::auth;
use vidtube_server::api::error::ApiError;
use vidtube_server::api::middleware::AuthUser;
use vidtube_server::api::video;
use vidtube_server::entities::video as video_entity;
use vidtube_server::storage::MediaStorage;

const BOUNDARY: &str = "vidtube-test-boundary";

fn text_part(name: &str, value: &str) -> String {
    format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
}

fn file_part(name: &str, filename: &str, contents: &str) -> String {
    format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n{contents}\r\n"
    )
}

async fn multipart_from(parts: String) -> Multipart {
    let body = format!("{parts}--{BOUNDARY}--\r\n");
    let request = Request::builder()
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    Multipart::from_request(request, &()).await.unwrap()
}

async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn sample_video(owner_id: Uuid, is_published: bool) -> video_entity::Model {
    let now = chrono::Utc::now().fixed_offset();
    video_entity::Model {
        id: Uuid::new_v4(),
        title: "A".to_string(),
        description: "B".to_string(),
        video_file: "https://cdn.example.com/v.mp4".to_string(),
        thumbnail: "https://cdn.example.com/t.png".to_string(),
        duration: 12.5,
        owner_id,
        is_published,
        created_at: now,
        updated_at: now,
    }
}

/// Media storage pointing at a closed port: any upload attempt fails fast.
fn dead_storage() -> MediaStorage {
    MediaStorage::with_base_url(
        "http://127.0.0.1:9".to_string(),
        "demo".to_string(),
        "key".to_string(),
        "secret".to_string(),
    )
}

fn empty_db() -> Arc<DatabaseConnection> {
    Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection())
}

/// Files left behind in the temp dir with the given extension.
fn leaked_temp_files(ext: &str) -> Vec<std::path::PathBuf> {
    let suffix = format!(".{ext}");
    std::fs::read_dir(std::env::temp_dir())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.to_string_lossy().ends_with(&suffix))
        .collect()
}

#[tokio::test]
async fn get_video_rejects_malformed_id_before_lookup() {
    let result = video::get_video(
        Extension(empty_db()),
        Path("definitely-not-a-uuid".to_string()),
    )
    .await;
    assert!(matches!(result, Err(ApiError::Validation(_))));
}

#[tokio::test]
async fn toggle_returns_404_for_unknown_video() {
    let db = Arc::new(
        MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<video_entity::Model>::new()])
            .into_connection(),
    );

    let result = video::toggle_publish_status(
        Extension(db),
        Extension(AuthUser(Uuid::new_v4())),
        Path(Uuid::new_v4().to_string()),
    )
    .await;
    assert!(matches!(result, Err(ApiError::NotFound(_))));
}

#[tokio::test]
async fn list_with_zero_limit_returns_empty_page_instead_of_panicking() {
    let db = Arc::new(
        MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![BTreeMap::from([(
                "num_items",
                Value::BigInt(Some(0)),
            )])]])
            .append_query_results([Vec::<BTreeMap<&str, Value>>::new()])
            .into_connection(),
    );

    let params = serde_json::from_value(serde_json::json!({"limit": 0})).unwrap();
    let response = video::list_videos(Extension(db), Query(params))
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["statusCode"], 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["videos"], serde_json::json!([]));
}

#[tokio::test]
async fn update_by_non_owner_is_forbidden_and_mutates_nothing() {
    let owner = Uuid::new_v4();
    let intruder = Uuid::new_v4();
    let existing = sample_video(owner, true);

    // Only the lookup result is mocked; any write would error the mock,
    // so a Forbidden outcome proves nothing was persisted.
    let db = Arc::new(
        MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![existing.clone()]])
            .into_connection(),
    );

    let multipart = multipart_from(text_part("title", "Hijacked")).await;
    let result = video::update_video(
        Extension(db),
        Extension(dead_storage()),
        Extension(AuthUser(intruder)),
        Path(existing.id.to_string()),
        multipart,
    )
    .await;

    assert!(matches!(result, Err(ApiError::Forbidden(_))));
}

#[tokio::test]
async fn delete_by_non_owner_is_forbidden() {
    let owner = Uuid::new_v4();
    let existing = sample_video(owner, true);
    let db = Arc::new(
        MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![existing.clone()]])
            .into_connection(),
    );

    let result = video::delete_video(
        Extension(db),
        Extension(AuthUser(Uuid::new_v4())),
        Path(existing.id.to_string()),
    )
    .await;

    assert!(matches!(result, Err(ApiError::Forbidden(_))));
}

#[tokio::test]
async fn delete_by_owner_returns_empty_payload() {
    let owner = Uuid::new_v4();
    let existing = sample_video(owner, true);
    let db = Arc::new(
        MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![existing.clone()]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection(),
    );

    let response = video::delete_video(
        Extension(db),
        Extension(AuthUser(owner)),
        Path(existing.id.to_string()),
    )
    .await
    .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["statusCode"], 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"], serde_json::json!({}));
}

#[tokio::test]
async fn toggle_flips_publish_state_and_message() {
    let owner = Uuid::new_v4();
    let published = sample_video(owner, true);
    let mut unpublished = published.clone();
    unpublished.is_published = false;

    let db = Arc::new(
        MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![published.clone()]])
            .append_query_results([vec![unpublished]])
            .into_connection(),
    );

    let response = video::toggle_publish_status(
        Extension(db),
        Extension(AuthUser(owner)),
        Path(published.id.to_string()),
    )
    .await
    .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["data"]["isPublished"], false);
    assert_eq!(body["message"], "Video unpublished successfully");
}

#[tokio::test]
async fn toggle_twice_restores_original_state() {
    let owner = Uuid::new_v4();
    let published = sample_video(owner, true);
    let mut unpublished = published.clone();
    unpublished.is_published = false;

    let db = Arc::new(
        MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![published.clone()]])
            .append_query_results([vec![unpublished.clone()]])
            .append_query_results([vec![unpublished]])
            .append_query_results([vec![published.clone()]])
            .into_connection(),
    );

    let first = video::toggle_publish_status(
        Extension(db.clone()),
        Extension(AuthUser(owner)),
        Path(published.id.to_string()),
    )
    .await
    .unwrap();
    assert_eq!(body_json(first).await["data"]["isPublished"], false);

    let second = video::toggle_publish_status(
        Extension(db),
        Extension(AuthUser(owner)),
        Path(published.id.to_string()),
    )
    .await
    .unwrap();
    assert_eq!(body_json(second).await["data"]["isPublished"], true);
}

#[tokio::test]
async fn update_with_only_title_leaves_description_alone() {
    let owner = Uuid::new_v4();
    let existing = sample_video(owner, true);
    let mut updated = existing.clone();
    updated.title = "A2".to_string();

    let db = Arc::new(
        MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![existing.clone()]])
            .append_query_results([vec![updated]])
            .into_connection(),
    );

    let multipart = multipart_from(text_part("title", "A2")).await;
    let response = video::update_video(
        Extension(db.clone()),
        Extension(dead_storage()),
        Extension(AuthUser(owner)),
        Path(existing.id.to_string()),
        multipart,
    )
    .await
    .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["data"]["title"], "A2");
    assert_eq!(body["data"]["description"], "B");

    // The UPDATE's SET clause must touch title but not description. The
    // statement ends with RETURNING over all columns, so only inspect the
    // part before WHERE.
    let log = Arc::try_unwrap(db).ok().unwrap().into_transaction_log();
    let update_stmt = format!("{:?}", log[1]);
    let set_clause = update_stmt.split("WHERE").next().unwrap();
    assert!(set_clause.contains("title"));
    assert!(!set_clause.contains("description"));
}

#[tokio::test]
async fn publish_with_missing_title_fails_before_any_upload() {
    let multipart = multipart_from(
        text_part("description", "B")
            + &file_part("videoFile", "clip.mp4", "fake video bytes")
            + &file_part("thumbnail", "thumb.png", "fake png bytes"),
    )
    .await;

    let result = video::publish_video(
        Extension(empty_db()),
        Extension(dead_storage()),
        Extension(AuthUser(Uuid::new_v4())),
        multipart,
    )
    .await;

    // A reached upload would surface as ApiError::Upload instead.
    match result {
        Err(ApiError::Validation(msg)) => assert!(msg.contains("Title")),
        other => panic!("expected validation error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn publish_with_missing_files_fails_with_400() {
    let multipart =
        multipart_from(text_part("title", "A") + &text_part("description", "B")).await;

    let result = video::publish_video(
        Extension(empty_db()),
        Extension(dead_storage()),
        Extension(AuthUser(Uuid::new_v4())),
        multipart,
    )
    .await;

    assert!(matches!(result, Err(ApiError::Validation(_))));
}

#[tokio::test]
async fn publish_with_failed_upload_persists_nothing() {
    let db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());

    let multipart = multipart_from(
        text_part("title", "A")
            + &text_part("description", "B")
            + &file_part("videoFile", "clip.mp4", "fake video bytes")
            + &file_part("thumbnail", "thumb.png", "fake png bytes"),
    )
    .await;

    let result = video::publish_video(
        Extension(db.clone()),
        Extension(dead_storage()),
        Extension(AuthUser(Uuid::new_v4())),
        multipart,
    )
    .await;

    assert!(matches!(result, Err(ApiError::Upload(_))));
    assert!(Arc::try_unwrap(db)
        .ok()
        .unwrap()
        .into_transaction_log()
        .is_empty());
}

#[tokio::test]
async fn publish_with_failed_uploads_leaves_no_temp_files_behind() {
    // Unique extensions so the temp dir can be scanned for leftovers.
    let video_ext = format!("v{}", &Uuid::new_v4().simple().to_string()[..10]);
    let thumb_ext = format!("t{}", &Uuid::new_v4().simple().to_string()[..10]);

    let multipart = multipart_from(
        text_part("title", "A")
            + &text_part("description", "B")
            + &file_part("videoFile", &format!("clip.{video_ext}"), "fake video bytes")
            + &file_part("thumbnail", &format!("thumb.{thumb_ext}"), "fake png bytes"),
    )
    .await;

    let result = video::publish_video(
        Extension(empty_db()),
        Extension(dead_storage()),
        Extension(AuthUser(Uuid::new_v4())),
        multipart,
    )
    .await;

    // Both spooled files must be consumed by the proxy even though the
    // first upload already failed.
    assert!(matches!(result, Err(ApiError::Upload(_))));
    assert!(leaked_temp_files(&video_ext).is_empty());
    assert!(leaked_temp_files(&thumb_ext).is_empty());
}

#[tokio::test]
async fn register_with_duplicate_email_conflicts() {
    let db = Arc::new(
        MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_errors([DbErr::Custom(
                "duplicate key value violates unique constraint \"users_email_key\"".to_string(),
            )])
            .into_connection(),
    );

    let payload = serde_json::json!({
        "username": "u1",
        "email": "u1@example.com",
        "fullName": "User One",
        "password": "hunter2"
    });
    let result = auth::register(
        Extension(db),
        axum::Json(serde_json::from_value(payload).unwrap()),
    )
    .await;

    assert!(matches!(result, Err(ApiError::Conflict(_))));
}
