use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::multipart::Field;
use axum::extract::{Extension, Multipart, Path, Query};
use axum::response::{IntoResponse, Response};
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, ModelTrait,
    Order, PaginatorTrait, QueryFilter, QueryOrder, Select, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::middleware::AuthUser;
use crate::api::response::ApiResponse;
use crate::entities::{user, video};
use crate::storage::MediaStorage;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default = "default_sort_by", rename = "sortBy")]
    pub sort_by: String,
    #[serde(default = "default_sort_type", rename = "sortType")]
    pub sort_type: String,
    #[serde(default, rename = "userId")]
    pub user_id: Option<String>,
}

fn default_page() -> u64 {
    1
}

fn default_limit() -> u64 {
    10
}

fn default_sort_by() -> String {
    "createdAt".to_string()
}

fn default_sort_type() -> String {
    "desc".to_string()
}

/// Public projection of the owning user, joined into video responses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerInfo {
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    pub avatar: Option<String>,
}

impl From<user::Model> for OwnerInfo {
    fn from(user: user::Model) -> Self {
        Self {
            id: user.id,
            username: user.username,
            full_name: user.full_name,
            avatar: user.avatar,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VideoWithOwner {
    #[serde(flatten)]
    pub video: video::Model,
    pub owner: Option<OwnerInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoListData {
    pub videos: Vec<VideoWithOwner>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

fn sort_column(name: &str) -> video::Column {
    match name {
        "title" => video::Column::Title,
        "duration" => video::Column::Duration,
        "updatedAt" => video::Column::UpdatedAt,
        _ => video::Column::CreatedAt,
    }
}

fn sort_order(sort_type: &str) -> Order {
    if sort_type.eq_ignore_ascii_case("asc") {
        Order::Asc
    } else {
        Order::Desc
    }
}

/// Published-only filter plus the optional search/owner filters and sort.
/// A malformed userId behaves as if it was omitted.
fn build_list_query(params: &ListParams) -> Select<video::Entity> {
    let mut find = video::Entity::find().filter(video::Column::IsPublished.eq(true));

    if let Some(q) = params.query.as_deref().filter(|q| !q.is_empty()) {
        find = find.filter(
            Expr::expr(Func::lower(Expr::col(video::Column::Title)))
                .like(format!("%{}%", q.to_lowercase())),
        );
    }

    if let Some(owner_id) = params
        .user_id
        .as_deref()
        .and_then(|s| Uuid::parse_str(s).ok())
    {
        find = find.filter(video::Column::OwnerId.eq(owner_id));
    }

    find.order_by(sort_column(&params.sort_by), sort_order(&params.sort_type))
}

pub async fn list_videos(
    Extension(db): Extension<Arc<DatabaseConnection>>,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    // The paginator panics on a zero page size; floor it instead of
    // rejecting the request, since page/limit carry no bounds validation.
    let limit = params.limit.max(1);

    let paginator = build_list_query(&params)
        .find_also_related(user::Entity)
        .paginate(db.as_ref(), limit);

    let counts = paginator.num_items_and_pages().await?;
    let rows = paginator.fetch_page(params.page.saturating_sub(1)).await?;

    // Inner-join semantics: a video whose owner cannot be resolved is dropped.
    let videos: Vec<VideoWithOwner> = rows
        .into_iter()
        .filter_map(|(video, owner)| {
            owner.map(|o| VideoWithOwner {
                video,
                owner: Some(o.into()),
            })
        })
        .collect();

    let data = VideoListData {
        videos,
        total: counts.number_of_items,
        page: params.page,
        limit,
        total_pages: counts.number_of_pages,
    };

    Ok(ApiResponse::ok(data, "Videos fetched successfully").into_response())
}

#[derive(Debug, Default)]
struct PublishForm {
    title: Option<String>,
    description: Option<String>,
    video_file: Option<PathBuf>,
    thumbnail: Option<PathBuf>,
}

impl PublishForm {
    async fn read_from(multipart: &mut Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or("").to_string();
            match name.as_str() {
                "title" => form.title = Some(field.text().await?),
                "description" => form.description = Some(field.text().await?),
                "videoFile" => form.video_file = Some(spool_to_temp(field).await?),
                "thumbnail" => form.thumbnail = Some(spool_to_temp(field).await?),
                _ => {}
            }
        }
        Ok(form)
    }

    /// Metadata is checked before files, so a missing title or description
    /// fails without any upload ever being attempted.
    fn validated(self) -> Result<(String, String, PathBuf, PathBuf), ApiError> {
        let title = self.title.filter(|t| !t.trim().is_empty());
        let description = self.description.filter(|d| !d.trim().is_empty());
        let (Some(title), Some(description)) = (title, description) else {
            return Err(ApiError::Validation(
                "Title and description are required".to_string(),
            ));
        };

        let (Some(video_file), Some(thumbnail)) = (self.video_file, self.thumbnail) else {
            return Err(ApiError::Validation(
                "Video file and thumbnail are required".to_string(),
            ));
        };

        Ok((title, description, video_file, thumbnail))
    }
}

/// Write a multipart file field to a local temp path. The upload proxy owns
/// removal of this file once it is handed over.
async fn spool_to_temp(field: Field<'_>) -> Result<PathBuf, ApiError> {
    let original = field.file_name().unwrap_or("upload.bin").to_string();
    let ext = std::path::Path::new(&original)
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("bin")
        .to_string();
    let path = std::env::temp_dir().join(format!("vidtube-{}.{}", Uuid::new_v4(), ext));

    let data = field.bytes().await?;
    tokio::fs::write(&path, &data).await?;
    Ok(path)
}

pub async fn publish_video(
    Extension(db): Extension<Arc<DatabaseConnection>>,
    Extension(storage): Extension<MediaStorage>,
    Extension(AuthUser(owner_id)): Extension<AuthUser>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let form = PublishForm::read_from(&mut multipart).await?;
    let (title, description, video_path, thumbnail_path) = form.validated()?;

    // Both files go through the proxy before either result is checked, so
    // every spooled temp file is consumed and cleaned up even when the first
    // upload fails. A partial success leaves the uploaded asset orphaned
    // remotely (accepted gap, no rollback).
    let video_file = storage.upload(&video_path).await;
    let thumbnail = storage.upload(&thumbnail_path).await;
    let (Some(video_file), Some(thumbnail)) = (video_file, thumbnail) else {
        return Err(ApiError::Upload(
            "Error uploading files to media service".to_string(),
        ));
    };

    let now = chrono::Utc::now().fixed_offset();
    let new_video = video::ActiveModel {
        id: Set(Uuid::new_v4()),
        title: Set(title),
        description: Set(description),
        video_file: Set(video_file.url),
        thumbnail: Set(thumbnail.url),
        duration: Set(video_file.duration.unwrap_or(0.0)),
        owner_id: Set(owner_id),
        is_published: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    };
    let video = new_video.insert(db.as_ref()).await?;

    tracing::Span::current()
        .record("action", "publish_video")
        .record("video_id", tracing::field::display(video.id));
    metrics::counter!("vidtube_videos_published_total").increment(1);
    metrics::gauge!("vidtube_videos_total").increment(1.0);

    Ok(ApiResponse::created(video, "Video published successfully").into_response())
}

fn parse_video_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::Validation("Invalid video ID".to_string()))
}

async fn find_video(db: &DatabaseConnection, id: Uuid) -> Result<video::Model, ApiError> {
    video::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| ApiError::NotFound("Video not found".to_string()))
}

pub async fn get_video(
    Extension(db): Extension<Arc<DatabaseConnection>>,
    Path(video_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_video_id(&video_id)?;

    // No publish-status or ownership filter here: direct links reach
    // unpublished videos, unlike the list endpoint.
    let (video, owner) = video::Entity::find_by_id(id)
        .find_also_related(user::Entity)
        .one(db.as_ref())
        .await?
        .ok_or_else(|| ApiError::NotFound("Video not found".to_string()))?;

    // An unresolvable owner serializes as null rather than failing the read;
    // the cascade FK makes this unreachable in practice.
    let data = VideoWithOwner {
        video,
        owner: owner.map(Into::into),
    };
    Ok(ApiResponse::ok(data, "Video fetched successfully").into_response())
}

#[derive(Debug, Default)]
struct UpdateForm {
    title: Option<String>,
    description: Option<String>,
    thumbnail: Option<PathBuf>,
}

impl UpdateForm {
    async fn read_from(multipart: &mut Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or("").to_string();
            match name.as_str() {
                "title" => form.title = Some(field.text().await?),
                "description" => form.description = Some(field.text().await?),
                "thumbnail" => form.thumbnail = Some(spool_to_temp(field).await?),
                _ => {}
            }
        }
        Ok(form)
    }
}

/// Empty or absent text fields are no-ops, never clears.
fn provided(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub async fn update_video(
    Extension(db): Extension<Arc<DatabaseConnection>>,
    Extension(storage): Extension<MediaStorage>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(video_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let id = parse_video_id(&video_id)?;
    let video = find_video(&db, id).await?;

    if video.owner_id != user_id {
        return Err(ApiError::Forbidden(
            "You are not allowed to update this video".to_string(),
        ));
    }

    let form = UpdateForm::read_from(&mut multipart).await?;
    let mut active = video.into_active_model();

    // Upload failure aborts before any field mutation is persisted.
    if let Some(path) = form.thumbnail {
        let uploaded = storage
            .upload(&path)
            .await
            .ok_or_else(|| ApiError::Upload("Thumbnail upload failed".to_string()))?;
        active.thumbnail = Set(uploaded.url);
    }

    if let Some(title) = provided(form.title) {
        active.title = Set(title);
    }
    if let Some(description) = provided(form.description) {
        active.description = Set(description);
    }
    active.updated_at = Set(chrono::Utc::now().fixed_offset());

    let video = active.update(db.as_ref()).await?;
    Ok(ApiResponse::ok(video, "Video updated successfully").into_response())
}

pub async fn delete_video(
    Extension(db): Extension<Arc<DatabaseConnection>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(video_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_video_id(&video_id)?;
    let video = find_video(&db, id).await?;

    if video.owner_id != user_id {
        return Err(ApiError::Forbidden(
            "You are not allowed to delete this video".to_string(),
        ));
    }

    // Hard delete. Remote assets are left behind (accepted gap).
    video.delete(db.as_ref()).await?;

    metrics::gauge!("vidtube_videos_total").decrement(1.0);

    Ok(ApiResponse::ok(json!({}), "Video deleted successfully").into_response())
}

pub async fn toggle_publish_status(
    Extension(db): Extension<Arc<DatabaseConnection>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(video_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_video_id(&video_id)?;
    let video = find_video(&db, id).await?;

    if video.owner_id != user_id {
        return Err(ApiError::Forbidden(
            "You are not allowed to modify this video".to_string(),
        ));
    }

    let published = !video.is_published;
    let mut active = video.into_active_model();
    active.is_published = Set(published);
    active.updated_at = Set(chrono::Utc::now().fixed_offset());
    let video = active.update(db.as_ref()).await?;

    let message = if published {
        "Video published successfully"
    } else {
        "Video unpublished successfully"
    };
    Ok(ApiResponse::ok(video, message).into_response())
}
