use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter};

use crate::entities::{user, video};

/// Seed gauges from current table counts so dashboards start from real
/// numbers instead of zero after a restart.
pub async fn init_metrics(db: &DatabaseConnection) {
    let user_count = user::Entity::find().count(db).await.unwrap_or(0);
    metrics::gauge!("vidtube_users_total").set(user_count as f64);

    let video_count = video::Entity::find().count(db).await.unwrap_or(0);
    metrics::gauge!("vidtube_videos_total").set(video_count as f64);

    let published_count = video::Entity::find()
        .filter(video::Column::IsPublished.eq(true))
        .count(db)
        .await
        .unwrap_or(0);
    metrics::gauge!("vidtube_videos_published_total").set(published_count as f64);

    tracing::info!(
        users = user_count,
        videos = video_count,
        published = published_count,
        "initialized metrics"
    );
}
