use axum::{
    routing::{get, patch, post},
    Extension, Router,
};
use sea_orm::{Database, DatabaseConnection};
use std::net::SocketAddr;
use std::sync::Arc;
use vidtube_server::{api, migrator, storage::MediaStorage};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    vidtube_server::telemetry::init_telemetry("vidtube-server");

    let (prometheus_layer, metric_handle) = axum_prometheus::PrometheusMetricLayer::pair();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let db = Database::connect(&database_url)
        .await
        .expect("Failed to connect to database");

    let media_storage = MediaStorage::new(
        std::env::var("MEDIA_CLOUD_NAME").expect("MEDIA_CLOUD_NAME must be set"),
        std::env::var("MEDIA_API_KEY").expect("MEDIA_API_KEY must be set"),
        std::env::var("MEDIA_API_SECRET").expect("MEDIA_API_SECRET must be set"),
    );

    use sea_orm_migration::MigratorTrait;
    migrator::Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    vidtube_server::metrics::init_metrics(&db).await;

    // DatabaseConnection is not Clone under sea-orm's mock feature, which
    // test builds enable; the extension shares it behind Arc instead.
    let app = app(Arc::new(db), media_storage, prometheus_layer, metric_handle);

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

async fn health_check() -> &'static str {
    "OK"
}

fn app(
    db: Arc<DatabaseConnection>,
    media_storage: MediaStorage,
    prometheus_layer: axum_prometheus::PrometheusMetricLayer<'static>,
    metric_handle: metrics_exporter_prometheus::PrometheusHandle,
) -> Router {
    // List and read-by-id are public; only mutations require a session.
    let public_routes = Router::new()
        .route("/register", post(api::auth::register))
        .route("/login", post(api::auth::login))
        .route("/videos", get(api::video::list_videos))
        .route("/videos/:id", get(api::video::get_video));

    let protected_routes = Router::new()
        .route("/videos", post(api::video::publish_video))
        .route(
            "/videos/:id",
            patch(api::video::update_video).delete(api::video::delete_video),
        )
        .route(
            "/videos/:id/toggle-publish",
            patch(api::video::toggle_publish_status),
        )
        .route_layer(axum::middleware::from_fn(api::middleware::auth_middleware));

    let frontend_origin =
        std::env::var("FRONTEND_ORIGIN").unwrap_or_else(|_| "http://localhost:3000".to_string());

    Router::new()
        .route("/health", get(health_check))
        .merge(public_routes)
        .merge(protected_routes)
        .layer(Extension(db))
        .layer(Extension(media_storage))
        .layer(tower_cookies::CookieManagerLayer::new())
        .layer(prometheus_layer)
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<axum::body::Body>| {
                    let matched_path = request
                        .extensions()
                        .get::<axum::extract::MatchedPath>()
                        .map(|matched| matched.as_str());
                    let span_name = if let Some(path) = matched_path {
                        format!("{} {}", request.method(), path)
                    } else {
                        format!("{} {}", request.method(), request.uri().path())
                    };

                    tracing::info_span!(
                        "request",
                        "otel.name" = span_name,
                        method = ?request.method(),
                        uri = ?request.uri(),
                        // Filled in by handlers
                        action = tracing::field::Empty,
                        user_id = tracing::field::Empty,
                        video_id = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record("status", tracing::field::display(response.status()));
                        span.record("latency", tracing::field::debug(latency));
                        tracing::info!("request completed");
                    },
                ),
        )
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(
                    frontend_origin
                        .parse::<axum::http::HeaderValue>()
                        .expect("FRONTEND_ORIGIN must be a valid origin"),
                )
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PATCH,
                    axum::http::Method::DELETE,
                ])
                .allow_headers([axum::http::header::CONTENT_TYPE])
                .allow_credentials(true),
        )
        .route("/metrics", get(|| async move { metric_handle.render() }))
        .layer(axum::extract::DefaultBodyLimit::max(100 * 1024 * 1024))
}
