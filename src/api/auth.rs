use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::extract::{Extension, Json};
use axum::response::{IntoResponse, Response};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tower_cookies::{Cookie, Cookies};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::middleware::SESSION_COOKIE;
use crate::api::response::ApiResponse;
use crate::entities::user;

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    username: String,
    email: String,
    full_name: String,
    password: String,
    avatar: Option<String>,
}

pub async fn register(
    Extension(db): Extension<Arc<DatabaseConnection>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Response, ApiError> {
    if payload.username.trim().is_empty()
        || payload.email.trim().is_empty()
        || payload.password.is_empty()
    {
        return Err(ApiError::Validation(
            "Username, email and password are required".to_string(),
        ));
    }

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(payload.password.as_bytes(), &salt)
        .map_err(|_| ApiError::Internal("Failed to hash password".to_string()))?
        .to_string();

    let now = chrono::Utc::now().fixed_offset();
    let new_user = user::ActiveModel {
        id: Set(Uuid::new_v4()),
        username: Set(payload.username),
        email: Set(payload.email),
        full_name: Set(payload.full_name),
        avatar: Set(payload.avatar),
        password_hash: Set(password_hash),
        created_at: Set(now),
        updated_at: Set(now),
    };

    match new_user.insert(db.as_ref()).await {
        Ok(user) => {
            tracing::Span::current()
                .record("action", "register_user")
                .record("user_id", tracing::field::display(user.id));
            metrics::counter!("vidtube_users_registered_total").increment(1);
            metrics::gauge!("vidtube_users_total").increment(1.0);

            Ok(ApiResponse::created(user, "User registered successfully").into_response())
        }
        // Postgres unique violation on username or email
        Err(e) if e.to_string().contains("duplicate key value violates unique constraint") => {
            Err(ApiError::Conflict(
                "Username or email already exists".to_string(),
            ))
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(serde::Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

pub async fn login(
    Extension(db): Extension<Arc<DatabaseConnection>>,
    cookies: Cookies,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let user = user::Entity::find()
        .filter(user::Column::Email.eq(payload.email))
        .one(db.as_ref())
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid email or password".to_string()))?;

    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|_| ApiError::Internal("Invalid password hash in DB".to_string()))?;

    if Argon2::default()
        .verify_password(payload.password.as_bytes(), &parsed_hash)
        .is_err()
    {
        return Err(ApiError::Unauthorized(
            "Invalid email or password".to_string(),
        ));
    }

    let mut cookie = Cookie::new(SESSION_COOKIE, user.id.to_string());
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookies.add(cookie);

    tracing::Span::current()
        .record("action", "login_user")
        .record("user_id", tracing::field::display(user.id));

    Ok(ApiResponse::ok(user, "Login successful").into_response())
}
