use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::api::error::ApiError;

pub const SESSION_COOKIE: &str = "vidtube_session";

/// Authenticated caller identity, resolved here and injected into every
/// protected handler as a request extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub Uuid);

pub async fn auth_middleware(cookies: Cookies, mut request: Request, next: Next) -> Response {
    if let Some(cookie) = cookies.get(SESSION_COOKIE) {
        if let Ok(user_id) = cookie.value().parse::<Uuid>() {
            request.extensions_mut().insert(AuthUser(user_id));
            return next.run(request).await;
        }
    }
    ApiError::Unauthorized("Authentication required".to_string()).into_response()
}
