use axum::{
    body::Body as AxumBody,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::web::models::{AuthenticatedUser, Claims};
use crate::web::{AppState, error::AppError};

const TOKEN_COOKIE: &str = "token";

/// Resolves the caller from a bearer token or the `token` cookie and makes it
/// available to handlers as an `AuthenticatedUser` extension.
pub async fn auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut req: Request<AxumBody>,
    next: Next,
) -> Result<Response, AppError> {
    let token = presented_token(&req, &jar).ok_or(AppError::InvalidCredentials)?;
    let user = authenticate(&token, &state.config.jwt_secret)?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

fn presented_token(req: &Request<AxumBody>, jar: &CookieJar) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| jar.get(TOKEN_COOKIE).map(|c| c.value().to_string()))
}

/// Checks signature and expiry with no leeway. Every resource is scoped by
/// `user_id`, so a token without a usable one is rejected outright.
pub fn authenticate(token: &str, secret: &str) -> Result<AuthenticatedUser, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.set_required_spec_claims(&["exp", "sub"]);

    let claims = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => {
                debug!("Rejected an expired token.");
                AppError::TokenExpired
            }
            _ => {
                warn!(error = ?e, "Rejected request with an invalid token.");
                AppError::InvalidCredentials
            }
        })?
        .claims;

    if claims.user_id <= 0 {
        warn!(user_id = claims.user_id, "Rejected token without a valid user id.");
        return Err(AppError::InvalidCredentials);
    }
    Ok(AuthenticatedUser {
        id: claims.user_id,
        username: claims.sub,
    })
}
