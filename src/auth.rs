use axum::http::{header::AUTHORIZATION, HeaderMap};
use tracing::warn;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::Role,
    store::{IdentityVerifier, RoleStore},
};

fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AppError::MissingAuthorization)?
        .to_str()
        .map_err(|_| AppError::Unauthorized)?;

    let token = value
        .strip_prefix("Bearer ")
        .unwrap_or(value)
        .trim();

    if token.is_empty() {
        return Err(AppError::Unauthorized);
    }

    Ok(token)
}

/// Resolves the caller and checks the admin role before anything else runs.
pub async fn require_admin(
    headers: &HeaderMap,
    verifier: &dyn IdentityVerifier,
    roles: &dyn RoleStore,
) -> Result<Uuid, AppError> {
    let token = bearer_token(headers)?;

    let user_id = verifier
        .verify_token(token)
        .await
        .map_err(|e| {
            warn!("Token verification failed: {e:#}");
            AppError::Unauthorized
        })?
        .ok_or(AppError::Unauthorized)?;

    if !roles.has_role(user_id, Role::Admin).await? {
        warn!(user = %user_id, "Non-admin attempted an admin action");
        return Err(AppError::Forbidden);
    }

    Ok(user_id)
}
