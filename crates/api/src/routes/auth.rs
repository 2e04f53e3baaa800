//! Authentication routes

use axum::{extract::State, http::HeaderMap, Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::{self, sessions, AuthContext, AUTH_TOKEN_HEADER},
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// POST /auth/register
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<Json<Value>> {
    if !state.config.enable_signup {
        return Err(ApiError::Forbidden);
    }

    let email = request.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(ApiError::Validation("invalid email".to_string()));
    }
    auth::validate_password_strength(&request.password)
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let password_hash = auth::hash_password(&request.password).map_err(|e| {
        tracing::error!(error = %e, "Password hashing failed");
        ApiError::Internal
    })?;

    let user_id: Uuid = sqlx::query_scalar(
        "INSERT INTO users (email, password_hash) VALUES ($1, $2) RETURNING id",
    )
    .bind(&email)
    .bind(&password_hash)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| match ApiError::from(e) {
        ApiError::Conflict(_) => ApiError::Conflict("Email already registered".to_string()),
        other => other,
    })?;

    let token = sessions::create_session(
        &state.pool,
        user_id,
        state.config.session_ttl_hours,
        client_ip(&headers).as_deref(),
        user_agent(&headers).as_deref(),
    )
    .await?;

    tracing::info!(user_id = %user_id, "User registered");

    Ok(Json(json!({
        "token": token,
        "user_id": user_id,
        "name": request.name,
    })))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<Value>> {
    let email = request.email.trim().to_lowercase();

    let row: Option<(Uuid, Option<String>)> =
        sqlx::query_as("SELECT id, password_hash FROM users WHERE email = $1")
            .bind(&email)
            .fetch_optional(&state.pool)
            .await?;

    let (user_id, password_hash) = match row {
        Some((id, Some(hash))) => (id, hash),
        // OAuth-only accounts and unknown emails fail identically
        _ => return Err(ApiError::InvalidCredentials),
    };

    let valid = auth::verify_password(&request.password, &password_hash)
        .map_err(|_| ApiError::InvalidCredentials)?;
    if !valid {
        return Err(ApiError::InvalidCredentials);
    }

    let token = sessions::create_session(
        &state.pool,
        user_id,
        state.config.session_ttl_hours,
        client_ip(&headers).as_deref(),
        user_agent(&headers).as_deref(),
    )
    .await?;

    tracing::info!(user_id = %user_id, "User logged in");

    Ok(Json(json!({ "token": token, "user_id": user_id })))
}

/// POST /auth/logout
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    if let Some(token) = headers.get(AUTH_TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        sessions::revoke_session(&state.pool, token).await?;
    }
    Ok(Json(json!({ "ok": true })))
}

/// GET /auth/me
pub async fn me(Extension(ctx): Extension<AuthContext>) -> ApiResult<Json<Value>> {
    Ok(Json(json!({
        "user_id": ctx.user_id,
        "family_id": ctx.family_id,
        "member_id": ctx.member_id,
        "access_role": ctx.access_role,
    })))
}

/// POST /auth/change-password
///
/// Revokes every other session of the user; the current one stays valid.
pub async fn change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<ChangePasswordRequest>,
) -> ApiResult<Json<Value>> {
    auth::validate_password_strength(&request.new_password)
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let current_hash: Option<Option<String>> =
        sqlx::query_scalar("SELECT password_hash FROM users WHERE id = $1")
            .bind(ctx.user_id)
            .fetch_optional(&state.pool)
            .await?;
    let current_hash = current_hash.flatten().ok_or(ApiError::InvalidCredentials)?;

    let valid = auth::verify_password(&request.current_password, &current_hash)
        .map_err(|_| ApiError::InvalidCredentials)?;
    if !valid {
        return Err(ApiError::InvalidCredentials);
    }

    let new_hash = auth::hash_password(&request.new_password).map_err(|e| {
        tracing::error!(error = %e, "Password hashing failed");
        ApiError::Internal
    })?;

    sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
        .bind(ctx.user_id)
        .bind(&new_hash)
        .execute(&state.pool)
        .await?;

    let keep = headers.get(AUTH_TOKEN_HEADER).and_then(|v| v.to_str().ok());
    let revoked = sessions::revoke_all_for_user(&state.pool, ctx.user_id, keep).await?;

    Ok(Json(json!({ "ok": true, "revoked_sessions": revoked })))
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-real-ip")
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|h| h.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get("user-agent")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
}
