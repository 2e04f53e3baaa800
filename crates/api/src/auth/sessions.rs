//! Opaque bearer session tokens
//!
//! Tokens are 32 random bytes, handed to the client hex-encoded and stored
//! only as a SHA-256 hash. Expired or revoked sessions never authorize; a
//! password change revokes every other session of the user.

use sha2::{Digest, Sha256};
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// Generate a secure random token: 32 bytes, hex-encoded (256 bits, URL-safe)
fn generate_token() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}

/// Hash a token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Create a session; returns the raw token to hand to the client
pub async fn create_session(
    pool: &PgPool,
    user_id: Uuid,
    ttl_hours: i64,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> ApiResult<String> {
    let raw_token = generate_token();
    let token_hash = hash_token(&raw_token);
    let expires_at = OffsetDateTime::now_utc() + Duration::hours(ttl_hours);

    sqlx::query(
        r#"
        INSERT INTO sessions (user_id, token_hash, expires_at, ip_address, user_agent)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(user_id)
    .bind(&token_hash)
    .bind(expires_at)
    .bind(ip_address)
    .bind(user_agent)
    .execute(pool)
    .await?;

    tracing::info!(user_id = %user_id, expires_at = %expires_at, "Session created");

    Ok(raw_token)
}

/// Resolve a presented token to its user. Expired and revoked sessions fail.
pub async fn resolve_token(pool: &PgPool, raw_token: &str) -> ApiResult<Uuid> {
    let token_hash = hash_token(raw_token);

    let user_id: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT user_id
        FROM sessions
        WHERE token_hash = $1
          AND revoked_at IS NULL
          AND expires_at > NOW()
        "#,
    )
    .bind(&token_hash)
    .fetch_optional(pool)
    .await?;

    user_id.ok_or(ApiError::Unauthorized)
}

/// Revoke a single session by its raw token
pub async fn revoke_session(pool: &PgPool, raw_token: &str) -> ApiResult<()> {
    let token_hash = hash_token(raw_token);
    sqlx::query("UPDATE sessions SET revoked_at = NOW() WHERE token_hash = $1 AND revoked_at IS NULL")
        .bind(&token_hash)
        .execute(pool)
        .await?;
    Ok(())
}

/// Revoke every session of a user except, optionally, the current one.
/// Called on password change.
pub async fn revoke_all_for_user(
    pool: &PgPool,
    user_id: Uuid,
    keep_token: Option<&str>,
) -> ApiResult<u64> {
    let keep_hash = keep_token.map(hash_token);
    let result = sqlx::query(
        r#"
        UPDATE sessions
        SET revoked_at = NOW()
        WHERE user_id = $1
          AND revoked_at IS NULL
          AND ($2::VARCHAR IS NULL OR token_hash <> $2)
        "#,
    )
    .bind(user_id)
    .bind(keep_hash)
    .execute(pool)
    .await?;

    let revoked = result.rows_affected();
    if revoked > 0 {
        tracing::info!(user_id = %user_id, revoked = revoked, "Sessions revoked");
    }
    Ok(revoked)
}

/// Delete sessions past their expiry; periodic maintenance
pub async fn purge_expired(pool: &PgPool) -> ApiResult<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at < NOW() - INTERVAL '7 days'")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_long_random_and_url_safe() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn stored_hash_differs_from_token() {
        let token = generate_token();
        let hash = hash_token(&token);
        assert_ne!(token, hash);
        assert_eq!(hash, hash_token(&token));
    }
}
