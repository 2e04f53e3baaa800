//! Authentication middleware
//!
//! Resolves the `X-Auth-Token` bearer header to an `AuthContext` carrying the
//! user, their family membership and role. Handlers that need a family scope
//! call `require_family`; capability checks go through `can`.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use hearth_shared::AccessRole;

use super::permissions::{self, Action, Grant, Module};
use super::sessions;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Header carrying the bearer session token
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Authenticated request context
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub family_id: Option<Uuid>,
    pub member_id: Option<Uuid>,
    pub access_role: Option<AccessRole>,
    pub granular_permissions: Option<Value>,
}

/// The family-scoped part of an auth context
#[derive(Debug, Clone, Copy)]
pub struct FamilyScope {
    pub user_id: Uuid,
    pub family_id: Uuid,
    pub member_id: Uuid,
    pub access_role: AccessRole,
}

impl AuthContext {
    /// Family scope, or 400 for users without a membership
    pub fn require_family(&self) -> ApiResult<FamilyScope> {
        match (self.family_id, self.member_id, self.access_role) {
            (Some(family_id), Some(member_id), Some(access_role)) => Ok(FamilyScope {
                user_id: self.user_id,
                family_id,
                member_id,
                access_role,
            }),
            _ => Err(ApiError::NoFamily),
        }
    }

    /// Capability check against the static matrix plus granular overrides
    pub fn can(&self, module: Module, action: Action) -> Grant {
        match self.access_role {
            Some(role) => {
                permissions::evaluate(role, self.granular_permissions.as_ref(), module, action)
            }
            None => Grant::Denied,
        }
    }

    /// Capability check that fails with 403
    pub fn require(&self, module: Module, action: Action) -> ApiResult<Grant> {
        let grant = self.can(module, action);
        if !grant.permits() {
            return Err(ApiError::Forbidden);
        }
        Ok(grant)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MembershipRow {
    id: Uuid,
    family_id: Uuid,
    access_role: AccessRole,
    granular_permissions: Option<Value>,
}

/// Resolve the bearer token from headers into an `AuthContext`
pub async fn authenticate(pool: &PgPool, headers: &HeaderMap) -> ApiResult<AuthContext> {
    let token = headers
        .get(AUTH_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::Unauthorized)?;

    let user_id = sessions::resolve_token(pool, token).await?;

    let membership: Option<MembershipRow> = sqlx::query_as(
        r#"
        SELECT id, family_id, access_role, granular_permissions
        FROM family_members
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(match membership {
        Some(m) => AuthContext {
            user_id,
            family_id: Some(m.family_id),
            member_id: Some(m.id),
            access_role: Some(m.access_role),
            granular_permissions: m.granular_permissions,
        },
        None => AuthContext {
            user_id,
            family_id: None,
            member_id: None,
            access_role: None,
            granular_permissions: None,
        },
    })
}

/// Axum middleware: authenticate and stash the context as an extension
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&state.pool, request.headers()).await?;
    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}
