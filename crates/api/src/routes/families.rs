//! Family and membership routes
//!
//! The minimum surface the authorization context needs: creating a family
//! (creator becomes admin), listing it, and adding members. A user belongs to
//! at most one family; re-joining requires an explicit force leave.

use axum::{extract::State, Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use hearth_shared::AccessRole;

use crate::{
    auth::{Action, AuthContext, Module},
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct CreateFamilyRequest {
    pub name: String,
    #[serde(default)]
    pub member_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub name: String,
    pub access_role: AccessRole,
    /// Absent for shell/child profiles without an account
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub granular_permissions: Option<Value>,
}

/// POST /families - create a family; the creator becomes its admin
pub async fn create_family(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<CreateFamilyRequest>,
) -> ApiResult<Json<Value>> {
    if ctx.family_id.is_some() {
        return Err(ApiError::Conflict(
            "User already belongs to a family".to_string(),
        ));
    }
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("family name must not be empty".to_string()));
    }

    let member_name = request
        .member_name
        .unwrap_or_else(|| "Admin".to_string());

    let mut tx = state.pool.begin().await?;
    let family_id: Uuid =
        sqlx::query_scalar("INSERT INTO families (name) VALUES ($1) RETURNING id")
            .bind(name)
            .fetch_one(&mut *tx)
            .await?;
    let member_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO family_members (family_id, user_id, name, access_role)
        VALUES ($1, $2, $3, 'admin')
        RETURNING id
        "#,
    )
    .bind(family_id)
    .bind(ctx.user_id)
    .bind(&member_name)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(family_id = %family_id, user_id = %ctx.user_id, "Family created");

    Ok(Json(json!({
        "family_id": family_id,
        "member_id": member_id,
        "access_role": "admin",
    })))
}

/// GET /families - the caller's family and members
pub async fn get_family(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<Value>> {
    let scope = ctx.require_family()?;

    let family: Option<(String, Option<String>)> =
        sqlx::query_as("SELECT name, logo_url FROM families WHERE id = $1")
            .bind(scope.family_id)
            .fetch_optional(&state.pool)
            .await?;
    let (name, logo_url) = family.ok_or(ApiError::NotFound)?;

    #[derive(serde::Serialize, sqlx::FromRow)]
    struct MemberView {
        id: Uuid,
        user_id: Option<Uuid>,
        name: String,
        access_role: AccessRole,
    }

    let members: Vec<MemberView> = sqlx::query_as(
        "SELECT id, user_id, name, access_role FROM family_members WHERE family_id = $1 ORDER BY created_at",
    )
    .bind(scope.family_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(json!({
        "family_id": scope.family_id,
        "name": name,
        "logo_url": logo_url,
        "members": members,
    })))
}

/// POST /families/members - add a member (governance capability)
pub async fn add_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<AddMemberRequest>,
) -> ApiResult<Json<Value>> {
    let scope = ctx.require_family()?;
    ctx.require(Module::Family, Action::Invite)?;

    if let Some(user_id) = request.user_id {
        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT family_id FROM family_members WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await?;
        if existing.is_some() {
            return Err(ApiError::Conflict(
                "User already belongs to a family".to_string(),
            ));
        }
    }

    let member_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO family_members (family_id, user_id, name, access_role, granular_permissions)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(scope.family_id)
    .bind(request.user_id)
    .bind(request.name.trim())
    .bind(request.access_role)
    .bind(request.granular_permissions)
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(
        family_id = %scope.family_id,
        member_id = %member_id,
        role = %request.access_role,
        "Family member added"
    );

    Ok(Json(json!({ "member_id": member_id })))
}
