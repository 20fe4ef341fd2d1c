//! Profile API endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{CreateUserRequest, SetRoleRequest, UpdateUserRequest, UserProfile, UserRole};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RoleFilter {
    pub role: Option<String>,
}

/// POST /api/users - Register a customer profile.
pub async fn create_user(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> ApiResult<UserProfile> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.create_user(&request).await {
        Ok(user) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(user, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/users/:id
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<UserProfile> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_user(&id).await {
        Ok(Some(user)) => success(user, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("User {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/users/:id - Update contact details.
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateUserRequest>,
) -> ApiResult<UserProfile> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.update_user(&id, &request).await {
        Ok(user) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(user, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/admin/users - All profiles, optionally by role.
pub async fn list_users(
    State(state): State<AppState>,
    Query(filter): Query<RoleFilter>,
) -> ApiResult<Vec<UserProfile>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let role = match filter.role.as_deref() {
        Some(raw) => match UserRole::from_str(raw) {
            Some(role) => Some(role),
            None => {
                return error(
                    AppError::BadRequest(format!("Unknown role: {}", raw)),
                    revision_id,
                )
            }
        },
        None => None,
    };

    match state.repo.list_users(role).await {
        Ok(users) => success(users, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/admin/users/:id/role
pub async fn set_user_role(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SetRoleRequest>,
) -> ApiResult<UserProfile> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.set_user_role(&id, request.role).await {
        Ok(user) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(user, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}
