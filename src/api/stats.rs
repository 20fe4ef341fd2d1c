//! Revision and dashboard endpoints.

use axum::extract::State;

use super::{success, ApiResult};
use crate::errors::AppErrorWithRevision;
use crate::models::{DashboardStats, RevisionInfo};
use crate::AppState;

/// GET /api/revision - Get the current revision info.
pub async fn get_revision(State(state): State<AppState>) -> ApiResult<RevisionInfo> {
    let revision_info = state
        .repo
        .get_revision_info()
        .await
        .map_err(|e| AppErrorWithRevision {
            error: e,
            revision_id: 0,
        })?;

    let revision_id = revision_info.revision_id;
    success(revision_info, revision_id)
}

/// GET /api/admin/stats - Back-office dashboard counters.
pub async fn get_stats(State(state): State<AppState>) -> ApiResult<DashboardStats> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let stats = state
        .repo
        .dashboard_stats()
        .await
        .map_err(|e| AppErrorWithRevision {
            error: e,
            revision_id,
        })?;

    success(stats, revision_id)
}
