//! Search API endpoints.

use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::search::{SearchHit, SearchKind, MAX_RESULT_WINDOW};
use crate::AppState;

/// Search query parameters.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    /// Search query string.
    pub q: String,
    /// Restrict to `product`, `recipe` or `video`.
    pub kind: Option<String>,
    /// Maximum number of results (default: 20).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// Maximum number of search results allowed.
const MAX_SEARCH_LIMIT: usize = 100;

/// GET /api/search - Search products, recipes and videos.
pub async fn search_catalog(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> ApiResult<SearchResponse> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let kind = match params.kind.as_deref() {
        Some(raw) => match SearchKind::from_str(raw) {
            Some(kind) => Some(kind),
            None => {
                return error(
                    AppError::BadRequest(format!("Unknown search kind: {}", raw)),
                    revision_id,
                )
            }
        },
        None => None,
    };

    if params.limit == 0 {
        return error(
            AppError::BadRequest("limit must be at least 1".to_string()),
            revision_id,
        );
    }
    if params.offset >= MAX_RESULT_WINDOW {
        return error(
            AppError::BadRequest(format!("offset must be below {}", MAX_RESULT_WINDOW)),
            revision_id,
        );
    }

    let limit = params.limit.min(MAX_SEARCH_LIMIT);

    let results = match state.search.search(&params.q, kind, limit, params.offset) {
        Ok(results) => results,
        Err(e) => return error(e, revision_id),
    };

    let total = results.len();

    success(
        SearchResponse {
            results,
            total,
            limit,
            offset: params.offset,
        },
        revision_id,
    )
}
