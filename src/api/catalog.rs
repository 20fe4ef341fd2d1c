//! Catalog API endpoints: products, recipes and videos.
//!
//! Reads are public. Writes are mounted under the admin router and keep the
//! search index in step with the database.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{
    CreateProductRequest, CreateRecipeRequest, CreateVideoRequest, PricedIngredient, Product,
    Recipe, UpdateProductRequest, UpdateRecipeRequest, UpdateVideoRequest, Video,
};
use crate::search::SearchKind;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CategoryQuery {
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoQuery {
    pub recipe_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PortionsQuery {
    /// Multiplier applied to each ingredient (default: 1).
    #[serde(default = "default_portions")]
    pub portions: i64,
}

fn default_portions() -> i64 {
    1
}

// ==================== PRODUCTS ====================

/// GET /api/products - List products, optionally by category.
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<CategoryQuery>,
) -> ApiResult<Vec<Product>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_products(query.category.as_deref()).await {
        Ok(products) => success(products, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/products/:id - Get a single product.
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Product> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_product(&id).await {
        Ok(Some(product)) => success(product, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("Product {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/admin/products - Create a product.
pub async fn create_product(
    State(state): State<AppState>,
    Json(request): Json<CreateProductRequest>,
) -> ApiResult<Product> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.create_product(&request).await {
        Ok(product) => {
            if let Err(e) = state.search.index_product(&product).await {
                tracing::warn!("Failed to index product: {}", e);
            }

            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(product, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/admin/products/:id - Update a product.
pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateProductRequest>,
) -> ApiResult<Product> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.update_product(&id, &request).await {
        Ok(product) => {
            if let Err(e) = state.search.index_product(&product).await {
                tracing::warn!("Failed to re-index product: {}", e);
            }

            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(product, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/admin/products/:id - Delete a product.
pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.delete_product(&id).await {
        Ok(()) => {
            if let Err(e) = state.search.remove(SearchKind::Product, &id).await {
                tracing::warn!("Failed to remove product from index: {}", e);
            }

            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success((), new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

// ==================== RECIPES ====================

/// GET /api/recipes - List recipes, optionally by category.
pub async fn list_recipes(
    State(state): State<AppState>,
    Query(query): Query<CategoryQuery>,
) -> ApiResult<Vec<Recipe>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_recipes(query.category.as_deref()).await {
        Ok(recipes) => success(recipes, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/recipes/:id - Get a single recipe.
pub async fn get_recipe(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Recipe> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_recipe(&id).await {
        Ok(Some(recipe)) => success(recipe, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("Recipe {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/recipes/:id/ingredients - Priced ingredient list for some portions.
pub async fn get_recipe_ingredients(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PortionsQuery>,
) -> ApiResult<Vec<PricedIngredient>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if query.portions < 1 {
        return error(
            AppError::Validation("Portions must be at least 1".to_string()),
            revision_id,
        );
    }

    match state.repo.recipe_ingredients(&id, query.portions).await {
        Ok(ingredients) => success(ingredients, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/admin/recipes - Create a recipe.
pub async fn create_recipe(
    State(state): State<AppState>,
    Json(request): Json<CreateRecipeRequest>,
) -> ApiResult<Recipe> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.create_recipe(&request).await {
        Ok(recipe) => {
            if let Err(e) = state.search.index_recipe(&recipe).await {
                tracing::warn!("Failed to index recipe: {}", e);
            }

            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(recipe, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/admin/recipes/:id - Update a recipe.
pub async fn update_recipe(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateRecipeRequest>,
) -> ApiResult<Recipe> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.update_recipe(&id, &request).await {
        Ok(recipe) => {
            if let Err(e) = state.search.index_recipe(&recipe).await {
                tracing::warn!("Failed to re-index recipe: {}", e);
            }

            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(recipe, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/admin/recipes/:id - Delete a recipe.
pub async fn delete_recipe(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.delete_recipe(&id).await {
        Ok(()) => {
            if let Err(e) = state.search.remove(SearchKind::Recipe, &id).await {
                tracing::warn!("Failed to remove recipe from index: {}", e);
            }

            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success((), new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

// ==================== VIDEOS ====================

/// GET /api/videos - List videos, optionally those attached to one recipe.
pub async fn list_videos(
    State(state): State<AppState>,
    Query(query): Query<VideoQuery>,
) -> ApiResult<Vec<Video>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_videos(query.recipe_id.as_deref()).await {
        Ok(videos) => success(videos, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/videos/:id
pub async fn get_video(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Video> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_video(&id).await {
        Ok(Some(video)) => success(video, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("Video {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/admin/videos
pub async fn create_video(
    State(state): State<AppState>,
    Json(request): Json<CreateVideoRequest>,
) -> ApiResult<Video> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.create_video(&request).await {
        Ok(video) => {
            if let Err(e) = state.search.index_video(&video).await {
                tracing::warn!("Failed to index video: {}", e);
            }

            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(video, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/admin/videos/:id
pub async fn update_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateVideoRequest>,
) -> ApiResult<Video> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.update_video(&id, &request).await {
        Ok(video) => {
            if let Err(e) = state.search.index_video(&video).await {
                tracing::warn!("Failed to re-index video: {}", e);
            }

            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(video, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/admin/videos/:id
pub async fn delete_video(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<()> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.delete_video(&id).await {
        Ok(()) => {
            if let Err(e) = state.search.remove(SearchKind::Video, &id).await {
                tracing::warn!("Failed to remove video from index: {}", e);
            }

            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success((), new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}
