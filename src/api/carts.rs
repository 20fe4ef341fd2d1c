//! Cart API endpoints.
//!
//! Every mutation answers with the full main cart so clients never have to
//! recompute totals themselves.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{
    AddCartItemRequest, AddRecipeCartRequest, CreatePreconfiguredCartRequest, MainCart,
    PreconfiguredCart, SelectPreconfiguredRequest, SetQuantityRequest,
    UpdatePortionsRequest, UpdatePreconfiguredCartRequest,
};
use crate::AppState;

/// Wrap a cart mutation result with the post-write revision.
async fn mutation_result(
    state: &AppState,
    revision_id: i64,
    result: Result<MainCart, AppError>,
) -> ApiResult<MainCart> {
    match result {
        Ok(cart) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(cart, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

// ==================== MAIN CART ====================

/// GET /api/users/:id/cart - The aggregated main cart.
pub async fn get_cart(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<MainCart> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_main_cart(&user_id).await {
        Ok(cart) => success(cart, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/users/:id/cart - Empty every sub-cart.
pub async fn clear_cart(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<MainCart> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let result = state.repo.clear_cart(&user_id).await;
    mutation_result(&state, revision_id, result).await
}

// ==================== PERSONAL ITEMS ====================

/// POST /api/users/:id/cart/items - Add a product (increments if present).
pub async fn add_cart_item(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<AddCartItemRequest>,
) -> ApiResult<MainCart> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let result = state.repo.add_cart_item(&user_id, &request).await;
    mutation_result(&state, revision_id, result).await
}

/// PUT /api/users/:id/cart/items/:product_id - Set a quantity; zero removes.
pub async fn set_cart_item_quantity(
    State(state): State<AppState>,
    Path((user_id, product_id)): Path<(String, String)>,
    Json(request): Json<SetQuantityRequest>,
) -> ApiResult<MainCart> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let result = state
        .repo
        .set_cart_item_quantity(&user_id, &product_id, request.quantity)
        .await;
    mutation_result(&state, revision_id, result).await
}

/// DELETE /api/users/:id/cart/items/:product_id
pub async fn remove_cart_item(
    State(state): State<AppState>,
    Path((user_id, product_id)): Path<(String, String)>,
) -> ApiResult<MainCart> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let result = state.repo.remove_cart_item(&user_id, &product_id).await;
    mutation_result(&state, revision_id, result).await
}

// ==================== RECIPE CARTS ====================

/// POST /api/users/:id/cart/recipes - Add a recipe scaled to some portions.
pub async fn add_recipe_cart(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<AddRecipeCartRequest>,
) -> ApiResult<MainCart> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let result = state.repo.add_recipe_cart(&user_id, &request).await;
    mutation_result(&state, revision_id, result).await
}

/// PUT /api/users/:id/cart/recipes/:recipe_cart_id - Change portions.
pub async fn update_recipe_cart(
    State(state): State<AppState>,
    Path((user_id, recipe_cart_id)): Path<(String, String)>,
    Json(request): Json<UpdatePortionsRequest>,
) -> ApiResult<MainCart> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let result = state
        .repo
        .update_recipe_cart(&user_id, &recipe_cart_id, request.portions)
        .await;
    mutation_result(&state, revision_id, result).await
}

/// DELETE /api/users/:id/cart/recipes/:recipe_cart_id
pub async fn remove_recipe_cart(
    State(state): State<AppState>,
    Path((user_id, recipe_cart_id)): Path<(String, String)>,
) -> ApiResult<MainCart> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let result = state.repo.remove_recipe_cart(&user_id, &recipe_cart_id).await;
    mutation_result(&state, revision_id, result).await
}

// ==================== PRECONFIGURED SELECTIONS ====================

/// POST /api/users/:id/cart/preconfigured - Select a ready-made bundle.
pub async fn select_preconfigured(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<SelectPreconfiguredRequest>,
) -> ApiResult<MainCart> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let result = state.repo.select_preconfigured(&user_id, &request).await;
    mutation_result(&state, revision_id, result).await
}

/// PUT /api/users/:id/cart/preconfigured/:selection_id - Set bundle quantity.
pub async fn update_selection(
    State(state): State<AppState>,
    Path((user_id, selection_id)): Path<(String, String)>,
    Json(request): Json<SetQuantityRequest>,
) -> ApiResult<MainCart> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let result = state
        .repo
        .update_selection(&user_id, &selection_id, request.quantity)
        .await;
    mutation_result(&state, revision_id, result).await
}

/// DELETE /api/users/:id/cart/preconfigured/:selection_id
pub async fn remove_selection(
    State(state): State<AppState>,
    Path((user_id, selection_id)): Path<(String, String)>,
) -> ApiResult<MainCart> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let result = state.repo.remove_selection(&user_id, &selection_id).await;
    mutation_result(&state, revision_id, result).await
}

// ==================== PRECONFIGURED CARTS ====================

/// GET /api/preconfigured-carts - Active bundles only.
pub async fn list_preconfigured_carts(
    State(state): State<AppState>,
) -> ApiResult<Vec<PreconfiguredCart>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_preconfigured_carts(true).await {
        Ok(carts) => success(carts, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/admin/preconfigured-carts - All bundles, inactive included.
pub async fn list_all_preconfigured_carts(
    State(state): State<AppState>,
) -> ApiResult<Vec<PreconfiguredCart>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_preconfigured_carts(false).await {
        Ok(carts) => success(carts, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/preconfigured-carts/:id
pub async fn get_preconfigured_cart(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<PreconfiguredCart> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_preconfigured_cart(&id).await {
        Ok(Some(cart)) => success(cart, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("Preconfigured cart {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/admin/preconfigured-carts
pub async fn create_preconfigured_cart(
    State(state): State<AppState>,
    Json(request): Json<CreatePreconfiguredCartRequest>,
) -> ApiResult<PreconfiguredCart> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.create_preconfigured_cart(&request).await {
        Ok(cart) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(cart, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/admin/preconfigured-carts/:id
pub async fn update_preconfigured_cart(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdatePreconfiguredCartRequest>,
) -> ApiResult<PreconfiguredCart> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.update_preconfigured_cart(&id, &request).await {
        Ok(cart) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(cart, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/admin/preconfigured-carts/:id
pub async fn delete_preconfigured_cart(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.delete_preconfigured_cart(&id).await {
        Ok(()) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success((), new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}
