//! Recipe Shop Backend
//!
//! REST backend for a recipe-driven grocery shop: catalog, three-tier carts,
//! cash-on-delivery orders and an admin back-office. SQLite persistence and
//! Tantivy full-text search.

mod api;
mod auth;
mod config;
mod db;
mod email;
mod errors;
mod models;
mod pricing;
mod search;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use db::Repository;
use email::EmailClient;
use search::SearchIndex;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub search: Arc<SearchIndex>,
    pub email: Arc<EmailClient>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Recipe Shop Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Index path: {:?}", config.index_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.admin_psk.is_none() {
        tracing::warn!("No admin PSK configured (SHOP_ADMIN_PSK). Admin routes are open!");
    }
    if config.email.api_key.is_none() {
        tracing::warn!("No email API key configured (SHOP_EMAIL_API_KEY). Newsletters run dry");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    // Initialize search index
    let search = Arc::new(SearchIndex::open(&config.index_path)?);

    // Build initial search index from database
    tracing::info!("Building search index...");
    let products = repo.list_products(None).await?;
    let recipes = repo.list_recipes(None).await?;
    let videos = repo.list_videos(None).await?;
    search.rebuild(&products, &recipes, &videos).await?;
    tracing::info!(
        "Search index built with {} products, {} recipes, {} videos",
        products.len(),
        recipes.len(),
        videos.len()
    );

    let email = Arc::new(EmailClient::new(&config.email)?);

    // Create application state
    let state = AppState {
        repo,
        search,
        email,
        config: Arc::new(config.clone()),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Clone PSK for the auth layer
    let psk = state.config.admin_psk.clone();

    // Storefront routes
    let public_routes = Router::new()
        .route("/revision", get(api::get_revision))
        // Catalog
        .route("/products", get(api::list_products))
        .route("/products/{id}", get(api::get_product))
        .route("/recipes", get(api::list_recipes))
        .route("/recipes/{id}", get(api::get_recipe))
        .route("/recipes/{id}/ingredients", get(api::get_recipe_ingredients))
        .route("/videos", get(api::list_videos))
        .route("/videos/{id}", get(api::get_video))
        .route("/preconfigured-carts", get(api::list_preconfigured_carts))
        .route("/preconfigured-carts/{id}", get(api::get_preconfigured_cart))
        // Search
        .route("/search", get(api::search_catalog))
        // Profiles
        .route("/users", post(api::create_user))
        .route("/users/{id}", get(api::get_user).put(api::update_user))
        // Carts
        .route(
            "/users/{id}/cart",
            get(api::get_cart).delete(api::clear_cart),
        )
        .route("/users/{id}/cart/items", post(api::add_cart_item))
        .route(
            "/users/{id}/cart/items/{product_id}",
            put(api::set_cart_item_quantity).delete(api::remove_cart_item),
        )
        .route("/users/{id}/cart/recipes", post(api::add_recipe_cart))
        .route(
            "/users/{id}/cart/recipes/{recipe_cart_id}",
            put(api::update_recipe_cart).delete(api::remove_recipe_cart),
        )
        .route("/users/{id}/cart/preconfigured", post(api::select_preconfigured))
        .route(
            "/users/{id}/cart/preconfigured/{selection_id}",
            put(api::update_selection).delete(api::remove_selection),
        )
        // Orders
        .route(
            "/users/{id}/orders",
            post(api::checkout).get(api::list_user_orders),
        )
        .route("/orders/{id}", get(api::get_order))
        .route("/orders/{id}/cancel", post(api::cancel_order))
        .route("/orders/{id}/tracking", get(api::get_tracking))
        // Newsletter
        .route("/newsletter/subscribe", post(api::subscribe))
        .route("/newsletter/unsubscribe", post(api::unsubscribe));

    // Back-office routes
    let admin_routes = Router::new()
        // Catalog
        .route("/products", post(api::create_product))
        .route(
            "/products/{id}",
            put(api::update_product).delete(api::delete_product),
        )
        .route("/recipes", post(api::create_recipe))
        .route(
            "/recipes/{id}",
            put(api::update_recipe).delete(api::delete_recipe),
        )
        .route("/videos", post(api::create_video))
        .route(
            "/videos/{id}",
            put(api::update_video).delete(api::delete_video),
        )
        .route(
            "/preconfigured-carts",
            get(api::list_all_preconfigured_carts).post(api::create_preconfigured_cart),
        )
        .route(
            "/preconfigured-carts/{id}",
            put(api::update_preconfigured_cart).delete(api::delete_preconfigured_cart),
        )
        // Profiles
        .route("/users", get(api::list_users))
        .route("/users/{id}/role", put(api::set_user_role))
        // Orders
        .route("/orders", get(api::list_orders))
        .route("/orders/{id}/status", post(api::update_order_status))
        .route("/orders/{id}/assign", post(api::assign_courier))
        .route("/orders/{id}/tracking", post(api::record_position))
        // Dashboard
        .route("/stats", get(api::get_stats))
        // Newsletters
        .route(
            "/newsletters",
            get(api::list_newsletters).post(api::create_newsletter),
        )
        .route("/newsletters/{id}/send", post(api::send_newsletter))
        .route("/subscribers", get(api::list_subscribers))
        // Apply PSK auth middleware
        .layer(middleware::from_fn(move |req, next| {
            auth::admin_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api/admin", admin_routes)
        .nest("/api", public_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
