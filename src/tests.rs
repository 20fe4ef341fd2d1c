//! Integration tests for the shop backend.

use std::sync::Arc;

use reqwest::Client;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::config::{Config, EmailConfig};
use crate::db::{init_database, Repository};
use crate::email::EmailClient;
use crate::search::SearchIndex;
use crate::{create_router, AppState};

const ADMIN_KEY: &str = "test-admin-key";

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_options(Some(ADMIN_KEY.to_string()), 0).await
    }

    async fn with_options(psk: Option<String>, delivery_fee: i64) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");
        let index_path = temp_dir.path().join("index");

        // Initialize database
        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let repo = Arc::new(Repository::new(pool));

        // Initialize search index
        let search = Arc::new(SearchIndex::open(&index_path).expect("Failed to init search"));

        // No API key: newsletters run dry
        let email_config = EmailConfig::default();
        let email = Arc::new(EmailClient::new(&email_config).expect("Failed to init email"));

        let config = Config {
            admin_psk: psk.clone(),
            db_path,
            index_path,
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".to_string(),
            delivery_fee,
            email: email_config,
        };

        let state = AppState {
            repo,
            search,
            email,
            config: Arc::new(config),
        };

        let app = create_router(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        // Spawn server
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        let mut client_builder = Client::builder();
        if let Some(key) = psk {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert("x-api-key", key.parse().unwrap());
            client_builder = client_builder.default_headers(headers);
        }

        TestFixture {
            client: client_builder.build().unwrap(),
            base_url,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn put(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .put(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn delete(&self, path: &str) -> (u16, Value) {
        let resp = self.client.delete(self.url(path)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn create_product(&self, name: &str, price: i64) -> String {
        let (status, body) = self
            .post(
                "/api/admin/products",
                json!({ "name": name, "price": price, "category": "produce", "unit": "piece" }),
            )
            .await;
        assert_eq!(status, 200, "create product failed: {}", body);
        body["data"]["id"].as_str().unwrap().to_string()
    }

    async fn create_customer(&self, email: &str) -> String {
        let (status, body) = self
            .post(
                "/api/users",
                json!({
                    "email": email,
                    "fullName": "Ada Lovelace",
                    "phone": "+33 6 00 00 00 00",
                    "address": "12 rue des Lilas, Paris"
                }),
            )
            .await;
        assert_eq!(status, 200, "create user failed: {}", body);
        body["data"]["id"].as_str().unwrap().to_string()
    }

    /// A customer with one tomato line in the personal cart, then checked out.
    async fn placed_order(&self) -> (String, String) {
        let tomato = self.create_product("Tomato", 150).await;
        let user_id = self.create_customer("buyer@example.com").await;
        let (status, _) = self
            .post(
                &format!("/api/users/{}/cart/items", user_id),
                json!({ "productId": tomato, "quantity": 2 }),
            )
            .await;
        assert_eq!(status, 200);

        let (status, body) = self
            .post(&format!("/api/users/{}/orders", user_id), json!({}))
            .await;
        assert_eq!(status, 200, "checkout failed: {}", body);
        (user_id, body["data"]["id"].as_str().unwrap().to_string())
    }
}

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_admin_requires_key() {
    let fixture = TestFixture::new().await;
    let anonymous = Client::new();

    // Missing key
    let resp = anonymous
        .get(fixture.url("/api/admin/stats"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    // Wrong key
    let resp = anonymous
        .get(fixture.url("/api/admin/stats"))
        .header("x-api-key", "wrong-key")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // Bearer form is accepted
    let resp = anonymous
        .get(fixture.url("/api/admin/stats"))
        .header("authorization", format!("Bearer {}", ADMIN_KEY))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_storefront_is_public() {
    let fixture = TestFixture::new().await;
    let anonymous = Client::new();

    let resp = anonymous
        .get(fixture.url("/api/products"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = anonymous
        .get(fixture.url("/api/revision"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(body["data"]["revisionId"].is_number());
}

#[tokio::test]
async fn test_admin_open_without_configured_key() {
    let fixture = TestFixture::with_options(None, 0).await;

    let resp = Client::new()
        .get(fixture.url("/api/admin/stats"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_product_crud() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture
        .post(
            "/api/admin/products",
            json!({ "name": "Basil", "price": 199, "category": "herbs", "unit": "bunch" }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["name"], "Basil");
    assert_eq!(body["data"]["available"], true);
    assert_eq!(body["data"]["version"], 1);
    let id = body["data"]["id"].as_str().unwrap().to_string();

    // Read back, and filter by category
    let (status, body) = fixture.get(&format!("/api/products/{}", id)).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["price"], 199);

    let (_, body) = fixture.get("/api/products?category=herbs").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    let (_, body) = fixture.get("/api/products?category=dairy").await;
    assert!(body["data"].as_array().unwrap().is_empty());

    // Update with the right version
    let (status, body) = fixture
        .put(
            &format!("/api/admin/products/{}", id),
            json!({ "price": 249, "expectedVersion": 1 }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["price"], 249);
    assert_eq!(body["data"]["version"], 2);

    // Stale version is rejected
    let (status, body) = fixture
        .put(
            &format!("/api/admin/products/{}", id),
            json!({ "price": 10, "expectedVersion": 1 }),
        )
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], "VERSION_MISMATCH");
    assert_eq!(body["error"]["details"]["currentVersion"], 2);

    // Delete
    let (status, _) = fixture.delete(&format!("/api/admin/products/{}", id)).await;
    assert_eq!(status, 200);
    let (status, body) = fixture.get(&format!("/api/products/{}", id)).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_product_validation() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture
        .post("/api/admin/products", json!({ "name": "  ", "price": 100 }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = fixture
        .post("/api/admin/products", json!({ "name": "Free lunch", "price": -1 }))
        .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_search_catalog() {
    let fixture = TestFixture::new().await;

    let tomato = fixture.create_product("Heirloom Tomato", 300).await;
    fixture.create_product("Whole Milk", 120).await;

    let (status, _) = fixture
        .post(
            "/api/admin/recipes",
            json!({
                "title": "Tomato Bruschetta",
                "category": "starters",
                "description": "Toasted bread with fresh tomato",
                "ingredients": [{ "productId": tomato, "quantity": 2 }]
            }),
        )
        .await;
    assert_eq!(status, 200);

    let (status, body) = fixture.get("/api/search?q=tomato&limit=10").await;
    assert_eq!(status, 200);
    let results = body["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r["score"].as_f64().unwrap() > 0.0));

    // Restricted to recipes
    let (_, body) = fixture.get("/api/search?q=tomato&kind=recipe").await;
    let results = body["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["kind"], "recipe");
    assert_eq!(results[0]["title"], "Tomato Bruschetta");

    // Unknown kind
    let (status, body) = fixture.get("/api/search?q=tomato&kind=wine").await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    // Deleted products leave the index
    fixture
        .delete(&format!("/api/admin/products/{}", tomato))
        .await;
    let (_, body) = fixture.get("/api/search?q=tomato&kind=product").await;
    assert!(body["data"]["results"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_search_paging_bounds() {
    let fixture = TestFixture::new().await;

    fixture.create_product("Basmati rice", 300).await;
    fixture.create_product("Rice flour", 250).await;

    let (status, body) = fixture.get("/api/search?q=rice&limit=0").await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let (status, body) = fixture
        .get("/api/search?q=rice&offset=18446744073709551615")
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let (status, body) = fixture.get("/api/search?q=rice&limit=1&offset=1").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["results"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["offset"], 1);

    let (status, body) = fixture.get("/api/search?q=rice&limit=5000").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["limit"], 100);
    assert_eq!(body["data"]["results"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_recipe_ingredients_scale_with_portions() {
    let fixture = TestFixture::new().await;

    let pasta = fixture.create_product("Spaghetti", 180).await;
    let garlic = fixture.create_product("Garlic", 50).await;

    let (status, body) = fixture
        .post(
            "/api/admin/recipes",
            json!({
                "title": "Aglio e olio",
                "servings": 2,
                "ingredients": [
                    { "productId": pasta, "quantity": 1 },
                    { "productId": garlic, "quantity": 3 }
                ]
            }),
        )
        .await;
    assert_eq!(status, 200);
    let recipe_id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["ingredients"].as_array().unwrap().len(), 2);

    let (status, body) = fixture
        .get(&format!("/api/recipes/{}/ingredients?portions=2", recipe_id))
        .await;
    assert_eq!(status, 200);
    let lines = body["data"].as_array().unwrap();
    assert_eq!(lines[0]["quantity"], 2);
    assert_eq!(lines[0]["lineTotal"], 360);
    assert_eq!(lines[1]["quantity"], 6);
    assert_eq!(lines[1]["lineTotal"], 300);

    // Unknown ingredient product is rejected
    let (status, _) = fixture
        .post(
            "/api/admin/recipes",
            json!({
                "title": "Ghost soup",
                "ingredients": [{ "productId": "missing", "quantity": 1 }]
            }),
        )
        .await;
    assert!(status == 400 || status == 404);
}

#[tokio::test]
async fn test_recipe_requires_ingredients() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture
        .post("/api/admin/recipes", json!({ "title": "Air soup" }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = fixture
        .post(
            "/api/admin/recipes",
            json!({ "title": "Air soup", "ingredients": [] }),
        )
        .await;
    assert_eq!(status, 400);

    let basil = fixture.create_product("Basil", 120).await;
    let (status, body) = fixture
        .post(
            "/api/admin/recipes",
            json!({ "title": "Pesto", "ingredients": [{ "productId": basil, "quantity": 2 }] }),
        )
        .await;
    assert_eq!(status, 200);
    let recipe_id = body["data"]["id"].as_str().unwrap().to_string();

    // Emptying the list on update is refused too
    let (status, _) = fixture
        .put(
            &format!("/api/admin/recipes/{}", recipe_id),
            json!({ "ingredients": [] }),
        )
        .await;
    assert_eq!(status, 400);
    let (_, body) = fixture.get(&format!("/api/recipes/{}", recipe_id)).await;
    assert_eq!(body["data"]["ingredients"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_video_crud() {
    let fixture = TestFixture::new().await;

    let flour = fixture.create_product("Flour", 100).await;
    let (_, body) = fixture
        .post(
            "/api/admin/recipes",
            json!({ "title": "Crepes", "ingredients": [{ "productId": flour, "quantity": 1 }] }),
        )
        .await;
    let recipe_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = fixture
        .post(
            "/api/admin/videos",
            json!({
                "title": "Flipping crepes",
                "url": "https://videos.example.com/crepes.mp4",
                "recipeId": recipe_id
            }),
        )
        .await;
    assert_eq!(status, 200);
    let video_id = body["data"]["id"].as_str().unwrap().to_string();

    let (_, body) = fixture
        .get(&format!("/api/videos?recipeId={}", recipe_id))
        .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = fixture
        .put(
            &format!("/api/admin/videos/{}", video_id),
            json!({ "title": "Flipping crepes like a pro" }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["title"], "Flipping crepes like a pro");

    let (status, _) = fixture
        .delete(&format!("/api/admin/videos/{}", video_id))
        .await;
    assert_eq!(status, 200);
    let (status, _) = fixture.get(&format!("/api/videos/{}", video_id)).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_user_profile() {
    let fixture = TestFixture::new().await;

    let user_id = fixture.create_customer("Ada@Example.com").await;
    let (_, body) = fixture.get(&format!("/api/users/{}", user_id)).await;
    assert_eq!(body["data"]["email"], "ada@example.com");
    assert_eq!(body["data"]["role"], "customer");

    // Duplicate email
    let (status, _) = fixture
        .post(
            "/api/users",
            json!({ "email": "ada@example.com", "fullName": "Another Ada" }),
        )
        .await;
    assert_eq!(status, 400);

    let (status, body) = fixture
        .put(
            &format!("/api/users/{}", user_id),
            json!({ "address": "1 place de la Gare, Lyon" }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["address"], "1 place de la Gare, Lyon");
    assert_eq!(body["data"]["fullName"], "Ada Lovelace");

    // Admin promotes to courier and filters by role
    let (status, body) = fixture
        .put(
            &format!("/api/admin/users/{}/role", user_id),
            json!({ "role": "courier" }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["role"], "courier");

    let (_, body) = fixture.get("/api/admin/users?role=courier").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    let (status, _) = fixture.get("/api/admin/users?role=chef").await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_personal_cart() {
    let fixture = TestFixture::new().await;

    let apple = fixture.create_product("Apple", 40).await;
    let user_id = fixture.create_customer("cart@example.com").await;
    let items_url = format!("/api/users/{}/cart/items", user_id);

    let (status, body) = fixture
        .post(&items_url, json!({ "productId": apple, "quantity": 3 }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["summary"]["personalTotal"], 120);

    // Adding again increments
    let (_, body) = fixture
        .post(&items_url, json!({ "productId": apple, "quantity": 2 }))
        .await;
    assert_eq!(body["data"]["personal"]["items"][0]["quantity"], 5);
    assert_eq!(body["data"]["summary"]["total"], 200);
    assert_eq!(body["data"]["summary"]["itemCount"], 5);

    // Set quantity
    let (status, body) = fixture
        .put(
            &format!("{}/{}", items_url, apple),
            json!({ "quantity": 1 }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["summary"]["total"], 40);

    // Zero quantity on add is rejected
    let (status, _) = fixture
        .post(&items_url, json!({ "productId": apple, "quantity": 0 }))
        .await;
    assert_eq!(status, 400);

    // Remove
    let (status, body) = fixture.delete(&format!("{}/{}", items_url, apple)).await;
    assert_eq!(status, 200);
    assert!(body["data"]["personal"]["items"].as_array().unwrap().is_empty());
    assert_eq!(body["data"]["summary"]["total"], 0);

    // Unknown user
    let (status, _) = fixture
        .post(
            "/api/users/nobody/cart/items",
            json!({ "productId": apple, "quantity": 1 }),
        )
        .await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_unavailable_product_cannot_be_added() {
    let fixture = TestFixture::new().await;

    let (_, body) = fixture
        .post(
            "/api/admin/products",
            json!({ "name": "Truffle", "price": 9900, "available": false }),
        )
        .await;
    let truffle = body["data"]["id"].as_str().unwrap().to_string();
    let user_id = fixture.create_customer("truffle@example.com").await;

    let (status, _) = fixture
        .post(
            &format!("/api/users/{}/cart/items", user_id),
            json!({ "productId": truffle, "quantity": 1 }),
        )
        .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_main_cart_aggregates_all_sub_carts() {
    let fixture = TestFixture::new().await;

    let egg = fixture.create_product("Egg", 30).await;
    let flour = fixture.create_product("Flour", 100).await;
    let milk = fixture.create_product("Milk", 90).await;
    let user_id = fixture.create_customer("mixed@example.com").await;

    // Personal: 2 milk = 180
    fixture
        .post(
            &format!("/api/users/{}/cart/items", user_id),
            json!({ "productId": milk, "quantity": 2 }),
        )
        .await;

    // Recipe: (2 egg + 1 flour) x 3 portions = 480
    let (_, body) = fixture
        .post(
            "/api/admin/recipes",
            json!({
                "title": "Pancakes",
                "ingredients": [
                    { "productId": egg, "quantity": 2 },
                    { "productId": flour, "quantity": 1 }
                ]
            }),
        )
        .await;
    let recipe_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = fixture
        .post(
            &format!("/api/users/{}/cart/recipes", user_id),
            json!({ "recipeId": recipe_id, "portions": 3 }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["summary"]["recipeTotal"], 480);
    let recipe_cart_id = body["data"]["recipes"][0]["id"]
        .as_str()
        .unwrap()
        .to_string();

    // Preconfigured: bundle (1 egg + 1 milk = 120) x 2 = 240
    let (status, body) = fixture
        .post(
            "/api/admin/preconfigured-carts",
            json!({
                "name": "Breakfast box",
                "items": [
                    { "productId": egg, "quantity": 1 },
                    { "productId": milk, "quantity": 1 }
                ]
            }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["price"], 120);
    let bundle_id = body["data"]["id"].as_str().unwrap().to_string();

    let (_, body) = fixture.get("/api/preconfigured-carts").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = fixture
        .post(
            &format!("/api/users/{}/cart/preconfigured", user_id),
            json!({ "preconfiguredCartId": bundle_id, "quantity": 2 }),
        )
        .await;
    assert_eq!(status, 200);
    let selection_id = body["data"]["preconfigured"][0]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, body) = fixture.get(&format!("/api/users/{}/cart", user_id)).await;
    assert_eq!(status, 200);
    let summary = &body["data"]["summary"];
    assert_eq!(summary["personalTotal"], 180);
    assert_eq!(summary["recipeTotal"], 480);
    assert_eq!(summary["preconfiguredTotal"], 240);
    assert_eq!(summary["total"], 900);
    assert_eq!(summary["recipeCartIds"][0], recipe_cart_id);
    assert_eq!(summary["preconfiguredSelectionIds"][0], selection_id);

    // Fewer portions
    let (_, body) = fixture
        .put(
            &format!("/api/users/{}/cart/recipes/{}", user_id, recipe_cart_id),
            json!({ "portions": 1 }),
        )
        .await;
    assert_eq!(body["data"]["summary"]["recipeTotal"], 160);
    assert_eq!(body["data"]["summary"]["total"], 580);

    // Drop the bundle selection
    let (status, body) = fixture
        .delete(&format!(
            "/api/users/{}/cart/preconfigured/{}",
            user_id, selection_id
        ))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["summary"]["preconfiguredTotal"], 0);
    assert_eq!(body["data"]["summary"]["total"], 340);

    // Clear everything
    let (status, body) = fixture.delete(&format!("/api/users/{}/cart", user_id)).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["summary"]["total"], 0);
    assert!(body["data"]["recipes"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_cart_quantities_are_bounded() {
    let fixture = TestFixture::new().await;

    let salt = fixture.create_product("Salt", 10).await;
    let user_id = fixture.create_customer("bulk@example.com").await;
    let items_url = format!("/api/users/{}/cart/items", user_id);

    let (status, _) = fixture
        .post(&items_url, json!({ "productId": salt, "quantity": 10001 }))
        .await;
    assert_eq!(status, 400);

    let (status, _) = fixture
        .post(
            &items_url,
            json!({ "productId": salt, "quantity": 9223372036854775807i64 }),
        )
        .await;
    assert_eq!(status, 400);

    let (status, _) = fixture
        .post(&items_url, json!({ "productId": salt, "quantity": 10000 }))
        .await;
    assert_eq!(status, 200);

    // Incrementing past the cap leaves the line untouched
    let (status, _) = fixture
        .post(&items_url, json!({ "productId": salt, "quantity": 1 }))
        .await;
    assert_eq!(status, 400);

    let (status, body) = fixture.get(&format!("/api/users/{}/cart", user_id)).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["personal"]["items"][0]["quantity"], 10000);
    assert_eq!(body["data"]["summary"]["personalTotal"], 100000);

    let (status, _) = fixture
        .put(
            &format!("{}/{}", items_url, salt),
            json!({ "quantity": 10001 }),
        )
        .await;
    assert_eq!(status, 400);

    // Bundle selections share the cap
    let (_, body) = fixture
        .post(
            "/api/admin/preconfigured-carts",
            json!({ "name": "Salt crate", "items": [{ "productId": salt, "quantity": 1 }] }),
        )
        .await;
    let bundle_id = body["data"]["id"].as_str().unwrap().to_string();
    let (status, _) = fixture
        .post(
            &format!("/api/users/{}/cart/preconfigured", user_id),
            json!({ "preconfiguredCartId": bundle_id, "quantity": 10001 }),
        )
        .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_deleting_selected_bundle_updates_cart() {
    let fixture = TestFixture::new().await;

    let oats = fixture.create_product("Oats", 150).await;
    let honey = fixture.create_product("Honey", 400).await;
    let user_id = fixture.create_customer("granola@example.com").await;

    fixture
        .post(
            &format!("/api/users/{}/cart/items", user_id),
            json!({ "productId": honey, "quantity": 1 }),
        )
        .await;

    let (_, body) = fixture
        .post(
            "/api/admin/preconfigured-carts",
            json!({ "name": "Granola kit", "items": [{ "productId": oats, "quantity": 2 }] }),
        )
        .await;
    let bundle_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = fixture
        .post(
            &format!("/api/users/{}/cart/preconfigured", user_id),
            json!({ "preconfiguredCartId": bundle_id }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["summary"]["preconfiguredTotal"], 300);
    assert_eq!(body["data"]["summary"]["total"], 700);

    let (status, _) = fixture
        .delete(&format!("/api/admin/preconfigured-carts/{}", bundle_id))
        .await;
    assert_eq!(status, 200);

    let (status, body) = fixture.get(&format!("/api/users/{}/cart", user_id)).await;
    assert_eq!(status, 200);
    let cart = &body["data"];
    assert!(cart["preconfigured"].as_array().unwrap().is_empty());
    assert_eq!(cart["summary"]["preconfiguredTotal"], 0);
    assert_eq!(cart["summary"]["total"], 400);
    assert!(cart["summary"]["preconfiguredSelectionIds"]
        .as_array()
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_inactive_bundle_cannot_be_selected() {
    let fixture = TestFixture::new().await;

    let rice = fixture.create_product("Rice", 200).await;
    let user_id = fixture.create_customer("bundle@example.com").await;

    let (_, body) = fixture
        .post(
            "/api/admin/preconfigured-carts",
            json!({
                "name": "Retired box",
                "active": false,
                "items": [{ "productId": rice, "quantity": 1 }]
            }),
        )
        .await;
    let bundle_id = body["data"]["id"].as_str().unwrap().to_string();

    // Hidden from the storefront, visible to admins
    let (_, body) = fixture.get("/api/preconfigured-carts").await;
    assert!(body["data"].as_array().unwrap().is_empty());
    let (_, body) = fixture.get("/api/admin/preconfigured-carts").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, _) = fixture
        .post(
            &format!("/api/users/{}/cart/preconfigured", user_id),
            json!({ "preconfiguredCartId": bundle_id }),
        )
        .await;
    assert!(status == 400 || status == 404);
}

#[tokio::test]
async fn test_checkout_snapshots_prices_and_clears_cart() {
    let fixture = TestFixture::with_options(Some(ADMIN_KEY.to_string()), 500).await;

    let cheese = fixture.create_product("Comte", 800).await;
    let user_id = fixture.create_customer("checkout@example.com").await;

    // Empty cart
    let (status, body) = fixture
        .post(&format!("/api/users/{}/orders", user_id), json!({}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "EMPTY_CART");

    fixture
        .post(
            &format!("/api/users/{}/cart/items", user_id),
            json!({ "productId": cheese, "quantity": 2 }),
        )
        .await;

    let (status, body) = fixture
        .post(
            &format!("/api/users/{}/orders", user_id),
            json!({ "notes": "Ring twice" }),
        )
        .await;
    assert_eq!(status, 200);
    let order = &body["data"];
    assert_eq!(order["status"], "pending");
    assert_eq!(order["subtotal"], 1600);
    assert_eq!(order["deliveryFee"], 500);
    assert_eq!(order["total"], 2100);
    assert_eq!(order["deliveryAddress"], "12 rue des Lilas, Paris");
    assert_eq!(order["items"][0]["unitPrice"], 800);
    assert_eq!(order["items"][0]["source"], "personal");
    let order_id = order["id"].as_str().unwrap().to_string();

    // Cart emptied
    let (_, body) = fixture.get(&format!("/api/users/{}/cart", user_id)).await;
    assert_eq!(body["data"]["summary"]["total"], 0);
    assert!(body["data"]["personal"]["items"].as_array().unwrap().is_empty());

    // Later price change does not touch the order
    fixture
        .put(
            &format!("/api/admin/products/{}", cheese),
            json!({ "price": 1000 }),
        )
        .await;
    let (_, body) = fixture.get(&format!("/api/orders/{}", order_id)).await;
    assert_eq!(body["data"]["items"][0]["unitPrice"], 800);
    assert_eq!(body["data"]["total"], 2100);

    let (_, body) = fixture.get(&format!("/api/users/{}/orders", user_id)).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_checkout_requires_delivery_address() {
    let fixture = TestFixture::new().await;

    let bread = fixture.create_product("Bread", 250).await;
    let (_, body) = fixture
        .post(
            "/api/users",
            json!({ "email": "noaddress@example.com", "fullName": "No Address" }),
        )
        .await;
    let user_id = body["data"]["id"].as_str().unwrap().to_string();

    fixture
        .post(
            &format!("/api/users/{}/cart/items", user_id),
            json!({ "productId": bread }),
        )
        .await;

    let (status, body) = fixture
        .post(&format!("/api/users/{}/orders", user_id), json!({}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = fixture
        .post(
            &format!("/api/users/{}/orders", user_id),
            json!({ "deliveryAddress": "3 quai Voltaire", "phone": "0600000000" }),
        )
        .await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn test_checkout_rejects_cart_without_lines() {
    let fixture = TestFixture::new().await;

    let saffron = fixture.create_product("Saffron", 1200).await;
    let user_id = fixture.create_customer("paella@example.com").await;

    let (_, body) = fixture
        .post(
            "/api/admin/recipes",
            json!({ "title": "Paella", "ingredients": [{ "productId": saffron, "quantity": 1 }] }),
        )
        .await;
    let recipe_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = fixture
        .post(
            &format!("/api/users/{}/cart/recipes", user_id),
            json!({ "recipeId": recipe_id, "portions": 2 }),
        )
        .await;
    assert_eq!(status, 200);

    // The recipe cart stays but no longer holds any line
    fixture
        .delete(&format!("/api/admin/products/{}", saffron))
        .await;
    let (_, body) = fixture.get(&format!("/api/users/{}/cart", user_id)).await;
    assert_eq!(body["data"]["recipes"].as_array().unwrap().len(), 1);
    assert!(body["data"]["recipes"][0]["items"]
        .as_array()
        .unwrap()
        .is_empty());

    let (status, body) = fixture
        .post(&format!("/api/users/{}/orders", user_id), json!({}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "EMPTY_CART");

    let (_, body) = fixture.get(&format!("/api/users/{}/orders", user_id)).await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_recipe_order_lines_reference_recipe_cart() {
    let fixture = TestFixture::new().await;

    let rice = fixture.create_product("Arborio rice", 350).await;
    let user_id = fixture.create_customer("risotto@example.com").await;

    let (_, body) = fixture
        .post(
            "/api/admin/recipes",
            json!({ "title": "Risotto", "ingredients": [{ "productId": rice, "quantity": 1 }] }),
        )
        .await;
    let recipe_id = body["data"]["id"].as_str().unwrap().to_string();

    let (_, body) = fixture
        .post(
            &format!("/api/users/{}/cart/recipes", user_id),
            json!({ "recipeId": recipe_id, "portions": 1 }),
        )
        .await;
    let recipe_cart_id = body["data"]["recipes"][0]["id"]
        .as_str()
        .unwrap()
        .to_string();
    assert_ne!(recipe_cart_id, recipe_id);

    let (status, body) = fixture
        .post(&format!("/api/users/{}/orders", user_id), json!({}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["items"][0]["source"], "recipe");
    assert_eq!(body["data"]["items"][0]["sourceRef"], recipe_cart_id);
}

#[tokio::test]
async fn test_checkout_blank_contact_uses_profile() {
    let fixture = TestFixture::new().await;

    let bread = fixture.create_product("Bread", 250).await;
    let user_id = fixture.create_customer("blank@example.com").await;
    fixture
        .post(
            &format!("/api/users/{}/cart/items", user_id),
            json!({ "productId": bread }),
        )
        .await;

    let (status, body) = fixture
        .post(
            &format!("/api/users/{}/orders", user_id),
            json!({ "deliveryAddress": "   ", "phone": "" }),
        )
        .await;
    assert_eq!(status, 200, "checkout failed: {}", body);
    assert_eq!(body["data"]["deliveryAddress"], "12 rue des Lilas, Paris");
    assert_eq!(body["data"]["phone"], "+33 6 00 00 00 00");
}

#[tokio::test]
async fn test_order_lifecycle_and_tracking() {
    let fixture = TestFixture::new().await;
    let (_, order_id) = fixture.placed_order().await;

    let courier_id = fixture.create_customer("courier@example.com").await;
    fixture
        .put(
            &format!("/api/admin/users/{}/role", courier_id),
            json!({ "role": "courier" }),
        )
        .await;

    // Cannot assign before validation
    let (status, body) = fixture
        .post(
            &format!("/api/admin/orders/{}/assign", order_id),
            json!({ "courierId": courier_id }),
        )
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");

    let (status, body) = fixture
        .post(
            &format!("/api/admin/orders/{}/status", order_id),
            json!({ "status": "validated" }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["status"], "validated");

    let (status, body) = fixture
        .post(
            &format!("/api/admin/orders/{}/assign", order_id),
            json!({ "courierId": courier_id }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["status"], "assigned");
    assert_eq!(body["data"]["courierId"], courier_id);

    // No positions before pickup
    let (status, _) = fixture
        .post(
            &format!("/api/admin/orders/{}/tracking", order_id),
            json!({ "latitude": 48.85, "longitude": 2.35 }),
        )
        .await;
    assert_eq!(status, 400);

    fixture
        .post(
            &format!("/api/admin/orders/{}/status", order_id),
            json!({ "status": "picked_up" }),
        )
        .await;

    // Customer can no longer cancel
    let (status, _) = fixture
        .post(&format!("/api/orders/{}/cancel", order_id), json!({}))
        .await;
    assert_eq!(status, 409);

    // First position puts the order in transit
    let (status, _) = fixture
        .post(
            &format!("/api/admin/orders/{}/tracking", order_id),
            json!({ "latitude": 48.85, "longitude": 2.35 }),
        )
        .await;
    assert_eq!(status, 200);
    fixture
        .post(
            &format!("/api/admin/orders/{}/tracking", order_id),
            json!({ "latitude": 48.86, "longitude": 2.34 }),
        )
        .await;

    let (status, body) = fixture
        .get(&format!("/api/orders/{}/tracking", order_id))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["status"], "in_transit");
    assert_eq!(body["data"]["history"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["latest"]["latitude"], 48.86);

    // Out-of-range coordinates
    let (status, _) = fixture
        .post(
            &format!("/api/admin/orders/{}/tracking", order_id),
            json!({ "latitude": 123.0, "longitude": 2.34 }),
        )
        .await;
    assert_eq!(status, 400);

    let (status, body) = fixture
        .post(
            &format!("/api/admin/orders/{}/status", order_id),
            json!({ "status": "delivered" }),
        )
        .await;
    assert_eq!(status, 200);
    assert!(body["data"]["deliveredAt"].is_string());

    // Delivered is terminal
    let (status, body) = fixture
        .post(
            &format!("/api/admin/orders/{}/status", order_id),
            json!({ "status": "pending" }),
        )
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["details"]["from"], "delivered");

    let (_, body) = fixture.get("/api/admin/stats").await;
    assert_eq!(body["data"]["ordersByStatus"]["delivered"], 1);
    assert_eq!(body["data"]["deliveredRevenue"], 300);
}

#[tokio::test]
async fn test_customer_cancels_pending_order() {
    let fixture = TestFixture::new().await;
    let (_, order_id) = fixture.placed_order().await;

    let (status, body) = fixture
        .post(&format!("/api/orders/{}/cancel", order_id), json!({}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["status"], "cancelled");

    let (_, body) = fixture.get("/api/admin/orders?status=cancelled").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    let (_, body) = fixture.get("/api/admin/orders?status=pending").await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, _) = fixture.get("/api/admin/orders?status=lost").await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_assign_requires_courier_role() {
    let fixture = TestFixture::new().await;
    let (user_id, order_id) = fixture.placed_order().await;

    fixture
        .post(
            &format!("/api/admin/orders/{}/status", order_id),
            json!({ "status": "validated" }),
        )
        .await;

    let (status, _) = fixture
        .post(
            &format!("/api/admin/orders/{}/assign", order_id),
            json!({ "courierId": user_id }),
        )
        .await;
    assert_eq!(status, 400);

    // Status endpoint refuses to assign without a courier
    let (status, _) = fixture
        .post(
            &format!("/api/admin/orders/{}/status", order_id),
            json!({ "status": "assigned" }),
        )
        .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_newsletter_dry_run() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture
        .post(
            "/api/newsletter/subscribe",
            json!({ "email": "Reader@Example.com" }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["email"], "reader@example.com");
    fixture
        .post("/api/newsletter/subscribe", json!({ "email": "fan@example.com" }))
        .await;
    fixture
        .post("/api/newsletter/subscribe", json!({ "email": "gone@example.com" }))
        .await;
    let (status, _) = fixture
        .post("/api/newsletter/unsubscribe", json!({ "email": "gone@example.com" }))
        .await;
    assert_eq!(status, 200);

    let (status, _) = fixture
        .post("/api/newsletter/subscribe", json!({ "email": "not-an-email" }))
        .await;
    assert_eq!(status, 400);

    let (_, body) = fixture.get("/api/admin/subscribers").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (status, body) = fixture
        .post(
            "/api/admin/newsletters",
            json!({ "subject": "Spring recipes", "bodyHtml": "<h1>Asparagus season</h1>" }),
        )
        .await;
    assert_eq!(status, 200);
    let newsletter_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = fixture
        .post(
            &format!("/api/admin/newsletters/{}/send", newsletter_id),
            json!({}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["delivered"], 2);
    assert_eq!(body["data"]["dryRun"], true);
    assert_eq!(body["data"]["newsletter"]["recipientCount"], 2);
    assert!(body["data"]["newsletter"]["sentAt"].is_string());

    // Sending twice is refused
    let (status, _) = fixture
        .post(
            &format!("/api/admin/newsletters/{}/send", newsletter_id),
            json!({}),
        )
        .await;
    assert_eq!(status, 400);

    let (_, body) = fixture.get("/api/admin/newsletters").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_newsletter_sends_deliver_once() {
    let fixture = TestFixture::new().await;

    fixture
        .post("/api/newsletter/subscribe", json!({ "email": "once@example.com" }))
        .await;
    let (_, body) = fixture
        .post(
            "/api/admin/newsletters",
            json!({ "subject": "Harvest", "bodyHtml": "<p>Pumpkins</p>" }),
        )
        .await;
    let send_url = format!(
        "/api/admin/newsletters/{}/send",
        body["data"]["id"].as_str().unwrap()
    );

    let ((first, _), (second, _), (third, _)) = tokio::join!(
        fixture.post(&send_url, json!({})),
        fixture.post(&send_url, json!({})),
        fixture.post(&send_url, json!({})),
    );
    let mut statuses = vec![first, second, third];
    statuses.sort();
    assert_eq!(statuses, vec![200, 400, 400]);

    let (status, _) = fixture
        .post("/api/admin/newsletters/missing/send", json!({}))
        .await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_revision_increments_on_writes() {
    let fixture = TestFixture::new().await;

    let (_, body) = fixture.get("/api/revision").await;
    let initial = body["data"]["revisionId"].as_i64().unwrap();

    let (_, body) = fixture
        .post("/api/admin/products", json!({ "name": "Leek", "price": 90 }))
        .await;
    let after_create = body["revisionId"].as_i64().unwrap();
    assert!(after_create > initial);

    let (_, body) = fixture.get("/api/revision").await;
    assert_eq!(body["data"]["revisionId"].as_i64().unwrap(), after_create);

    let (_, body) = fixture
        .post("/api/newsletter/subscribe", json!({ "email": "rev@example.com" }))
        .await;
    let after_subscribe = body["revisionId"].as_i64().unwrap();
    assert!(after_subscribe > after_create);

    let (_, body) = fixture
        .post("/api/newsletter/unsubscribe", json!({ "email": "rev@example.com" }))
        .await;
    let after_unsubscribe = body["revisionId"].as_i64().unwrap();
    assert!(after_unsubscribe > after_subscribe);

    let (_, body) = fixture
        .post(
            "/api/admin/newsletters",
            json!({ "subject": "News", "bodyHtml": "<p>Hello</p>" }),
        )
        .await;
    let after_newsletter = body["revisionId"].as_i64().unwrap();
    assert!(after_newsletter > after_unsubscribe);
    let newsletter_id = body["data"]["id"].as_str().unwrap().to_string();

    let (_, body) = fixture
        .post(
            &format!("/api/admin/newsletters/{}/send", newsletter_id),
            json!({}),
        )
        .await;
    let after_send = body["revisionId"].as_i64().unwrap();
    assert!(after_send > after_newsletter);

    let (_, body) = fixture.get("/api/revision").await;
    assert_eq!(body["data"]["revisionId"].as_i64().unwrap(), after_send);
}

#[tokio::test]
async fn test_dashboard_stats() {
    let fixture = TestFixture::new().await;

    fixture.create_product("Carrot", 60).await;
    fixture.create_customer("one@example.com").await;
    fixture.create_customer("two@example.com").await;

    let (status, body) = fixture.get("/api/admin/stats").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["products"], 1);
    assert_eq!(body["data"]["recipes"], 0);
    assert_eq!(body["data"]["customers"], 2);
    assert_eq!(body["data"]["ordersByStatus"]["pending"], 0);
    assert_eq!(body["data"]["deliveredRevenue"], 0);
}
