//! Catalog operations: products, recipes and videos.

use std::collections::HashSet;

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::repository::{
    bump_revision, check_version, new_id, now, require, Repository, MAX_QUANTITY,
};
use crate::errors::AppError;
use crate::models::{
    CreateProductRequest, CreateRecipeRequest, CreateVideoRequest, PricedIngredient, Product,
    ProductQuantity, Recipe, UpdateProductRequest, UpdateRecipeRequest, UpdateVideoRequest, Video,
};
use crate::pricing;

const PRODUCT_COLUMNS: &str = "id, name, description, category, price, unit, image_url, available, created_at, updated_at, version";
const RECIPE_COLUMNS: &str = "id, title, description, category, image_url, video_url, prep_minutes, servings, instructions, created_at, updated_at, version";
const VIDEO_COLUMNS: &str = "id, title, description, url, thumbnail_url, recipe_id, created_at";

impl Repository {
    // ==================== PRODUCT OPERATIONS ====================

    /// List products, optionally restricted to one category.
    pub async fn list_products(&self, category: Option<&str>) -> Result<Vec<Product>, AppError> {
        let rows = match category {
            Some(category) => {
                sqlx::query(&format!(
                    "SELECT {} FROM products WHERE category = ? ORDER BY name",
                    PRODUCT_COLUMNS
                ))
                .bind(category)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM products ORDER BY name",
                    PRODUCT_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(product_from_row).collect())
    }

    /// Get a product by ID.
    pub async fn get_product(&self, id: &str) -> Result<Option<Product>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM products WHERE id = ?",
            PRODUCT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(product_from_row))
    }

    /// Create a new product.
    pub async fn create_product(&self, request: &CreateProductRequest) -> Result<Product, AppError> {
        require(&request.name, "Name")?;
        validate_price(request.price)?;

        let id = new_id();
        let now = now();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO products (id, name, description, category, price, unit, image_url, available, created_at, updated_at, version) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)",
        )
        .bind(&id)
        .bind(request.name.trim())
        .bind(&request.description)
        .bind(&request.category)
        .bind(request.price)
        .bind(&request.unit)
        .bind(&request.image_url)
        .bind(request.available as i32)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(product_id = %id, "Product created");

        Ok(Product {
            id,
            name: request.name.trim().to_string(),
            description: request.description.clone(),
            category: request.category.clone(),
            price: request.price,
            unit: request.unit.clone(),
            image_url: request.image_url.clone(),
            available: request.available,
            created_at: now.clone(),
            updated_at: now,
            version: 1,
        })
    }

    /// Update a product with optimistic concurrency control.
    pub async fn update_product(
        &self,
        id: &str,
        request: &UpdateProductRequest,
    ) -> Result<Product, AppError> {
        let existing = self
            .get_product(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Product {} not found", id)))?;

        check_version(request.expected_version, existing.version)?;

        if let Some(name) = &request.name {
            require(name, "Name")?;
        }
        if let Some(price) = request.price {
            validate_price(price)?;
        }

        let updated = Product {
            id: existing.id.clone(),
            name: request
                .name
                .as_ref()
                .map(|n| n.trim().to_string())
                .unwrap_or(existing.name),
            description: request.description.clone().or(existing.description),
            category: request.category.clone().or(existing.category),
            price: request.price.unwrap_or(existing.price),
            unit: request.unit.clone().or(existing.unit),
            image_url: request.image_url.clone().or(existing.image_url),
            available: request.available.unwrap_or(existing.available),
            created_at: existing.created_at,
            updated_at: now(),
            version: existing.version + 1,
        };

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE products SET name = ?, description = ?, category = ?, price = ?, unit = ?, image_url = ?, available = ?, updated_at = ?, version = ? WHERE id = ? AND version = ?",
        )
        .bind(&updated.name)
        .bind(&updated.description)
        .bind(&updated.category)
        .bind(updated.price)
        .bind(&updated.unit)
        .bind(&updated.image_url)
        .bind(updated.available as i32)
        .bind(&updated.updated_at)
        .bind(updated.version)
        .bind(id)
        .bind(existing.version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get_product(id).await?;
            return Err(AppError::Conflict {
                message: "Concurrent modification detected".to_string(),
                current_version: current.map(|p| p.version).unwrap_or(0),
            });
        }

        bump_revision(&mut tx).await?;
        tx.commit().await?;

        Ok(updated)
    }

    /// Delete a product. Cart lines and recipe ingredients referencing it go with it.
    pub async fn delete_product(&self, id: &str) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM products WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Product {} not found", id)));
        }

        bump_revision(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    // ==================== RECIPE OPERATIONS ====================

    pub async fn list_recipes(&self, category: Option<&str>) -> Result<Vec<Recipe>, AppError> {
        let mut conn = self.pool.acquire().await?;

        let rows = match category {
            Some(category) => {
                sqlx::query(&format!(
                    "SELECT {} FROM recipes WHERE category = ? ORDER BY title",
                    RECIPE_COLUMNS
                ))
                .bind(category)
                .fetch_all(&mut *conn)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM recipes ORDER BY title",
                    RECIPE_COLUMNS
                ))
                .fetch_all(&mut *conn)
                .await?
            }
        };

        let mut recipes = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.get("id");
            let ingredients = load_ingredients(&mut conn, &id).await?;
            recipes.push(recipe_from_row(row, ingredients));
        }
        Ok(recipes)
    }

    pub async fn get_recipe(&self, id: &str) -> Result<Option<Recipe>, AppError> {
        let mut conn = self.pool.acquire().await?;
        fetch_recipe(&mut conn, id).await
    }

    /// Create a recipe together with its ingredient list.
    pub async fn create_recipe(&self, request: &CreateRecipeRequest) -> Result<Recipe, AppError> {
        require(&request.title, "Title")?;
        validate_servings(request.servings)?;
        require_ingredients(&request.ingredients)?;

        let id = new_id();
        let now = now();

        let mut tx = self.pool.begin().await?;
        validate_product_quantities(&mut tx, &request.ingredients).await?;

        sqlx::query(
            r#"INSERT INTO recipes (
                id, title, description, category, image_url, video_url,
                prep_minutes, servings, instructions, created_at, updated_at, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)"#,
        )
        .bind(&id)
        .bind(request.title.trim())
        .bind(&request.description)
        .bind(&request.category)
        .bind(&request.image_url)
        .bind(&request.video_url)
        .bind(request.prep_minutes)
        .bind(request.servings)
        .bind(&request.instructions)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        write_ingredients(&mut tx, &id, &request.ingredients).await?;
        bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(recipe_id = %id, ingredients = request.ingredients.len(), "Recipe created");

        Ok(Recipe {
            id,
            title: request.title.trim().to_string(),
            description: request.description.clone(),
            category: request.category.clone(),
            image_url: request.image_url.clone(),
            video_url: request.video_url.clone(),
            prep_minutes: request.prep_minutes,
            servings: request.servings,
            instructions: request.instructions.clone(),
            ingredients: request.ingredients.clone(),
            created_at: now.clone(),
            updated_at: now,
            version: 1,
        })
    }

    /// Update a recipe with optimistic concurrency control.
    pub async fn update_recipe(
        &self,
        id: &str,
        request: &UpdateRecipeRequest,
    ) -> Result<Recipe, AppError> {
        let mut tx = self.pool.begin().await?;

        let existing = fetch_recipe(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Recipe {} not found", id)))?;

        check_version(request.expected_version, existing.version)?;

        if let Some(title) = &request.title {
            require(title, "Title")?;
        }
        if let Some(servings) = request.servings {
            validate_servings(servings)?;
        }
        if let Some(ingredients) = &request.ingredients {
            require_ingredients(ingredients)?;
        }

        let updated = Recipe {
            id: existing.id.clone(),
            title: request
                .title
                .as_ref()
                .map(|t| t.trim().to_string())
                .unwrap_or(existing.title),
            description: request.description.clone().or(existing.description),
            category: request.category.clone().or(existing.category),
            image_url: request.image_url.clone().or(existing.image_url),
            video_url: request.video_url.clone().or(existing.video_url),
            prep_minutes: request.prep_minutes.or(existing.prep_minutes),
            servings: request.servings.unwrap_or(existing.servings),
            instructions: request.instructions.clone().or(existing.instructions),
            ingredients: request
                .ingredients
                .clone()
                .unwrap_or(existing.ingredients),
            created_at: existing.created_at,
            updated_at: now(),
            version: existing.version + 1,
        };

        sqlx::query(
            r#"UPDATE recipes SET
                title = ?, description = ?, category = ?, image_url = ?, video_url = ?,
                prep_minutes = ?, servings = ?, instructions = ?, updated_at = ?, version = ?
            WHERE id = ? AND version = ?"#,
        )
        .bind(&updated.title)
        .bind(&updated.description)
        .bind(&updated.category)
        .bind(&updated.image_url)
        .bind(&updated.video_url)
        .bind(updated.prep_minutes)
        .bind(updated.servings)
        .bind(&updated.instructions)
        .bind(&updated.updated_at)
        .bind(updated.version)
        .bind(id)
        .bind(existing.version)
        .execute(&mut *tx)
        .await?;

        if let Some(ingredients) = &request.ingredients {
            validate_product_quantities(&mut tx, ingredients).await?;
            sqlx::query("DELETE FROM recipe_ingredients WHERE recipe_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            write_ingredients(&mut tx, id, ingredients).await?;
        }

        bump_revision(&mut tx).await?;
        tx.commit().await?;

        Ok(updated)
    }

    pub async fn delete_recipe(&self, id: &str) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM recipes WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Recipe {} not found", id)));
        }

        bump_revision(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// A recipe's ingredients with current prices, for "buy this recipe" display.
    pub async fn recipe_ingredients(
        &self,
        recipe_id: &str,
        portions: i64,
    ) -> Result<Vec<PricedIngredient>, AppError> {
        if self.get_recipe(recipe_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Recipe {} not found", recipe_id)));
        }

        let rows = sqlx::query(
            r#"SELECT ri.product_id, ri.quantity, p.name, p.price, p.available
               FROM recipe_ingredients ri JOIN products p ON p.id = ri.product_id
               WHERE ri.recipe_id = ? ORDER BY ri.position"#,
        )
        .bind(recipe_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let quantity = pricing::recipe_line_quantity(row.get("quantity"), portions);
                let unit_price: i64 = row.get("price");
                let available: i32 = row.get("available");
                PricedIngredient {
                    product_id: row.get("product_id"),
                    name: row.get("name"),
                    quantity,
                    unit_price,
                    line_total: pricing::line_total(unit_price, quantity),
                    available: available != 0,
                }
            })
            .collect())
    }

    // ==================== VIDEO OPERATIONS ====================

    pub async fn list_videos(&self, recipe_id: Option<&str>) -> Result<Vec<Video>, AppError> {
        let rows = match recipe_id {
            Some(recipe_id) => {
                sqlx::query(&format!(
                    "SELECT {} FROM videos WHERE recipe_id = ? ORDER BY created_at DESC",
                    VIDEO_COLUMNS
                ))
                .bind(recipe_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM videos ORDER BY created_at DESC",
                    VIDEO_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(video_from_row).collect())
    }

    pub async fn get_video(&self, id: &str) -> Result<Option<Video>, AppError> {
        let row = sqlx::query(&format!("SELECT {} FROM videos WHERE id = ?", VIDEO_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(video_from_row))
    }

    pub async fn create_video(&self, request: &CreateVideoRequest) -> Result<Video, AppError> {
        require(&request.title, "Title")?;
        require(&request.url, "Url")?;
        if let Some(recipe_id) = &request.recipe_id {
            self.ensure_recipe_exists(recipe_id).await?;
        }

        let video = Video {
            id: new_id(),
            title: request.title.trim().to_string(),
            description: request.description.clone(),
            url: request.url.trim().to_string(),
            thumbnail_url: request.thumbnail_url.clone(),
            recipe_id: request.recipe_id.clone(),
            created_at: now(),
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO videos (id, title, description, url, thumbnail_url, recipe_id, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&video.id)
        .bind(&video.title)
        .bind(&video.description)
        .bind(&video.url)
        .bind(&video.thumbnail_url)
        .bind(&video.recipe_id)
        .bind(&video.created_at)
        .execute(&mut *tx)
        .await?;
        bump_revision(&mut tx).await?;
        tx.commit().await?;

        Ok(video)
    }

    pub async fn update_video(
        &self,
        id: &str,
        request: &UpdateVideoRequest,
    ) -> Result<Video, AppError> {
        let existing = self
            .get_video(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Video {} not found", id)))?;

        if let Some(title) = &request.title {
            require(title, "Title")?;
        }
        if let Some(url) = &request.url {
            require(url, "Url")?;
        }
        if let Some(recipe_id) = &request.recipe_id {
            self.ensure_recipe_exists(recipe_id).await?;
        }

        let updated = Video {
            id: existing.id,
            title: request
                .title
                .as_ref()
                .map(|t| t.trim().to_string())
                .unwrap_or(existing.title),
            description: request.description.clone().or(existing.description),
            url: request
                .url
                .as_ref()
                .map(|u| u.trim().to_string())
                .unwrap_or(existing.url),
            thumbnail_url: request.thumbnail_url.clone().or(existing.thumbnail_url),
            recipe_id: request.recipe_id.clone().or(existing.recipe_id),
            created_at: existing.created_at,
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE videos SET title = ?, description = ?, url = ?, thumbnail_url = ?, recipe_id = ? WHERE id = ?",
        )
        .bind(&updated.title)
        .bind(&updated.description)
        .bind(&updated.url)
        .bind(&updated.thumbnail_url)
        .bind(&updated.recipe_id)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        bump_revision(&mut tx).await?;
        tx.commit().await?;

        Ok(updated)
    }

    pub async fn delete_video(&self, id: &str) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM videos WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Video {} not found", id)));
        }

        bump_revision(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn ensure_recipe_exists(&self, recipe_id: &str) -> Result<(), AppError> {
        let exists = sqlx::query("SELECT 1 FROM recipes WHERE id = ?")
            .bind(recipe_id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if !exists {
            return Err(AppError::Validation(format!(
                "Recipe {} does not exist",
                recipe_id
            )));
        }
        Ok(())
    }
}

fn require_ingredients(ingredients: &[ProductQuantity]) -> Result<(), AppError> {
    if ingredients.is_empty() {
        return Err(AppError::Validation(
            "A recipe needs at least one ingredient".to_string(),
        ));
    }
    Ok(())
}

/// Check a recipe or bundle item list: positive quantities, no duplicate
/// products, every product exists.
pub(super) async fn validate_product_quantities(
    conn: &mut SqliteConnection,
    items: &[ProductQuantity],
) -> Result<(), AppError> {
    let mut seen = HashSet::new();
    for item in items {
        if item.quantity <= 0 || item.quantity > MAX_QUANTITY {
            return Err(AppError::Validation(format!(
                "Quantity for product {} must be between 1 and {}",
                item.product_id, MAX_QUANTITY
            )));
        }
        if !seen.insert(item.product_id.as_str()) {
            return Err(AppError::Validation(format!(
                "Product {} is listed more than once",
                item.product_id
            )));
        }
        let exists = sqlx::query("SELECT 1 FROM products WHERE id = ?")
            .bind(&item.product_id)
            .fetch_optional(&mut *conn)
            .await?
            .is_some();
        if !exists {
            return Err(AppError::Validation(format!(
                "Product {} does not exist",
                item.product_id
            )));
        }
    }
    Ok(())
}

pub(super) async fn fetch_recipe(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<Recipe>, AppError> {
    let row = sqlx::query(&format!("SELECT {} FROM recipes WHERE id = ?", RECIPE_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => {
            let ingredients = load_ingredients(conn, id).await?;
            Ok(Some(recipe_from_row(&row, ingredients)))
        }
        None => Ok(None),
    }
}

async fn load_ingredients(
    conn: &mut SqliteConnection,
    recipe_id: &str,
) -> Result<Vec<ProductQuantity>, AppError> {
    let rows = sqlx::query(
        "SELECT product_id, quantity FROM recipe_ingredients WHERE recipe_id = ? ORDER BY position",
    )
    .bind(recipe_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .iter()
        .map(|row| ProductQuantity {
            product_id: row.get("product_id"),
            quantity: row.get("quantity"),
        })
        .collect())
}

async fn write_ingredients(
    conn: &mut SqliteConnection,
    recipe_id: &str,
    ingredients: &[ProductQuantity],
) -> Result<(), AppError> {
    for (position, ingredient) in ingredients.iter().enumerate() {
        sqlx::query(
            "INSERT INTO recipe_ingredients (recipe_id, product_id, quantity, position) VALUES (?, ?, ?, ?)",
        )
        .bind(recipe_id)
        .bind(&ingredient.product_id)
        .bind(ingredient.quantity)
        .bind(position as i64)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

fn validate_price(price: i64) -> Result<(), AppError> {
    if price < 0 {
        return Err(AppError::Validation("Price cannot be negative".to_string()));
    }
    Ok(())
}

fn validate_servings(servings: i32) -> Result<(), AppError> {
    if servings <= 0 {
        return Err(AppError::Validation(
            "Servings must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

// Helper functions for row conversion

fn product_from_row(row: &SqliteRow) -> Product {
    let available: i32 = row.get("available");
    Product {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        category: row.get("category"),
        price: row.get("price"),
        unit: row.get("unit"),
        image_url: row.get("image_url"),
        available: available != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    }
}

fn recipe_from_row(row: &SqliteRow, ingredients: Vec<ProductQuantity>) -> Recipe {
    Recipe {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        category: row.get("category"),
        image_url: row.get("image_url"),
        video_url: row.get("video_url"),
        prep_minutes: row.get("prep_minutes"),
        servings: row.get("servings"),
        instructions: row.get("instructions"),
        ingredients,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    }
}

fn video_from_row(row: &SqliteRow) -> Video {
    Video {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        url: row.get("url"),
        thumbnail_url: row.get("thumbnail_url"),
        recipe_id: row.get("recipe_id"),
        created_at: row.get("created_at"),
    }
}
