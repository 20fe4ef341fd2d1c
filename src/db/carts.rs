//! Cart operations.
//!
//! A customer has three kinds of sub-cart (personal items, recipe carts and
//! preconfigured bundle selections) and one `main_carts` summary row. Every
//! mutation runs in a transaction that ends by rebuilding the summary row, so
//! the row always agrees with the sub-carts it summarises.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::catalog::validate_product_quantities;
use super::repository::{
    add_quantity, bump_revision, new_id, now, parse_json_array, require, require_positive,
    Repository,
};
use crate::errors::AppError;
use crate::models::{
    AddCartItemRequest, AddRecipeCartRequest, CartLine, CreatePreconfiguredCartRequest, MainCart,
    MainCartSummary, PersonalCart, PreconfiguredCart, PreconfiguredSelection, ProductQuantity,
    RecipeCart, SelectPreconfiguredRequest, UpdatePreconfiguredCartRequest,
};
use crate::pricing::{self, CartSummary};

impl Repository {
    // ==================== MAIN CART ====================

    /// The main cart with every sub-cart expanded.
    ///
    /// Totals are recomputed from current prices; if the stored summary row has
    /// drifted (a price changed since the last cart mutation) it is rewritten.
    pub async fn get_main_cart(&self, user_id: &str) -> Result<MainCart, AppError> {
        self.require_user(user_id).await?;

        let mut conn = self.pool.acquire().await?;
        let cart = load_main_cart(&mut conn, user_id).await?;
        let stored = load_summary_row(&mut conn, user_id).await?;
        drop(conn);

        let stale = match &stored {
            Some(row) => !same_totals(row, &cart.summary),
            None => !cart.is_empty(),
        };

        if stale {
            tracing::debug!(user_id = %user_id, "Main cart summary out of date, rebuilding");
            let mut tx = self.pool.begin().await?;
            let cart = rebuild_main_cart(&mut tx, user_id).await?;
            tx.commit().await?;
            return Ok(cart);
        }

        let mut cart = cart;
        if let Some(row) = stored {
            cart.summary.updated_at = row.updated_at;
        }
        Ok(cart)
    }

    /// Empty every sub-cart.
    pub async fn clear_cart(&self, user_id: &str) -> Result<MainCart, AppError> {
        let mut tx = self.pool.begin().await?;
        ensure_user(&mut tx, user_id).await?;
        clear_sub_carts(&mut tx, user_id).await?;
        let cart = finish_mutation(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(cart)
    }

    // ==================== PERSONAL CART ====================

    /// Add a product. Adding a product already in the cart increases its quantity.
    pub async fn add_cart_item(
        &self,
        user_id: &str,
        request: &AddCartItemRequest,
    ) -> Result<MainCart, AppError> {
        require_positive(request.quantity, "Quantity")?;

        let mut tx = self.pool.begin().await?;
        ensure_user(&mut tx, user_id).await?;
        ensure_product_available(&mut tx, &request.product_id).await?;

        let current: i64 = sqlx::query(
            "SELECT quantity FROM cart_items WHERE user_id = ? AND product_id = ?",
        )
        .bind(user_id)
        .bind(&request.product_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| row.try_get("quantity"))
        .transpose()?
        .unwrap_or(0);
        let quantity = add_quantity(current, request.quantity, "Quantity")?;

        sqlx::query(
            r#"INSERT INTO cart_items (user_id, product_id, quantity, added_at) VALUES (?, ?, ?, ?)
               ON CONFLICT(user_id, product_id) DO UPDATE SET quantity = excluded.quantity"#,
        )
        .bind(user_id)
        .bind(&request.product_id)
        .bind(quantity)
        .bind(now())
        .execute(&mut *tx)
        .await?;

        let cart = finish_mutation(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(cart)
    }

    /// Set a line's quantity. Zero removes the line.
    pub async fn set_cart_item_quantity(
        &self,
        user_id: &str,
        product_id: &str,
        quantity: i64,
    ) -> Result<MainCart, AppError> {
        if quantity != 0 {
            require_positive(quantity, "Quantity")?;
        }

        let mut tx = self.pool.begin().await?;
        ensure_user(&mut tx, user_id).await?;

        let result = if quantity == 0 {
            sqlx::query("DELETE FROM cart_items WHERE user_id = ? AND product_id = ?")
                .bind(user_id)
                .bind(product_id)
                .execute(&mut *tx)
                .await?
        } else {
            sqlx::query("UPDATE cart_items SET quantity = ? WHERE user_id = ? AND product_id = ?")
                .bind(quantity)
                .bind(user_id)
                .bind(product_id)
                .execute(&mut *tx)
                .await?
        };

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Product {} is not in the cart",
                product_id
            )));
        }

        let cart = finish_mutation(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(cart)
    }

    pub async fn remove_cart_item(
        &self,
        user_id: &str,
        product_id: &str,
    ) -> Result<MainCart, AppError> {
        self.set_cart_item_quantity(user_id, product_id, 0).await
    }

    // ==================== RECIPE CARTS ====================

    pub async fn add_recipe_cart(
        &self,
        user_id: &str,
        request: &AddRecipeCartRequest,
    ) -> Result<MainCart, AppError> {
        require_positive(request.portions, "Portions")?;

        let mut tx = self.pool.begin().await?;
        ensure_user(&mut tx, user_id).await?;

        let exists = sqlx::query("SELECT 1 FROM recipes WHERE id = ?")
            .bind(&request.recipe_id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !exists {
            return Err(AppError::NotFound(format!(
                "Recipe {} not found",
                request.recipe_id
            )));
        }

        sqlx::query(
            "INSERT INTO recipe_carts (id, user_id, recipe_id, portions, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(new_id())
        .bind(user_id)
        .bind(&request.recipe_id)
        .bind(request.portions)
        .bind(now())
        .execute(&mut *tx)
        .await?;

        let cart = finish_mutation(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(cart)
    }

    pub async fn update_recipe_cart(
        &self,
        user_id: &str,
        recipe_cart_id: &str,
        portions: i64,
    ) -> Result<MainCart, AppError> {
        require_positive(portions, "Portions")?;

        let mut tx = self.pool.begin().await?;
        let result =
            sqlx::query("UPDATE recipe_carts SET portions = ? WHERE id = ? AND user_id = ?")
                .bind(portions)
                .bind(recipe_cart_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Recipe cart {} not found",
                recipe_cart_id
            )));
        }

        let cart = finish_mutation(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(cart)
    }

    pub async fn remove_recipe_cart(
        &self,
        user_id: &str,
        recipe_cart_id: &str,
    ) -> Result<MainCart, AppError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM recipe_carts WHERE id = ? AND user_id = ?")
            .bind(recipe_cart_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Recipe cart {} not found",
                recipe_cart_id
            )));
        }

        let cart = finish_mutation(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(cart)
    }

    // ==================== PRECONFIGURED SELECTIONS ====================

    /// Pick a bundle. Picking one already in the cart increases its quantity.
    pub async fn select_preconfigured(
        &self,
        user_id: &str,
        request: &SelectPreconfiguredRequest,
    ) -> Result<MainCart, AppError> {
        require_positive(request.quantity, "Quantity")?;

        let mut tx = self.pool.begin().await?;
        ensure_user(&mut tx, user_id).await?;

        let active: Option<i32> =
            sqlx::query("SELECT active FROM preconfigured_carts WHERE id = ?")
                .bind(&request.preconfigured_cart_id)
                .fetch_optional(&mut *tx)
                .await?
                .map(|row| row.get("active"));
        match active {
            None => {
                return Err(AppError::NotFound(format!(
                    "Preconfigured cart {} not found",
                    request.preconfigured_cart_id
                )))
            }
            Some(0) => {
                return Err(AppError::Validation(
                    "This bundle is no longer offered".to_string(),
                ))
            }
            Some(_) => {}
        }

        let existing = sqlx::query(
            "SELECT id, quantity FROM preconfigured_selections WHERE user_id = ? AND preconfigured_cart_id = ?",
        )
        .bind(user_id)
        .bind(&request.preconfigured_cart_id)
        .fetch_optional(&mut *tx)
        .await?;

        match existing {
            Some(row) => {
                let selection_id: String = row.try_get("id")?;
                let current: i64 = row.try_get("quantity")?;
                let quantity = add_quantity(current, request.quantity, "Quantity")?;
                sqlx::query("UPDATE preconfigured_selections SET quantity = ? WHERE id = ?")
                    .bind(quantity)
                    .bind(&selection_id)
                    .execute(&mut *tx)
                    .await?;
            }
            None => {
                sqlx::query(
                    "INSERT INTO preconfigured_selections (id, user_id, preconfigured_cart_id, quantity, created_at) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(new_id())
                .bind(user_id)
                .bind(&request.preconfigured_cart_id)
                .bind(request.quantity)
                .bind(now())
                .execute(&mut *tx)
                .await?;
            }
        }

        let cart = finish_mutation(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(cart)
    }

    /// Change how many of a bundle the customer wants. Zero removes the selection.
    pub async fn update_selection(
        &self,
        user_id: &str,
        selection_id: &str,
        quantity: i64,
    ) -> Result<MainCart, AppError> {
        if quantity != 0 {
            require_positive(quantity, "Quantity")?;
        }

        let mut tx = self.pool.begin().await?;
        let result = if quantity == 0 {
            sqlx::query("DELETE FROM preconfigured_selections WHERE id = ? AND user_id = ?")
                .bind(selection_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?
        } else {
            sqlx::query(
                "UPDATE preconfigured_selections SET quantity = ? WHERE id = ? AND user_id = ?",
            )
            .bind(quantity)
            .bind(selection_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?
        };

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Selection {} not found",
                selection_id
            )));
        }

        let cart = finish_mutation(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(cart)
    }

    pub async fn remove_selection(
        &self,
        user_id: &str,
        selection_id: &str,
    ) -> Result<MainCart, AppError> {
        self.update_selection(user_id, selection_id, 0).await
    }

    // ==================== PRECONFIGURED CARTS (ADMIN) ====================

    pub async fn list_preconfigured_carts(
        &self,
        active_only: bool,
    ) -> Result<Vec<PreconfiguredCart>, AppError> {
        let mut conn = self.pool.acquire().await?;
        let sql = if active_only {
            "SELECT id, name, description, image_url, active, created_at, updated_at FROM preconfigured_carts WHERE active = 1 ORDER BY name"
        } else {
            "SELECT id, name, description, image_url, active, created_at, updated_at FROM preconfigured_carts ORDER BY name"
        };
        let rows = sqlx::query(sql).fetch_all(&mut *conn).await?;

        let mut carts = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.get("id");
            let items = load_bundle_lines(&mut conn, &id).await?;
            carts.push(preconfigured_from_row(row, items));
        }
        Ok(carts)
    }

    pub async fn get_preconfigured_cart(
        &self,
        id: &str,
    ) -> Result<Option<PreconfiguredCart>, AppError> {
        let mut conn = self.pool.acquire().await?;
        fetch_preconfigured(&mut conn, id).await
    }

    pub async fn create_preconfigured_cart(
        &self,
        request: &CreatePreconfiguredCartRequest,
    ) -> Result<PreconfiguredCart, AppError> {
        require(&request.name, "Name")?;
        if request.items.is_empty() {
            return Err(AppError::Validation(
                "A preconfigured cart needs at least one product".to_string(),
            ));
        }

        let id = new_id();
        let now = now();

        let mut tx = self.pool.begin().await?;
        validate_product_quantities(&mut tx, &request.items).await?;

        sqlx::query(
            "INSERT INTO preconfigured_carts (id, name, description, image_url, active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(request.name.trim())
        .bind(&request.description)
        .bind(&request.image_url)
        .bind(request.active as i32)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        write_bundle_items(&mut tx, &id, &request.items).await?;
        bump_revision(&mut tx).await?;

        let cart = fetch_preconfigured(&mut tx, &id)
            .await?
            .ok_or_else(|| AppError::Internal("Preconfigured cart vanished".to_string()))?;
        tx.commit().await?;

        tracing::info!(preconfigured_cart_id = %id, price = cart.price, "Preconfigured cart created");
        Ok(cart)
    }

    pub async fn update_preconfigured_cart(
        &self,
        id: &str,
        request: &UpdatePreconfiguredCartRequest,
    ) -> Result<PreconfiguredCart, AppError> {
        let mut tx = self.pool.begin().await?;
        let existing = fetch_preconfigured(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Preconfigured cart {} not found", id)))?;

        if let Some(name) = &request.name {
            require(name, "Name")?;
        }

        let name = request
            .name
            .as_ref()
            .map(|n| n.trim().to_string())
            .unwrap_or(existing.name);
        let description = request.description.clone().or(existing.description);
        let image_url = request.image_url.clone().or(existing.image_url);
        let active = request.active.unwrap_or(existing.active);

        sqlx::query(
            "UPDATE preconfigured_carts SET name = ?, description = ?, image_url = ?, active = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&name)
        .bind(&description)
        .bind(&image_url)
        .bind(active as i32)
        .bind(now())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if let Some(items) = &request.items {
            if items.is_empty() {
                return Err(AppError::Validation(
                    "A preconfigured cart needs at least one product".to_string(),
                ));
            }
            validate_product_quantities(&mut tx, items).await?;
            sqlx::query("DELETE FROM preconfigured_cart_items WHERE cart_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            write_bundle_items(&mut tx, id, items).await?;
        }

        bump_revision(&mut tx).await?;
        let cart = fetch_preconfigured(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Preconfigured cart {} not found", id)))?;
        tx.commit().await?;

        Ok(cart)
    }

    /// Delete a bundle. Customer selections of it are dropped by cascade, so the
    /// affected main cart rows are rebuilt in the same transaction.
    pub async fn delete_preconfigured_cart(&self, id: &str) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let affected_users: Vec<String> = sqlx::query(
            "SELECT DISTINCT user_id FROM preconfigured_selections WHERE preconfigured_cart_id = ?",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(|row| row.get("user_id"))
        .collect();

        let result = sqlx::query("DELETE FROM preconfigured_carts WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Preconfigured cart {} not found",
                id
            )));
        }

        for user_id in &affected_users {
            rebuild_main_cart(&mut tx, user_id).await?;
        }

        bump_revision(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }
}

// ==================== HELPERS ====================

async fn ensure_user(conn: &mut SqliteConnection, user_id: &str) -> Result<(), AppError> {
    let exists = sqlx::query("SELECT 1 FROM profiles WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
        .is_some();
    if !exists {
        return Err(AppError::NotFound(format!("User {} not found", user_id)));
    }
    Ok(())
}

async fn ensure_product_available(
    conn: &mut SqliteConnection,
    product_id: &str,
) -> Result<(), AppError> {
    let available: Option<i32> = sqlx::query("SELECT available FROM products WHERE id = ?")
        .bind(product_id)
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| row.get("available"));

    match available {
        None => Err(AppError::NotFound(format!(
            "Product {} not found",
            product_id
        ))),
        Some(0) => Err(AppError::Validation(format!(
            "Product {} is currently unavailable",
            product_id
        ))),
        Some(_) => Ok(()),
    }
}

/// Remove every sub-cart line of a user.
pub(super) async fn clear_sub_carts(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<(), AppError> {
    for sql in [
        "DELETE FROM cart_items WHERE user_id = ?",
        "DELETE FROM recipe_carts WHERE user_id = ?",
        "DELETE FROM preconfigured_selections WHERE user_id = ?",
    ] {
        sqlx::query(sql).bind(user_id).execute(&mut *conn).await?;
    }
    Ok(())
}

/// Rebuild the summary row and bump the revision, inside the caller's transaction.
async fn finish_mutation(conn: &mut SqliteConnection, user_id: &str) -> Result<MainCart, AppError> {
    let cart = rebuild_main_cart(conn, user_id).await?;
    bump_revision(conn).await?;
    Ok(cart)
}

/// Recompute the main cart from its sub-carts and upsert the summary row.
pub(super) async fn rebuild_main_cart(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<MainCart, AppError> {
    let cart = load_main_cart(conn, user_id).await?;
    let summary = &cart.summary;

    sqlx::query(
        r#"INSERT INTO main_carts (
            user_id, personal_total, recipe_total, preconfigured_total, total, item_count,
            recipe_cart_ids, preconfigured_selection_ids, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET
            personal_total = excluded.personal_total,
            recipe_total = excluded.recipe_total,
            preconfigured_total = excluded.preconfigured_total,
            total = excluded.total,
            item_count = excluded.item_count,
            recipe_cart_ids = excluded.recipe_cart_ids,
            preconfigured_selection_ids = excluded.preconfigured_selection_ids,
            updated_at = excluded.updated_at"#,
    )
    .bind(user_id)
    .bind(summary.personal_total)
    .bind(summary.recipe_total)
    .bind(summary.preconfigured_total)
    .bind(summary.total)
    .bind(summary.item_count)
    .bind(serde_json::to_string(&summary.recipe_cart_ids)?)
    .bind(serde_json::to_string(&summary.preconfigured_selection_ids)?)
    .bind(&summary.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(cart)
}

/// Load every sub-cart and compute a fresh summary (not persisted).
pub(super) async fn load_main_cart(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<MainCart, AppError> {
    let personal = load_personal_cart(conn, user_id).await?;
    let recipes = load_recipe_carts(conn, user_id).await?;
    let preconfigured = load_selections(conn, user_id).await?;

    let totals = CartSummary::from_parts(&personal, &recipes, &preconfigured);
    let summary = MainCartSummary {
        user_id: user_id.to_string(),
        personal_total: totals.personal_total,
        recipe_total: totals.recipe_total,
        preconfigured_total: totals.preconfigured_total,
        total: totals.total,
        item_count: totals.item_count,
        recipe_cart_ids: recipes.iter().map(|r| r.id.clone()).collect(),
        preconfigured_selection_ids: preconfigured.iter().map(|s| s.id.clone()).collect(),
        updated_at: now(),
    };

    Ok(MainCart {
        summary,
        personal,
        recipes,
        preconfigured,
    })
}

async fn load_summary_row(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Option<MainCartSummary>, AppError> {
    let row = sqlx::query(
        r#"SELECT user_id, personal_total, recipe_total, preconfigured_total, total, item_count,
                  recipe_cart_ids, preconfigured_selection_ids, updated_at
           FROM main_carts WHERE user_id = ?"#,
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|row| {
        let recipe_cart_ids: String = row.get("recipe_cart_ids");
        let selection_ids: String = row.get("preconfigured_selection_ids");
        MainCartSummary {
            user_id: row.get("user_id"),
            personal_total: row.get("personal_total"),
            recipe_total: row.get("recipe_total"),
            preconfigured_total: row.get("preconfigured_total"),
            total: row.get("total"),
            item_count: row.get("item_count"),
            recipe_cart_ids: parse_json_array(&recipe_cart_ids),
            preconfigured_selection_ids: parse_json_array(&selection_ids),
            updated_at: row.get("updated_at"),
        }
    }))
}

fn same_totals(a: &MainCartSummary, b: &MainCartSummary) -> bool {
    a.personal_total == b.personal_total
        && a.recipe_total == b.recipe_total
        && a.preconfigured_total == b.preconfigured_total
        && a.total == b.total
        && a.item_count == b.item_count
        && a.recipe_cart_ids == b.recipe_cart_ids
        && a.preconfigured_selection_ids == b.preconfigured_selection_ids
}

async fn load_personal_cart(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<PersonalCart, AppError> {
    let rows = sqlx::query(
        r#"SELECT ci.product_id, ci.quantity, p.name, p.price, p.available
           FROM cart_items ci JOIN products p ON p.id = ci.product_id
           WHERE ci.user_id = ? ORDER BY ci.added_at, p.name"#,
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    let items = rows
        .iter()
        .map(|row| line_from_row(row, 1))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(PersonalCart {
        subtotal: pricing::subtotal(&items),
        items,
    })
}

async fn load_recipe_carts(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Vec<RecipeCart>, AppError> {
    let rows = sqlx::query(
        r#"SELECT rc.id, rc.recipe_id, rc.portions, rc.created_at, r.title
           FROM recipe_carts rc JOIN recipes r ON r.id = rc.recipe_id
           WHERE rc.user_id = ? ORDER BY rc.created_at, rc.id"#,
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut carts = Vec::with_capacity(rows.len());
    for row in &rows {
        let recipe_id: String = row.get("recipe_id");
        let portions: i64 = row.try_get("portions")?;

        let lines = sqlx::query(
            r#"SELECT ri.product_id, ri.quantity, p.name, p.price, p.available
               FROM recipe_ingredients ri JOIN products p ON p.id = ri.product_id
               WHERE ri.recipe_id = ? ORDER BY ri.position"#,
        )
        .bind(&recipe_id)
        .fetch_all(&mut *conn)
        .await?;

        let items = lines
            .iter()
            .map(|line| line_from_row(line, portions))
            .collect::<Result<Vec<_>, _>>()?;

        carts.push(RecipeCart {
            id: row.get("id"),
            recipe_id,
            recipe_title: row.get("title"),
            portions,
            subtotal: pricing::subtotal(&items),
            items,
            created_at: row.get("created_at"),
        });
    }
    Ok(carts)
}

async fn load_selections(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Vec<PreconfiguredSelection>, AppError> {
    let rows = sqlx::query(
        r#"SELECT s.id, s.preconfigured_cart_id, s.quantity, pc.name
           FROM preconfigured_selections s
           JOIN preconfigured_carts pc ON pc.id = s.preconfigured_cart_id
           WHERE s.user_id = ? ORDER BY s.created_at, s.id"#,
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut selections = Vec::with_capacity(rows.len());
    for row in &rows {
        let cart_id: String = row.get("preconfigured_cart_id");
        let quantity: i64 = row.try_get("quantity")?;
        let bundle = load_bundle_lines(conn, &cart_id).await?;
        let items = pricing::scale_lines(&bundle, quantity);

        selections.push(PreconfiguredSelection {
            id: row.get("id"),
            preconfigured_cart_id: cart_id,
            name: row.get("name"),
            quantity,
            unit_price: pricing::subtotal(&bundle),
            subtotal: pricing::subtotal(&items),
            items,
        });
    }
    Ok(selections)
}

/// Lines of one bundle, for a single unit of it.
async fn load_bundle_lines(
    conn: &mut SqliteConnection,
    cart_id: &str,
) -> Result<Vec<CartLine>, AppError> {
    let rows = sqlx::query(
        r#"SELECT pi.product_id, pi.quantity, p.name, p.price, p.available
           FROM preconfigured_cart_items pi JOIN products p ON p.id = pi.product_id
           WHERE pi.cart_id = ? ORDER BY pi.position"#,
    )
    .bind(cart_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(|row| line_from_row(row, 1)).collect()
}

async fn fetch_preconfigured(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<PreconfiguredCart>, AppError> {
    let row = sqlx::query(
        "SELECT id, name, description, image_url, active, created_at, updated_at FROM preconfigured_carts WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => {
            let items = load_bundle_lines(conn, id).await?;
            Ok(Some(preconfigured_from_row(&row, items)))
        }
        None => Ok(None),
    }
}

async fn write_bundle_items(
    conn: &mut SqliteConnection,
    cart_id: &str,
    items: &[ProductQuantity],
) -> Result<(), AppError> {
    for (position, item) in items.iter().enumerate() {
        sqlx::query(
            "INSERT INTO preconfigured_cart_items (cart_id, product_id, quantity, position) VALUES (?, ?, ?, ?)",
        )
        .bind(cart_id)
        .bind(&item.product_id)
        .bind(item.quantity)
        .bind(position as i64)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Build a priced line from a `product_id, quantity, name, price, available` row.
fn line_from_row(row: &SqliteRow, multiplier: i64) -> Result<CartLine, AppError> {
    let quantity: i64 = row.try_get("quantity")?;
    let price: i64 = row.try_get("price")?;
    let available: i32 = row.try_get("available")?;
    let product_id: String = row.try_get("product_id")?;
    let name: String = row.try_get("name")?;
    Ok(pricing::priced_line(
        &product_id,
        &name,
        price,
        pricing::recipe_line_quantity(quantity, multiplier),
        available != 0,
    ))
}

fn preconfigured_from_row(row: &SqliteRow, items: Vec<CartLine>) -> PreconfiguredCart {
    let active: i32 = row.get("active");
    PreconfiguredCart {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        image_url: row.get("image_url"),
        active: active != 0,
        price: pricing::subtotal(&items),
        items,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
