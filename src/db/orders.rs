//! Cash-on-delivery orders and delivery tracking.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::carts::{clear_sub_carts, load_main_cart, rebuild_main_cart};
use super::repository::{bump_revision, new_id, now, Repository};
use crate::errors::AppError;
use crate::models::{
    CartLine, CheckoutRequest, LineSource, Order, OrderItem, OrderStatus, OrderTracking,
    RecordPositionRequest, TrackingPoint, UserRole,
};

const ORDER_COLUMNS: &str = "id, user_id, status, subtotal, delivery_fee, total, delivery_address, phone, notes, courier_id, created_at, updated_at, delivered_at";

impl Repository {
    /// Turn the main cart into a pending order and empty every sub-cart.
    ///
    /// Prices are snapshotted into the order lines, so later catalog changes do
    /// not alter placed orders.
    pub async fn checkout(
        &self,
        user_id: &str,
        request: &CheckoutRequest,
        delivery_fee: i64,
    ) -> Result<Order, AppError> {
        let mut tx = self.pool.begin().await?;

        let profile = sqlx::query("SELECT address, phone FROM profiles WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;

        let delivery_address = pick_contact(
            request.delivery_address.as_deref(),
            profile.get("address"),
            "Delivery address",
        )?;
        let phone = pick_contact(request.phone.as_deref(), profile.get("phone"), "Phone")?;

        let cart = load_main_cart(&mut tx, user_id).await?;

        let mut items = Vec::new();
        push_lines(&mut items, &cart.personal.items, LineSource::Personal, None);
        for recipe in &cart.recipes {
            push_lines(
                &mut items,
                &recipe.items,
                LineSource::Recipe,
                Some(&recipe.id),
            );
        }
        for selection in &cart.preconfigured {
            push_lines(
                &mut items,
                &selection.items,
                LineSource::Preconfigured,
                Some(&selection.preconfigured_cart_id),
            );
        }
        if items.is_empty() {
            return Err(AppError::EmptyCart);
        }

        let unavailable: Vec<&str> = cart
            .personal
            .items
            .iter()
            .chain(cart.recipes.iter().flat_map(|r| r.items.iter()))
            .chain(cart.preconfigured.iter().flat_map(|s| s.items.iter()))
            .filter(|line| !line.available)
            .map(|line| line.name.as_str())
            .collect();
        if !unavailable.is_empty() {
            return Err(AppError::Validation(format!(
                "Unavailable products in cart: {}",
                unavailable.join(", ")
            )));
        }

        let subtotal = cart.summary.total;
        let now = now();
        let order = Order {
            id: new_id(),
            user_id: user_id.to_string(),
            status: OrderStatus::Pending,
            status_label: OrderStatus::Pending.label().to_string(),
            items,
            subtotal,
            delivery_fee,
            total: subtotal.saturating_add(delivery_fee),
            delivery_address,
            phone,
            notes: request.notes.clone(),
            courier_id: None,
            created_at: now.clone(),
            updated_at: now,
            delivered_at: None,
        };

        sqlx::query(&format!(
            "INSERT INTO orders ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, NULL)",
            ORDER_COLUMNS
        ))
        .bind(&order.id)
        .bind(&order.user_id)
        .bind(order.status.as_str())
        .bind(order.subtotal)
        .bind(order.delivery_fee)
        .bind(order.total)
        .bind(&order.delivery_address)
        .bind(&order.phone)
        .bind(&order.notes)
        .bind(&order.created_at)
        .bind(&order.updated_at)
        .execute(&mut *tx)
        .await?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                r#"INSERT INTO order_items (
                    order_id, position, product_id, name, unit_price, quantity, line_total, source, source_ref
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(&order.id)
            .bind(position as i64)
            .bind(&item.product_id)
            .bind(&item.name)
            .bind(item.unit_price)
            .bind(item.quantity)
            .bind(item.line_total)
            .bind(item.source.as_str())
            .bind(&item.source_ref)
            .execute(&mut *tx)
            .await?;
        }

        clear_sub_carts(&mut tx, user_id).await?;
        rebuild_main_cart(&mut tx, user_id).await?;
        bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(
            order_id = %order.id,
            user_id = %user_id,
            total = order.total,
            lines = order.items.len(),
            "Order placed"
        );

        Ok(order)
    }

    pub async fn get_order(&self, id: &str) -> Result<Option<Order>, AppError> {
        let mut conn = self.pool.acquire().await?;
        fetch_order(&mut conn, id).await
    }

    async fn require_order(&self, id: &str) -> Result<Order, AppError> {
        self.get_order(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {} not found", id)))
    }

    /// A customer's orders, newest first.
    pub async fn list_user_orders(&self, user_id: &str) -> Result<Vec<Order>, AppError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(&format!(
            "SELECT {} FROM orders WHERE user_id = ? ORDER BY created_at DESC",
            ORDER_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            orders.push(order_with_items(&mut conn, row).await?);
        }
        Ok(orders)
    }

    /// All orders for the back-office, optionally filtered by status.
    pub async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, AppError> {
        let mut conn = self.pool.acquire().await?;
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {} FROM orders WHERE status = ? ORDER BY created_at DESC",
                    ORDER_COLUMNS
                ))
                .bind(status.as_str())
                .fetch_all(&mut *conn)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM orders ORDER BY created_at DESC",
                    ORDER_COLUMNS
                ))
                .fetch_all(&mut *conn)
                .await?
            }
        };

        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            orders.push(order_with_items(&mut conn, row).await?);
        }
        Ok(orders)
    }

    /// Move an order to `next` if the transition table allows it.
    ///
    /// `assigned` is reached through [`Repository::assign_courier`] only, since it
    /// needs a courier.
    pub async fn transition_order(&self, id: &str, next: OrderStatus) -> Result<Order, AppError> {
        if next == OrderStatus::Assigned {
            return Err(AppError::Validation(
                "Assign a courier to move an order to assigned".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        let current = fetch_status(&mut tx, id).await?;
        set_status(&mut tx, id, current, next).await?;
        bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(order_id = %id, from = current.as_str(), to = next.as_str(), "Order status changed");
        if next.is_terminal() {
            tracing::info!(order_id = %id, status = next.as_str(), "Order closed");
        }
        self.require_order(id).await
    }

    /// Customer-initiated cancellation; only possible before pickup.
    pub async fn cancel_order(&self, id: &str) -> Result<Order, AppError> {
        self.transition_order(id, OrderStatus::Cancelled).await
    }

    /// Give a validated order to a courier. Reassigning an assigned order is allowed.
    pub async fn assign_courier(&self, id: &str, courier_id: &str) -> Result<Order, AppError> {
        let mut tx = self.pool.begin().await?;

        let role: Option<String> = sqlx::query("SELECT role FROM profiles WHERE id = ?")
            .bind(courier_id)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| row.get("role"));
        match role.as_deref().and_then(UserRole::from_str) {
            Some(UserRole::Courier) => {}
            Some(_) => {
                return Err(AppError::Validation(format!(
                    "User {} is not a courier",
                    courier_id
                )))
            }
            None => {
                return Err(AppError::NotFound(format!(
                    "Courier {} not found",
                    courier_id
                )))
            }
        }

        let current = fetch_status(&mut tx, id).await?;
        if current != OrderStatus::Assigned
            && !current.can_transition_to(OrderStatus::Assigned)
        {
            return Err(AppError::InvalidTransition {
                from: current.as_str().to_string(),
                to: OrderStatus::Assigned.as_str().to_string(),
            });
        }

        sqlx::query("UPDATE orders SET status = ?, courier_id = ?, updated_at = ? WHERE id = ?")
            .bind(OrderStatus::Assigned.as_str())
            .bind(courier_id)
            .bind(now())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(order_id = %id, courier_id = %courier_id, "Courier assigned");
        self.require_order(id).await
    }

    /// Record a courier position. The first report after pickup puts the order in transit.
    pub async fn record_position(
        &self,
        order_id: &str,
        request: &RecordPositionRequest,
    ) -> Result<TrackingPoint, AppError> {
        validate_coordinates(request.latitude, request.longitude)?;

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT status, courier_id FROM orders WHERE id = ?")
            .bind(order_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {} not found", order_id)))?;

        let status = status_from_row(&row)?;
        let courier_id: Option<String> = row.get("courier_id");

        let courier_id = match (status, courier_id) {
            (OrderStatus::PickedUp | OrderStatus::InTransit, Some(courier_id)) => courier_id,
            _ => {
                return Err(AppError::Validation(format!(
                    "Order {} is not out for delivery",
                    order_id
                )))
            }
        };

        if status == OrderStatus::PickedUp {
            set_status(&mut tx, order_id, status, OrderStatus::InTransit).await?;
        }

        let point = TrackingPoint {
            order_id: order_id.to_string(),
            courier_id,
            latitude: request.latitude,
            longitude: request.longitude,
            recorded_at: now(),
        };

        sqlx::query(
            "INSERT INTO tracking_points (order_id, courier_id, latitude, longitude, recorded_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&point.order_id)
        .bind(&point.courier_id)
        .bind(point.latitude)
        .bind(point.longitude)
        .bind(&point.recorded_at)
        .execute(&mut *tx)
        .await?;
        bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::debug!(order_id = %order_id, lat = point.latitude, lng = point.longitude, "Position recorded");
        Ok(point)
    }

    /// Status and position history of an order.
    pub async fn order_tracking(&self, order_id: &str) -> Result<OrderTracking, AppError> {
        let order = self.require_order(order_id).await?;

        let rows = sqlx::query(
            "SELECT order_id, courier_id, latitude, longitude, recorded_at FROM tracking_points WHERE order_id = ? ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        let history: Vec<TrackingPoint> = rows
            .iter()
            .map(|row| TrackingPoint {
                order_id: row.get("order_id"),
                courier_id: row.get("courier_id"),
                latitude: row.get("latitude"),
                longitude: row.get("longitude"),
                recorded_at: row.get("recorded_at"),
            })
            .collect();

        Ok(OrderTracking {
            order_id: order.id,
            status: order.status,
            status_label: order.status_label,
            courier_id: order.courier_id,
            latest: history.last().cloned(),
            history,
        })
    }
}

fn push_lines(
    items: &mut Vec<OrderItem>,
    lines: &[CartLine],
    source: LineSource,
    source_ref: Option<&str>,
) {
    items.extend(lines.iter().map(|line| OrderItem {
        product_id: line.product_id.clone(),
        name: line.name.clone(),
        unit_price: line.unit_price,
        quantity: line.quantity,
        line_total: line.line_total,
        source,
        source_ref: source_ref.map(str::to_string),
    }));
}

/// Request value if given, otherwise the profile value; must end up non-blank.
fn pick_contact(
    requested: Option<&str>,
    from_profile: Option<String>,
    field: &str,
) -> Result<String, AppError> {
    let non_blank = |v: &str| {
        let v = v.trim();
        (!v.is_empty()).then(|| v.to_string())
    };
    requested
        .and_then(non_blank)
        .or_else(|| from_profile.as_deref().and_then(non_blank))
        .ok_or_else(|| AppError::Validation(format!("{} is required", field)))
}

fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), AppError> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(AppError::Validation(format!(
            "Latitude out of range: {}",
            latitude
        )));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(AppError::Validation(format!(
            "Longitude out of range: {}",
            longitude
        )));
    }
    Ok(())
}

async fn fetch_status(conn: &mut SqliteConnection, id: &str) -> Result<OrderStatus, AppError> {
    let row = sqlx::query("SELECT status FROM orders WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Order {} not found", id)))?;
    status_from_row(&row)
}

/// Compare-and-set the status after checking the transition table.
async fn set_status(
    conn: &mut SqliteConnection,
    id: &str,
    current: OrderStatus,
    next: OrderStatus,
) -> Result<(), AppError> {
    if !current.can_transition_to(next) {
        return Err(AppError::InvalidTransition {
            from: current.as_str().to_string(),
            to: next.as_str().to_string(),
        });
    }

    let now = now();
    let delivered_at = (next == OrderStatus::Delivered).then(|| now.clone());

    let result = sqlx::query(
        "UPDATE orders SET status = ?, updated_at = ?, delivered_at = COALESCE(?, delivered_at) WHERE id = ? AND status = ?",
    )
    .bind(next.as_str())
    .bind(&now)
    .bind(&delivered_at)
    .bind(id)
    .bind(current.as_str())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::Conflict {
            message: format!("Order {} changed concurrently", id),
            current_version: 0,
        });
    }
    Ok(())
}

fn status_from_row(row: &SqliteRow) -> Result<OrderStatus, AppError> {
    let raw: String = row.get("status");
    OrderStatus::from_str(&raw)
        .ok_or_else(|| AppError::Internal(format!("Unknown order status in database: {}", raw)))
}

async fn fetch_order(conn: &mut SqliteConnection, id: &str) -> Result<Option<Order>, AppError> {
    let row = sqlx::query(&format!("SELECT {} FROM orders WHERE id = ?", ORDER_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => Ok(Some(order_with_items(conn, &row).await?)),
        None => Ok(None),
    }
}

async fn order_with_items(conn: &mut SqliteConnection, row: &SqliteRow) -> Result<Order, AppError> {
    let id: String = row.get("id");
    let item_rows = sqlx::query(
        r#"SELECT product_id, name, unit_price, quantity, line_total, source, source_ref
           FROM order_items WHERE order_id = ? ORDER BY position"#,
    )
    .bind(&id)
    .fetch_all(&mut *conn)
    .await?;

    let items = item_rows
        .iter()
        .map(|item| {
            let source: String = item.get("source");
            OrderItem {
                product_id: item.get("product_id"),
                name: item.get("name"),
                unit_price: item.get("unit_price"),
                quantity: item.get("quantity"),
                line_total: item.get("line_total"),
                source: LineSource::from_str(&source).unwrap_or(LineSource::Personal),
                source_ref: item.get("source_ref"),
            }
        })
        .collect();

    let status = status_from_row(row)?;
    Ok(Order {
        id,
        user_id: row.get("user_id"),
        status,
        status_label: status.label().to_string(),
        items,
        subtotal: row.get("subtotal"),
        delivery_fee: row.get("delivery_fee"),
        total: row.get("total"),
        delivery_address: row.get("delivery_address"),
        phone: row.get("phone"),
        notes: row.get("notes"),
        courier_id: row.get("courier_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        delivered_at: row.get("delivered_at"),
    })
}
