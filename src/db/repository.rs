//! Database repository.
//!
//! Operations are grouped by concern in sibling modules (`catalog`, `accounts`,
//! `carts`, `orders`), each adding an `impl Repository` block. Multi-step writes
//! run inside a transaction and bump the revision counter in the same
//! transaction.

use chrono::Utc;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::errors::AppError;
use crate::models::{DashboardStats, OrderStatus, RevisionInfo};

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pub(super) pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the current revision ID.
    pub async fn get_revision_id(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("revision_id"))
    }

    /// Get revision info.
    pub async fn get_revision_info(&self) -> Result<RevisionInfo, AppError> {
        let row = sqlx::query("SELECT revision_id, generated_at FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(RevisionInfo {
            revision_id: row.get("revision_id"),
            generated_at: row.get("generated_at"),
        })
    }

    /// Figures for the back-office dashboard.
    pub async fn dashboard_stats(&self) -> Result<DashboardStats, AppError> {
        let counts = sqlx::query(
            r#"SELECT
                (SELECT COUNT(*) FROM products) AS products,
                (SELECT COUNT(*) FROM recipes) AS recipes,
                (SELECT COUNT(*) FROM profiles WHERE role = 'customer') AS customers,
                (SELECT COALESCE(SUM(total), 0) FROM orders WHERE status = 'delivered') AS revenue"#,
        )
        .fetch_one(&self.pool)
        .await?;

        let mut stats = DashboardStats {
            products: counts.get("products"),
            recipes: counts.get("recipes"),
            customers: counts.get("customers"),
            delivered_revenue: counts.get("revenue"),
            ..Default::default()
        };

        for status in OrderStatus::ALL {
            stats.orders_by_status.insert(status.as_str().to_string(), 0);
        }

        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM orders GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let status: String = row.get("status");
            stats.orders_by_status.insert(status, row.get("n"));
        }

        Ok(stats)
    }
}

/// Bump the revision counter on the given connection (pool or transaction).
pub(super) async fn bump_revision(conn: &mut SqliteConnection) -> Result<(), AppError> {
    sqlx::query("UPDATE meta SET revision_id = revision_id + 1, generated_at = ? WHERE id = 1")
        .bind(now())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(super) fn now() -> String {
    Utc::now().to_rfc3339()
}

pub(super) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(super) fn parse_json_array(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

/// Reject blank required text fields.
pub(super) fn require(value: &str, field: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

/// Largest quantity, portion count or bundle count a single line may hold.
pub(super) const MAX_QUANTITY: i64 = 10_000;

/// Accept `1..=MAX_QUANTITY`.
pub(super) fn require_positive(value: i64, field: &str) -> Result<(), AppError> {
    if value <= 0 {
        return Err(AppError::Validation(format!(
            "{} must be greater than zero",
            field
        )));
    }
    if value > MAX_QUANTITY {
        return Err(AppError::Validation(format!(
            "{} cannot exceed {}",
            field, MAX_QUANTITY
        )));
    }
    Ok(())
}

/// Add to an existing quantity, keeping the result within bounds.
pub(super) fn add_quantity(current: i64, extra: i64, field: &str) -> Result<i64, AppError> {
    let total = current
        .checked_add(extra)
        .ok_or_else(|| AppError::Validation(format!("{} is too large", field)))?;
    require_positive(total, field)?;
    Ok(total)
}

/// Version check shared by the optimistic-concurrency updates.
pub(super) fn check_version(expected: Option<i64>, current: i64) -> Result<(), AppError> {
    if let Some(expected) = expected {
        if expected != current {
            return Err(AppError::Conflict {
                message: format!(
                    "Version mismatch: expected {}, current {}",
                    expected, current
                ),
                current_version: current,
            });
        }
    }
    Ok(())
}
