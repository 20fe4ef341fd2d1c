//! Cart arithmetic.
//!
//! Everything here is pure so the repository can run it inside a transaction
//! and tests can run it without a database.

use crate::models::{CartLine, PersonalCart, PreconfiguredSelection, RecipeCart};

/// Price of `quantity` units. Saturates instead of overflowing.
pub fn line_total(unit_price: i64, quantity: i64) -> i64 {
    unit_price.saturating_mul(quantity)
}

/// Quantity of an ingredient once a recipe is scaled to `portions`.
pub fn recipe_line_quantity(ingredient_quantity: i64, portions: i64) -> i64 {
    ingredient_quantity.saturating_mul(portions)
}

/// Build a priced line.
pub fn priced_line(
    product_id: &str,
    name: &str,
    unit_price: i64,
    quantity: i64,
    available: bool,
) -> CartLine {
    CartLine {
        product_id: product_id.to_string(),
        name: name.to_string(),
        unit_price,
        quantity,
        line_total: line_total(unit_price, quantity),
        available,
    }
}

pub fn subtotal(lines: &[CartLine]) -> i64 {
    lines
        .iter()
        .fold(0i64, |acc, line| acc.saturating_add(line.line_total))
}

fn unit_count(lines: &[CartLine]) -> i64 {
    lines
        .iter()
        .fold(0i64, |acc, line| acc.saturating_add(line.quantity))
}

/// Scale every line of a bundle by the number of bundles picked.
pub fn scale_lines(lines: &[CartLine], factor: i64) -> Vec<CartLine> {
    lines
        .iter()
        .map(|line| {
            priced_line(
                &line.product_id,
                &line.name,
                line.unit_price,
                line.quantity.saturating_mul(factor),
                line.available,
            )
        })
        .collect()
}

/// Totals written to the main cart row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CartSummary {
    pub personal_total: i64,
    pub recipe_total: i64,
    pub preconfigured_total: i64,
    pub total: i64,
    /// Number of product units across every sub-cart
    pub item_count: i64,
}

impl CartSummary {
    pub fn from_parts(
        personal: &PersonalCart,
        recipes: &[RecipeCart],
        preconfigured: &[PreconfiguredSelection],
    ) -> Self {
        let personal_total = personal.subtotal;
        let recipe_total = recipes
            .iter()
            .fold(0i64, |acc, r| acc.saturating_add(r.subtotal));
        let preconfigured_total = preconfigured
            .iter()
            .fold(0i64, |acc, p| acc.saturating_add(p.subtotal));

        let item_count = unit_count(&personal.items)
            .saturating_add(recipes.iter().map(|r| unit_count(&r.items)).sum())
            .saturating_add(preconfigured.iter().map(|p| unit_count(&p.items)).sum());

        Self {
            personal_total,
            recipe_total,
            preconfigured_total,
            total: personal_total
                .saturating_add(recipe_total)
                .saturating_add(preconfigured_total),
            item_count,
        }
    }
}
