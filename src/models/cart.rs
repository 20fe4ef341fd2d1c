//! Cart models: the three sub-cart kinds and the main cart that rolls them up.

use serde::{Deserialize, Serialize};

use super::ProductQuantity;

/// A priced line in any cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: String,
    pub name: String,
    pub unit_price: i64,
    pub quantity: i64,
    pub line_total: i64,
    pub available: bool,
}

/// Products a customer picked by hand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalCart {
    pub items: Vec<CartLine>,
    pub subtotal: i64,
}

/// Ingredients of one recipe, scaled by the number of portions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeCart {
    pub id: String,
    pub recipe_id: String,
    pub recipe_title: String,
    pub portions: i64,
    pub items: Vec<CartLine>,
    pub subtotal: i64,
    pub created_at: String,
}

/// An admin-curated bundle sold as a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreconfiguredCart {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub active: bool,
    pub items: Vec<CartLine>,
    /// Price of one bundle: sum of its lines
    pub price: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePreconfiguredCartRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    pub items: Vec<ProductQuantity>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePreconfiguredCartRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub items: Option<Vec<ProductQuantity>>,
}

/// A customer's pick of a preconfigured bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreconfiguredSelection {
    pub id: String,
    pub preconfigured_cart_id: String,
    pub name: String,
    pub quantity: i64,
    pub unit_price: i64,
    /// Bundle lines multiplied by `quantity`
    pub items: Vec<CartLine>,
    pub subtotal: i64,
}

/// Denormalised main cart row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainCartSummary {
    pub user_id: String,
    pub personal_total: i64,
    pub recipe_total: i64,
    pub preconfigured_total: i64,
    pub total: i64,
    pub item_count: i64,
    pub recipe_cart_ids: Vec<String>,
    pub preconfigured_selection_ids: Vec<String>,
    pub updated_at: String,
}

/// Main cart summary plus the expanded sub-carts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainCart {
    pub summary: MainCartSummary,
    pub personal: PersonalCart,
    pub recipes: Vec<RecipeCart>,
    pub preconfigured: Vec<PreconfiguredSelection>,
}

impl MainCart {
    pub fn is_empty(&self) -> bool {
        self.personal.items.is_empty() && self.recipes.is_empty() && self.preconfigured.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCartItemRequest {
    pub product_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetQuantityRequest {
    pub quantity: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddRecipeCartRequest {
    pub recipe_id: String,
    #[serde(default = "default_quantity")]
    pub portions: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePortionsRequest {
    pub portions: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectPreconfiguredRequest {
    pub preconfigured_cart_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

fn default_true() -> bool {
    true
}
