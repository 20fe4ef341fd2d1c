//! Revision model for client-side change detection.

use serde::{Deserialize, Serialize};

/// Revision information for change detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionInfo {
    pub revision_id: i64,
    pub generated_at: String,
}

/// Back-office dashboard figures.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub products: i64,
    pub recipes: i64,
    pub customers: i64,
    /// Order count keyed by status name
    pub orders_by_status: std::collections::BTreeMap<String, i64>,
    /// Sum of totals of delivered orders (cash collected)
    pub delivered_revenue: i64,
}
