//! Cash-on-delivery orders, their status progression and delivery tracking.

use serde::{Deserialize, Serialize};

/// Order lifecycle. Settlement happens in cash at delivery.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Validated,
    Assigned,
    PickedUp,
    InTransit,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Validated,
        OrderStatus::Assigned,
        OrderStatus::PickedUp,
        OrderStatus::InTransit,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Validated => "validated",
            OrderStatus::Assigned => "assigned",
            OrderStatus::PickedUp => "picked_up",
            OrderStatus::InTransit => "in_transit",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "validated" => Some(OrderStatus::Validated),
            "assigned" => Some(OrderStatus::Assigned),
            "picked_up" => Some(OrderStatus::PickedUp),
            "in_transit" => Some(OrderStatus::InTransit),
            "delivered" => Some(OrderStatus::Delivered),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Customer-facing label.
    pub fn label(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Validated => "Validated",
            OrderStatus::Assigned => "Courier assigned",
            OrderStatus::PickedUp => "Picked up",
            OrderStatus::InTransit => "In transit",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// The single transition table for order progression.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Validated)
                | (Pending, Cancelled)
                | (Validated, Assigned)
                | (Validated, Cancelled)
                | (Assigned, PickedUp)
                | (Assigned, Cancelled)
                | (PickedUp, InTransit)
                | (InTransit, Delivered)
        )
    }
}

/// Which sub-cart an order line came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LineSource {
    Personal,
    Recipe,
    Preconfigured,
}

impl LineSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineSource::Personal => "personal",
            LineSource::Recipe => "recipe",
            LineSource::Preconfigured => "preconfigured",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "personal" => Some(LineSource::Personal),
            "recipe" => Some(LineSource::Recipe),
            "preconfigured" => Some(LineSource::Preconfigured),
            _ => None,
        }
    }
}

/// Price snapshot of one line at checkout time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub name: String,
    pub unit_price: i64,
    pub quantity: i64,
    pub line_total: i64,
    pub source: LineSource,
    /// Recipe cart id or preconfigured bundle id the line came from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub status: OrderStatus,
    pub status_label: String,
    pub items: Vec<OrderItem>,
    pub subtotal: i64,
    pub delivery_fee: i64,
    pub total: i64,
    pub delivery_address: String,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub courier_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<String>,
}

/// Request body for checking out the main cart.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    /// Falls back to the profile address when omitted
    #[serde(default)]
    pub delivery_address: Option<String>,
    /// Falls back to the profile phone when omitted
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignCourierRequest {
    pub courier_id: String,
}

/// A courier position report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingPoint {
    pub order_id: String,
    pub courier_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub recorded_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPositionRequest {
    pub latitude: f64,
    pub longitude: f64,
}

/// What the customer sees while waiting for delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTracking {
    pub order_id: String,
    pub status: OrderStatus,
    pub status_label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub courier_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<TrackingPoint>,
    pub history: Vec<TrackingPoint>,
}
