use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;
use crate::id::{CustomerId, OrderId};

/// A single purchased item.
///
/// Opaque to the persistence layer: it is stored and returned as part of the
/// order record and never inspected on its own.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LineItem {
    pub item_id: Uuid,
    pub quantity: u32,
    /// Unit price in minor currency units.
    pub price: u64,
}

impl LineItem {
    pub fn new(item_id: Uuid, quantity: u32, price: u64) -> Self {
        Self {
            item_id,
            quantity,
            price,
        }
    }

    /// `quantity * price`, saturating.
    pub fn total(&self) -> u64 {
        self.price.saturating_mul(u64::from(self.quantity))
    }
}

/// The persisted order entity.
///
/// Decoding is strict: unknown fields or a shape mismatch fail rather than
/// producing a partially populated order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Order {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub line_items: Vec<LineItem>,
    pub created_at: DateTime<Utc>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    /// A new, unshipped order created at `created_at`.
    pub fn new(
        order_id: OrderId,
        customer_id: CustomerId,
        line_items: Vec<LineItem>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            customer_id,
            line_items,
            created_at,
            shipped_at: None,
            completed_at: None,
        }
    }

    /// Status derived from the lifecycle timestamps.
    pub fn status(&self) -> OrderStatus {
        match (self.shipped_at, self.completed_at) {
            (_, Some(_)) => OrderStatus::Completed,
            (Some(_), None) => OrderStatus::Shipped,
            (None, None) => OrderStatus::Pending,
        }
    }

    /// Sum of all line item totals, saturating.
    pub fn total(&self) -> u64 {
        self.line_items
            .iter()
            .fold(0u64, |acc, item| acc.saturating_add(item.total()))
    }

    /// Apply a status transition at time `now`.
    ///
    /// Shipping requires the order not to be shipped yet; completing requires
    /// it to be shipped and not already completed. On error the order is left
    /// unchanged.
    pub fn apply(&mut self, transition: Transition, now: DateTime<Utc>) -> Result<(), TypeError> {
        match transition {
            Transition::Ship => {
                if self.shipped_at.is_some() {
                    return Err(TypeError::AlreadyShipped(self.order_id));
                }
                self.shipped_at = Some(now);
            }
            Transition::Complete => {
                if self.shipped_at.is_none() {
                    return Err(TypeError::NotShipped(self.order_id));
                }
                if self.completed_at.is_some() {
                    return Err(TypeError::AlreadyCompleted(self.order_id));
                }
                self.completed_at = Some(now);
            }
        }
        Ok(())
    }
}

/// Where an order is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Shipped,
    Completed,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Shipped => write!(f, "shipped"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// A requested status change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transition {
    #[serde(rename = "shipped")]
    Ship,
    #[serde(rename = "completed")]
    Complete,
}

impl FromStr for Transition {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shipped" => Ok(Self::Ship),
            "completed" => Ok(Self::Complete),
            other => Err(TypeError::InvalidTransition(other.to_string())),
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ship => write!(f, "shipped"),
            Self::Complete => write!(f, "completed"),
        }
    }
}
