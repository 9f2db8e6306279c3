//! Key naming for order records and the order index.

use ord_types::OrderId;

/// Prefix of every order's primary key.
pub const ORDER_KEY_PREFIX: &str = "order:";

/// The set holding the primary keys of all present orders.
pub const ORDER_INDEX_KEY: &str = "orders";

/// Primary key for `id`: `order:<decimal id>`.
pub fn order_key(id: OrderId) -> String {
    format!("{ORDER_KEY_PREFIX}{id}")
}

/// Inverse of [`order_key`]. Returns `None` for anything that is not an
/// order key in canonical form.
pub fn parse_order_key(key: &str) -> Option<OrderId> {
    let digits = key.strip_prefix(ORDER_KEY_PREFIX)?;
    if digits.is_empty() || (digits.len() > 1 && digits.starts_with('0')) {
        return None;
    }
    digits.parse().ok()
}
