//! Order persistence for the order service.
//!
//! [`OrderStore`] maps each order onto primitive key-value operations:
//!
//! - one primary key per order (`order:<id>`) holding the JSON record
//! - one index set (`orders`) holding the primary keys of every present order
//! - atomic batches so a record and its index entry appear and disappear
//!   together
//!
//! Listing is cursor-based over the index set. A returned cursor of `0`
//! means the listing is exhausted; any other value, even alongside an empty
//! page, must be followed.
//!
//! Identifier assignment is not the store's job: callers supply unique ids,
//! typically from one of the generators in [`ids`].

pub mod error;
pub mod ids;
pub mod keys;
pub mod page;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use ids::{IdGenerator, MonotonicIds, RandomIds};
pub use keys::{order_key, parse_order_key, ORDER_INDEX_KEY};
pub use page::{FindAllPage, FindResult, Pages};
pub use store::OrderStore;
