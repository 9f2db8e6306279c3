//! Foundation types for the order service.
//!
//! Every other crate in the workspace depends on `ord-types`. The types here
//! describe what an order *is*; how it is persisted lives in `ord-store`.
//!
//! # Key Types
//!
//! - [`OrderId`] — caller-assigned numeric order identifier
//! - [`CustomerId`] — opaque customer reference (UUID)
//! - [`LineItem`] — one purchased item inside an order
//! - [`Order`] — the persisted entity
//! - [`OrderStatus`] — status derived from the order's timestamps
//! - [`Transition`] — a requested status change (`shipped`, `completed`)

pub mod error;
pub mod id;
pub mod order;

pub use error::TypeError;
pub use id::{CustomerId, OrderId};
pub use order::{LineItem, Order, OrderStatus, Transition};
