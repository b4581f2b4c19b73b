//! Order aggregate and related types.

mod aggregate;
mod pricing;
mod service;
mod state;
mod value_objects;

pub use aggregate::Order;
pub use pricing::{PriceBreakdown, PricingPolicy};
pub use service::{CheckoutRequest, OrderLine, OrderService};
pub use state::OrderStatus;
pub use value_objects::{Money, OrderItem, ProductId};

use thiserror::Error;

use crate::product::ProductError;

/// Errors that can occur during order operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// Customer name and email are required.
    #[error("Customer name and email are required")]
    CustomerInfoRequired,

    /// Order is not in the expected state.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: OrderStatus,
        action: &'static str,
    },

    /// Item not found in order.
    #[error("Item not found: line {line}")]
    ItemNotFound { line: u32 },

    /// Invalid quantity.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// The line or order total would exceed the representable amount.
    #[error("Amount overflow: {quantity} units at {unit_price} exceed the supported order total")]
    AmountOverflow { quantity: u32, unit_price: Money },

    /// Stock operation on the product failed.
    #[error(transparent)]
    Product(#[from] ProductError),
}
