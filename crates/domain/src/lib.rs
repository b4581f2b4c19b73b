//! Domain layer for the order management system.
//!
//! This crate provides:
//! - the `Order` aggregate with its status machine and pricing rules
//! - the `Product` catalog entity with stock tracking
//! - `OrderService` for atomic checkout against a [`store::Store`]

pub mod error;
pub mod order;
pub mod product;

pub use error::{DomainError, ErrorKind};
pub use order::{
    CheckoutRequest, Money, Order, OrderError, OrderItem, OrderLine, OrderService, OrderStatus,
    PriceBreakdown, PricingPolicy, ProductId,
};
pub use product::{Product, ProductError};
