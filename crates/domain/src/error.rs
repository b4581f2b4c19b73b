//! Domain error types.

use common::OrderId;
use store::StoreError;
use thiserror::Error;

use crate::order::{OrderError, ProductId};
use crate::product::ProductError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Request rejected before anything was touched.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A referenced product does not exist.
    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: ProductId },

    /// A referenced order does not exist.
    #[error("Order not found: {order_id}")]
    OrderNotFound { order_id: OrderId },

    /// An error occurred in the order aggregate.
    #[error("Order error: {0}")]
    Order(OrderError),

    /// A stock rule was violated.
    #[error("Product error: {0}")]
    Product(#[from] ProductError),

    /// An error occurred in the store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<OrderError> for DomainError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::Product(e) => DomainError::Product(e),
            other => DomainError::Order(other),
        }
    }
}

/// Coarse classification of a failure, independent of where it was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    InsufficientStock,
    InvalidState,
    Conflict,
    Persistence,
}

impl ErrorKind {
    /// Returns a stable label, suitable for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InsufficientStock => "insufficient_stock",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Persistence => "persistence",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl DomainError {
    /// Returns the failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::InvalidInput(_) => ErrorKind::InvalidInput,
            DomainError::ProductNotFound { .. } | DomainError::OrderNotFound { .. } => {
                ErrorKind::NotFound
            }
            DomainError::Order(e) => match e {
                OrderError::CustomerInfoRequired
                | OrderError::InvalidQuantity { .. }
                | OrderError::AmountOverflow { .. } => ErrorKind::InvalidInput,
                OrderError::InvalidStateTransition { .. } => ErrorKind::InvalidState,
                OrderError::ItemNotFound { .. } => ErrorKind::NotFound,
                OrderError::Product(e) => product_kind(e),
            },
            DomainError::Product(e) => product_kind(e),
            DomainError::Store(e) => match e {
                StoreError::ConcurrencyConflict { .. } => ErrorKind::Conflict,
                StoreError::NotFound { .. } => ErrorKind::NotFound,
                StoreError::Unavailable(_) | StoreError::Serialization(_) => {
                    ErrorKind::Persistence
                }
            },
        }
    }
}

fn product_kind(e: &ProductError) -> ErrorKind {
    match e {
        ProductError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
        ProductError::InvalidQuantity { .. } => ErrorKind::InvalidInput,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::Version;

    #[test]
    fn test_order_error_unwraps_product_error() {
        let err: DomainError = OrderError::Product(ProductError::InvalidQuantity { quantity: 0 }).into();
        assert!(matches!(err, DomainError::Product(_)));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_kind_classification() {
        let conflict = DomainError::Store(StoreError::ConcurrencyConflict {
            entity_type: "Product".to_string(),
            key: "SKU-001".to_string(),
            expected: Version::first(),
            actual: Version::new(2),
        });
        assert_eq!(conflict.kind(), ErrorKind::Conflict);

        let unavailable = DomainError::Store(StoreError::Unavailable("down".to_string()));
        assert_eq!(unavailable.kind(), ErrorKind::Persistence);

        let missing = DomainError::ProductNotFound {
            product_id: ProductId::new("SKU-404"),
        };
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let stock = DomainError::Product(ProductError::InsufficientStock {
            product_id: ProductId::new("SKU-001"),
            requested: 5,
            available: 1,
        });
        assert_eq!(stock.kind(), ErrorKind::InsufficientStock);
        assert_eq!(stock.kind().as_str(), "insufficient_stock");
    }
}
