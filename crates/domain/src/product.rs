//! Catalog product with stock tracking.

use serde::{Deserialize, Serialize};
use store::{Entity, Version};
use thiserror::Error;

use crate::order::{Money, ProductId};

/// Errors raised by stock operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProductError {
    /// Requested more units than are in stock.
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// Quantity must be positive.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },
}

/// A catalog record with its price and stock level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    name: String,
    price: Money,
    stock_quantity: u32,
    #[serde(default)]
    version: Version,
}

impl Product {
    /// Creates a new, not yet persisted product.
    pub fn new(
        id: impl Into<ProductId>,
        name: impl Into<String>,
        price: Money,
        stock_quantity: u32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            stock_quantity,
            version: Version::initial(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price(&self) -> Money {
        self.price
    }

    pub fn stock_quantity(&self) -> u32 {
        self.stock_quantity
    }

    /// Returns true if at least `quantity` units are in stock.
    pub fn has_stock(&self, quantity: u32) -> bool {
        self.stock_quantity >= quantity
    }

    /// Removes `quantity` units from stock.
    ///
    /// Stock is left untouched when the call fails.
    pub fn decrease_stock(&mut self, quantity: u32) -> Result<(), ProductError> {
        if quantity == 0 {
            return Err(ProductError::InvalidQuantity { quantity });
        }
        if !self.has_stock(quantity) {
            return Err(ProductError::InsufficientStock {
                product_id: self.id.clone(),
                requested: quantity,
                available: self.stock_quantity,
            });
        }
        self.stock_quantity -= quantity;
        Ok(())
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn entity_type() -> &'static str {
        "Product"
    }

    fn id(&self) -> &ProductId {
        &self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget(stock: u32) -> Product {
        Product::new("SKU-001", "Widget", Money::from_cents(1000), stock)
    }

    #[test]
    fn test_decrease_stock() {
        let mut product = widget(10);
        product.decrease_stock(4).unwrap();
        assert_eq!(product.stock_quantity(), 6);

        product.decrease_stock(6).unwrap();
        assert_eq!(product.stock_quantity(), 0);
    }

    #[test]
    fn test_decrease_stock_insufficient() {
        let mut product = widget(3);
        let result = product.decrease_stock(4);
        assert!(matches!(
            result,
            Err(ProductError::InsufficientStock {
                requested: 4,
                available: 3,
                ..
            })
        ));
        assert_eq!(product.stock_quantity(), 3);
    }

    #[test]
    fn test_decrease_stock_zero_quantity() {
        let mut product = widget(3);
        assert!(matches!(
            product.decrease_stock(0),
            Err(ProductError::InvalidQuantity { quantity: 0 })
        ));
        assert_eq!(product.stock_quantity(), 3);
    }

    #[test]
    fn test_new_product_is_unversioned() {
        let product = widget(1);
        assert!(product.version().is_new());
        assert_eq!(product.id().as_str(), "SKU-001");
    }
}
