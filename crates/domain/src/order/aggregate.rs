//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};
use store::{Entity, Version};

use crate::product::Product;

use super::{Money, OrderError, OrderItem, OrderStatus, PriceBreakdown, PricingPolicy};

/// Order aggregate root.
///
/// Owns its items and keeps `total_amount` consistent with them after every
/// mutation. Stock checks and decrements happen here, not in callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Unique order identifier.
    id: OrderId,

    /// Current version for optimistic concurrency.
    #[serde(default)]
    version: Version,

    customer_name: String,

    customer_email: String,

    /// Current status of the order.
    status: OrderStatus,

    order_date: DateTime<Utc>,

    /// Items in order of addition.
    items: Vec<OrderItem>,

    /// Next line number to hand out.
    next_line: u32,

    /// Shipping and discount applied at checkout, cleared by item changes.
    pricing: Option<PriceBreakdown>,

    /// Derived total; never set directly.
    total_amount: Money,

    tracking_number: Option<String>,
}

impl Entity for Order {
    type Id = OrderId;

    fn entity_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> &OrderId {
        &self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

// Query methods
impl Order {
    pub fn customer_name(&self) -> &str {
        &self.customer_name
    }

    pub fn customer_email(&self) -> &str {
        &self.customer_email
    }

    /// Returns the current status.
    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn order_date(&self) -> DateTime<Utc> {
        self.order_date
    }

    /// Returns all items in order of addition.
    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    /// Returns the number of items.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the order has items.
    pub fn has_items(&self) -> bool {
        !self.items.is_empty()
    }

    /// Returns the sum of all item subtotals.
    pub fn subtotal(&self) -> Money {
        self.items.iter().map(OrderItem::subtotal).sum()
    }

    /// Returns the total amount.
    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    /// Returns the applied shipping/discount breakdown, if any.
    pub fn pricing(&self) -> Option<&PriceBreakdown> {
        self.pricing.as_ref()
    }

    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }
}

// Mutations
impl Order {
    /// Creates a pending order with no items and a zero total.
    pub fn new(
        customer_name: impl Into<String>,
        customer_email: impl Into<String>,
    ) -> Result<Self, OrderError> {
        let customer_name = customer_name.into();
        let customer_email = customer_email.into();
        if customer_name.trim().is_empty() || customer_email.trim().is_empty() {
            return Err(OrderError::CustomerInfoRequired);
        }

        Ok(Self {
            id: OrderId::new(),
            version: Version::initial(),
            customer_name,
            customer_email,
            status: OrderStatus::Pending,
            order_date: Utc::now(),
            items: Vec::new(),
            next_line: 1,
            pricing: None,
            total_amount: Money::zero(),
            tracking_number: None,
        })
    }

    /// Adds `quantity` units of a product as a new line.
    ///
    /// Captures the product's current price and decrements its stock. When
    /// this fails neither the order nor the product is changed. The caller
    /// must persist both in the same unit of work.
    pub fn add_product(
        &mut self,
        product: &mut Product,
        quantity: u32,
    ) -> Result<&OrderItem, OrderError> {
        self.ensure_items_modifiable("add product")?;
        if quantity == 0 {
            return Err(OrderError::InvalidQuantity { quantity });
        }
        let unit_price = product.price();
        unit_price
            .checked_multiply(quantity)
            .and_then(|line_total| self.subtotal().checked_add(line_total))
            .ok_or(OrderError::AmountOverflow {
                quantity,
                unit_price,
            })?;

        product.decrease_stock(quantity)?;

        let line = self.next_line;
        self.next_line += 1;
        self.items.push(OrderItem {
            line,
            product_id: product.id().clone(),
            product_name: product.name().to_string(),
            quantity,
            unit_price,
        });
        self.items_changed();

        Ok(&self.items[self.items.len() - 1])
    }

    /// Detaches an item and recalculates the total.
    ///
    /// Stock is not returned to the product.
    pub fn remove_item(&mut self, line: u32) -> Result<OrderItem, OrderError> {
        self.ensure_items_modifiable("remove item")?;
        let index = self
            .items
            .iter()
            .position(|item| item.line == line)
            .ok_or(OrderError::ItemNotFound { line })?;

        let removed = self.items.remove(index);
        self.items_changed();
        Ok(removed)
    }

    /// Recomputes `total_amount` from the current items and applied pricing.
    pub fn recalculate_total_amount(&mut self) {
        self.total_amount = match &self.pricing {
            Some(pricing) => pricing.total,
            None => self.subtotal(),
        };
    }

    /// Applies shipping and coupon discount using the default policy.
    pub fn apply_shipping_and_discount(
        &mut self,
        coupon_code: Option<&str>,
    ) -> Result<PriceBreakdown, OrderError> {
        self.apply_pricing(&PricingPolicy::default(), coupon_code)
    }

    /// Prices the order from its item subtotal.
    ///
    /// Pricing is always derived from the items, so calling this again
    /// replaces the previous breakdown instead of compounding it.
    pub fn apply_pricing(
        &mut self,
        policy: &PricingPolicy,
        coupon_code: Option<&str>,
    ) -> Result<PriceBreakdown, OrderError> {
        self.ensure_items_modifiable("apply pricing")?;
        let breakdown = policy.quote(self.subtotal(), coupon_code);
        self.pricing = Some(breakdown);
        self.recalculate_total_amount();
        Ok(breakdown)
    }

    pub fn mark_as_processing(&mut self) -> Result<(), OrderError> {
        self.transition(OrderStatus::Processing, "mark as processing")
    }

    pub fn mark_as_shipped(&mut self) -> Result<(), OrderError> {
        self.transition(OrderStatus::Shipped, "mark as shipped")
    }

    pub fn mark_as_delivered(&mut self) -> Result<(), OrderError> {
        self.transition(OrderStatus::Delivered, "mark as delivered")
    }

    pub fn mark_as_cancelled(&mut self) -> Result<(), OrderError> {
        self.transition(OrderStatus::Cancelled, "mark as cancelled")
    }

    /// Ships the order, moving a pending order through processing first.
    pub fn ship(&mut self, tracking_number: impl Into<String>) -> Result<(), OrderError> {
        if !self.status.can_ship() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: "ship",
            });
        }
        if self.status == OrderStatus::Pending {
            self.status = OrderStatus::Processing;
        }
        self.status = OrderStatus::Shipped;
        self.tracking_number = Some(tracking_number.into());
        Ok(())
    }

    fn transition(&mut self, next: OrderStatus, action: &'static str) -> Result<(), OrderError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action,
            });
        }
        self.status = next;
        Ok(())
    }

    fn ensure_items_modifiable(&self, action: &'static str) -> Result<(), OrderError> {
        if self.status.can_modify_items() {
            Ok(())
        } else {
            Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action,
            })
        }
    }

    fn items_changed(&mut self) {
        self.pricing = None;
        self.recalculate_total_amount();
    }
}
