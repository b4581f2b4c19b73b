//! Shipping and discount computation applied at checkout.

use serde::{Deserialize, Serialize};

use super::Money;

/// Rules for shipping fees and coupon discounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingPolicy {
    /// Subtotals at or above this amount ship for free.
    pub free_shipping_threshold: Money,

    /// Shipping fee charged below the threshold.
    pub flat_shipping_fee: Money,

    /// Coupons starting with this prefix are recognized.
    pub coupon_prefix: String,

    /// Flat discount granted by a recognized coupon.
    pub coupon_discount: Money,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            free_shipping_threshold: Money::from_dollars(100),
            flat_shipping_fee: Money::from_dollars(5),
            coupon_prefix: "SALE".to_string(),
            coupon_discount: Money::from_dollars(10),
        }
    }
}

impl PricingPolicy {
    /// Returns the shipping fee for an item subtotal.
    pub fn shipping_for(&self, subtotal: Money) -> Money {
        if subtotal >= self.free_shipping_threshold {
            Money::zero()
        } else {
            self.flat_shipping_fee
        }
    }

    /// Returns the discount granted by a coupon code.
    pub fn discount_for(&self, coupon_code: Option<&str>) -> Money {
        match coupon_code {
            Some(code) if code.starts_with(&self.coupon_prefix) => self.coupon_discount,
            _ => Money::zero(),
        }
    }

    /// Prices an item subtotal.
    ///
    /// The result depends only on the subtotal and the coupon, so quoting the
    /// same order twice yields the same total. The total never goes below zero.
    pub fn quote(&self, subtotal: Money, coupon_code: Option<&str>) -> PriceBreakdown {
        let shipping = self.shipping_for(subtotal);
        let discount = self.discount_for(coupon_code);
        let total = (subtotal + shipping - discount).max(Money::zero());

        PriceBreakdown {
            subtotal,
            shipping,
            discount,
            total,
        }
    }
}

/// Result of pricing an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub subtotal: Money,
    pub shipping: Money,
    pub discount: Money,
    pub total: Money,
}
