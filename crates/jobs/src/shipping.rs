//! Shipping service trait and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::OrderId;
use domain::Order;
use store::Entity;
use thiserror::Error;

/// A dispatched shipment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shipment {
    pub order_id: OrderId,

    /// The tracking number assigned by the shipping service.
    pub tracking_number: String,
}

/// Errors returned by a shipping service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShippingError {
    /// The carrier could not be reached.
    #[error("Shipping unavailable: {0}")]
    Unavailable(String),

    /// The carrier refused this particular order.
    #[error("Shipment rejected for order {order_id}: {reason}")]
    Rejected { order_id: OrderId, reason: String },
}

/// Trait for shipping operations.
#[async_trait]
pub trait ShippingService: Send + Sync {
    /// Creates a shipment for an order.
    async fn dispatch(&self, order: &Order) -> Result<Shipment, ShippingError>;

    /// Cancels a previously created shipment.
    async fn cancel(&self, tracking_number: &str) -> Result<(), ShippingError>;
}

#[async_trait]
impl<T: ShippingService + ?Sized> ShippingService for Arc<T> {
    async fn dispatch(&self, order: &Order) -> Result<Shipment, ShippingError> {
        (**self).dispatch(order).await
    }

    async fn cancel(&self, tracking_number: &str) -> Result<(), ShippingError> {
        (**self).cancel(tracking_number).await
    }
}

#[derive(Debug, Default)]
struct InMemoryShippingState {
    shipments: HashMap<String, OrderId>,
    next_id: u32,
    fail_all: bool,
    rejected_orders: HashSet<OrderId>,
}

/// In-memory shipping service for testing.
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryShippingService {
    state: Arc<RwLock<InMemoryShippingState>>,
}

impl InMemoryShippingService {
    /// Creates a new in-memory shipping service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every dispatch fail until reset.
    pub fn set_fail_all(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_all = fail;
    }

    /// Makes dispatches for one order fail.
    pub fn reject_order(&self, order_id: OrderId) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .rejected_orders
            .insert(order_id);
    }

    /// Returns the number of active shipments.
    pub fn shipment_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .shipments
            .len()
    }

    /// Returns true if a shipment exists with the given tracking number.
    pub fn has_shipment(&self, tracking_number: &str) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .shipments
            .contains_key(tracking_number)
    }
}

#[async_trait]
impl ShippingService for InMemoryShippingService {
    async fn dispatch(&self, order: &Order) -> Result<Shipment, ShippingError> {
        let order_id = *order.id();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if state.fail_all {
            return Err(ShippingError::Unavailable(
                "carrier not responding".to_string(),
            ));
        }
        if state.rejected_orders.contains(&order_id) {
            return Err(ShippingError::Rejected {
                order_id,
                reason: "address could not be verified".to_string(),
            });
        }

        state.next_id += 1;
        let tracking_number = format!("TRACK-{:04}", state.next_id);
        state.shipments.insert(tracking_number.clone(), order_id);

        Ok(Shipment {
            order_id,
            tracking_number,
        })
    }

    async fn cancel(&self, tracking_number: &str) -> Result<(), ShippingError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.shipments.remove(tracking_number);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> Order {
        Order::new("Alice", "alice@example.com").unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_and_cancel() {
        let service = InMemoryShippingService::new();
        let order = order();

        let shipment = service.dispatch(&order).await.unwrap();
        assert_eq!(shipment.order_id, *order.id());
        assert!(shipment.tracking_number.starts_with("TRACK-"));
        assert_eq!(service.shipment_count(), 1);
        assert!(service.has_shipment(&shipment.tracking_number));

        service.cancel(&shipment.tracking_number).await.unwrap();
        assert_eq!(service.shipment_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_all() {
        let service = InMemoryShippingService::new();
        service.set_fail_all(true);

        let result = service.dispatch(&order()).await;
        assert!(matches!(result, Err(ShippingError::Unavailable(_))));
        assert_eq!(service.shipment_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_order_only() {
        let service = InMemoryShippingService::new();
        let rejected = order();
        service.reject_order(*rejected.id());

        assert!(matches!(
            service.dispatch(&rejected).await,
            Err(ShippingError::Rejected { .. })
        ));
        assert!(service.dispatch(&order()).await.is_ok());
    }

    #[tokio::test]
    async fn test_sequential_tracking_numbers() {
        let service = InMemoryShippingService::new();
        let order = order();

        let s1 = service.dispatch(&order).await.unwrap();
        let s2 = service.dispatch(&order).await.unwrap();

        assert_eq!(s1.tracking_number, "TRACK-0001");
        assert_eq!(s2.tracking_number, "TRACK-0002");
    }
}
