//! Order service orchestrating checkout against the store.

use std::collections::HashMap;

use common::OrderId;
use metrics::counter;
use store::{Entity, Store, StoreExt};
use tracing::info;

use crate::error::DomainError;
use crate::product::Product;

use super::{Order, OrderError, PricingPolicy, ProductId};

/// One requested line of a checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl OrderLine {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// Input to [`OrderService::checkout_order`].
#[derive(Debug, Clone, Default)]
pub struct CheckoutRequest {
    pub customer_name: String,
    pub customer_email: String,
    pub lines: Vec<OrderLine>,
    pub coupon_code: Option<String>,
}

impl CheckoutRequest {
    /// Creates a request without lines or coupon.
    pub fn new(customer_name: impl Into<String>, customer_email: impl Into<String>) -> Self {
        Self {
            customer_name: customer_name.into(),
            customer_email: customer_email.into(),
            ..Default::default()
        }
    }

    /// Adds a line.
    pub fn line(mut self, product_id: impl Into<ProductId>, quantity: u32) -> Self {
        self.lines.push(OrderLine::new(product_id, quantity));
        self
    }

    /// Sets the coupon code.
    pub fn coupon(mut self, code: impl Into<String>) -> Self {
        self.coupon_code = Some(code.into());
        self
    }
}

/// Service for managing orders.
///
/// Every write goes through a single version-checked unit of work, so an
/// order and the stock it consumed are persisted together or not at all.
pub struct OrderService<S: Store> {
    store: S,
    pricing: PricingPolicy,
}

impl<S: Store> OrderService<S> {
    /// Creates a new order service with the default pricing policy.
    pub fn new(store: S) -> Self {
        Self {
            store,
            pricing: PricingPolicy::default(),
        }
    }

    /// Replaces the pricing policy used at checkout.
    pub fn with_pricing(mut self, pricing: PricingPolicy) -> Self {
        self.pricing = pricing;
        self
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn pricing(&self) -> &PricingPolicy {
        &self.pricing
    }

    /// Creates, prices and submits an order in one atomic step.
    ///
    /// The order ends up `Processing`. Product stock is decremented in the
    /// same commit; if any product changed since it was read the whole
    /// checkout fails with a concurrency conflict and nothing is written.
    #[tracing::instrument(
        skip(self, request),
        fields(customer = %request.customer_email, lines = request.lines.len())
    )]
    pub async fn checkout_order(&self, request: CheckoutRequest) -> Result<Order, DomainError> {
        let CheckoutRequest {
            customer_name,
            customer_email,
            lines,
            coupon_code,
        } = request;

        let (mut order, products) = self
            .build_order(customer_name, customer_email, &lines)
            .await?;
        order.apply_pricing(&self.pricing, coupon_code.as_deref())?;
        order.mark_as_processing()?;

        self.commit_order(&mut order, products.values()).await?;

        counter!("orders_checked_out_total").increment(1);
        info!(
            order_id = %order.id(),
            total = %order.total_amount(),
            "order checked out"
        );
        Ok(order)
    }

    /// Places an unpriced order that stays `Pending`.
    ///
    /// `product_ids` and `quantities` are matched up by position.
    #[tracing::instrument(skip(self, product_ids, quantities))]
    pub async fn place_order(
        &self,
        customer_name: String,
        customer_email: String,
        product_ids: Vec<ProductId>,
        quantities: Vec<u32>,
    ) -> Result<Order, DomainError> {
        if product_ids.len() != quantities.len() {
            return Err(DomainError::InvalidInput(format!(
                "{} product ids but {} quantities",
                product_ids.len(),
                quantities.len()
            )));
        }
        let lines: Vec<OrderLine> = product_ids
            .into_iter()
            .zip(quantities)
            .map(|(product_id, quantity)| OrderLine {
                product_id,
                quantity,
            })
            .collect();

        let (mut order, products) = self
            .build_order(customer_name, customer_email, &lines)
            .await?;
        self.commit_order(&mut order, products.values()).await?;

        info!(order_id = %order.id(), "order placed");
        Ok(order)
    }

    /// Loads an order by ID.
    ///
    /// Returns None if the order doesn't exist.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, DomainError> {
        Ok(self.store.find_by_id(&order_id).await?)
    }

    /// Loads the orders for the given ids with a single store call.
    ///
    /// Unknown ids are skipped.
    pub async fn get_orders(&self, order_ids: &[OrderId]) -> Result<Vec<Order>, DomainError> {
        Ok(self.store.find_all_by_ids(order_ids).await?)
    }

    /// Saves an order as its own unit of work, with a version check.
    pub async fn save_order(&self, order: Order) -> Result<Order, DomainError> {
        Ok(self.store.save(order).await?)
    }

    /// Loads every order.
    pub async fn get_all_orders(&self) -> Result<Vec<Order>, DomainError> {
        Ok(self.store.find_all().await?)
    }

    /// Applies a change to a stored order and saves it with a version check.
    #[tracing::instrument(skip(self, change))]
    pub async fn update_order<F>(&self, order_id: OrderId, change: F) -> Result<Order, DomainError>
    where
        F: FnOnce(&mut Order) -> Result<(), OrderError>,
    {
        let mut order: Order = self
            .store
            .find_by_id(&order_id)
            .await?
            .ok_or(DomainError::OrderNotFound { order_id })?;

        change(&mut order)?;

        Ok(self.store.save(order).await?)
    }

    /// Deletes an order together with its items.
    #[tracing::instrument(skip(self))]
    pub async fn delete_order(&self, order_id: OrderId) -> Result<(), DomainError> {
        if !self.store.exists_by_id::<Order>(&order_id).await? {
            return Err(DomainError::OrderNotFound { order_id });
        }
        self.store.delete_by_id::<Order>(&order_id).await?;
        info!(%order_id, "order deleted");
        Ok(())
    }

    /// Saves a catalog product.
    pub async fn save_product(&self, product: Product) -> Result<Product, DomainError> {
        Ok(self.store.save(product).await?)
    }

    pub async fn get_product(&self, product_id: &ProductId) -> Result<Option<Product>, DomainError> {
        Ok(self.store.find_by_id(product_id).await?)
    }

    /// Validates the request and builds a pending order in memory.
    ///
    /// All referenced products are loaded with a single store call. The
    /// returned products carry the decremented stock.
    async fn build_order(
        &self,
        customer_name: String,
        customer_email: String,
        lines: &[OrderLine],
    ) -> Result<(Order, HashMap<ProductId, Product>), DomainError> {
        if customer_name.trim().is_empty() || customer_email.trim().is_empty() {
            return Err(DomainError::InvalidInput(
                "customer name and email are required".to_string(),
            ));
        }
        if lines.is_empty() {
            return Err(DomainError::InvalidInput(
                "order must contain at least one line".to_string(),
            ));
        }
        if let Some(line) = lines.iter().find(|line| line.quantity == 0) {
            return Err(DomainError::InvalidInput(format!(
                "quantity for product {} must be greater than 0",
                line.product_id
            )));
        }

        let mut ids: Vec<ProductId> = Vec::with_capacity(lines.len());
        for line in lines {
            if !ids.contains(&line.product_id) {
                ids.push(line.product_id.clone());
            }
        }

        let mut products: HashMap<ProductId, Product> = self
            .store
            .find_all_by_ids::<Product>(&ids)
            .await?
            .into_iter()
            .map(|product| (product.id().clone(), product))
            .collect();

        if let Some(missing) = ids.into_iter().find(|id| !products.contains_key(id)) {
            return Err(DomainError::ProductNotFound {
                product_id: missing,
            });
        }

        let mut order = Order::new(customer_name, customer_email)?;
        for line in lines {
            let product = products.get_mut(&line.product_id).ok_or_else(|| {
                DomainError::ProductNotFound {
                    product_id: line.product_id.clone(),
                }
            })?;
            order.add_product(product, line.quantity)?;
        }

        Ok((order, products))
    }

    /// Commits an order and the products it touched as one unit of work.
    async fn commit_order<'p>(
        &self,
        order: &mut Order,
        products: impl Iterator<Item = &'p Product>,
    ) -> Result<(), DomainError> {
        let mut uow = self.store.begin();
        uow.save(&*order)?;
        for product in products {
            uow.save(product)?;
        }
        uow.commit().await?;

        order.set_version(order.version().next());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::order::{Money, OrderStatus};
    use store::InMemoryStore;

    async fn seeded() -> OrderService<InMemoryStore> {
        let service = OrderService::new(InMemoryStore::new());
        service
            .save_product(Product::new("SKU-001", "Widget", Money::from_cents(4000), 10))
            .await
            .unwrap();
        service
            .save_product(Product::new("SKU-002", "Gadget", Money::from_cents(2500), 3))
            .await
            .unwrap();
        service
    }

    async fn stock(service: &OrderService<InMemoryStore>, sku: &str) -> u32 {
        service
            .get_product(&ProductId::new(sku))
            .await
            .unwrap()
            .unwrap()
            .stock_quantity()
    }

    #[tokio::test]
    async fn test_checkout_order() {
        let service = seeded().await;
        let request = CheckoutRequest::new("Alice", "alice@example.com")
            .line("SKU-001", 2)
            .line("SKU-002", 1);

        let order = service.checkout_order(request).await.unwrap();

        assert_eq!(order.status(), OrderStatus::Processing);
        assert_eq!(order.item_count(), 2);
        // 80.00 + 25.00, free shipping
        assert_eq!(order.total_amount(), Money::from_cents(10500));
        assert_eq!(order.version(), store::Version::first());

        assert_eq!(stock(&service, "SKU-001").await, 8);
        assert_eq!(stock(&service, "SKU-002").await, 2);

        let stored = service.get_order(*order.id()).await.unwrap().unwrap();
        assert_eq!(stored, order);
    }

    #[tokio::test]
    async fn test_checkout_applies_coupon() {
        let service = seeded().await;
        let request = CheckoutRequest::new("Alice", "alice@example.com")
            .line("SKU-001", 2)
            .coupon("SALE10");

        let order = service.checkout_order(request).await.unwrap();

        // 80.00 + 5.00 shipping - 10.00 discount
        assert_eq!(order.total_amount(), Money::from_dollars(75));
    }

    #[tokio::test]
    async fn test_checkout_with_custom_pricing() {
        let service = seeded().await.with_pricing(PricingPolicy {
            free_shipping_threshold: Money::from_dollars(50),
            ..PricingPolicy::default()
        });
        let request = CheckoutRequest::new("Alice", "alice@example.com").line("SKU-001", 2);

        let order = service.checkout_order(request).await.unwrap();
        assert_eq!(order.total_amount(), Money::from_dollars(80));
    }

    #[tokio::test]
    async fn test_checkout_without_lines_is_rejected() {
        let service = seeded().await;
        let result = service
            .checkout_order(CheckoutRequest::new("Alice", "alice@example.com"))
            .await;

        assert!(matches!(result, Err(DomainError::InvalidInput(_))));
        assert!(service.get_all_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_checkout_without_customer_is_rejected() {
        let service = seeded().await;
        let result = service
            .checkout_order(CheckoutRequest::new(" ", "alice@example.com").line("SKU-001", 1))
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidInput);
        assert_eq!(stock(&service, "SKU-001").await, 10);
    }

    #[tokio::test]
    async fn test_checkout_unknown_product_writes_nothing() {
        let service = seeded().await;
        let request = CheckoutRequest::new("Alice", "alice@example.com")
            .line("SKU-001", 1)
            .line("SKU-404", 1);

        let result = service.checkout_order(request).await;

        assert!(matches!(
            result,
            Err(DomainError::ProductNotFound { ref product_id }) if product_id.as_str() == "SKU-404"
        ));
        assert!(service.get_all_orders().await.unwrap().is_empty());
        assert_eq!(stock(&service, "SKU-001").await, 10);
    }

    #[tokio::test]
    async fn test_checkout_zero_quantity_is_rejected() {
        let service = seeded().await;
        let request = CheckoutRequest::new("Alice", "alice@example.com")
            .line("SKU-001", 1)
            .line("SKU-002", 0);

        let err = service.checkout_order(request).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(stock(&service, "SKU-001").await, 10);
    }

    #[tokio::test]
    async fn test_checkout_insufficient_stock_across_lines() {
        let service = seeded().await;
        // Two lines for the same product exceed its stock of 3.
        let request = CheckoutRequest::new("Alice", "alice@example.com")
            .line("SKU-002", 2)
            .line("SKU-002", 2);

        let err = service.checkout_order(request).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
        assert_eq!(stock(&service, "SKU-002").await, 3);
        assert!(service.get_all_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_checkout_persistence_failure() {
        let service = seeded().await;
        service.store().set_unavailable(true);

        let err = service
            .checkout_order(CheckoutRequest::new("Alice", "alice@example.com").line("SKU-001", 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);

        service.store().set_unavailable(false);
        assert_eq!(stock(&service, "SKU-001").await, 10);
    }

    #[tokio::test]
    async fn test_place_order_stays_pending() {
        let service = seeded().await;
        let order = service
            .place_order(
                "Bob".to_string(),
                "bob@example.com".to_string(),
                vec![ProductId::new("SKU-001")],
                vec![3],
            )
            .await
            .unwrap();

        assert_eq!(order.status(), OrderStatus::Pending);
        assert!(order.pricing().is_none());
        assert_eq!(order.total_amount(), Money::from_cents(12000));
        assert_eq!(stock(&service, "SKU-001").await, 7);
    }

    #[tokio::test]
    async fn test_place_order_mismatched_lists() {
        let service = seeded().await;
        let result = service
            .place_order(
                "Bob".to_string(),
                "bob@example.com".to_string(),
                vec![ProductId::new("SKU-001"), ProductId::new("SKU-002")],
                vec![1],
            )
            .await;

        assert!(matches!(result, Err(DomainError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_update_order() {
        let service = seeded().await;
        let order = service
            .checkout_order(CheckoutRequest::new("Alice", "alice@example.com").line("SKU-001", 1))
            .await
            .unwrap();

        let updated = service
            .update_order(*order.id(), |order| order.mark_as_cancelled())
            .await
            .unwrap();
        assert_eq!(updated.status(), OrderStatus::Cancelled);
        assert_eq!(updated.version(), store::Version::new(2));

        let result = service
            .update_order(*order.id(), |order| order.mark_as_shipped())
            .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_update_unknown_order() {
        let service = seeded().await;
        let result = service.update_order(OrderId::new(), |_| Ok(())).await;
        assert!(matches!(result, Err(DomainError::OrderNotFound { .. })));
    }

    #[tokio::test]
    async fn test_delete_order() {
        let service = seeded().await;
        let order = service
            .checkout_order(CheckoutRequest::new("Alice", "alice@example.com").line("SKU-001", 1))
            .await
            .unwrap();

        service.delete_order(*order.id()).await.unwrap();
        assert!(service.get_order(*order.id()).await.unwrap().is_none());

        let result = service.delete_order(*order.id()).await;
        assert!(matches!(result, Err(DomainError::OrderNotFound { .. })));
    }

    #[tokio::test]
    async fn test_get_all_orders() {
        let service = seeded().await;
        for name in ["Alice", "Bob"] {
            service
                .checkout_order(CheckoutRequest::new(name, "someone@example.com").line("SKU-001", 1))
                .await
                .unwrap();
        }

        let orders = service.get_all_orders().await.unwrap();
        let names: Vec<&str> = orders.iter().map(|o| o.customer_name()).collect();
        assert_eq!(names, vec!["Alice", "Bob"]);
    }
}
