use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use domain::{CheckoutRequest, Money, Order, OrderService, PricingPolicy, Product};
use store::InMemoryStore;

fn seeded_service(rt: &tokio::runtime::Runtime, skus: usize) -> OrderService<InMemoryStore> {
    let service = OrderService::new(InMemoryStore::new());
    rt.block_on(async {
        for i in 0..skus {
            service
                .save_product(Product::new(
                    format!("SKU-{i:03}"),
                    format!("Product {i}"),
                    Money::from_cents(100 * (i as i64 + 1)),
                    u32::MAX,
                ))
                .await
                .unwrap();
        }
    });
    service
}

fn bench_add_product(c: &mut Criterion) {
    c.bench_function("domain/add_product_50_lines", |b| {
        b.iter_batched(
            || {
                let products: Vec<Product> = (0..50)
                    .map(|i| {
                        Product::new(format!("SKU-{i:03}"), "Widget", Money::from_cents(999), 10)
                    })
                    .collect();
                (Order::new("Bench", "bench@example.com").unwrap(), products)
            },
            |(mut order, mut products)| {
                for product in &mut products {
                    order.add_product(product, 1).unwrap();
                }
                order
                    .apply_pricing(&PricingPolicy::default(), Some("SALE10"))
                    .unwrap();
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_checkout(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let service = seeded_service(&rt, 10);

    c.bench_function("domain/checkout_10_lines", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut request = CheckoutRequest::new("Bench", "bench@example.com");
                for i in 0..10 {
                    request = request.line(format!("SKU-{i:03}"), 1);
                }
                service.checkout_order(request).await.unwrap();
            });
        });
    });
}

criterion_group!(benches, bench_add_product, bench_checkout);
criterion_main!(benches);
