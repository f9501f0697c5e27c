//! Catalog cache invalidation as the catalog and order services use it.

use std::time::Duration;

use chrono::Utc;

use apothecary_core::{CategoryId, Price, ProductId};
use apothecary_storefront::models::{Category, Page, Product, ProductFilter};
use apothecary_storefront::services::ProductCache;
use apothecary_storefront::services::cache::prefix;

fn product(id: i32, stock: u32) -> Product {
    let now = Utc::now();
    Product {
        id: ProductId::new(id),
        category_id: CategoryId::new(1),
        category_name: "Allergy".to_string(),
        name: format!("Antihistamine {id}"),
        description: None,
        manufacturer: Some("Generic Labs".to_string()),
        price: Price::from_cents(649),
        stock,
        requires_prescription: false,
        image_url: None,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

fn category() -> Category {
    Category {
        id: CategoryId::new(1),
        name: "Allergy".to_string(),
        slug: "allergy".to_string(),
        description: None,
        product_count: 2,
    }
}

async fn warm(cache: &ProductCache, filter: &ProductFilter) {
    let items = vec![product(1, 10), product(2, 0)];
    cache.put_product_page(filter, Page::new(items, 1, 20, 2)).await;
    cache.put_product(product(1, 10)).await;
    cache.put_categories(vec![category()]).await;
    cache.put_category(category()).await;
}

#[tokio::test]
async fn test_stock_change_keeps_categories() {
    let cache = ProductCache::new(Duration::from_secs(60));
    let filter = ProductFilter::default().normalized();
    warm(&cache, &filter).await;

    // Order placed or cancelled
    cache.invalidate(&prefix::STOCK);

    assert!(cache.product_page(&filter).await.is_none());
    assert!(cache.product(ProductId::new(1)).await.is_none());
    assert!(cache.categories().await.is_some());
    assert!(cache.category(CategoryId::new(1)).await.is_some());
}

#[tokio::test]
async fn test_category_change_keeps_products() {
    let cache = ProductCache::new(Duration::from_secs(60));
    let filter = ProductFilter::default().normalized();
    warm(&cache, &filter).await;

    cache.invalidate(&[prefix::CATEGORIES]);

    assert!(cache.categories().await.is_none());
    assert!(cache.category(CategoryId::new(1)).await.is_none());
    assert!(cache.product_page(&filter).await.is_some());
    assert!(cache.product(ProductId::new(1)).await.is_some());
}

#[tokio::test]
async fn test_product_edit_clears_everything() {
    let cache = ProductCache::new(Duration::from_secs(60));
    let filter = ProductFilter::default().normalized();
    warm(&cache, &filter).await;

    cache.invalidate(&prefix::ALL);

    assert!(cache.product_page(&filter).await.is_none());
    assert!(cache.product(ProductId::new(1)).await.is_none());
    assert!(cache.categories().await.is_none());
}

#[tokio::test]
async fn test_equivalent_filters_share_an_entry() {
    let cache = ProductCache::new(Duration::from_secs(60));
    let stored = ProductFilter {
        search: Some("  Cetirizine ".to_string()),
        ..ProductFilter::default()
    }
    .normalized();
    cache
        .put_product_page(&stored, Page::new(vec![product(3, 4)], 1, 20, 1))
        .await;

    let lookup = ProductFilter {
        search: Some("cetirizine".to_string()),
        page: 1,
        page_size: 20,
        ..ProductFilter::default()
    }
    .normalized();
    let page = cache.product_page(&lookup).await.expect("shared key");
    assert_eq!(page.total_items, 1);

    let other_page = ProductFilter { page: 2, ..lookup }.normalized();
    assert!(cache.product_page(&other_page).await.is_none());
}
