//! In-memory cache for catalog reads.
//!
//! Keys carry a tag prefix (`products:list:`, `products:item:`,
//! `categories:`) so a write can drop a whole group at once with
//! [`ProductCache::invalidate`]. Entries also expire after a TTL.

use std::time::Duration;

use moka::future::Cache;
use tracing::debug;

use apothecary_core::{CategoryId, ProductId};

use crate::models::{Category, Page, Product, ProductFilter};

/// Upper bound on cached entries.
const MAX_ENTRIES: u64 = 1000;

/// Tag prefixes for cache keys.
pub mod prefix {
    /// Product listing pages, keyed by normalized filter.
    pub const PRODUCT_LIST: &str = "products:list:";
    /// Single products, keyed by id.
    pub const PRODUCT_ITEM: &str = "products:item:";
    /// Category list and single categories.
    pub const CATEGORIES: &str = "categories:";

    /// Every catalog prefix.
    pub const ALL: [&str; 3] = [PRODUCT_LIST, PRODUCT_ITEM, CATEGORIES];
    /// Entries that show stock levels.
    pub const STOCK: [&str; 2] = [PRODUCT_LIST, PRODUCT_ITEM];
}

/// Cached value types.
#[derive(Debug, Clone)]
enum CacheValue {
    ProductPage(Page<Product>),
    Product(Box<Product>),
    Categories(Vec<Category>),
    Category(Box<Category>),
}

/// Process-wide catalog cache. Cheap to clone.
#[derive(Clone)]
pub struct ProductCache {
    cache: Cache<String, CacheValue>,
}

impl std::fmt::Debug for ProductCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductCache")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

fn product_list_key(filter: &ProductFilter) -> String {
    format!("{}{}", prefix::PRODUCT_LIST, filter.cache_key())
}

fn product_key(id: ProductId) -> String {
    format!("{}{id}", prefix::PRODUCT_ITEM)
}

fn category_list_key() -> String {
    format!("{}all", prefix::CATEGORIES)
}

fn category_key(id: CategoryId) -> String {
    format!("{}{id}", prefix::CATEGORIES)
}

impl ProductCache {
    /// Create a cache whose entries live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(MAX_ENTRIES)
            .time_to_live(ttl)
            .support_invalidation_closures()
            .build();
        Self { cache }
    }

    /// Cached listing page for a normalized filter.
    pub async fn product_page(&self, filter: &ProductFilter) -> Option<Page<Product>> {
        match self.cache.get(&product_list_key(filter)).await {
            Some(CacheValue::ProductPage(page)) => {
                debug!("Cache hit for product page");
                Some(page)
            }
            _ => None,
        }
    }

    /// Store a listing page.
    pub async fn put_product_page(&self, filter: &ProductFilter, page: Page<Product>) {
        self.cache
            .insert(product_list_key(filter), CacheValue::ProductPage(page))
            .await;
    }

    /// Cached product.
    pub async fn product(&self, id: ProductId) -> Option<Product> {
        match self.cache.get(&product_key(id)).await {
            Some(CacheValue::Product(product)) => {
                debug!(product_id = %id, "Cache hit for product");
                Some(*product)
            }
            _ => None,
        }
    }

    /// Store a product.
    pub async fn put_product(&self, product: Product) {
        self.cache
            .insert(product_key(product.id), CacheValue::Product(Box::new(product)))
            .await;
    }

    /// Cached category list.
    pub async fn categories(&self) -> Option<Vec<Category>> {
        match self.cache.get(&category_list_key()).await {
            Some(CacheValue::Categories(categories)) => {
                debug!("Cache hit for categories");
                Some(categories)
            }
            _ => None,
        }
    }

    /// Store the category list.
    pub async fn put_categories(&self, categories: Vec<Category>) {
        self.cache
            .insert(category_list_key(), CacheValue::Categories(categories))
            .await;
    }

    /// Cached category.
    pub async fn category(&self, id: CategoryId) -> Option<Category> {
        match self.cache.get(&category_key(id)).await {
            Some(CacheValue::Category(category)) => Some(*category),
            _ => None,
        }
    }

    /// Store a category.
    pub async fn put_category(&self, category: Category) {
        self.cache
            .insert(
                category_key(category.id),
                CacheValue::Category(Box::new(category)),
            )
            .await;
    }

    /// Drop every entry whose key starts with one of `prefixes`.
    ///
    /// Invalidated entries are never returned again, even before moka
    /// evicts them.
    pub fn invalidate(&self, prefixes: &[&'static str]) {
        let prefixes = prefixes.to_vec();
        let result = self
            .cache
            .invalidate_entries_if(move |key, _| prefixes.iter().any(|p| key.starts_with(p)));

        if let Err(e) = result {
            tracing::warn!(error = %e, "Prefix invalidation failed, clearing cache");
            self.cache.invalidate_all();
        }
    }
}
