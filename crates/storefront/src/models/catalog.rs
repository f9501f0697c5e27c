//! Catalog domain types: categories, products, and listing filters.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use apothecary_core::{CategoryId, Price, ProductId};

/// Default number of products per page.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Largest page a client may request.
pub const MAX_PAGE_SIZE: u32 = 100;

/// A product category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    /// URL-safe identifier, unique.
    pub slug: String,
    pub description: Option<String>,
    /// Active products in this category.
    pub product_count: i64,
}

/// A product in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Product {
    pub id: ProductId,
    pub category_id: CategoryId,
    pub category_name: String,
    pub name: String,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
    pub price: Price,
    /// Units on hand.
    pub stock: u32,
    pub requires_prescription: bool,
    pub image_url: Option<String>,
    /// Inactive products are hidden from the public catalog.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Whether at least one unit can be ordered.
    #[must_use]
    pub const fn in_stock(&self) -> bool {
        self.stock > 0
    }
}

/// Product listing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductSort {
    /// Most recently added first.
    #[default]
    Newest,
    NameAsc,
    NameDesc,
    PriceAsc,
    PriceDesc,
}

impl ProductSort {
    /// The `snake_case` name used in query strings and cache keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Newest => "newest",
            Self::NameAsc => "name_asc",
            Self::NameDesc => "name_desc",
            Self::PriceAsc => "price_asc",
            Self::PriceDesc => "price_desc",
        }
    }

    /// `ORDER BY` clause. The id tiebreaker keeps pagination stable.
    #[must_use]
    pub const fn order_by(self) -> &'static str {
        match self {
            Self::Newest => "p.created_at DESC, p.id DESC",
            Self::NameAsc => "LOWER(p.name) ASC, p.id ASC",
            Self::NameDesc => "LOWER(p.name) DESC, p.id DESC",
            Self::PriceAsc => "p.price ASC, p.id ASC",
            Self::PriceDesc => "p.price DESC, p.id DESC",
        }
    }
}

/// Normalized product listing filter.
///
/// Build with [`ProductFilter::normalized`] so equivalent requests share a
/// cache key: search text is trimmed and lowercased, blank search is dropped,
/// and paging is clamped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProductFilter {
    pub category_id: Option<CategoryId>,
    pub search: Option<String>,
    pub min_price: Option<Price>,
    pub max_price: Option<Price>,
    pub in_stock: bool,
    pub sort: ProductSort,
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
}

impl ProductFilter {
    /// Clamp paging and canonicalize the search text.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.search = self
            .search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        self.page = self.page.max(1);
        self.page_size = match self.page_size {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };
        self
    }

    /// Row offset of the first item on the page.
    #[must_use]
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.page_size)
    }

    /// Stable textual form used as the cache key suffix.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let mut key = String::new();
        let _ = write!(
            key,
            "cat={};q={};min={};max={};stock={};sort={};page={};size={}",
            self.category_id.map(|c| c.to_string()).unwrap_or_default(),
            self.search.as_deref().unwrap_or_default(),
            self.min_price.map(|p| p.to_string()).unwrap_or_default(),
            self.max_price.map(|p| p.to_string()).unwrap_or_default(),
            self.in_stock,
            self.sort.as_str(),
            self.page,
            self.page_size,
        );
        key
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

impl<T> Page<T> {
    /// Assemble a page, deriving `total_pages` from the item count.
    #[must_use]
    pub fn new(items: Vec<T>, page: u32, page_size: u32, total_items: u64) -> Self {
        let size = u64::from(page_size.max(1));
        let total_pages = u32::try_from(total_items.div_ceil(size)).unwrap_or(u32::MAX);
        Self {
            items,
            page,
            page_size,
            total_items,
            total_pages,
        }
    }
}
