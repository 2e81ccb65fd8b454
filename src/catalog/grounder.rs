//! Renders a bounded catalog summary for prompt grounding.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::catalog::model::Product;
use crate::catalog::ranking::{self, ProductRanker};
use crate::error::DatabaseError;
use crate::store::Database;

/// Rendered when the tenant has no products.
pub const EMPTY_CATALOG: &str = "No products in inventory yet.";

/// Catalog products selected for one turn, plus their rendered text.
#[derive(Debug, Clone)]
pub struct GroundedCatalog {
    /// Ranked and capped, in render order.
    pub products: Vec<Product>,
    pub text: String,
}

impl GroundedCatalog {
    /// First image of the highest-ranked product named in `reply`.
    pub fn media_for(&self, reply: &str) -> Option<String> {
        let reply = reply.to_lowercase();
        self.products
            .iter()
            .find(|p| !p.name.trim().is_empty() && reply.contains(&p.name.to_lowercase()))
            .and_then(|p| p.first_image())
            .map(str::to_string)
    }
}

/// Loads a tenant's products and renders the top of the ranking.
pub struct CatalogGrounder {
    db: Arc<dyn Database>,
    ranker: Arc<dyn ProductRanker>,
    max_products: usize,
}

impl CatalogGrounder {
    pub fn new(db: Arc<dyn Database>, ranker: Arc<dyn ProductRanker>, max_products: usize) -> Self {
        Self {
            db,
            ranker,
            max_products,
        }
    }

    /// Ground a tenant's catalog against the current utterance.
    pub async fn ground(
        &self,
        tenant_id: Uuid,
        utterance: &str,
    ) -> Result<GroundedCatalog, DatabaseError> {
        let all = self.db.list_products(tenant_id).await?;
        let products: Vec<Product> = ranking::rank(self.ranker.as_ref(), utterance, &all)
            .into_iter()
            .take(self.max_products)
            .cloned()
            .collect();

        debug!(
            tenant_id = %tenant_id,
            total = all.len(),
            rendered = products.len(),
            "Grounded catalog"
        );

        let text = render(&products);
        Ok(GroundedCatalog { products, text })
    }
}

/// One line per product, or the empty-catalog marker.
pub fn render(products: &[Product]) -> String {
    if products.is_empty() {
        return EMPTY_CATALOG.to_string();
    }
    products
        .iter()
        .map(render_line)
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_line(p: &Product) -> String {
    let category = p
        .category
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or("General");
    let price = match p.price {
        Some(price) => format!("₹{}", price.normalize()),
        None => "Price on request".to_string(),
    };

    let mut line = format!("- {} [{}] — {} ({})", p.name, category, price, p.stock_status());
    if let Some(desc) = p.description.as_deref().filter(|d| !d.trim().is_empty()) {
        line.push_str(": ");
        line.push_str(desc.trim());
    }
    if let Some(url) = p.first_image() {
        line.push_str(" | image: ");
        line.push_str(url);
    }
    line
}
