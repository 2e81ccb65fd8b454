//! Tenant catalog: records, relevance ranking, and prompt grounding.

pub mod grounder;
pub mod model;
pub mod ranking;

pub use grounder::{CatalogGrounder, GroundedCatalog};
pub use model::{GatewayBinding, GatewayKind, Product, StockStatus, Tenant};
pub use ranking::{KeywordRanker, ProductRanker};
