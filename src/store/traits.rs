//! The `Database` trait: one async interface for all persistence.

use async_trait::async_trait;
use uuid::Uuid;

use crate::catalog::model::{GatewayKind, Product, Tenant};
use crate::conversations::{Conversation, Message};
use crate::error::DatabaseError;
use crate::language::Language;
use crate::orders::model::{Order, OrderStatus};

/// Backend-agnostic database trait covering tenants, catalog, conversations,
/// and orders.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Tenants ─────────────────────────────────────────────────────

    /// Insert a tenant. Seeding and tests only; tenant management lives
    /// outside this service.
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), DatabaseError>;

    async fn get_tenant(&self, id: Uuid) -> Result<Option<Tenant>, DatabaseError>;

    /// Resolve a tenant from a gateway routing key.
    async fn find_tenant_by_gateway(
        &self,
        kind: GatewayKind,
        routing_key: &str,
    ) -> Result<Option<Tenant>, DatabaseError>;

    // ── Products ────────────────────────────────────────────────────

    /// Insert a product. Seeding and tests only.
    async fn insert_product(&self, product: &Product) -> Result<(), DatabaseError>;

    /// All products for a tenant, in catalog (insertion) order.
    async fn list_products(&self, tenant_id: Uuid) -> Result<Vec<Product>, DatabaseError>;

    // ── Conversations ───────────────────────────────────────────────

    /// Fetch the conversation for `(tenant_id, customer_address)`, creating an
    /// empty one if absent. Never creates a second row for the same key.
    async fn get_or_create_conversation(
        &self,
        tenant_id: Uuid,
        customer_address: &str,
    ) -> Result<Conversation, DatabaseError>;

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, DatabaseError>;

    async fn find_conversation(
        &self,
        tenant_id: Uuid,
        customer_address: &str,
    ) -> Result<Option<Conversation>, DatabaseError>;

    /// Extend the message log and replace the language tag.
    ///
    /// Read-modify-write guarded by the row's version counter; returns
    /// `DatabaseError::Conflict` if another writer got there first.
    async fn append_conversation_messages(
        &self,
        id: Uuid,
        messages: &[Message],
        language: Language,
    ) -> Result<Conversation, DatabaseError>;

    // ── Inbound event de-duplication ────────────────────────────────

    async fn has_processed_event(
        &self,
        tenant_id: Uuid,
        event_id: &str,
    ) -> Result<bool, DatabaseError>;

    async fn record_processed_event(
        &self,
        tenant_id: Uuid,
        event_id: &str,
    ) -> Result<(), DatabaseError>;

    // ── Orders ──────────────────────────────────────────────────────

    /// Insert an order. If another order already carries the same
    /// idempotency key, that order is returned and nothing is inserted.
    async fn insert_order(&self, order: &Order) -> Result<Order, DatabaseError>;

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, DatabaseError>;

    /// Newest first.
    async fn list_orders(
        &self,
        tenant_id: Uuid,
        status: Option<OrderStatus>,
        limit: usize,
    ) -> Result<Vec<Order>, DatabaseError>;

    /// Compare-and-set the status. Returns `false` if the order was not in
    /// `expected` (or does not exist).
    async fn update_order_status(
        &self,
        id: Uuid,
        expected: OrderStatus,
        status: OrderStatus,
    ) -> Result<bool, DatabaseError>;
}
