//! libSQL backend for the `Database` trait.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;
use uuid::Uuid;

use crate::catalog::model::{GatewayBinding, GatewayKind, Product, Tenant};
use crate::conversations::{Conversation, Message};
use crate::error::DatabaseError;
use crate::language::Language;
use crate::orders::model::{Order, OrderItem, OrderStatus};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_int(n: Option<i64>) -> libsql::Value {
    match n {
        Some(n) => libsql::Value::Integer(n),
        None => libsql::Value::Null,
    }
}

fn row_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(format!("read row: {e}"))
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Serialization(format!("bad uuid '{s}': {e}")))
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(s).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn parse_decimal(s: &str) -> Result<Decimal, DatabaseError> {
    s.parse::<Decimal>()
        .map_err(|e| DatabaseError::Serialization(format!("bad decimal '{s}': {e}")))
}

const TENANT_COLUMNS: &str = "id, name, category, location, description, languages, tone, \
     system_prompt, bot_active, gateway_kind, gateway_routing_key, gateway_token, created_at";

fn row_to_tenant(row: &libsql::Row) -> Result<Tenant, DatabaseError> {
    let id: String = row.get(0).map_err(row_err)?;
    let languages: String = row.get(5).map_err(row_err)?;
    let bot_active: i64 = row.get(8).map_err(row_err)?;
    let created: String = row.get(12).map_err(row_err)?;

    let tags: Vec<String> = from_json(&languages)?;
    let gateway = match (row.get::<String>(9).ok(), row.get::<String>(10).ok()) {
        (Some(kind), Some(routing_key)) => Some(GatewayBinding {
            kind: kind.parse().map_err(DatabaseError::Serialization)?,
            routing_key,
            access_token: row.get::<String>(11).ok().map(SecretString::from),
        }),
        _ => None,
    };

    Ok(Tenant {
        id: parse_uuid(&id)?,
        name: row.get(1).map_err(row_err)?,
        category: row.get(2).ok(),
        location: row.get(3).ok(),
        description: row.get(4).ok(),
        languages: tags.iter().map(|t| Language::parse_or_default(t)).collect(),
        tone: row.get(6).ok(),
        system_prompt: row.get(7).ok(),
        bot_active: bot_active != 0,
        gateway,
        created_at: parse_datetime(&created),
    })
}

const PRODUCT_COLUMNS: &str =
    "id, tenant_id, name, category, description, price, in_stock, stock_quantity, image_urls";

fn row_to_product(row: &libsql::Row) -> Result<Product, DatabaseError> {
    let id: String = row.get(0).map_err(row_err)?;
    let tenant_id: String = row.get(1).map_err(row_err)?;
    let in_stock: i64 = row.get(6).map_err(row_err)?;
    let images: String = row.get(8).map_err(row_err)?;

    Ok(Product {
        id: parse_uuid(&id)?,
        tenant_id: parse_uuid(&tenant_id)?,
        name: row.get(2).map_err(row_err)?,
        category: row.get(3).ok(),
        description: row.get(4).ok(),
        price: row
            .get::<String>(5)
            .ok()
            .map(|p| parse_decimal(&p))
            .transpose()?,
        in_stock: in_stock != 0,
        stock_quantity: row.get::<i64>(7).ok(),
        image_urls: from_json(&images)?,
    })
}

const CONVERSATION_COLUMNS: &str =
    "id, tenant_id, customer_address, messages, language, version, created_at, last_activity";

fn row_to_conversation(row: &libsql::Row) -> Result<Conversation, DatabaseError> {
    let id: String = row.get(0).map_err(row_err)?;
    let tenant_id: String = row.get(1).map_err(row_err)?;
    let messages: String = row.get(3).map_err(row_err)?;
    let language: String = row.get(4).map_err(row_err)?;
    let created: String = row.get(6).map_err(row_err)?;
    let last_activity: String = row.get(7).map_err(row_err)?;

    Ok(Conversation {
        id: parse_uuid(&id)?,
        tenant_id: parse_uuid(&tenant_id)?,
        customer_address: row.get(2).map_err(row_err)?,
        messages: from_json(&messages)?,
        language: Language::parse_or_default(&language),
        version: row.get(5).map_err(row_err)?,
        created_at: parse_datetime(&created),
        last_activity: parse_datetime(&last_activity),
    })
}

const ORDER_COLUMNS: &str = "id, tenant_id, customer_name, customer_phone, address, items, \
     total, status, notes, idempotency_key, created_at, updated_at";

fn row_to_order(row: &libsql::Row) -> Result<Order, DatabaseError> {
    let id: String = row.get(0).map_err(row_err)?;
    let tenant_id: String = row.get(1).map_err(row_err)?;
    let items: String = row.get(5).map_err(row_err)?;
    let total: String = row.get(6).map_err(row_err)?;
    let status: String = row.get(7).map_err(row_err)?;
    let created: String = row.get(10).map_err(row_err)?;
    let updated: String = row.get(11).map_err(row_err)?;

    Ok(Order {
        id: parse_uuid(&id)?,
        tenant_id: parse_uuid(&tenant_id)?,
        customer_name: row.get(2).map_err(row_err)?,
        customer_phone: row.get(3).map_err(row_err)?,
        address: row.get(4).map_err(row_err)?,
        items: from_json::<Vec<OrderItem>>(&items)?,
        total: parse_decimal(&total)?,
        status: status
            .parse()
            .map_err(|e: crate::error::OrderError| DatabaseError::Serialization(e.to_string()))?,
        notes: row.get(8).ok(),
        idempotency_key: row.get(9).ok(),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

// ── Trait implementation ────────────────────────────────────────────

impl LibSqlBackend {
    async fn query_one<T>(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
        map: fn(&libsql::Row) -> Result<T, DatabaseError>,
    ) -> Result<Option<T>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => map(&row).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }

    async fn query_all<T>(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
        map: fn(&libsql::Row) -> Result<T, DatabaseError>,
    ) -> Result<Vec<T>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;
        let mut out = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => out.push(map(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("{op}: {e}"))),
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Tenants ─────────────────────────────────────────────────────

    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), DatabaseError> {
        let languages: Vec<&str> = tenant.languages.iter().map(|l| l.as_str()).collect();
        let gateway = tenant.gateway.as_ref();
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO tenants ({TENANT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    tenant.id.to_string(),
                    tenant.name.as_str(),
                    opt_text(tenant.category.as_deref()),
                    opt_text(tenant.location.as_deref()),
                    opt_text(tenant.description.as_deref()),
                    to_json(&languages)?,
                    opt_text(tenant.tone.as_deref()),
                    opt_text(tenant.system_prompt.as_deref()),
                    tenant.bot_active as i64,
                    opt_text(gateway.map(|g| g.kind.as_str())),
                    opt_text(gateway.map(|g| g.routing_key.as_str())),
                    opt_text(
                        gateway
                            .and_then(|g| g.access_token.as_ref())
                            .map(|t| t.expose_secret())
                    ),
                    tenant.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_tenant: {e}")))?;
        Ok(())
    }

    async fn get_tenant(&self, id: Uuid) -> Result<Option<Tenant>, DatabaseError> {
        self.query_one(
            "get_tenant",
            &format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = ?1"),
            params![id.to_string()],
            row_to_tenant,
        )
        .await
    }

    async fn find_tenant_by_gateway(
        &self,
        kind: GatewayKind,
        routing_key: &str,
    ) -> Result<Option<Tenant>, DatabaseError> {
        self.query_one(
            "find_tenant_by_gateway",
            &format!(
                "SELECT {TENANT_COLUMNS} FROM tenants
                 WHERE gateway_kind = ?1 AND gateway_routing_key = ?2"
            ),
            params![kind.as_str(), routing_key],
            row_to_tenant,
        )
        .await
    }

    // ── Products ────────────────────────────────────────────────────

    async fn insert_product(&self, product: &Product) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO products ({PRODUCT_COLUMNS}, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    product.id.to_string(),
                    product.tenant_id.to_string(),
                    product.name.as_str(),
                    opt_text(product.category.as_deref()),
                    opt_text(product.description.as_deref()),
                    opt_text(product.price.map(|p| p.to_string()).as_deref()),
                    product.in_stock as i64,
                    opt_int(product.stock_quantity),
                    to_json(&product.image_urls)?,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_product: {e}")))?;
        Ok(())
    }

    async fn list_products(&self, tenant_id: Uuid) -> Result<Vec<Product>, DatabaseError> {
        self.query_all(
            "list_products",
            &format!(
                "SELECT {PRODUCT_COLUMNS} FROM products
                 WHERE tenant_id = ?1 ORDER BY created_at ASC, rowid ASC"
            ),
            params![tenant_id.to_string()],
            row_to_product,
        )
        .await
    }

    // ── Conversations ───────────────────────────────────────────────

    async fn get_or_create_conversation(
        &self,
        tenant_id: Uuid,
        customer_address: &str,
    ) -> Result<Conversation, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO conversations
                    (id, tenant_id, customer_address, messages, language, version, created_at, last_activity)
                 VALUES (?1, ?2, ?3, '[]', ?4, 0, ?5, ?5)
                 ON CONFLICT (tenant_id, customer_address) DO NOTHING",
                params![
                    Uuid::new_v4().to_string(),
                    tenant_id.to_string(),
                    customer_address,
                    Language::default().as_str(),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_or_create_conversation: {e}")))?;

        self.find_conversation(tenant_id, customer_address)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "conversation".into(),
                id: format!("{tenant_id}/{customer_address}"),
            })
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, DatabaseError> {
        self.query_one(
            "get_conversation",
            &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
            params![id.to_string()],
            row_to_conversation,
        )
        .await
    }

    async fn find_conversation(
        &self,
        tenant_id: Uuid,
        customer_address: &str,
    ) -> Result<Option<Conversation>, DatabaseError> {
        self.query_one(
            "find_conversation",
            &format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                 WHERE tenant_id = ?1 AND customer_address = ?2"
            ),
            params![tenant_id.to_string(), customer_address],
            row_to_conversation,
        )
        .await
    }

    async fn append_conversation_messages(
        &self,
        id: Uuid,
        messages: &[Message],
        language: Language,
    ) -> Result<Conversation, DatabaseError> {
        let current = self
            .get_conversation(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "conversation".into(),
                id: id.to_string(),
            })?;

        let mut log = current.messages;
        log.extend_from_slice(messages);
        let now = Utc::now();

        let affected = self
            .conn()
            .execute(
                "UPDATE conversations
                 SET messages = ?1, language = ?2, version = version + 1, last_activity = ?3
                 WHERE id = ?4 AND version = ?5",
                params![
                    to_json(&log)?,
                    language.as_str(),
                    now.to_rfc3339(),
                    id.to_string(),
                    current.version,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append_conversation_messages: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::Conflict {
                entity: "conversation".into(),
                id: id.to_string(),
            });
        }

        Ok(Conversation {
            messages: log,
            language,
            version: current.version + 1,
            last_activity: now,
            ..current
        })
    }

    // ── Inbound event de-duplication ────────────────────────────────

    async fn has_processed_event(
        &self,
        tenant_id: Uuid,
        event_id: &str,
    ) -> Result<bool, DatabaseError> {
        let found = self
            .query_one(
                "has_processed_event",
                "SELECT 1 FROM processed_events WHERE tenant_id = ?1 AND event_id = ?2",
                params![tenant_id.to_string(), event_id],
                |_| Ok(()),
            )
            .await?;
        Ok(found.is_some())
    }

    async fn record_processed_event(
        &self,
        tenant_id: Uuid,
        event_id: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO processed_events (tenant_id, event_id, processed_at)
                 VALUES (?1, ?2, ?3)",
                params![tenant_id.to_string(), event_id, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_processed_event: {e}")))?;
        Ok(())
    }

    // ── Orders ──────────────────────────────────────────────────────

    async fn insert_order(&self, order: &Order) -> Result<Order, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                &format!(
                    "INSERT INTO orders ({ORDER_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                     ON CONFLICT (idempotency_key) DO NOTHING"
                ),
                params![
                    order.id.to_string(),
                    order.tenant_id.to_string(),
                    order.customer_name.as_str(),
                    order.customer_phone.as_str(),
                    order.address.as_str(),
                    to_json(&order.items)?,
                    order.total.to_string(),
                    order.status.as_str(),
                    opt_text(order.notes.as_deref()),
                    opt_text(order.idempotency_key.as_deref()),
                    order.created_at.to_rfc3339(),
                    order.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_order: {e}")))?;

        if affected > 0 {
            return Ok(order.clone());
        }

        let key = order.idempotency_key.as_deref().ok_or_else(|| {
            DatabaseError::Constraint(format!("order {} was not inserted", order.id))
        })?;
        self.query_one(
            "insert_order",
            &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE idempotency_key = ?1"),
            params![key],
            row_to_order,
        )
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "order".into(),
            id: key.to_string(),
        })
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, DatabaseError> {
        self.query_one(
            "get_order",
            &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1"),
            params![id.to_string()],
            row_to_order,
        )
        .await
    }

    async fn list_orders(
        &self,
        tenant_id: Uuid,
        status: Option<OrderStatus>,
        limit: usize,
    ) -> Result<Vec<Order>, DatabaseError> {
        self.query_all(
            "list_orders",
            &format!(
                "SELECT {ORDER_COLUMNS} FROM orders
                 WHERE tenant_id = ?1 AND (?2 IS NULL OR status = ?2)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?3"
            ),
            params![
                tenant_id.to_string(),
                opt_text(status.map(|s| s.as_str())),
                limit as i64,
            ],
            row_to_order,
        )
        .await
    }

    async fn update_order_status(
        &self,
        id: Uuid,
        expected: OrderStatus,
        status: OrderStatus,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE orders SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![
                    status.as_str(),
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                    expected.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_order_status: {e}")))?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn make_order(tenant_id: Uuid, key: Option<&str>) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            tenant_id,
            customer_name: "Asha".into(),
            customer_phone: "+919800000001".into(),
            address: "12 MG Road".into(),
            items: vec![OrderItem {
                product: "Plate".into(),
                quantity: 2,
                price: Some(dec!(500)),
            }],
            total: dec!(1000),
            status: OrderStatus::Pending,
            notes: None,
            idempotency_key: key.map(str::to_string),
            created_at: now,
            updated_at: now,
        }
    }

    // ── Tenant tests ────────────────────────────────────────────────

    #[tokio::test]
    async fn tenant_round_trip_with_gateway() {
        let db = test_db().await;
        let mut tenant = Tenant::new("Sharma Crockery")
            .with_category("crockery store")
            .with_gateway(GatewayBinding {
                kind: GatewayKind::Meta,
                routing_key: "1098765".into(),
                access_token: Some(SecretString::from("EAAB-token")),
            });
        tenant.languages = vec![Language::English, Language::Hindi];
        db.insert_tenant(&tenant).await.unwrap();

        let fetched = db.get_tenant(tenant.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "Sharma Crockery");
        assert_eq!(fetched.category.as_deref(), Some("crockery store"));
        assert_eq!(fetched.languages, vec![Language::English, Language::Hindi]);
        assert!(fetched.location.is_none());
        let gw = fetched.gateway.unwrap();
        assert_eq!(gw.kind, GatewayKind::Meta);
        assert_eq!(gw.access_token.unwrap().expose_secret(), "EAAB-token");

        let by_key = db
            .find_tenant_by_gateway(GatewayKind::Meta, "1098765")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_key.id, tenant.id);
        assert!(db
            .find_tenant_by_gateway(GatewayKind::Twilio, "1098765")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn missing_tenant_is_none() {
        let db = test_db().await;
        assert!(db.get_tenant(Uuid::new_v4()).await.unwrap().is_none());
    }

    // ── Product tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn products_keep_catalog_order_and_fields() {
        let db = test_db().await;
        let tenant = Tenant::new("Shop");
        db.insert_tenant(&tenant).await.unwrap();

        let set = Product::new(tenant.id, "Dinner Set", Some(dec!(2500.50)))
            .with_stock(true, Some(4))
            .with_image("a.jpg");
        let cup = Product::new(tenant.id, "Cup", None).with_stock(false, None);
        db.insert_product(&set).await.unwrap();
        db.insert_product(&cup).await.unwrap();

        let products = db.list_products(tenant.id).await.unwrap();
        assert_eq!(products, vec![set, cup]);
        assert!(db.list_products(Uuid::new_v4()).await.unwrap().is_empty());
    }

    // ── Conversation tests ──────────────────────────────────────────

    #[tokio::test]
    async fn append_builds_on_latest_stored_version() {
        let db = test_db().await;
        let tenant_id = Uuid::new_v4();
        let conv = db.get_or_create_conversation(tenant_id, "+1").await.unwrap();

        // Another writer bumps the version first.
        db.conn()
            .execute(
                "UPDATE conversations SET version = version + 1 WHERE id = ?1",
                params![conv.id.to_string()],
            )
            .await
            .unwrap();

        let updated = db
            .append_conversation_messages(conv.id, &[Message::customer("hi")], Language::English)
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.messages.len(), 1);
    }

    #[tokio::test]
    async fn append_to_missing_conversation_is_not_found() {
        let db = test_db().await;
        let err = db
            .append_conversation_messages(Uuid::new_v4(), &[], Language::English)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn processed_events_are_per_tenant() {
        let db = test_db().await;
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        db.record_processed_event(a, "wamid.1").await.unwrap();
        db.record_processed_event(a, "wamid.1").await.unwrap();
        assert!(db.has_processed_event(a, "wamid.1").await.unwrap());
        assert!(!db.has_processed_event(b, "wamid.1").await.unwrap());
    }

    // ── Order tests ─────────────────────────────────────────────────

    #[tokio::test]
    async fn order_round_trip() {
        let db = test_db().await;
        let order = make_order(Uuid::new_v4(), None);
        db.insert_order(&order).await.unwrap();
        let fetched = db.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(fetched.items, order.items);
        assert_eq!(fetched.total, dec!(1000));
        assert_eq!(fetched.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn idempotency_key_returns_existing_order() {
        let db = test_db().await;
        let tenant_id = Uuid::new_v4();
        let first = db
            .insert_order(&make_order(tenant_id, Some("wamid.X")))
            .await
            .unwrap();
        let second = db
            .insert_order(&make_order(tenant_id, Some("wamid.X")))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(db.list_orders(tenant_id, None, 50).await.unwrap().len(), 1);

        // Orders without a key never collide.
        db.insert_order(&make_order(tenant_id, None)).await.unwrap();
        db.insert_order(&make_order(tenant_id, None)).await.unwrap();
        assert_eq!(db.list_orders(tenant_id, None, 50).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn list_orders_filters_and_limits() {
        let db = test_db().await;
        let tenant_id = Uuid::new_v4();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let o = make_order(tenant_id, None);
            ids.push(o.id);
            db.insert_order(&o).await.unwrap();
        }
        assert!(db
            .update_order_status(ids[0], OrderStatus::Pending, OrderStatus::Confirmed)
            .await
            .unwrap());

        let confirmed = db
            .list_orders(tenant_id, Some(OrderStatus::Confirmed), 50)
            .await
            .unwrap();
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].id, ids[0]);

        let newest = db.list_orders(tenant_id, None, 1).await.unwrap();
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0].id, ids[2]);
    }

    #[tokio::test]
    async fn status_update_is_compare_and_set() {
        let db = test_db().await;
        let order = make_order(Uuid::new_v4(), None);
        db.insert_order(&order).await.unwrap();
        assert!(!db
            .update_order_status(order.id, OrderStatus::Confirmed, OrderStatus::Preparing)
            .await
            .unwrap());
        assert!(!db
            .update_order_status(Uuid::new_v4(), OrderStatus::Pending, OrderStatus::Confirmed)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn file_database_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("storefront.db");
        let tenant = Tenant::new("Persisted");
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.insert_tenant(&tenant).await.unwrap();
        }
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert!(db.get_tenant(tenant.id).await.unwrap().is_some());
    }
}
