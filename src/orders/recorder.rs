//! Turns an extracted `create_order` action into a persisted order.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::error::OrderError;
use crate::orders::model::{Order, OrderItem, OrderStatus};
use crate::pipeline::actions::{ActionItem, CreateOrderAction};
use crate::store::Database;

/// Σ price × quantity, with a missing price counted as 0 and a missing
/// quantity as 1. `None` when the sum does not fit a `Decimal`.
pub fn compute_total(items: &[ActionItem]) -> Option<Decimal> {
    items.iter().try_fold(Decimal::ZERO, |total, item| {
        let line = item
            .price
            .unwrap_or(Decimal::ZERO)
            .checked_mul(Decimal::from(item.quantity.unwrap_or(1)))?;
        total.checked_add(line)
    })
}

/// Persists orders created by the conversational pipeline.
pub struct OrderRecorder {
    db: Arc<dyn Database>,
}

impl OrderRecorder {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Record an order in `pending` state.
    ///
    /// With an `idempotency_key`, a second call for the same key returns the
    /// order created by the first instead of inserting another.
    pub async fn record(
        &self,
        tenant_id: Uuid,
        customer_address: &str,
        action: &CreateOrderAction,
        idempotency_key: Option<&str>,
    ) -> Result<Order, OrderError> {
        let total = compute_total(&action.items).ok_or(OrderError::TotalOverflow)?;
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            tenant_id,
            customer_name: action.customer_name.trim().to_string(),
            customer_phone: customer_address.to_string(),
            address: action.address.trim().to_string(),
            items: action
                .items
                .iter()
                .map(|item| OrderItem {
                    product: item.product.trim().to_string(),
                    quantity: item.quantity.unwrap_or(1),
                    price: item.price,
                })
                .collect(),
            total,
            status: OrderStatus::Pending,
            notes: None,
            idempotency_key: idempotency_key.map(str::to_string),
            created_at: now,
            updated_at: now,
        };

        let stored = self.db.insert_order(&order).await?;
        if stored.id == order.id {
            info!(
                order_id = %stored.id,
                tenant_id = %tenant_id,
                total = %stored.total,
                items = stored.items.len(),
                "Order recorded"
            );
        } else {
            info!(
                order_id = %stored.id,
                tenant_id = %tenant_id,
                "Order already recorded for this message"
            );
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::store::LibSqlBackend;

    fn item(product: &str, quantity: Option<u32>, price: Option<Decimal>) -> ActionItem {
        ActionItem {
            product: product.into(),
            quantity,
            price,
        }
    }

    #[test]
    fn total_applies_defaults() {
        let items = vec![
            item("Plate", Some(2), Some(dec!(500))),
            item("Bowl", None, Some(dec!(120.50))),
            item("Custom jar", Some(4), None),
        ];
        assert_eq!(compute_total(&items), Some(dec!(1120.50)));
        assert_eq!(compute_total(&[]), Some(Decimal::ZERO));
    }

    #[test]
    fn total_matches_line_sums() {
        let items: Vec<ActionItem> = (1..=5)
            .map(|i| item("x", Some(i), Some(Decimal::from(i) * dec!(1.25))))
            .collect();
        let expected: Decimal = items
            .iter()
            .map(|i| i.price.unwrap_or_default() * Decimal::from(i.quantity.unwrap_or(1)))
            .sum();
        assert_eq!(compute_total(&items), Some(expected));
    }

    #[test]
    fn overflowing_total_is_none() {
        let items = vec![item("Plate", Some(4_000_000_000), Some(dec!(50000000000000000000)))];
        assert_eq!(compute_total(&items), None);

        let near_max = vec![item("a", None, Some(Decimal::MAX)), item("b", None, Some(dec!(1)))];
        assert_eq!(compute_total(&near_max), None);
    }

    #[tokio::test]
    async fn overflowing_order_is_refused_without_insert() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let recorder = OrderRecorder::new(db.clone());
        let action = CreateOrderAction {
            customer_name: "Asha".into(),
            items: vec![item("Plate", Some(4_000_000_000), Some(dec!(50000000000000000000)))],
            address: "12 MG Road".into(),
        };
        let tenant_id = Uuid::new_v4();

        let err = recorder.record(tenant_id, "+1", &action, None).await.unwrap_err();
        assert!(matches!(err, OrderError::TotalOverflow));
        assert!(db.list_orders(tenant_id, None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_creates_pending_order() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let recorder = OrderRecorder::new(db.clone());
        let action = CreateOrderAction {
            customer_name: " Asha ".into(),
            items: vec![item("Steel Plate", Some(2), Some(dec!(500)))],
            address: "12 MG Road".into(),
        };
        let tenant_id = Uuid::new_v4();

        let order = recorder
            .record(tenant_id, "+919800000001", &action, None)
            .await
            .unwrap();
        assert_eq!(order.total, dec!(1000));
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.customer_name, "Asha");
        assert_eq!(order.customer_phone, "+919800000001");
        assert_eq!(order.items[0].quantity, 2);

        let stored = db.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.total, dec!(1000));
    }

    #[tokio::test]
    async fn record_is_idempotent_per_key() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let recorder = OrderRecorder::new(db.clone());
        let action = CreateOrderAction {
            customer_name: "R".into(),
            items: vec![item("Mug", None, None)],
            address: "X".into(),
        };
        let tenant_id = Uuid::new_v4();

        let a = recorder.record(tenant_id, "+1", &action, Some("wamid.1")).await.unwrap();
        let b = recorder.record(tenant_id, "+1", &action, Some("wamid.1")).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.total, Decimal::ZERO);
        assert_eq!(db.list_orders(tenant_id, None, 10).await.unwrap().len(), 1);
    }
}
