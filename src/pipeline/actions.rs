//! Structured action blocks embedded in backend replies.
//!
//! The backend signals an order by emitting a fenced ```` ```json ```` block
//! with a fixed shape. Anything that fails to match that shape degrades to
//! "no action" and the reply text is left untouched.

use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::language::Language;

/// Discriminator value for order creation.
pub const CREATE_ORDER: &str = "create_order";

static ACTION_BLOCK: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(\{.*?\})\s*```"));

/// One requested line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionItem {
    pub product: String,
    #[serde(default)]
    pub quantity: Option<u32>,
    #[serde(default)]
    pub price: Option<Decimal>,
}

/// Payload of a `create_order` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateOrderAction {
    pub customer_name: String,
    pub items: Vec<ActionItem>,
    pub address: String,
}

/// A validated action extracted from a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedAction {
    CreateOrder(CreateOrderAction),
}

/// Result of scanning a reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// Text the customer sees.
    pub visible: String,
    pub action: Option<ExtractedAction>,
}

/// Why a block was rejected. Logged, never surfaced.
#[derive(Debug, thiserror::Error)]
pub enum ActionRejected {
    #[error("not a JSON object: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing action discriminator")]
    MissingDiscriminator,

    #[error("unrecognized action '{0}'")]
    UnknownAction(String),

    #[error("order has no items")]
    NoItems,

    #[error("item '{product}' has quantity 0")]
    ZeroQuantity { product: String },

    #[error("item '{product}' has negative price")]
    NegativePrice { product: String },

    #[error("order total overflows")]
    TotalOverflow,
}

/// Scan `reply` for an action block.
///
/// On a valid block, returns the reply with the block removed; if nothing
/// else remains, the visible text is the localized order confirmation.
/// On any rejection, returns the reply unchanged with no action.
pub fn extract(reply: &str, language: Language) -> Extraction {
    let unchanged = || Extraction {
        visible: reply.to_string(),
        action: None,
    };

    let pattern = match ACTION_BLOCK.as_ref() {
        Ok(re) => re,
        Err(e) => {
            warn!(error = %e, "Action block pattern unavailable");
            return unchanged();
        }
    };

    let Some(caps) = pattern.captures(reply) else {
        return unchanged();
    };
    let (Some(block), Some(body)) = (caps.get(0), caps.get(1)) else {
        return unchanged();
    };

    let action = match parse_action(body.as_str()) {
        Ok(action) => action,
        Err(e) => {
            warn!(error = %e, "Malformed action block, keeping reply as-is");
            return unchanged();
        }
    };

    let mut visible = String::with_capacity(reply.len());
    visible.push_str(&reply[..block.start()]);
    visible.push_str(&reply[block.end()..]);
    let visible = visible.trim();

    debug!(kind = CREATE_ORDER, "Extracted action block");
    Extraction {
        visible: if visible.is_empty() {
            language.order_confirmation().to_string()
        } else {
            visible.to_string()
        },
        action: Some(action),
    }
}

/// Parse and validate the JSON body of an action block.
pub fn parse_action(body: &str) -> Result<ExtractedAction, ActionRejected> {
    let mut value: serde_json::Value = serde_json::from_str(body)?;
    let object = value
        .as_object_mut()
        .ok_or(ActionRejected::MissingDiscriminator)?;
    let kind = match object.remove("action") {
        Some(serde_json::Value::String(kind)) => kind,
        _ => return Err(ActionRejected::MissingDiscriminator),
    };
    if kind != CREATE_ORDER {
        return Err(ActionRejected::UnknownAction(kind));
    }

    let order: CreateOrderAction = serde_json::from_value(value)?;
    if order.items.is_empty() {
        return Err(ActionRejected::NoItems);
    }
    for item in &order.items {
        if item.quantity == Some(0) {
            return Err(ActionRejected::ZeroQuantity {
                product: item.product.clone(),
            });
        }
        if item.price.is_some_and(|p| p.is_sign_negative() && !p.is_zero()) {
            return Err(ActionRejected::NegativePrice {
                product: item.product.clone(),
            });
        }
    }
    if crate::orders::compute_total(&order.items).is_none() {
        return Err(ActionRejected::TotalOverflow);
    }
    Ok(ExtractedAction::CreateOrder(order))
}
