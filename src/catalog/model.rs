//! Tenant and product records, read-only to the pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::language::Language;

/// Which channel provider a tenant's number is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    Meta,
    Twilio,
}

impl GatewayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Meta => "meta",
            Self::Twilio => "twilio",
        }
    }
}

impl fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GatewayKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "meta" => Ok(Self::Meta),
            "twilio" => Ok(Self::Twilio),
            other => Err(format!("unknown gateway kind: '{other}'")),
        }
    }
}

/// A tenant's binding to a channel gateway.
#[derive(Debug, Clone)]
pub struct GatewayBinding {
    pub kind: GatewayKind,
    /// Gateway-assigned identifier that routes inbound events to this tenant
    /// (Meta phone-number id, or the Twilio `To` address).
    pub routing_key: String,
    /// Per-tenant send credential (Meta access token). Twilio uses the
    /// process-wide account credentials instead.
    pub access_token: Option<SecretString>,
}

/// A merchant account.
#[derive(Debug, Clone)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub category: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub languages: Vec<Language>,
    /// Free-text tone/style flags, e.g. "friendly, uses emojis".
    pub tone: Option<String>,
    /// Precomputed system prompt from the launch step, used verbatim.
    pub system_prompt: Option<String>,
    pub bot_active: bool,
    pub gateway: Option<GatewayBinding>,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            category: None,
            location: None,
            description: None,
            languages: vec![Language::English],
            tone: None,
            system_prompt: None,
            bot_active: true,
            gateway: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_gateway(mut self, binding: GatewayBinding) -> Self {
        self.gateway = Some(binding);
        self
    }
}

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub category: Option<String>,
    pub description: Option<String>,
    /// `None` means the shop quotes on request.
    pub price: Option<Decimal>,
    pub in_stock: bool,
    /// Tracked quantity, if the shop counts stock.
    pub stock_quantity: Option<i64>,
    pub image_urls: Vec<String>,
}

/// Stock status as shown to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockStatus {
    OutOfStock,
    Counted(i64),
    InStock,
}

impl fmt::Display for StockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfStock => f.write_str("Out of stock"),
            Self::Counted(n) => write!(f, "In stock ({n} left)"),
            Self::InStock => f.write_str("In stock"),
        }
    }
}

impl Product {
    pub fn new(tenant_id: Uuid, name: impl Into<String>, price: Option<Decimal>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.into(),
            category: None,
            description: None,
            price,
            in_stock: true,
            stock_quantity: None,
            image_urls: Vec::new(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_stock(mut self, in_stock: bool, quantity: Option<i64>) -> Self {
        self.in_stock = in_stock;
        self.stock_quantity = quantity;
        self
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_urls.push(url.into());
        self
    }

    /// Stock derived from the flag and the tracked quantity.
    pub fn stock_status(&self) -> StockStatus {
        match (self.in_stock, self.stock_quantity) {
            (false, _) => StockStatus::OutOfStock,
            (true, Some(n)) if n <= 0 => StockStatus::OutOfStock,
            (true, Some(n)) => StockStatus::Counted(n),
            (true, None) => StockStatus::InStock,
        }
    }

    pub fn first_image(&self) -> Option<&str> {
        self.image_urls.first().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn stock_status_derivation() {
        let t = Uuid::new_v4();
        let p = Product::new(t, "Plate", Some(dec!(100)));
        assert_eq!(p.stock_status(), StockStatus::InStock);
        assert_eq!(p.clone().with_stock(false, Some(9)).stock_status(), StockStatus::OutOfStock);
        assert_eq!(p.clone().with_stock(true, Some(0)).stock_status(), StockStatus::OutOfStock);
        assert_eq!(p.with_stock(true, Some(4)).stock_status().to_string(), "In stock (4 left)");
    }

    #[test]
    fn gateway_kind_round_trip() {
        for kind in [GatewayKind::Meta, GatewayKind::Twilio] {
            assert_eq!(kind.as_str().parse::<GatewayKind>().unwrap(), kind);
        }
        assert!("telegram".parse::<GatewayKind>().is_err());
    }
}
