//! Shared types for the message processing pipeline.

use serde::Serialize;
use uuid::Uuid;

use crate::catalog::model::{GatewayKind, Tenant};
use crate::language::Language;
use crate::orders::model::Order;

// ── Inbound ─────────────────────────────────────────────────────────

/// How the caller identifies the tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantRef {
    /// Direct id, used by the simulation endpoint.
    Id(Uuid),
    /// Gateway-assigned channel identifier, used by webhooks.
    Gateway {
        kind: GatewayKind,
        routing_key: String,
    },
}

/// One inbound customer utterance.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub tenant: TenantRef,
    /// Sender's channel address (phone number).
    pub customer_address: String,
    pub text: String,
    /// Skips detection when set.
    pub language: Option<Language>,
    /// Provider message id, for redelivery de-duplication.
    pub event_id: Option<String>,
}

impl ProcessRequest {
    pub fn new(tenant: TenantRef, customer_address: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tenant,
            customer_address: customer_address.into(),
            text: text.into(),
            language: None,
            event_id: None,
        }
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }
}

// ── Outcome ─────────────────────────────────────────────────────────

/// What happened to an order the agent asked for.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OrderRecording {
    /// The reply carried no order action.
    None,
    Recorded(Order),
    /// Persisting failed; the reply was still delivered.
    Failed { reason: String },
}

impl OrderRecording {
    pub fn order(&self) -> Option<&Order> {
        match self {
            Self::Recorded(order) => Some(order),
            _ => None,
        }
    }
}

/// The customer-facing result of one turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub text: String,
    pub media_url: Option<String>,
    pub language: Language,
    pub order: OrderRecording,
}

/// Terminal state of one processing cycle.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// A reply was produced and the turn persisted.
    Replied { tenant: Box<Tenant>, reply: Reply },
    /// Empty utterance; nothing to do.
    Ignored,
    /// No tenant matches the request; nothing was written.
    UnknownTenant,
    /// The tenant has switched its bot off.
    BotInactive { tenant_id: Uuid },
    /// The event id was already processed.
    Duplicate,
}

impl ProcessOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Replied { .. } => "replied",
            Self::Ignored => "ignored",
            Self::UnknownTenant => "unknown_tenant",
            Self::BotInactive { .. } => "bot_inactive",
            Self::Duplicate => "duplicate",
        }
    }

    pub fn reply(&self) -> Option<&Reply> {
        match self {
            Self::Replied { reply, .. } => Some(reply),
            _ => None,
        }
    }
}
