//! Channel gateway abstraction: inbound verification and parsing, outbound send.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;

use crate::catalog::model::{GatewayBinding, GatewayKind};
use crate::error::ChannelError;

/// A text message received from a gateway, already filtered to text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Gateway-assigned channel identifier the tenant is bound to.
    pub routing_key: String,
    /// Sender address as the gateway reports it.
    pub from: String,
    pub text: String,
    /// Provider message id.
    pub event_id: Option<String>,
}

/// A reply to deliver through a gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub to: String,
    pub text: String,
    pub media_url: Option<String>,
}

/// One WhatsApp provider.
#[async_trait]
pub trait ChannelGateway: Send + Sync {
    fn kind(&self) -> GatewayKind;

    /// Authenticate a raw inbound request.
    fn verify_inbound(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), ChannelError>;

    /// Extract text events. Non-text and empty messages are dropped here.
    fn parse_inbound(&self, body: &[u8]) -> Result<Vec<InboundEvent>, ChannelError>;

    /// Deliver a reply using the tenant's binding for credentials.
    async fn send(
        &self,
        binding: &GatewayBinding,
        message: &OutboundMessage,
    ) -> Result<(), ChannelError>;
}

/// Gateways by kind; selection follows the tenant's binding.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<GatewayKind, Arc<dyn ChannelGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, gateway: Arc<dyn ChannelGateway>) {
        self.gateways.insert(gateway.kind(), gateway);
    }

    pub fn get(&self, kind: GatewayKind) -> Option<Arc<dyn ChannelGateway>> {
        self.gateways.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<GatewayKind> {
        let mut kinds: Vec<_> = self.gateways.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}
