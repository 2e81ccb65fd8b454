//! Inbound dispatch: run a gateway event through the pipeline and deliver the reply.

use tracing::{info, warn};

use super::gateway::{GatewayRegistry, InboundEvent, OutboundMessage};
use crate::catalog::model::GatewayKind;
use crate::pipeline::{MessageProcessor, ProcessOutcome, ProcessRequest, TenantRef};

/// How an inbound event ended. Used for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Delivered,
    /// The turn was persisted but the reply never reached the customer.
    Undelivered,
    /// The pipeline finished without producing a reply.
    NoReply(&'static str),
    /// The pipeline failed; nothing was persisted.
    Failed { retryable: bool },
}

/// Process one event and send the reply through the tenant's gateway.
///
/// Never fails: by the time this runs the webhook has been acknowledged.
pub async fn handle_inbound(
    processor: &MessageProcessor,
    gateways: &GatewayRegistry,
    kind: GatewayKind,
    event: InboundEvent,
) -> Disposition {
    let mut request = ProcessRequest::new(
        TenantRef::Gateway {
            kind,
            routing_key: event.routing_key.clone(),
        },
        event.from.clone(),
        event.text,
    );
    request.event_id = event.event_id;

    let (tenant, reply) = match processor.process(request).await {
        Ok(ProcessOutcome::Replied { tenant, reply }) => (tenant, reply),
        Ok(other) => {
            info!(gateway = %kind, routing_key = %event.routing_key, outcome = other.label(), "Inbound event produced no reply");
            return Disposition::NoReply(other.label());
        }
        Err(e) => {
            warn!(
                gateway = %kind,
                routing_key = %event.routing_key,
                retryable = e.is_retryable(),
                error = %e,
                "Inbound event failed"
            );
            return Disposition::Failed {
                retryable: e.is_retryable(),
            };
        }
    };

    let Some(binding) = tenant.gateway.as_ref() else {
        warn!(tenant_id = %tenant.id, "Tenant has no gateway binding, reply not sent");
        return Disposition::Undelivered;
    };
    let Some(gateway) = gateways.get(binding.kind) else {
        warn!(tenant_id = %tenant.id, gateway = %binding.kind, "Gateway not configured, reply not sent");
        return Disposition::Undelivered;
    };

    let outbound = OutboundMessage {
        to: event.from,
        text: reply.text,
        media_url: reply.media_url,
    };
    match gateway.send(binding, &outbound).await {
        Ok(()) => {
            info!(tenant_id = %tenant.id, gateway = %binding.kind, "Reply delivered");
            Disposition::Delivered
        }
        Err(e) => {
            warn!(tenant_id = %tenant.id, gateway = %binding.kind, error = %e, "Failed to send reply");
            Disposition::Undelivered
        }
    }
}
