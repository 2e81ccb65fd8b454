//! WhatsApp channel gateways, inbound dispatch, and webhook routes.

pub mod gateway;
pub mod inbound;
pub mod meta;
pub mod routes;
pub mod twilio;

pub use gateway::{ChannelGateway, GatewayRegistry, InboundEvent, OutboundMessage};
pub use inbound::{Disposition, handle_inbound};
pub use meta::MetaGateway;
pub use routes::{WhatsAppState, whatsapp_routes};
pub use twilio::TwilioGateway;
