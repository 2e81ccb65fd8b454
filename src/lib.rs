//! Storefront Bot: a multi-tenant WhatsApp shop assistant.

pub mod agent;
pub mod catalog;
pub mod channels;
pub mod config;
pub mod conversations;
pub mod error;
pub mod language;
pub mod llm;
pub mod orders;
pub mod pipeline;
pub mod store;
