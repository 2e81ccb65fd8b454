//! Message processing pipeline.
//!
//! Inbound utterance → language → tenant → catalog grounding → agent reply
//! → action extraction → order → persisted turn.

pub mod actions;
pub mod processor;
pub mod types;

pub use processor::MessageProcessor;
pub use types::{OrderRecording, ProcessOutcome, ProcessRequest, Reply, TenantRef};
