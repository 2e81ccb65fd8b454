//! Per-(tenant, customer) conversation state.
//!
//! The message log is append-only in storage; windowing for prompt context
//! happens at read time. Writers to the same conversation are serialized by
//! an in-process lock and, across processes, by the row's version counter.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::language::Language;
use crate::store::Database;

/// Who said a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    Customer,
    Assistant,
}

/// One turn in a conversation. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn customer(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Customer,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// A customer's conversation with one tenant.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub customer_address: String,
    pub messages: Vec<Message>,
    pub language: Language,
    /// Bumped on every append.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Conversation {
    /// The last `n` messages, oldest first.
    pub fn recent(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }
}

type ConversationKey = (Uuid, String);

/// Get-or-create and append over a `Database`, plus per-key locking.
pub struct ConversationStore {
    db: Arc<dyn Database>,
    locks: DashMap<ConversationKey, Arc<Mutex<()>>>,
    append_retries: u32,
}

/// Exclusive access to one conversation key. Released on drop.
pub struct ConversationGuard<'a> {
    locks: &'a DashMap<ConversationKey, Arc<Mutex<()>>>,
    key: ConversationKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ConversationGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Prune the entry when nobody else holds or awaits it.
        self.locks
            .remove_if(&self.key, |_, m| Arc::strong_count(m) == 1);
    }
}

impl ConversationStore {
    pub fn new(db: Arc<dyn Database>, append_retries: u32) -> Self {
        Self {
            db,
            locks: DashMap::new(),
            append_retries: append_retries.max(1),
        }
    }

    /// Serialize work on `(tenant_id, customer_address)` within this process.
    pub async fn lock(&self, tenant_id: Uuid, customer_address: &str) -> ConversationGuard<'_> {
        let key = (tenant_id, customer_address.to_string());
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        let guard = mutex.lock_owned().await;
        ConversationGuard {
            locks: &self.locks,
            key,
            guard: Some(guard),
        }
    }

    /// Number of keys currently locked or awaited.
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    pub async fn get_or_create(
        &self,
        tenant_id: Uuid,
        customer_address: &str,
    ) -> Result<Conversation, DatabaseError> {
        self.db
            .get_or_create_conversation(tenant_id, customer_address)
            .await
    }

    /// Append messages and replace the language tag, retrying on version
    /// conflicts from concurrent writers.
    pub async fn append(
        &self,
        conversation_id: Uuid,
        messages: &[Message],
        language: Language,
    ) -> Result<Conversation, DatabaseError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .db
                .append_conversation_messages(conversation_id, messages, language)
                .await
            {
                Ok(conv) => {
                    debug!(
                        conversation_id = %conversation_id,
                        appended = messages.len(),
                        total = conv.messages.len(),
                        "Conversation updated"
                    );
                    return Ok(conv);
                }
                Err(DatabaseError::Conflict { .. }) if attempt < self.append_retries => {
                    warn!(
                        conversation_id = %conversation_id,
                        attempt,
                        "Conversation append conflicted, retrying"
                    );
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
