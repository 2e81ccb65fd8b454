//! Message processor: one inbound utterance in, one grounded reply out.
//!
//! Flow:
//! 1. Language detection (or caller override)
//! 2. Tenant resolution; unknown tenants stop here with nothing written
//! 3. Per-conversation lock, redelivery check, load-or-create
//! 4. Catalog grounding and prompt composition
//! 5. Agent reply; a failure stops here with nothing written
//! 6. Action extraction and order recording
//! 7. Append the turn, then hand the reply back to the channel

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::agent::{ConversationalAgent, PromptComposer};
use crate::catalog::CatalogGrounder;
use crate::catalog::model::Tenant;
use crate::config::PipelineConfig;
use crate::conversations::{ConversationStore, Message};
use crate::error::{DatabaseError, LlmError, PipelineError};
use crate::language;
use crate::orders::OrderRecorder;
use crate::pipeline::actions::{self, ExtractedAction};
use crate::pipeline::types::{OrderRecording, ProcessOutcome, ProcessRequest, Reply, TenantRef};
use crate::store::Database;

/// Orchestrates a single conversational turn.
pub struct MessageProcessor {
    db: Arc<dyn Database>,
    conversations: ConversationStore,
    grounder: CatalogGrounder,
    composer: PromptComposer,
    agent: Arc<dyn ConversationalAgent>,
    orders: OrderRecorder,
    config: PipelineConfig,
}

impl MessageProcessor {
    pub fn new(
        db: Arc<dyn Database>,
        grounder: CatalogGrounder,
        agent: Arc<dyn ConversationalAgent>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            conversations: ConversationStore::new(Arc::clone(&db), config.append_retries),
            orders: OrderRecorder::new(Arc::clone(&db)),
            composer: PromptComposer::new(),
            db,
            grounder,
            agent,
            config,
        }
    }

    /// Conversation store backing this processor.
    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Run one inbound utterance through the pipeline.
    ///
    /// Only a backend failure (or an unrecoverable storage failure) is
    /// returned as an error; in both cases the conversation is unchanged.
    pub async fn process(&self, request: ProcessRequest) -> Result<ProcessOutcome, PipelineError> {
        let text = request.text.trim();
        if text.is_empty() {
            debug!(customer = %request.customer_address, "Empty utterance, ignoring");
            return Ok(ProcessOutcome::Ignored);
        }

        // Step 1: language
        let language = request.language.unwrap_or_else(|| language::detect(text));

        // Step 2: tenant
        let Some(tenant) = self.resolve_tenant(&request.tenant).await? else {
            warn!(tenant = ?request.tenant, "No tenant for inbound message, dropping");
            return Ok(ProcessOutcome::UnknownTenant);
        };
        if !tenant.bot_active {
            info!(tenant_id = %tenant.id, "Bot inactive for tenant, dropping message");
            return Ok(ProcessOutcome::BotInactive {
                tenant_id: tenant.id,
            });
        }

        info!(
            tenant_id = %tenant.id,
            customer = %request.customer_address,
            language = %language,
            "Processing inbound message"
        );

        // Step 3: everything from here on is serialized per conversation
        let _guard = self
            .conversations
            .lock(tenant.id, &request.customer_address)
            .await;

        if let Some(event_id) = request.event_id.as_deref() {
            let seen = self
                .bounded("processed event lookup", self.db.has_processed_event(tenant.id, event_id))
                .await?;
            if seen {
                debug!(tenant_id = %tenant.id, event_id, "Event already processed, skipping");
                return Ok(ProcessOutcome::Duplicate);
            }
        }

        let conversation = self
            .bounded(
                "conversation load",
                self.conversations
                    .get_or_create(tenant.id, &request.customer_address),
            )
            .await?;

        // Step 4: grounding and prompt
        let catalog = self
            .bounded("catalog lookup", self.grounder.ground(tenant.id, text))
            .await?;
        let system = self.composer.compose(&tenant, language, &catalog);

        // Step 5: agent reply
        let history = conversation.recent(self.config.history_window);
        let raw = match self.call_agent(&system, history, text).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(
                    tenant_id = %tenant.id,
                    conversation_id = %conversation.id,
                    error = %e,
                    "Agent reply failed, conversation left unchanged"
                );
                return Err(PipelineError::Backend(e));
            }
        };
        let raw = if raw.trim().is_empty() {
            warn!(conversation_id = %conversation.id, "Agent returned an empty reply, using fallback");
            language.fallback_reply().to_string()
        } else {
            raw
        };

        // Step 6: actions. Without a provider id the order is keyed to the
        // conversation version this turn builds on.
        let extraction = actions::extract(&raw, language);
        let order = match &extraction.action {
            Some(ExtractedAction::CreateOrder(action)) => {
                let order_key = request
                    .event_id
                    .clone()
                    .unwrap_or_else(|| format!("turn:{}:{}", conversation.id, conversation.version));
                match with_timeout(
                    self.config.store_timeout,
                    "order insert",
                    self.orders.record(
                        tenant.id,
                        &request.customer_address,
                        action,
                        Some(order_key.as_str()),
                    ),
                )
                .await
                {
                    Ok(order) => OrderRecording::Recorded(order),
                    Err(e) => {
                        error!(
                            tenant_id = %tenant.id,
                            conversation_id = %conversation.id,
                            error = %e,
                            "Failed to record order, delivering reply anyway"
                        );
                        OrderRecording::Failed {
                            reason: e.to_string(),
                        }
                    }
                }
            }
            None => OrderRecording::None,
        };

        // Step 7: persist the turn
        let visible = extraction.visible;
        self.bounded(
            "conversation append",
            self.conversations.append(
                conversation.id,
                &[Message::customer(text), Message::assistant(visible.clone())],
                language,
            ),
        )
        .await?;

        if let Some(event_id) = request.event_id.as_deref() {
            let recorded = with_timeout(
                self.config.store_timeout,
                "processed event insert",
                self.db.record_processed_event(tenant.id, event_id),
            )
            .await;
            if let Err(e) = recorded {
                warn!(tenant_id = %tenant.id, event_id, error = %e, "Failed to record processed event");
            }
        }

        let media_url = catalog.media_for(&visible);
        info!(
            tenant_id = %tenant.id,
            conversation_id = %conversation.id,
            order_id = ?order.order().map(|o| o.id),
            has_media = media_url.is_some(),
            "Reply ready"
        );

        Ok(ProcessOutcome::Replied {
            tenant: Box::new(tenant),
            reply: Reply {
                text: visible,
                media_url,
                language,
                order,
            },
        })
    }

    async fn resolve_tenant(&self, tenant: &TenantRef) -> Result<Option<Tenant>, PipelineError> {
        let found = match tenant {
            TenantRef::Id(id) => self.bounded("tenant lookup", self.db.get_tenant(*id)).await?,
            TenantRef::Gateway { kind, routing_key } => {
                self.bounded(
                    "tenant lookup",
                    self.db.find_tenant_by_gateway(*kind, routing_key),
                )
                .await?
            }
        };
        Ok(found)
    }

    async fn call_agent(
        &self,
        system: &str,
        history: &[Message],
        utterance: &str,
    ) -> Result<String, LlmError> {
        let timeout = self.config.llm_timeout;
        tokio::time::timeout(timeout, self.agent.reply(system, history, utterance))
            .await
            .map_err(|_| LlmError::Timeout {
                provider: "agent".to_string(),
                timeout,
            })?
    }

    /// Bound a store call by the configured lookup timeout.
    async fn bounded<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = Result<T, DatabaseError>>,
    ) -> Result<T, PipelineError> {
        with_timeout(self.config.store_timeout, operation, fut)
            .await
            .map_err(PipelineError::Storage)
    }
}

async fn with_timeout<T, E: From<DatabaseError>>(
    timeout: Duration,
    operation: &str,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, E> {
    tokio::time::timeout(timeout, fut).await.map_err(|_| {
        E::from(DatabaseError::Timeout {
            operation: operation.to_string(),
            timeout,
        })
    })?
}
