//! WhatsApp Cloud API (Meta) gateway.

use async_trait::async_trait;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};

use super::gateway::{ChannelGateway, InboundEvent, OutboundMessage};
use crate::catalog::model::{GatewayBinding, GatewayKind};
use crate::config::MetaConfig;
use crate::error::ChannelError;

type HmacSha256 = Hmac<Sha256>;

const NAME: &str = "meta";
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
const BUSINESS_ACCOUNT_OBJECT: &str = "whatsapp_business_account";

// ── Webhook payload ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    object: String,
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    #[serde(default)]
    field: String,
    value: ChangeValue,
}

#[derive(Debug, Deserialize)]
struct ChangeValue {
    metadata: Option<Metadata>,
    #[serde(default)]
    messages: Vec<WaMessage>,
    #[serde(default)]
    statuses: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    phone_number_id: String,
}

#[derive(Debug, Deserialize)]
struct WaMessage {
    from: String,
    id: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    text: Option<TextBody>,
}

#[derive(Debug, Deserialize)]
struct TextBody {
    body: String,
}

// ── Gateway ─────────────────────────────────────────────────────────────

/// Meta Cloud API adapter. Send credentials come from each tenant's binding.
pub struct MetaGateway {
    config: MetaConfig,
    client: reqwest::Client,
}

impl MetaGateway {
    pub fn new(config: MetaConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Webhook subscription handshake. Returns the challenge to echo back
    /// when mode and token match.
    pub fn verify_subscription(
        &self,
        mode: Option<&str>,
        token: Option<&str>,
        challenge: Option<&str>,
    ) -> Option<String> {
        let expected = self.config.verify_token.as_ref()?;
        match (mode, token, challenge) {
            (Some("subscribe"), Some(token), Some(challenge))
                if token == expected.expose_secret() =>
            {
                Some(challenge.to_string())
            }
            _ => None,
        }
    }

    fn messages_url(&self, phone_number_id: &str) -> String {
        format!(
            "{}/{phone_number_id}/messages",
            self.config.graph_url.trim_end_matches('/')
        )
    }

    async fn post_message(&self, url: &str, token: &str, body: serde_json::Value) -> Result<(), ChannelError> {
        let resp = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: NAME.into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ChannelError::RateLimited { name: NAME.into() });
        }
        let detail = resp.text().await.unwrap_or_default();
        Err(ChannelError::SendFailed {
            name: NAME.into(),
            reason: format!("HTTP {status}: {detail}"),
        })
    }
}

/// Check `sha256=<hex>` against HMAC-SHA256 of the raw body.
pub fn verify_signature(body: &[u8], header: &str, app_secret: &str) -> bool {
    let Some(hex_sig) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[async_trait]
impl ChannelGateway for MetaGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Meta
    }

    fn verify_inbound(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), ChannelError> {
        let Some(secret) = self.config.app_secret.as_ref() else {
            return Ok(());
        };
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ChannelError::VerificationFailed {
                name: NAME.into(),
                reason: format!("missing {SIGNATURE_HEADER} header"),
            })?;
        if verify_signature(body, header, secret.expose_secret()) {
            Ok(())
        } else {
            Err(ChannelError::VerificationFailed {
                name: NAME.into(),
                reason: "signature mismatch".into(),
            })
        }
    }

    fn parse_inbound(&self, body: &[u8]) -> Result<Vec<InboundEvent>, ChannelError> {
        let payload: WebhookPayload = serde_json::from_slice(body)
            .map_err(|e| ChannelError::InvalidMessage(format!("meta webhook: {e}")))?;

        if !payload.object.is_empty() && payload.object != BUSINESS_ACCOUNT_OBJECT {
            debug!(object = %payload.object, "Ignoring non-WhatsApp webhook");
            return Ok(vec![]);
        }

        let mut events = Vec::new();
        for change in payload.entry.into_iter().flat_map(|e| e.changes) {
            if !change.field.is_empty() && change.field != "messages" {
                debug!(field = %change.field, "Ignoring non-message webhook change");
                continue;
            }
            let value = change.value;
            if !value.statuses.is_empty() {
                debug!(count = value.statuses.len(), "Ignoring delivery status update");
                continue;
            }
            let Some(metadata) = value.metadata else {
                warn!("Webhook change without metadata, skipping");
                continue;
            };

            for msg in value.messages {
                let text = match (msg.kind.as_str(), msg.text) {
                    ("text", Some(t)) if !t.body.trim().is_empty() => t.body,
                    (kind, _) => {
                        debug!(kind, from = %msg.from, "Ignoring non-text message");
                        continue;
                    }
                };
                events.push(InboundEvent {
                    routing_key: metadata.phone_number_id.clone(),
                    from: msg.from,
                    text,
                    event_id: msg.id,
                });
            }
        }
        Ok(events)
    }

    async fn send(
        &self,
        binding: &GatewayBinding,
        message: &OutboundMessage,
    ) -> Result<(), ChannelError> {
        let token = binding
            .access_token
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured {
                name: NAME.into(),
                reason: format!("no access token for phone number {}", binding.routing_key),
            })?;
        let url = self.messages_url(&binding.routing_key);

        self.post_message(
            &url,
            token.expose_secret(),
            serde_json::json!({
                "messaging_product": "whatsapp",
                "to": message.to,
                "type": "text",
                "text": {"body": message.text},
            }),
        )
        .await?;

        if let Some(link) = message.media_url.as_deref() {
            self.post_message(
                &url,
                token.expose_secret(),
                serde_json::json!({
                    "messaging_product": "whatsapp",
                    "to": message.to,
                    "type": "image",
                    "image": {"link": link},
                }),
            )
            .await?;
        }

        debug!(to = %message.to, media = message.media_url.is_some(), "Meta message sent");
        Ok(())
    }
}
