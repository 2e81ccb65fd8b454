//! WhatsApp webhook and simulation endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::gateway::{ChannelGateway, GatewayRegistry};
use super::inbound::handle_inbound;
use super::meta::MetaGateway;
use super::twilio;
use crate::catalog::model::GatewayKind;
use crate::language::Language;
use crate::pipeline::{MessageProcessor, ProcessOutcome, ProcessRequest, TenantRef};
use crate::store::Database;

/// Sender address used by the simulation endpoint when none is given.
const TEST_PHONE: &str = "+910000000000";

const EMPTY_TWIML: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response></Response>";

/// Shared state for the WhatsApp routes.
#[derive(Clone)]
pub struct WhatsAppState {
    pub db: Arc<dyn Database>,
    pub processor: Arc<MessageProcessor>,
    pub gateways: GatewayRegistry,
    pub meta: Arc<MetaGateway>,
}

/// Build the WhatsApp routes.
pub fn whatsapp_routes(state: WhatsAppState) -> Router {
    Router::new()
        .route("/api/whatsapp/webhook", get(verify_webhook).post(meta_webhook))
        .route(twilio::WEBHOOK_PATH, post(twilio_webhook))
        .route("/api/whatsapp/test-message", post(test_message))
        .route("/api/whatsapp/status/{tenant_id}", get(bot_status))
        .with_state(state)
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({"error": message.into()}))).into_response()
}

/// Verify, parse, and hand each event to a background task.
fn accept(
    state: &WhatsAppState,
    gateway: &dyn ChannelGateway,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<usize, Response> {
    if let Err(e) = gateway.verify_inbound(headers, body) {
        warn!(gateway = %gateway.kind(), error = %e, "Rejected inbound webhook");
        return Err(error_body(StatusCode::UNAUTHORIZED, "Verification failed"));
    }

    let events = match gateway.parse_inbound(body) {
        Ok(events) => events,
        Err(e) => {
            debug!(gateway = %gateway.kind(), error = %e, "Malformed webhook payload, acknowledging");
            return Ok(0);
        }
    };

    let count = events.len();
    let kind = gateway.kind();
    for event in events {
        let state = state.clone();
        tokio::spawn(async move {
            let disposition = handle_inbound(&state.processor, &state.gateways, kind, event).await;
            debug!(gateway = %kind, ?disposition, "Inbound event finished");
        });
    }
    Ok(count)
}

// ── Meta ────────────────────────────────────────────────────────────────

/// GET /api/whatsapp/webhook
///
/// Meta's `hub.challenge` subscription handshake.
async fn verify_webhook(
    State(state): State<WhatsAppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let challenge = state.meta.verify_subscription(
        params.get("hub.mode").map(String::as_str),
        params.get("hub.verify_token").map(String::as_str),
        params.get("hub.challenge").map(String::as_str),
    );
    match challenge {
        Some(challenge) => {
            info!("Meta webhook subscription verified");
            (StatusCode::OK, challenge).into_response()
        }
        None => (StatusCode::FORBIDDEN, "Forbidden").into_response(),
    }
}

/// POST /api/whatsapp/webhook
async fn meta_webhook(State(state): State<WhatsAppState>, headers: HeaderMap, body: Bytes) -> Response {
    let meta = Arc::clone(&state.meta);
    match accept(&state, meta.as_ref(), &headers, &body) {
        Ok(_) => Json(serde_json::json!({"status": "ok"})).into_response(),
        Err(resp) => resp,
    }
}

// ── Twilio ──────────────────────────────────────────────────────────────

/// POST /api/whatsapp/twilio
async fn twilio_webhook(State(state): State<WhatsAppState>, headers: HeaderMap, body: Bytes) -> Response {
    let Some(twilio) = state.gateways.get(GatewayKind::Twilio) else {
        return error_body(StatusCode::NOT_FOUND, "Twilio is not configured");
    };
    match accept(&state, twilio.as_ref(), &headers, &body) {
        Ok(_) => ([(header::CONTENT_TYPE, "text/xml")], EMPTY_TWIML).into_response(),
        Err(resp) => resp,
    }
}

// ── Simulation and status ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TestMessage {
    tenant_id: Option<String>,
    message: Option<String>,
    phone: Option<String>,
    language: Option<String>,
}

/// POST /api/whatsapp/test-message
///
/// Runs the pipeline directly, without a gateway, and returns the reply.
async fn test_message(State(state): State<WhatsAppState>, Json(body): Json<TestMessage>) -> Response {
    let message = body.message.unwrap_or_default();
    let Some(tenant_id) = body.tenant_id.filter(|id| !id.is_empty()) else {
        return error_body(StatusCode::BAD_REQUEST, "tenant_id and message required");
    };
    if message.trim().is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "tenant_id and message required");
    }
    let Ok(tenant_id) = Uuid::parse_str(&tenant_id) else {
        return error_body(StatusCode::BAD_REQUEST, "Invalid tenant ID");
    };

    let phone = body.phone.filter(|p| !p.is_empty()).unwrap_or_else(|| TEST_PHONE.to_string());
    let mut request = ProcessRequest::new(TenantRef::Id(tenant_id), phone, message);
    if let Some(tag) = body.language.as_deref() {
        request.language = Some(Language::parse_or_default(tag));
    }

    match state.processor.process(request).await {
        Ok(ProcessOutcome::Replied { reply, .. }) => Json(serde_json::json!({
            "reply": reply.text,
            "media_url": reply.media_url,
            "language": reply.language,
            "order": reply.order.order(),
        }))
        .into_response(),
        Ok(ProcessOutcome::UnknownTenant) => error_body(StatusCode::NOT_FOUND, "Tenant not found"),
        Ok(ProcessOutcome::BotInactive { .. }) => {
            error_body(StatusCode::CONFLICT, "Bot is not active for this tenant")
        }
        Ok(other) => Json(serde_json::json!({
            "reply": null,
            "media_url": null,
            "outcome": other.label(),
        }))
        .into_response(),
        Err(e) if e.is_retryable() => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": e.to_string(), "retryable": true})),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string(), "retryable": false})),
        )
            .into_response(),
    }
}

/// GET /api/whatsapp/status/{tenant_id}
async fn bot_status(State(state): State<WhatsAppState>, Path(tenant_id): Path<String>) -> Response {
    let Ok(tenant_id) = Uuid::parse_str(&tenant_id) else {
        return error_body(StatusCode::BAD_REQUEST, "Invalid tenant ID");
    };
    match state.db.get_tenant(tenant_id).await {
        Ok(Some(tenant)) => {
            let gateway = tenant.gateway.as_ref();
            Json(serde_json::json!({
                "active": tenant.bot_active,
                "whatsapp_configured": gateway.is_some(),
                "gateway": gateway.map(|g| g.kind),
                "routing_key": gateway.map(|g| g.routing_key.as_str()),
                "gateway_available": gateway.is_some_and(|g| state.gateways.get(g.kind).is_some()),
                "business_name": tenant.name,
            }))
            .into_response()
        }
        Ok(None) => error_body(StatusCode::NOT_FOUND, "Tenant not found"),
        Err(e) => {
            warn!(tenant_id = %tenant_id, error = %e, "Failed to load tenant");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load tenant")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use secrecy::SecretString;
    use tower::ServiceExt;

    use super::*;
    use crate::agent::ConversationalAgent;
    use crate::catalog::model::{GatewayBinding, Tenant};
    use crate::catalog::{CatalogGrounder, KeywordRanker};
    use crate::config::{MetaConfig, PipelineConfig};
    use crate::conversations::Message;
    use crate::error::LlmError;
    use crate::store::LibSqlBackend;

    struct FixedAgent(Result<&'static str, ()>);

    #[async_trait]
    impl ConversationalAgent for FixedAgent {
        async fn reply(&self, _system: &str, _history: &[Message], _utterance: &str) -> Result<String, LlmError> {
            self.0.map(str::to_string).map_err(|_| LlmError::RequestFailed {
                provider: "mock".into(),
                reason: "down".into(),
            })
        }
    }

    async fn app(agent: FixedAgent) -> (Router, Arc<dyn Database>, Tenant) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let tenant = Tenant::new("Shop").with_gateway(GatewayBinding {
            kind: GatewayKind::Meta,
            routing_key: "PN1".into(),
            access_token: None,
        });
        db.insert_tenant(&tenant).await.unwrap();

        let config = PipelineConfig::default();
        let grounder = CatalogGrounder::new(db.clone(), Arc::new(KeywordRanker), config.max_catalog_products);
        let processor = Arc::new(MessageProcessor::new(db.clone(), grounder, Arc::new(agent), config));
        let meta = Arc::new(MetaGateway::new(MetaConfig {
            verify_token: Some(SecretString::from("tok")),
            app_secret: Some(SecretString::from("s3cret")),
            ..MetaConfig::default()
        }));
        let mut gateways = GatewayRegistry::new();
        gateways.register(meta.clone());

        let router = whatsapp_routes(WhatsAppState {
            db: db.clone(),
            processor,
            gateways,
            meta,
        });
        (router, db, tenant)
    }

    async fn read_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap_or_default()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn handshake_echoes_challenge() {
        let (router, _, _) = app(FixedAgent(Ok("hi"))).await;
        let ok = Request::get("/api/whatsapp/webhook?hub.mode=subscribe&hub.verify_token=tok&hub.challenge=42")
            .body(Body::empty())
            .unwrap();
        let resp = router.clone().oneshot(ok).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"42");

        let bad = Request::get("/api/whatsapp/webhook?hub.mode=subscribe&hub.verify_token=nope&hub.challenge=42")
            .body(Body::empty())
            .unwrap();
        assert_eq!(router.oneshot(bad).await.unwrap().status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unsigned_webhook_is_rejected() {
        let (router, _, _) = app(FixedAgent(Ok("hi"))).await;
        let resp = router
            .oneshot(post_json("/api/whatsapp/webhook", serde_json::json!({"entry": []})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signed_webhook_is_processed_in_background() {
        use hmac::{Hmac, Mac};

        let (router, db, tenant) = app(FixedAgent(Ok("Namaste!"))).await;
        let body = serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{"changes": [{"field": "messages", "value": {
                "metadata": {"phone_number_id": "PN1"},
                "messages": [{"from": "919811111111", "id": "wamid.9", "type": "text", "text": {"body": "hello"}}]
            }}]}]
        })
        .to_string();
        let mut mac = Hmac::<sha2::Sha256>::new_from_slice(b"s3cret").unwrap();
        mac.update(body.as_bytes());
        let sig = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

        let req = Request::post("/api/whatsapp/webhook")
            .header("content-type", "application/json")
            .header("x-hub-signature-256", sig)
            .body(Body::from(body))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(read_json(resp).await["status"], "ok");

        let mut persisted = 0;
        for _ in 0..100 {
            if let Some(conv) = db.find_conversation(tenant.id, "919811111111").await.unwrap() {
                persisted = conv.messages.len();
                if persisted == 2 {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(persisted, 2);
    }

    #[tokio::test]
    async fn test_message_validates_input() {
        let (router, _, _) = app(FixedAgent(Ok("hi"))).await;

        let resp = router
            .clone()
            .oneshot(post_json("/api/whatsapp/test-message", serde_json::json!({"message": "hi"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = router
            .oneshot(post_json(
                "/api/whatsapp/test-message",
                serde_json::json!({"tenant_id": Uuid::new_v4(), "message": "hi"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_message_returns_reply() {
        let (router, _, tenant) = app(FixedAgent(Ok("Hello from Shop"))).await;
        let resp = router
            .oneshot(post_json(
                "/api/whatsapp/test-message",
                serde_json::json!({"tenant_id": tenant.id, "message": "hi", "language": "Hindi"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = read_json(resp).await;
        assert_eq!(body["reply"], "Hello from Shop");
        assert_eq!(body["language"], "Hindi");
        assert!(body["order"].is_null());
    }

    #[tokio::test]
    async fn backend_failure_is_retryable_503() {
        let (router, _, tenant) = app(FixedAgent(Err(()))).await;
        let resp = router
            .oneshot(post_json(
                "/api/whatsapp/test-message",
                serde_json::json!({"tenant_id": tenant.id, "message": "hi"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(read_json(resp).await["retryable"], true);
    }

    #[tokio::test]
    async fn status_reports_binding() {
        let (router, _, tenant) = app(FixedAgent(Ok("hi"))).await;
        let req = Request::get(format!("/api/whatsapp/status/{}", tenant.id))
            .body(Body::empty())
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = read_json(resp).await;
        assert_eq!(body["active"], true);
        assert_eq!(body["gateway"], "meta");
        assert_eq!(body["routing_key"], "PN1");
        assert_eq!(body["gateway_available"], true);

        let req = Request::get(format!("/api/whatsapp/status/{}", Uuid::new_v4()))
            .body(Body::empty())
            .unwrap();
        assert_eq!(router.oneshot(req).await.unwrap().status(), StatusCode::NOT_FOUND);
    }
}
