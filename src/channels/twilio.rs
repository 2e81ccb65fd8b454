//! Twilio WhatsApp gateway.
//!
//! Inbound webhooks are form-encoded and signed with `X-Twilio-Signature`.
//! Tenants are routed by the `To` address; replies go out through the
//! account-wide REST credentials.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::HeaderMap;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use sha1::Sha1;
use tracing::debug;

use super::gateway::{ChannelGateway, InboundEvent, OutboundMessage};
use crate::catalog::model::{GatewayBinding, GatewayKind};
use crate::config::TwilioConfig;
use crate::error::ChannelError;

const NAME: &str = "twilio";

/// Route Twilio is configured to post inbound messages to.
pub const WEBHOOK_PATH: &str = "/api/whatsapp/twilio";

pub const SIGNATURE_HEADER: &str = "x-twilio-signature";

type HmacSha1 = Hmac<Sha1>;

fn form_fields(body: &[u8]) -> HashMap<String, String> {
    url::form_urlencoded::parse(body).into_owned().collect()
}

/// MAC over the webhook URL followed by every POST parameter as
/// `name` + `value`, sorted by name.
fn signature_mac(auth_token: &str, url: &str, body: &[u8]) -> Option<HmacSha1> {
    let mut params: Vec<(String, String)> =
        url::form_urlencoded::parse(body).into_owned().collect();
    params.sort();

    let mut mac = HmacSha1::new_from_slice(auth_token.as_bytes()).ok()?;
    mac.update(url.as_bytes());
    for (name, value) in &params {
        mac.update(name.as_bytes());
        mac.update(value.as_bytes());
    }
    Some(mac)
}

/// Base64 `X-Twilio-Signature` value for a request.
pub fn sign(auth_token: &str, url: &str, body: &[u8]) -> Option<String> {
    let mac = signature_mac(auth_token, url, body)?;
    Some(BASE64.encode(mac.finalize().into_bytes()))
}

/// Check a signature header value in constant time.
pub fn verify_signature(auth_token: &str, url: &str, body: &[u8], header: &str) -> bool {
    let Ok(expected) = BASE64.decode(header.trim()) else {
        return false;
    };
    signature_mac(auth_token, url, body).is_some_and(|mac| mac.verify_slice(&expected).is_ok())
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub struct TwilioGateway {
    config: TwilioConfig,
    client: reqwest::Client,
}

impl TwilioGateway {
    pub fn new(config: TwilioConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.api_url.trim_end_matches('/'),
            self.config.account_sid
        )
    }

    /// The URL Twilio signed: the configured one, else rebuilt from the
    /// forwarding and `Host` headers.
    fn signed_url(&self, headers: &HeaderMap) -> Option<String> {
        if let Some(url) = self.config.webhook_url.as_deref() {
            return Some(url.to_string());
        }
        let host = header(headers, "x-forwarded-host").or_else(|| header(headers, "host"))?;
        let scheme = header(headers, "x-forwarded-proto").unwrap_or("https");
        Some(format!("{scheme}://{host}{WEBHOOK_PATH}"))
    }
}

#[async_trait]
impl ChannelGateway for TwilioGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Twilio
    }

    /// The request must carry a valid `X-Twilio-Signature` and name our
    /// account.
    fn verify_inbound(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), ChannelError> {
        let fail = |reason: &str| ChannelError::VerificationFailed {
            name: NAME.into(),
            reason: reason.into(),
        };

        let signature = header(headers, SIGNATURE_HEADER).ok_or_else(|| fail("missing signature"))?;
        let url = self
            .signed_url(headers)
            .ok_or_else(|| fail("cannot determine webhook URL"))?;
        if !verify_signature(self.config.auth_token.expose_secret(), &url, body, signature) {
            return Err(fail("invalid signature"));
        }

        match form_fields(body).get("AccountSid") {
            Some(sid) if *sid == self.config.account_sid => Ok(()),
            Some(_) => Err(fail("AccountSid mismatch")),
            None => Err(fail("missing AccountSid")),
        }
    }

    fn parse_inbound(&self, body: &[u8]) -> Result<Vec<InboundEvent>, ChannelError> {
        let mut fields = form_fields(body);
        let (Some(from), Some(to)) = (fields.remove("From"), fields.remove("To")) else {
            return Err(ChannelError::InvalidMessage(
                "twilio webhook: missing From or To".into(),
            ));
        };
        let text = fields.remove("Body").unwrap_or_default();
        if text.trim().is_empty() {
            let media = fields.get("NumMedia").map(String::as_str).unwrap_or("0");
            debug!(from = %from, num_media = media, "Ignoring non-text Twilio message");
            return Ok(vec![]);
        }
        Ok(vec![InboundEvent {
            routing_key: to,
            from,
            text,
            event_id: fields.remove("MessageSid"),
        }])
    }

    async fn send(
        &self,
        binding: &GatewayBinding,
        message: &OutboundMessage,
    ) -> Result<(), ChannelError> {
        let mut form = vec![
            ("From", binding.routing_key.as_str()),
            ("To", message.to.as_str()),
            ("Body", message.text.as_str()),
        ];
        if let Some(media) = message.media_url.as_deref() {
            form.push(("MediaUrl", media));
        }

        let resp = self
            .client
            .post(self.messages_url())
            .basic_auth(
                &self.config.account_sid,
                Some(self.config.auth_token.expose_secret()),
            )
            .form(&form)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: NAME.into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ChannelError::RateLimited { name: NAME.into() });
        }
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: NAME.into(),
                reason: format!("HTTP {status}: {detail}"),
            });
        }
        debug!(to = %message.to, media = message.media_url.is_some(), "Twilio message sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::Uri;
    use axum::routing::post;
    use axum::{Json, Router};
    use secrecy::SecretString;

    use super::*;

    fn gateway(api_url: &str) -> TwilioGateway {
        TwilioGateway::new(TwilioConfig {
            account_sid: "AC123".into(),
            auth_token: SecretString::from("secret"),
            webhook_url: None,
            api_url: api_url.into(),
        })
    }

    fn signed_headers(url: &str, body: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            sign("secret", url, body.as_bytes()).unwrap().parse().unwrap(),
        );
        headers
    }

    const INBOUND: &str = "SmsMessageSid=SM1&NumMedia=0&ProfileName=Asha&MessageSid=SM1\
        &AccountSid=AC123&From=whatsapp%3A%2B919800000001&To=whatsapp%3A%2B14155238886\
        &Body=Kya+dinner+set+hai%3F";

    #[test]
    fn parses_form_payload() {
        let events = gateway("http://unused").parse_inbound(INBOUND.as_bytes()).unwrap();
        assert_eq!(
            events,
            vec![InboundEvent {
                routing_key: "whatsapp:+14155238886".into(),
                from: "whatsapp:+919800000001".into(),
                text: "Kya dinner set hai?".into(),
                event_id: Some("SM1".into()),
            }]
        );
    }

    #[test]
    fn media_only_is_dropped() {
        let body = "From=whatsapp%3A%2B1&To=whatsapp%3A%2B2&Body=&NumMedia=1&AccountSid=AC123";
        assert!(gateway("http://unused").parse_inbound(body.as_bytes()).unwrap().is_empty());
        assert!(gateway("http://unused").parse_inbound(b"Body=hi").is_err());
    }

    #[test]
    fn signature_matches_twilio_reference() {
        // Worked example from Twilio's webhook security documentation.
        let body = "CallSid=CA1234567890ABCDE&Caller=%2B12349013030&Digits=1234\
            &From=%2B12349013030&To=%2B18005551212";
        assert_eq!(
            sign(
                "12345",
                "https://mycompany.com/myapp.php?foo=1&bar=2",
                body.as_bytes()
            )
            .as_deref(),
            Some("0/KCTR6DLpKmkAf8muzZqo1nDgQ=")
        );
    }

    #[test]
    fn signed_request_is_accepted() {
        let mut g = gateway("http://unused");
        g.config.webhook_url = Some("https://shop.example/api/whatsapp/twilio".into());
        let headers = signed_headers("https://shop.example/api/whatsapp/twilio", INBOUND);
        assert!(g.verify_inbound(&headers, INBOUND.as_bytes()).is_ok());
    }

    #[test]
    fn url_is_rebuilt_from_forwarding_headers() {
        let g = gateway("http://unused");
        let mut headers = signed_headers("https://shop.example/api/whatsapp/twilio", INBOUND);
        headers.insert("host", "10.0.0.5:8080".parse().unwrap());
        headers.insert("x-forwarded-host", "shop.example".parse().unwrap());
        assert!(g.verify_inbound(&headers, INBOUND.as_bytes()).is_ok());

        headers.remove("x-forwarded-host");
        assert!(g.verify_inbound(&headers, INBOUND.as_bytes()).is_err());
    }

    #[test]
    fn tampered_or_unsigned_request_is_rejected() {
        let mut g = gateway("http://unused");
        let url = "https://shop.example/api/whatsapp/twilio";
        g.config.webhook_url = Some(url.into());

        let headers = signed_headers(url, INBOUND);
        let tampered = INBOUND.replace("Kya+dinner+set+hai%3F", "Order+100+sets");
        assert!(g.verify_inbound(&headers, tampered.as_bytes()).is_err());
        assert!(g.verify_inbound(&HeaderMap::new(), INBOUND.as_bytes()).is_err());

        // A valid signature over a foreign account is still refused.
        let foreign = INBOUND.replace("AC123", "ACother");
        let headers = signed_headers(url, &foreign);
        assert!(g.verify_inbound(&headers, foreign.as_bytes()).is_err());
    }

    type Captured = Arc<Mutex<Vec<(String, Option<String>, HashMap<String, String>)>>>;

    async fn capture(
        State(seen): State<Captured>,
        uri: Uri,
        headers: HeaderMap,
        body: String,
    ) -> Json<serde_json::Value> {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        seen.lock()
            .unwrap()
            .push((uri.path().to_string(), auth, form_fields(body.as_bytes())));
        Json(serde_json::json!({"sid": "SM2"}))
    }

    #[tokio::test]
    async fn sends_with_basic_auth_and_media() {
        let seen: Captured = Arc::default();
        let app = Router::new()
            .route("/{*path}", post(capture))
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let g = gateway(&format!("http://{addr}"));
        let binding = GatewayBinding {
            kind: GatewayKind::Twilio,
            routing_key: "whatsapp:+14155238886".into(),
            access_token: None,
        };
        let msg = OutboundMessage {
            to: "whatsapp:+919800000001".into(),
            text: "Your order is placed".into(),
            media_url: Some("https://cdn.example/set.jpg".into()),
        };
        g.send(&binding, &msg).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (path, auth, form) = &seen[0];
        assert_eq!(path, "/2010-04-01/Accounts/AC123/Messages.json");
        // base64("AC123:secret")
        assert_eq!(auth.as_deref(), Some("Basic QUMxMjM6c2VjcmV0"));
        assert_eq!(form["From"], "whatsapp:+14155238886");
        assert_eq!(form["To"], "whatsapp:+919800000001");
        assert_eq!(form["Body"], "Your order is placed");
        assert_eq!(form["MediaUrl"], "https://cdn.example/set.jpg");
    }
}
