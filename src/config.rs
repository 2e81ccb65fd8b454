//! Configuration types.
//!
//! Everything is read from environment variables. `AppConfig::from_lookup`
//! takes the lookup as a closure so tests never touch the process env.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};

const DEFAULT_DB_PATH: &str = "./data/storefront.db";
const DEFAULT_GRAPH_URL: &str = "https://graph.facebook.com/v21.0";
const DEFAULT_TWILIO_URL: &str = "https://api.twilio.com";

/// Tuning knobs for a single message-processing cycle.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Most recent messages sent to the backend as context.
    pub history_window: usize,
    /// Products rendered into the grounded catalog.
    pub max_catalog_products: usize,
    /// Bound on a single generative-backend call.
    pub llm_timeout: Duration,
    /// Bound on tenant and catalog lookups.
    pub store_timeout: Duration,
    /// Token budget for one reply.
    pub reply_max_tokens: u32,
    pub reply_temperature: f32,
    /// Attempts at an optimistic conversation append before giving up.
    pub append_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history_window: 20,
            max_catalog_products: 50,
            llm_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(5),
            reply_max_tokens: 512,
            reply_temperature: 0.7,
            append_retries: 5,
        }
    }
}

/// Meta (WhatsApp Cloud API) webhook settings.
#[derive(Debug, Clone)]
pub struct MetaConfig {
    pub verify_token: Option<SecretString>,
    /// When set, inbound POSTs must carry a valid `X-Hub-Signature-256`.
    pub app_secret: Option<SecretString>,
    pub graph_url: String,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            verify_token: None,
            app_secret: None,
            graph_url: DEFAULT_GRAPH_URL.to_string(),
        }
    }
}

/// Twilio WhatsApp settings.
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: SecretString,
    /// Public URL Twilio posts to; it is part of the signed payload.
    /// Derived from the request's `Host` header when unset.
    pub webhook_url: Option<String>,
    pub api_url: String,
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub db_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
    pub meta: MetaConfig,
    pub twilio: Option<TwilioConfig>,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind: SocketAddr =
            parse_or(&get, "STOREFRONT_BIND", SocketAddr::from(([0, 0, 0, 0], 8080)))?;
        let db_path = get("STOREFRONT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));
        let log_dir = get("STOREFRONT_LOG_DIR").map(PathBuf::from);

        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            history_window: parse_or(&get, "STOREFRONT_HISTORY_WINDOW", defaults.history_window)?,
            max_catalog_products: parse_or(
                &get,
                "STOREFRONT_MAX_CATALOG_PRODUCTS",
                defaults.max_catalog_products,
            )?,
            llm_timeout: Duration::from_secs(parse_or(
                &get,
                "STOREFRONT_LLM_TIMEOUT_SECS",
                defaults.llm_timeout.as_secs(),
            )?),
            store_timeout: Duration::from_secs(parse_or(
                &get,
                "STOREFRONT_STORE_TIMEOUT_SECS",
                defaults.store_timeout.as_secs(),
            )?),
            ..defaults
        };
        if pipeline.max_catalog_products == 0 {
            return Err(ConfigError::InvalidValue {
                key: "STOREFRONT_MAX_CATALOG_PRODUCTS".into(),
                message: "must be at least 1".into(),
            });
        }

        let backend: LlmBackend = parse_or(&get, "STOREFRONT_LLM_BACKEND", LlmBackend::Anthropic)?;
        let key_env = backend.api_key_env();
        let api_key = get(key_env).ok_or_else(|| ConfigError::MissingRequired {
            key: key_env.to_string(),
            hint: format!("export {key_env}=... for the {backend:?} backend"),
        })?;
        let llm = LlmConfig {
            backend,
            api_key: SecretString::from(api_key),
            model: get("STOREFRONT_MODEL").unwrap_or_else(|| backend.default_model().to_string()),
            base_url: get("STOREFRONT_LLM_BASE_URL"),
            timeout: pipeline.llm_timeout,
        };

        let meta = MetaConfig {
            verify_token: get("META_WEBHOOK_VERIFY_TOKEN").map(SecretString::from),
            app_secret: get("META_APP_SECRET").map(SecretString::from),
            graph_url: get("META_GRAPH_URL").unwrap_or_else(|| DEFAULT_GRAPH_URL.to_string()),
        };

        let twilio = match (get("TWILIO_ACCOUNT_SID"), get("TWILIO_AUTH_TOKEN")) {
            (Some(account_sid), Some(token)) => Some(TwilioConfig {
                account_sid,
                auth_token: SecretString::from(token),
                api_url: get("TWILIO_API_URL").unwrap_or_else(|| DEFAULT_TWILIO_URL.to_string()),
                webhook_url: get("TWILIO_WEBHOOK_URL"),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::MissingEnvVar("TWILIO_AUTH_TOKEN".into())),
            (None, Some(_)) => return Err(ConfigError::MissingEnvVar("TWILIO_ACCOUNT_SID".into())),
        };

        Ok(Self {
            bind,
            db_path,
            log_dir,
            llm,
            pipeline,
            meta,
            twilio,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(invalid(key)),
        None => Ok(default),
    }
}

fn invalid<E: std::fmt::Display>(key: &str) -> impl Fn(E) -> ConfigError + '_ {
    move |e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_with_only_api_key() {
        let config = load(&[("ANTHROPIC_API_KEY", "sk-ant-test")]).unwrap();
        assert_eq!(config.bind.port(), 8080);
        assert_eq!(config.db_path, PathBuf::from("./data/storefront.db"));
        assert_eq!(config.llm.backend, LlmBackend::Anthropic);
        assert_eq!(config.llm.api_key.expose_secret(), "sk-ant-test");
        assert_eq!(config.pipeline.history_window, 20);
        assert_eq!(config.pipeline.max_catalog_products, 50);
        assert_eq!(config.pipeline.llm_timeout, Duration::from_secs(30));
        assert!(config.twilio.is_none());
        assert!(config.meta.app_secret.is_none());
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn missing_api_key_names_the_variable() {
        let err = load(&[("STOREFRONT_LLM_BACKEND", "openai")]).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn invalid_number_is_reported() {
        let err = load(&[
            ("ANTHROPIC_API_KEY", "k"),
            ("STOREFRONT_HISTORY_WINDOW", "lots"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "STOREFRONT_HISTORY_WINDOW"));
    }

    #[test]
    fn zero_catalog_cap_is_rejected() {
        let err = load(&[
            ("ANTHROPIC_API_KEY", "k"),
            ("STOREFRONT_MAX_CATALOG_PRODUCTS", "0"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn twilio_requires_both_credentials() {
        let err = load(&[("ANTHROPIC_API_KEY", "k"), ("TWILIO_ACCOUNT_SID", "AC1")]).unwrap_err();
        assert!(err.to_string().contains("TWILIO_AUTH_TOKEN"));

        let config = load(&[
            ("ANTHROPIC_API_KEY", "k"),
            ("TWILIO_ACCOUNT_SID", "AC1"),
            ("TWILIO_AUTH_TOKEN", "tok"),
        ])
        .unwrap();
        let twilio = config.twilio.unwrap();
        assert_eq!(twilio.account_sid, "AC1");
        assert_eq!(twilio.api_url, "https://api.twilio.com");
        assert!(twilio.webhook_url.is_none());
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = load(&[("ANTHROPIC_API_KEY", "k"), ("STOREFRONT_MODEL", "  ")]).unwrap();
        assert_eq!(config.llm.model, LlmBackend::Anthropic.default_model());
    }
}
