use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use storefront_bot::agent::LlmAgent;
use storefront_bot::catalog::{CatalogGrounder, KeywordRanker};
use storefront_bot::channels::{
    GatewayRegistry, MetaGateway, TwilioGateway, WhatsAppState, whatsapp_routes,
};
use storefront_bot::config::AppConfig;
use storefront_bot::llm::create_provider;
use storefront_bot::orders::{OrderRouteState, order_routes};
use storefront_bot::pipeline::MessageProcessor;
use storefront_bot::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Config first: the log directory lives there
    let config = AppConfig::from_env().context("Failed to load configuration")?;

    // ── Tracing ─────────────────────────────────────────────────────────
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer().with_target(false);
    let (file_layer, _log_guard) = match config.log_dir.as_deref() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "storefront-bot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    eprintln!("🛍️  Storefront Bot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Backend: {} ({})", config.llm.backend, config.llm.model);
    eprintln!("   Database: {}", config.db_path.display());

    // ── Database ────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );

    // ── Pipeline ────────────────────────────────────────────────────────
    let llm = create_provider(&config.llm).context("Failed to create LLM provider")?;
    let pipeline = config.pipeline.clone();
    let agent = Arc::new(
        LlmAgent::new(llm)
            .with_history_window(pipeline.history_window)
            .with_max_tokens(pipeline.reply_max_tokens)
            .with_temperature(pipeline.reply_temperature),
    );
    let grounder = CatalogGrounder::new(
        Arc::clone(&db),
        Arc::new(KeywordRanker),
        pipeline.max_catalog_products,
    );
    let processor = Arc::new(MessageProcessor::new(
        Arc::clone(&db),
        grounder,
        agent,
        pipeline,
    ));

    // ── Gateways ────────────────────────────────────────────────────────
    let meta = Arc::new(MetaGateway::new(config.meta.clone()));
    let mut gateways = GatewayRegistry::new();
    gateways.register(meta.clone());
    if config.meta.verify_token.is_none() {
        eprintln!("   Meta: webhook handshake disabled (META_WEBHOOK_VERIFY_TOKEN unset)");
    }
    if config.meta.app_secret.is_none() {
        tracing::warn!("META_APP_SECRET unset, inbound Meta webhooks are not signature-checked");
    }
    match config.twilio.clone() {
        Some(twilio) => {
            eprintln!("   Twilio: enabled (account {})", twilio.account_sid);
            gateways.register(Arc::new(TwilioGateway::new(twilio)));
        }
        None => eprintln!("   Twilio: disabled"),
    }

    // ── HTTP ────────────────────────────────────────────────────────────
    let app = whatsapp_routes(WhatsAppState {
        db: Arc::clone(&db),
        processor,
        gateways,
        meta,
    })
    .merge(order_routes(OrderRouteState {
        db: Arc::clone(&db),
    }))
    .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    eprintln!("   Listening: http://{}\n", config.bind);
    tracing::info!(addr = %config.bind, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;

    Ok(())
}
