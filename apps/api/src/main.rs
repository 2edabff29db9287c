mod config;
mod conversation;
mod db;
mod errors;
mod geo;
mod llm_client;
mod matching;
mod messaging;
mod models;
mod routes;
mod scheduling;
mod state;
mod tenancy;
#[cfg(test)]
mod testing;
mod text;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::conversation::extract::ExtractorSet;
use crate::conversation::lock::{IdentityLock, LocalIdentityLock, RedisIdentityLock};
use crate::conversation::store::{ConversationStore, PgConversationRepository};
use crate::conversation::{ConversationEngine, EngineSettings};
use crate::db::create_pool;
use crate::llm_client::LlmClient;
use crate::matching::directory::PgStoreDirectory;
use crate::matching::StoreMatcher;
use crate::messaging::HttpMessageSender;
use crate::routes::build_router;
use crate::scheduling::calendar::{CalendarProvider, FakeCalendar, GoogleCalendar};
use crate::scheduling::repository::PgBookingRepository;
use crate::scheduling::Scheduler;
use crate::state::AppState;
use crate::tenancy::cache::TenantCache;
use crate::tenancy::directory::PgTenantDirectory;
use crate::tenancy::{MissPolicy, TenantResolver};

const TRANSPORT_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME").replace('-', "_"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting recruiter API v{} ({:?})",
        env!("CARGO_PKG_VERSION"),
        config.app_env
    );

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;

    // Initialize LLM client
    let llm_timeout = Duration::from_secs(config.llm_timeout_secs);
    let llm = LlmClient::new(config.anthropic_api_key.clone(), config.llm_model.clone(), llm_timeout)?;
    info!("LLM client initialized (model: {})", llm.model());

    // Calendar: real adapter when a token is configured, in-memory otherwise
    let calendar_timeout = Duration::from_secs(config.calendar_timeout_secs);
    let calendar: Arc<dyn CalendarProvider> = match &config.calendar_api_token {
        Some(token) => Arc::new(GoogleCalendar::new(
            config.calendar_api_url.clone(),
            token.clone(),
            calendar_timeout,
        )?),
        None => {
            warn!("CALENDAR_API_TOKEN not set, using in-memory calendar");
            Arc::new(FakeCalendar::new())
        }
    };
    let scheduler = Arc::new(Scheduler::new(
        calendar,
        Arc::new(PgBookingRepository::new(db.clone())),
        calendar_timeout,
    ));

    // Tenant resolution: fail closed in production
    let miss_policy = match (&config.default_tenant_id, config.app_env.is_production()) {
        (Some(tenant_id), false) => MissPolicy::DefaultTenant(tenant_id.clone()),
        (Some(_), true) => {
            warn!("DEFAULT_TENANT_ID ignored in production; unknown origins are rejected");
            MissPolicy::FailClosed
        }
        (None, _) => MissPolicy::FailClosed,
    };
    let tenants = Arc::new(TenantResolver::new(
        config.tenant_fallback_origins.clone(),
        Arc::new(PgTenantDirectory::new(db.clone())),
        Arc::new(TenantCache::new(Duration::from_secs(config.tenant_cache_ttl_secs))),
        miss_policy,
    ));

    // Per-identity lock: leases outlive the slowest possible turn
    let lease_ttl = llm_timeout + calendar_timeout * 3 + Duration::from_secs(10);
    let locks: Arc<dyn IdentityLock> = match &config.redis_url {
        Some(url) => {
            let lock = RedisIdentityLock::connect(url, lease_ttl, lease_ttl).await?;
            info!("Redis identity lock initialized");
            Arc::new(lock)
        }
        None => {
            info!("REDIS_URL not set, using in-process identity lock");
            Arc::new(LocalIdentityLock::new(lease_ttl))
        }
    };

    let store = ConversationStore::new(
        Arc::new(PgConversationRepository::new(db.clone())),
        config.conversation_idle_hours.map(chrono::Duration::hours),
    );
    let engine = ConversationEngine::new(
        tenants.clone(),
        store,
        locks,
        ExtractorSet::default(),
        StoreMatcher::new(Arc::new(PgStoreDirectory::new(db.clone()))),
        scheduler.clone(),
        Arc::new(llm),
        EngineSettings {
            default_max_distance_km: config.max_distance_km,
            days_ahead: config.scheduling_days_ahead,
            history_window: config.history_window,
            llm_timeout,
            ..Default::default()
        },
    );

    let sender = HttpMessageSender::new(
        config.transport_send_url.clone(),
        config.transport_api_token.clone(),
        TRANSPORT_TIMEOUT,
    )?;

    // Build app state
    let state = AppState {
        engine: Arc::new(engine),
        scheduler,
        tenants,
        sender: Arc::new(sender),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
