// Prism server binary

use anyhow::Result;
use clap::Parser;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use prism::analyzer::HttpAnalyzer;
use prism::api::http::{router, AppState};
use prism::config::{Config, ConfigOptions};
use prism::memory::SqliteMemoryStore;
use prism::orchestrator::Orchestrator;

#[derive(Parser, Debug)]
#[command(name = "prism", about = "Multi-perspective requirement refinement engine")]
struct Cli {
    #[arg(long, env = "PRISM_LISTEN_ADDRESS")]
    listen_address: Option<String>,

    #[arg(long, env = "PRISM_STORE_URI")]
    store_uri: Option<String>,

    #[arg(long, env = "PRISM_ANALYZER_ENDPOINT")]
    analyzer_endpoint: Option<String>,

    #[arg(long, env = "PRISM_ANALYZER_API_KEY", hide_env_values = true)]
    analyzer_api_key: Option<String>,

    #[arg(long, env = "PRISM_ANALYZER_MODEL")]
    analyzer_model: Option<String>,

    #[arg(long, env = "PRISM_HISTORY_CONTEXT_LIMIT")]
    history_context_limit: Option<usize>,

    #[arg(long, env = "PRISM_ANALYZER_TIMEOUT_MS")]
    analyzer_timeout_ms: Option<u64>,

    #[arg(long, env = "PRISM_REQUEST_TIMEOUT_MS")]
    request_timeout_ms: Option<u64>,

    #[arg(long, env = "PRISM_RETRY_MAX_ATTEMPTS")]
    retry_max_attempts: Option<u32>,

    #[arg(long, env = "PRISM_RETRY_BASE_DELAY_MS")]
    retry_base_delay_ms: Option<u64>,

    #[arg(long, env = "PRISM_DUPLICATE_WINDOW")]
    duplicate_window: Option<usize>,
}

impl Cli {
    fn into_options(self) -> ConfigOptions {
        ConfigOptions {
            analyzer_endpoint: self.analyzer_endpoint,
            analyzer_api_key: self.analyzer_api_key,
            analyzer_model: self.analyzer_model,
            store_uri: self.store_uri,
            history_context_limit: self.history_context_limit,
            analyzer_timeout_ms: self.analyzer_timeout_ms,
            request_timeout_ms: self.request_timeout_ms,
            retry_max_attempts: self.retry_max_attempts,
            retry_base_delay_ms: self.retry_base_delay_ms,
            duplicate_window: self.duplicate_window,
            listen_address: self.listen_address,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::resolve(cli.into_options(), ConfigOptions::load_file());

    info!(store = %config.store_uri, "Connecting to memory store");
    let options = SqliteConnectOptions::from_str(&config.store_uri)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    let store = SqliteMemoryStore::new(pool).with_duplicate_window(config.duplicate_window);
    store.run_migrations().await?;

    let analyzer = HttpAnalyzer::new(
        &config.analyzer_endpoint,
        config.analyzer_api_key.clone(),
        &config.analyzer_model,
        Duration::from_millis(config.analyzer_timeout_ms),
    );
    if config.analyzer_api_key.is_none() {
        info!("No analyzer API key configured; requests will be unauthenticated");
    }

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(analyzer),
        Arc::new(store),
        config.engine_settings(),
    ));

    let app = router(AppState { orchestrator });
    let listener = tokio::net::TcpListener::bind(&config.listen_address).await?;
    info!("Server listening on http://{}", config.listen_address);
    axum::serve(listener, app).await?;

    Ok(())
}
