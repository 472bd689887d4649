//! xray service
//!
//! Serves the record API over an in-memory store, or (with `demo`) records a
//! sample decision trail and prints it.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use xray_http::{create_router, AppState, HttpServer, MiddlewareConfig};
use xray_store::{MemoryStore, StoreConfig};

mod demo;

#[derive(Parser, Debug)]
#[command(name = "xray-service")]
#[command(about = "Decision trail recording API")]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Bind address (host:port or port)
    #[arg(short, long, env = "XRAY_BIND", default_value = xray_http::server::DEFAULT_BIND)]
    bind: String,

    /// Disable CORS
    #[arg(long)]
    no_cors: bool,

    /// Allowed CORS origin; repeat for several. Any origin when omitted.
    #[arg(long = "cors-origin")]
    cors_origins: Vec<String>,

    /// Per-request timeout
    #[arg(long, env = "XRAY_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,

    /// Emit logs as JSON lines
    #[arg(long, env = "XRAY_LOG_JSON")]
    log_json: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Record a sample competitor-selection trail and print it
    Demo {
        /// Record against a running API instead of an in-process store
        #[arg(long, env = "XRAY_API_URL")]
        api_url: Option<String>,

        /// Minimum rating kept by the filter step
        #[arg(long, default_value_t = 4.0)]
        min_rating: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from /etc/xray/environment or .env (if present)
    let env_file = xray_core::config::load_environment();

    let args = Args::parse();
    init_tracing(args.log_json)?;
    if let Some(path) = env_file {
        info!("Loaded environment from {}", path);
    }

    if let Some(Commands::Demo {
        api_url,
        min_rating,
    }) = args.command
    {
        let execution = demo::run(api_url, min_rating).await?;
        println!("{}", serde_json::to_string_pretty(&execution)?);
        return Ok(());
    }

    info!("Starting xray service...");

    let store_config = StoreConfig::from_env();
    info!(
        default_limit = store_config.default_list_limit,
        max_limit = store_config.max_list_limit,
        "Using in-memory record store"
    );
    let store = Arc::new(MemoryStore::with_config(store_config));
    let state = Arc::new(AppState::new(store)?);

    let mut middleware = MiddlewareConfig::default()
        .cors(!args.no_cors)
        .timeout(Duration::from_secs(args.request_timeout_secs));
    if !args.cors_origins.is_empty() {
        middleware = middleware.cors_origins(args.cors_origins.clone());
    }

    let server = HttpServer::builder()
        .bind(&args.bind)
        .router(create_router(state))
        .middleware(middleware)
        .build()?;

    server.serve(shutdown_signal()).await?;
    Ok(())
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("xray_service=info".parse()?)
        .add_directive("xray_http=info".parse()?)
        .add_directive("xray_store=info".parse()?)
        .add_directive("xray_tracker=info".parse()?)
        .add_directive("tower_http=debug".parse()?);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
