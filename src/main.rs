//! api-guard sample server.
//!
//! Serves a handful of guarded endpoints so the conventions can be
//! exercised end to end:
//!
//! ```text
//! GET  /status       → 200 ApiResponse with version
//! POST /echo         → 200 echo, or 400 ApiError with field details
//! GET  /items/{id}   → 200 item, or 404 ApiError
//! GET  /fail         → 500 from an error without status
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use api_guard::config::{self, RuntimeMode};
use api_guard::http::{handlers, structured_errors, HandlerGuard, HttpServer};
use api_guard::lifecycle::{signals, Shutdown};
use api_guard::Logger;

#[derive(Parser)]
#[command(name = "api-guard")]
#[command(about = "Sample API served through guarded handlers", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Deployment mode, overriding the file and APP_ENV.
    #[arg(short, long)]
    env: Option<String>,

    /// Write ApiError-shaped bodies instead of `{status, message}`.
    #[arg(long)]
    structured_errors: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => config::load_default()?,
    };
    if let Some(env) = cli.env {
        config.environment = RuntimeMode::from(env);
    }

    // No logging, no service.
    let logger = Logger::init(&config.logging, config.environment)?;
    logger.install_global()?;

    tracing::info!("api-guard v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.server.bind_address,
        environment = %config.environment,
        log_directory = %logger.directory().display(),
        "Configuration loaded"
    );

    let mut guard = HandlerGuard::new(logger.clone());
    if cli.structured_errors {
        guard = guard.format_error(structured_errors(config.environment));
    }

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    signals::spawn_signal_listener(&shutdown);

    let server = HttpServer::new(config, handlers::routes(&guard));
    let result = server.run(listener, shutdown.signalled()).await;

    tracing::info!("Shutdown complete");
    logger.shutdown();
    result?;
    Ok(())
}
