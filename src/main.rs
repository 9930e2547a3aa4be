use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use envgate::auth::{PermissiveUrlCheck, StaticTokenVerifier};
use envgate::config::Settings;
use envgate::registry::EndpointRegistry;
use envgate::Gateway;

/// envgate — environment-aware reverse proxy gateway
#[derive(Parser)]
#[command(name = "envgate", version, about)]
struct Cli {
    /// Path to the settings file
    #[arg(short, long, default_value = "environments/settings.json")]
    config: String,

    /// Root directory of endpoint definitions
    #[arg(short, long, default_value = "endpoints")]
    endpoints: String,

    /// Path to the bearer-token file (token → username JSON map)
    #[arg(short, long)]
    tokens: Option<String>,

    /// Override listen address (e.g., 0.0.0.0:8080)
    #[arg(short, long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> envgate::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    tracing::info!("envgate v{}", env!("CARGO_PKG_VERSION"));

    let mut settings = Settings::from_file(&cli.config).await?;
    if let Some(listen) = &cli.listen {
        settings.listen.address = listen.clone();
    }

    let registry = EndpointRegistry::load(&cli.endpoints)?;
    for name in registry.names() {
        tracing::debug!(endpoint = name, "Registered endpoint");
    }

    let verifier = match &cli.tokens {
        Some(path) => StaticTokenVerifier::from_file(path)?,
        None => {
            tracing::warn!("No token file configured, every request will be rejected");
            StaticTokenVerifier::deny_all()
        }
    };

    let gateway = Gateway::new(
        settings,
        registry,
        Arc::new(verifier),
        Arc::new(PermissiveUrlCheck),
    )?;
    gateway.start().await?;

    tracing::info!("Gateway ready — press Ctrl+C to stop");
    gateway.wait_for_shutdown().await;

    Ok(())
}
