use cco::{build_router, AppState, ProviderRegistry, ProxyConfig, SharedLogger};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "cco",
    about = "LLM proxy server speaking the Anthropic Messages API — route Claude clients through any configured provider",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log file path
    #[arg(long, default_value = "cco.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cco=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        println!("  1. cco.toml (current directory)");
        if cfg!(target_os = "macos") {
            println!("  2. ~/Library/Application Support/cco/config.toml");
        } else {
            println!("  2. $XDG_CONFIG_HOME/cco/config.toml");
            println!("     ~/.config/cco/config.toml");
        }
        println!("  3. ~/.cco.toml");
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }

    let logger = SharedLogger::new(&cli.log_file)?;

    // Build the routing table eagerly so bad configs fail before bind
    let registry = ProviderRegistry::from_config(&config)?;

    info!("cco v{}", env!("CARGO_PKG_VERSION"));
    for entry in registry.entries() {
        info!(
            "  provider {} -> {} (prefixes: {})",
            entry.descriptor.name,
            entry.descriptor.api_base,
            entry.descriptor.model_prefixes.join(", ")
        );
    }
    info!("  port: {}", config.port);
    info!("  log file: {}", cli.log_file.display());
    if ProxyConfig::client_api_key().is_some() {
        info!("  client auth: enabled (CCO_API_KEY)");
    }

    logger.info(
        "startup",
        format!(
            "Starting cco port={} providers={}",
            config.port,
            registry.entries().len()
        ),
    );

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
        .build()?;

    let port = config.port;
    let bind_addr = format!("0.0.0.0:{port}");
    let state = Arc::new(AppState {
        config,
        registry,
        client,
        logger,
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("");
    info!("  To use with Claude Code:");
    info!("    ANTHROPIC_BASE_URL=http://localhost:{port} claude");
    info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
