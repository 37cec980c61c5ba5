use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use policy_gateway::gateway::http::{GatewayHttpState, router};
use policy_gateway::gateway::ledger::CostLedger;
use policy_gateway::{Gateway, GatewayConfig, MemoryLedger, OpenAiCompatibleProvider};

#[derive(Parser, Debug)]
#[command(name = "policy-gateway")]
#[command(about = "Sanitize, route and budget AI model calls over HTTP", long_about = None)]
struct Cli {
    /// Gateway config (TOML, or JSON by `.json` extension)
    #[arg(short, long, env = "POLICY_GATEWAY_CONFIG")]
    config: PathBuf,

    #[arg(long, env = "POLICY_GATEWAY_LISTEN", default_value = "127.0.0.1:8080")]
    listen: String,

    /// Persist the cost ledger to this SQLite file instead of memory
    #[arg(long)]
    sqlite: Option<PathBuf>,

    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;

    let config = GatewayConfig::load(&cli.config).await?;
    let provider = Arc::new(OpenAiCompatibleProvider::from_config(&config.provider)?);
    let ledger = open_ledger(cli.sqlite).await?;
    let gateway = Gateway::new(config, provider, ledger)?;

    let app = router(GatewayHttpState::new(gateway));
    let listener = tokio::net::TcpListener::bind(&cli.listen).await?;
    println!("policy-gateway listening on {}", cli.listen);
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing(json_logs: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let fmt_layer = if json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(false).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

#[cfg(feature = "gateway-store-sqlite")]
async fn open_ledger(
    path: Option<PathBuf>,
) -> Result<Arc<dyn CostLedger>, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let ledger = policy_gateway::gateway::sqlite_store::SqliteLedger::new(path);
            ledger.init().await?;
            tracing::info!(path = %ledger.path().display(), "sqlite cost ledger ready");
            Ok(Arc::new(ledger))
        }
        None => Ok(Arc::new(MemoryLedger::new())),
    }
}

#[cfg(not(feature = "gateway-store-sqlite"))]
async fn open_ledger(
    path: Option<PathBuf>,
) -> Result<Arc<dyn CostLedger>, Box<dyn std::error::Error>> {
    if path.is_some() {
        return Err("--sqlite requires the gateway-store-sqlite feature".into());
    }
    Ok(Arc::new(MemoryLedger::new()))
}
