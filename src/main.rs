use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use perp_pilot::config::{BotConfig, TradeMode};
use perp_pilot::controller::Controller;
use perp_pilot::exchange::{ExchangeClient, DEFAULT_BASE_URL};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Exchange API key
    #[arg(long, env = "PIONEX_API_KEY")]
    api_key: String,

    /// Exchange API secret
    #[arg(long, env = "PIONEX_API_SECRET", hide_env_values = true)]
    api_secret: String,

    /// Exchange API base URL
    #[arg(long, env = "PIONEX_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Path to a JSON config file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pairs to trade (comma-separated), overriding the config file
    #[arg(short, long)]
    pairs: Option<String>,

    /// Dispatch real orders instead of the default dry run
    #[arg(long)]
    live: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("perp_pilot=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => BotConfig::from_file(path)?,
        None => BotConfig::default(),
    };

    if let Some(pairs) = &args.pairs {
        config.pairs = pairs.split(',').map(|p| p.trim().to_string()).collect();
    }
    if args.live {
        config.mode = TradeMode::Live;
    }
    config.validate()?;

    info!("Starting perp-pilot");
    info!("Pairs: {}", config.pairs.join(", "));
    info!("Interval: {} / poll every {}s", config.interval, config.poll_secs);
    info!("Mode: {}", config.mode);
    if config.mode == TradeMode::Live {
        warn!("LIVE mode: orders will be dispatched to the exchange");
    }

    let client = ExchangeClient::new(args.api_key, args.api_secret, args.base_url);
    let mut controller = Controller::new(config, client);

    // Ctrl-C requests a cooperative stop, honored between ticks
    let stop = controller.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stop requested, finishing current tick");
            stop.stop();
        }
    });

    controller.run().await
}
