use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use tokio::time::{interval, Duration};

use ember_common::config::GenesisFile;
use ember_daemon::core::{blockchain::Blockchain, storage::SledStorage};

#[derive(Parser)]
#[command(name = "ember_daemon", about = "Ember chain daemon", version)]
struct Args {
    /// Path to the genesis JSON file
    #[arg(long, default_value = "genesis.json")]
    genesis: PathBuf,

    /// Directory for the chain database
    #[arg(long, default_value = "ember-db")]
    data_dir: PathBuf,

    /// Seconds between block production attempts; defaults to the
    /// configured block time
    #[arg(long)]
    block_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let raw = std::fs::read_to_string(&args.genesis)
        .with_context(|| format!("reading genesis file {}", args.genesis.display()))?;
    let genesis: GenesisFile = serde_json::from_str(&raw).context("parsing genesis file")?;

    let storage = SledStorage::open(&args.data_dir).context("opening chain database")?;
    let mut chain = Blockchain::new(genesis, storage)
        .await
        .map_err(|e| anyhow::anyhow!("chain bootstrap failed: {e}"))?;

    info!(
        "node up at height {} (tip {})",
        chain.tip_header().number,
        chain.tip_hash()
    );

    let block_time = args
        .block_interval
        .unwrap_or_else(|| chain.config().block_time.max(1));
    let mut ticker = interval(Duration::from_secs(block_time));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                chain.expire_pool();
                if chain.mempool().pending_count() == 0 {
                    continue;
                }
                match chain.produce_block(None).await {
                    Ok(block) => info!(
                        "block {} sealed with {} transactions",
                        block.number(),
                        block.transactions.len()
                    ),
                    Err(e) => error!("block production failed: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}
