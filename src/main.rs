//! StrideChain Node
//!
//! Opens the ledger, runs the batching loop and logs ledger events.
//! Requests arrive as JSON lines on stdin and are answered on stdout; logs go
//! to stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stridechain::{
    attestation::AttestationVerifier,
    config::NodeConfig,
    events::EventCursor,
    ingress,
    ledger::{Ledger, LedgerStore},
    rewards::{MintCapability, RewardEngine},
    service::{ActivityService, MemoryObjectStore, ObjectStore, ServiceSettings},
    staking::StakeManager,
    types::{now_millis, Address},
};

/// How often pending claims past their deadline are expired
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

struct Args {
    config: PathBuf,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        config: PathBuf::from("stridechain.toml"),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if let Some(path) = args.get(i) {
                    parsed.config = PathBuf::from(path);
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => warn!("ignoring unknown argument {other}"),
        }
        i += 1;
    }
    parsed
}

fn print_help() {
    println!("StrideChain Node");
    println!();
    println!("USAGE:");
    println!("    stridechain-node [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <PATH>    Config file (default: stridechain.toml)");
    println!("    -h, --help             Print help");
    println!();
    println!("INPUT:");
    println!("    One JSON request per stdin line, e.g. the output of");
    println!("    `stridechain-cli sign-claim`. One JSON reply per line on stdout.");
    println!();
    println!("ENVIRONMENT:");
    println!("    STRIDE_DATA_DIR        Overrides data_dir");
    println!("    STRIDE_AUTHORITY       Overrides authority_key");
    println!("    RUST_LOG               Log filter (default: info)");
}

fn open_ledger(config: &NodeConfig) -> anyhow::Result<Ledger> {
    let authority = config.authority_keypair()?;
    let authority_key = *authority.public_key();
    info!(authority = %Address::from_public_key(&authority_key), "authority loaded");

    let mint = MintCapability::grant(&authority, &authority_key)?;
    let ledger = Ledger::new(
        config.ledger.clone(),
        RewardEngine::new(config.rewards.clone(), authority_key),
        StakeManager::new(config.staking.clone(), authority_key),
        mint,
    )?;

    let path = config.ledger_path();
    let store = LedgerStore::open(&path).with_context(|| format!("opening ledger at {}", path.display()))?;
    let ledger = ledger.with_store(store)?;

    if ledger.is_empty() {
        let allocations = config.genesis_allocations()?;
        if !allocations.is_empty() {
            ledger.allocate_genesis(&allocations, now_millis())?;
        }
    }
    Ok(ledger)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    info!("StrideChain node v{}", stridechain::VERSION);

    let args = parse_args();
    let config = NodeConfig::load(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;

    let ledger = Arc::new(open_ledger(&config)?);
    let verifier = AttestationVerifier::new(config.attestation.clone(), config.witness_registry()?);
    let objects: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
    let settings = ServiceSettings {
        validation: config.validation.clone(),
        batch: config.batch.clone(),
        store_timeout: Duration::from_millis(config.store.timeout_ms),
    };

    let (service, tasks) = ActivityService::start(Arc::clone(&ledger), verifier, Some(objects), settings);
    info!(
        entries = ledger.len(),
        tip = %ledger.tip(),
        policy = ?config.ledger.batch_policy,
        "node running"
    );

    let mut events = service.subscribe(EventCursor::Tip)?;
    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
    let mut requests = BufReader::new(tokio::io::stdin()).lines();
    let mut ingress_open = true;

    loop {
        tokio::select! {
            Some(event) = events.next() => {
                info!(
                    offset = event.offset,
                    entry = event.entry_index,
                    account = %event.account,
                    event = event.kind.name(),
                    "ledger event"
                );
            }
            line = requests.next_line(), if ingress_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    let reply = ingress::handle_line(&service, &line).await;
                    println!("{}", serde_json::to_string(&reply)?);
                }
                Ok(None) => {
                    info!("stdin closed, no more requests");
                    ingress_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "reading requests failed");
                    ingress_open = false;
                }
            },
            _ = sweep.tick() => {
                let expired = service.sweep_expired().await;
                if !expired.is_empty() {
                    info!(count = expired.len(), "expired pending claims");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    service.shutdown().await;
    if let Err(e) = tasks.batcher.await {
        warn!(error = %e, "batcher task failed");
    }
    tasks.settlements.abort();
    ledger.flush()?;
    info!(entries = ledger.len(), tip = %ledger.tip(), "ledger flushed");
    Ok(())
}
