use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::MigrationHarness;
use futures::future::join_all;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

use trove_indexer::aggregator::TimeSampleAggregator;
use trove_indexer::backfill::EventIndexer;
use trove_indexer::config::Config;
use trove_indexer::db::{ConflictPolicy, PgStore, Store, MIGRATIONS};
use trove_indexer::gateway::rpc::RpcGateway;
use trove_indexer::gateway::ChainGateway;
use trove_indexer::logging::LogSink;
use trove_indexer::price::PriceResolver;
use trove_indexer::protocol::AdapterRegistry;
use trove_indexer::router::{create_router, AppState};
use trove_indexer::snapshot::SnapshotSync;

#[derive(Parser, Debug)]
#[command(name = "trove-indexer")]
#[command(about = "Indexes Liquity v2 deployments and serves their time-sampled metrics")]
struct Cli {
    /// Config file; falls back to CONFIG_PATH, then config/mainnet.toml.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    job: Option<Job>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    /// Persist the current roster, troves, immutables and pool metrics.
    Snapshot {
        /// Overwrite rows that already exist.
        #[arg(long)]
        resync: bool,
    },
    /// Index TroveManager events from the last checkpoint.
    Backfill {
        /// Start from the first block at or after this unix timestamp.
        #[arg(long)]
        since: Option<i64>,
        #[arg(long)]
        resync: bool,
        /// Skip log windows that keep failing instead of stopping.
        #[arg(long)]
        best_effort: bool,
    },
    /// Resolve collateral oracles and store their prices.
    Prices,
    /// Build the time-sampled summaries.
    Aggregate {
        /// Target unix timestamp, now when omitted.
        #[arg(long)]
        at: Option<i64>,
    },
    /// Serve the HTTP API.
    Serve,
}

impl Job {
    fn policy(&self) -> ConflictPolicy {
        match self {
            Job::Snapshot { resync: true } | Job::Backfill { resync: true, .. } => ConflictPolicy::Update,
            _ => ConflictPolicy::Ignore,
        }
    }
}

struct Jobs {
    snapshot: SnapshotSync,
    indexer: EventIndexer,
    prices: PriceResolver,
    aggregator: Arc<TimeSampleAggregator>,
}

impl Jobs {
    /// Runs one job for one protocol/chain. Returns a one-line outcome.
    async fn run(&self, job: Job, protocol_id: i32, chain: &str) -> Result<String> {
        let outcome = match job {
            Job::Snapshot { .. } => format!("{:?}", self.snapshot.run(protocol_id, chain).await?),
            Job::Backfill { since, .. } => {
                let report = match since {
                    Some(ts) => self.indexer.run_since(protocol_id, chain, ts, job.policy()).await?,
                    None => self.indexer.run(protocol_id, chain).await?,
                };
                format!("{:?}", report)
            }
            Job::Prices => format!("{} price rows", self.prices.run(protocol_id, chain).await?),
            Job::Aggregate { at } => {
                let target = at.unwrap_or_else(|| Utc::now().timestamp());
                format!("{} summaries", self.aggregator.run(protocol_id, chain, target).await?)
            }
            Job::Serve => return Err(anyhow!("serve is not a per-chain job")),
        };
        Ok(outcome)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let job = cli.job.unwrap_or(Job::Serve);

    // --- Configuration ---
    let config_path = cli
        .config
        .or_else(|| env::var("CONFIG_PATH").ok())
        .unwrap_or_else(|| "config/mainnet.toml".to_string());
    info!("Loading configuration from: {}", config_path);
    let config = Arc::new(
        Config::load(&config_path).with_context(|| format!("Failed to load configuration from {}", config_path))?,
    );

    // --- Database Setup ---
    let manager = ConnectionManager::<PgConnection>::new(&config.database_url);
    let pool = Pool::builder()
        .max_size(config.persist_concurrency.max(1) as u32)
        .build(manager)
        .context("Failed to create database connection pool")?;
    {
        let mut conn = pool.get().context("Failed to get a connection for migrations")?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow!("Failed to run migrations: {}", e))?;
    }
    let db_pool = Arc::new(pool);
    info!("Database pool ready, migrations applied.");

    let store: Arc<dyn Store> = Arc::new(PgStore::new(db_pool));
    let log = LogSink::init();
    let aggregator = Arc::new(TimeSampleAggregator::new(config.clone(), store.clone(), log.clone()));

    if job == Job::Serve {
        let app = create_router(AppState {
            store: store.clone(),
            aggregator,
        });
        let addr: SocketAddr = config
            .listen_addr
            .parse()
            .with_context(|| format!("Invalid listen_addr format in config: {}", config.listen_addr))?;
        let listener = TcpListener::bind(addr).await.context("Failed to bind TCP listener")?;
        info!("API server listening on {}", addr);
        axum::serve(listener, app.into_make_service())
            .await
            .context("Axum server failed")?;
        return Ok(());
    }

    let gateway: Arc<dyn ChainGateway> =
        Arc::new(RpcGateway::new(config.chains.clone()).context("Failed to build chain providers")?);
    let adapters = AdapterRegistry::with_defaults(config.persist_concurrency);
    let policy = job.policy();
    let best_effort = matches!(job, Job::Backfill { best_effort: true, .. });
    let jobs = Jobs {
        snapshot: SnapshotSync::new(config.clone(), gateway.clone(), store.clone(), adapters.clone(), log.clone())
            .with_policy(policy),
        indexer: EventIndexer::new(config.clone(), gateway.clone(), store.clone(), adapters, log.clone())
            .best_effort(config.best_effort || best_effort),
        prices: PriceResolver::new(config.clone(), gateway, store.clone(), log.clone()),
        aggregator,
    };

    // Chains of one protocol run concurrently, each start delayed a little more than the last.
    let mut failures = 0;
    for protocol in &config.protocols {
        let runs = protocol.deployments.iter().enumerate().map(|(i, deployment)| {
            let jobs = &jobs;
            let stagger = Duration::from_millis(config.chain_stagger_ms * i as u64);
            async move {
                tokio::time::sleep(stagger).await;
                let outcome = jobs.run(job, protocol.protocol_id, &deployment.chain).await;
                (deployment.chain.as_str(), outcome)
            }
        });
        for (chain, outcome) in join_all(runs).await {
            match outcome {
                Ok(summary) => info!("{:?} {} on {}: {}", job, protocol.name, chain, summary),
                Err(e) => {
                    failures += 1;
                    error!("{:?} {} on {} failed: {:#}", job, protocol.name, chain, e);
                }
            }
        }
        log.flush();
    }

    if failures > 0 {
        bail!("{} chain run(s) failed", failures);
    }
    Ok(())
}
