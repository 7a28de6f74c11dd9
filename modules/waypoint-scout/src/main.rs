use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use places_client::PlacesClient;
use waypoint_common::{Config, SignalSource, Strategy};
use waypoint_scout::cache::PlaceCache;
use waypoint_scout::geo::GeoClusterer;
use waypoint_scout::infra::run_log;
use waypoint_scout::quality::QualityValidator;
use waypoint_scout::resilience::{CircuitBreakerRegistry, RetryExecutor, RetryPolicy};
use waypoint_scout::scheduling::{
    BudgetLedger, BudgetMonitor, EventCalendar, FixedSignals, IntervalScheduler,
    PrioritySignalAggregator, RunTrigger, Scheduler, SeasonalCalendar, StalenessGapSignal,
    UsageAnalytics,
};
use waypoint_scout::scraper::PlacesScraper;
use waypoint_scout::store::{MemoryStore, PgCacheStore};
use waypoint_scout::traits::CacheStore;
use waypoint_scout::universe::Universe;
use waypoint_scout::{RunSummary, ScrapeOrchestrator};

#[derive(Parser)]
#[command(name = "waypoint-scout", about = "Proactive place-data acquisition")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator once
    Run {
        #[arg(long, default_value = "comprehensive")]
        strategy: Strategy,
    },
    /// Run the default cadences until Ctrl-C
    Serve,
    /// Print the budget status and a 7-day cost summary
    Budget,
    /// Print what the cache currently covers
    Coverage,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("waypoint=info".parse()?))
        .init();

    let cli = Cli::parse();
    info!("Waypoint scout starting...");

    let config = Config::from_env()?;
    config.log_redacted();

    let orchestrator = Arc::new(build_orchestrator(&config).await?);
    let app = Arc::new(PersistingTrigger {
        orchestrator: orchestrator.clone(),
        ledger_path: config.ledger_path.as_ref().map(PathBuf::from),
    });

    match cli.command {
        Command::Run { strategy } => {
            let summary = app.trigger(strategy).await;
            println!("{summary}");
        }
        Command::Serve => {
            let cancel = Arc::new(AtomicBool::new(false));
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Shutdown requested, stopping after current runs");
                        cancel.store(true, Ordering::Relaxed);
                    }
                });
            }
            IntervalScheduler::default().run(app, cancel).await;
        }
        Command::Budget => {
            let report = serde_json::json!({
                "status": orchestrator.budget_status(),
                "last_7_days": orchestrator.cost_summary(7),
                "breakers": orchestrator.breaker_states(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Coverage => {
            println!("{}", serde_json::to_string_pretty(&orchestrator.coverage_stats())?);
        }
    }

    Ok(())
}

async fn build_orchestrator(config: &Config) -> Result<ScrapeOrchestrator> {
    let universe = Universe::load(&config.universe_path)?;

    // Durable store: Postgres when configured, otherwise process memory
    let (store, pool): (Arc<dyn CacheStore>, _) = match &config.database_url {
        Some(url) => {
            let pg = PgCacheStore::connect(url).await?;
            pg.ensure_schema().await?;
            sqlx::query(run_log::SCHEMA)
                .execute(pg.pool())
                .await
                .context("creating waypoint_runs table")?;
            let pool = pg.pool().clone();
            (Arc::new(pg), Some(pool))
        }
        None => {
            warn!("DATABASE_URL not set, cache lives in memory only");
            (Arc::new(MemoryStore::new()), None)
        }
    };

    let cache = Arc::new(PlaceCache::new(store));
    cache.warm().await?;

    let ledger = match &config.ledger_path {
        Some(path) => load_ledger(Path::new(path), config.budget.monthly_budget)?,
        None => BudgetLedger::new(config.budget.monthly_budget),
    };
    let analytics = Arc::new(UsageAnalytics::from_ledger(ledger, config.budget.cost_per_call));

    let mut client = PlacesClient::new(config.places_api_key.clone());
    if let Some(base_url) = &config.places_base_url {
        client = client.with_base_url(base_url);
    }

    let aggregator = PrioritySignalAggregator::new(vec![
        Arc::new(SeasonalCalendar::new(universe.seasonal.clone())),
        Arc::new(EventCalendar::new(universe.events.clone())),
        Arc::new(StalenessGapSignal::new(cache.clone(), universe.watched())),
        // Filled by the application's prediction job; empty on the CLI.
        Arc::new(FixedSignals::new(SignalSource::Ml, Vec::new())),
    ]);

    let executor = RetryExecutor::new(
        Arc::new(CircuitBreakerRegistry::from_config(&config.resilience)),
        RetryPolicy::from(&config.resilience),
    );

    Ok(ScrapeOrchestrator::builder()
        .scraper(Arc::new(PlacesScraper::new(client)))
        .cache(cache)
        .aggregator(aggregator)
        .analytics(analytics)
        .budget(BudgetMonitor::new(config.budget.clone()))
        .executor(executor)
        .validator(QualityValidator::new(config.quality.clone()))
        .clusterer(GeoClusterer::new(universe.known_points()))
        .config(config.orchestrator.clone())
        .run_budget(config.budget.run_budget)
        .pool(pool)
        .build())
}

/// Runs the orchestrator and writes the spend ledger back after every run.
struct PersistingTrigger {
    orchestrator: Arc<ScrapeOrchestrator>,
    ledger_path: Option<PathBuf>,
}

#[async_trait]
impl RunTrigger for PersistingTrigger {
    async fn trigger(&self, strategy: Strategy) -> RunSummary {
        let summary = self.orchestrator.run(strategy).await;
        if let Some(path) = &self.ledger_path {
            if let Err(e) = save_ledger(path, &self.orchestrator.analytics().ledger()) {
                warn!(path = %path.display(), error = %e, "Failed to save budget ledger");
            }
        }
        summary
    }
}

fn load_ledger(path: &Path, monthly_budget: f64) -> Result<BudgetLedger> {
    if !path.exists() {
        info!(path = %path.display(), "No budget ledger yet, starting empty");
        return Ok(BudgetLedger::new(monthly_budget));
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading budget ledger {}", path.display()))?;
    let mut ledger: BudgetLedger = serde_json::from_str(&raw)
        .with_context(|| format!("parsing budget ledger {}", path.display()))?;
    // The configured budget wins over whatever was saved.
    ledger.monthly_budget = monthly_budget;
    info!(path = %path.display(), entries = ledger.entries.len(), "Loaded budget ledger");
    Ok(ledger)
}

fn save_ledger(path: &Path, ledger: &BudgetLedger) -> Result<()> {
    let json = serde_json::to_string_pretty(ledger)?;
    std::fs::write(path, json).with_context(|| format!("writing budget ledger {}", path.display()))
}
