use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stratus_apiserver::{ApiServer, AppState, Config as ApiConfig};
use stratus_collector::{HttpMetricsSource, MetricsCollector};
use stratus_core::{EngineConfig, SnapshotStore};
use stratus_executor::{
    AuditLog, BindingExecutor, HttpOrchestrationApi, MockOrchestrationApi, OrchestrationApi,
    WorkloadRegistry,
};
use stratus_metrics::EngineMetrics;
use stratus_scheduler::{PlacementScorer, Rebalancer, Scheduler};
use stratus_storage::RedbBackend;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "stratus", about = "GPU-aware workload scheduler and rebalancer")]
struct Cli {
    /// Engine configuration file (YAML); built-in defaults if omitted
    #[arg(long, global = true, env = "STRATUS_CONFIG")]
    config: Option<PathBuf>,
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "STRATUS_LOG_JSON")]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the collector, scheduler, rebalancer and API server
    Run {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0:8080", env = "STRATUS_BIND")]
        bind: String,
        /// Directory for the persistent audit log; kept in memory if omitted
        #[arg(long, env = "STRATUS_DATA_DIR")]
        data_dir: Option<PathBuf>,
        /// Base URL of the orchestration binding API
        #[arg(
            long,
            env = "STRATUS_ORCHESTRATOR_URL",
            required_unless_present = "mock_orchestrator"
        )]
        orchestrator_url: Option<String>,
        /// Bind against an in-process orchestrator that accepts everything
        #[arg(long, conflicts_with = "orchestrator_url")]
        mock_orchestrator: bool,
    },
    /// Validate the configuration and print the effective settings
    CheckConfig,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_json);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            bind,
            data_dir,
            orchestrator_url,
            mock_orchestrator,
        } => {
            run_engine(
                config,
                &bind,
                data_dir.as_deref(),
                orchestrator_url,
                mock_orchestrator,
            )
            .await
        }
        Commands::CheckConfig => check_config(&config),
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(path: Option<&Path>) -> miette::Result<EngineConfig> {
    match path {
        Some(path) => Ok(EngineConfig::load(path)?),
        None => {
            let config = EngineConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn check_config(config: &EngineConfig) -> miette::Result<()> {
    let nodes = config.inventory()?;
    PlacementScorer::new(&config.scorer)?;

    let rendered = serde_yaml::to_string(config)
        .map_err(|e| miette::miette!("Failed to render configuration: {}", e))?;
    println!("{}", rendered);
    info!("Configuration OK, {} node(s) in inventory", nodes.len());
    Ok(())
}

fn open_audit_log(data_dir: Option<&Path>) -> miette::Result<AuditLog> {
    let Some(dir) = data_dir else {
        warn!("No data directory given, audit log is kept in memory only");
        return Ok(AuditLog::new());
    };

    std::fs::create_dir_all(dir).map_err(|e| {
        miette::miette!("Failed to create data directory {}: {}", dir.display(), e)
    })?;
    let path = dir.join("audit.redb");
    let backend = RedbBackend::new(&path)
        .map_err(|e| miette::miette!("Failed to open {}: {}", path.display(), e))?;
    let audit = AuditLog::with_store(Arc::new(backend))
        .map_err(|e| miette::miette!("Failed to load audit log: {}", e))?;

    info!("Audit log at {} ({} entries)", path.display(), audit.len());
    Ok(audit)
}

/// Run every component until ctrl-c or until the API server fails
async fn run_engine(
    config: EngineConfig,
    bind: &str,
    data_dir: Option<&Path>,
    orchestrator_url: Option<String>,
    mock_orchestrator: bool,
) -> miette::Result<()> {
    info!("Starting stratus");

    let listen_addr: std::net::SocketAddr = bind
        .parse()
        .map_err(|e| miette::miette!("Invalid bind address '{}': {}", bind, e))?;

    let store = Arc::new(SnapshotStore::new(
        config.collector.staleness(),
        config.collector.degraded_after_failures,
    ));
    for node in config.inventory()? {
        store.upsert_node(node);
    }

    let metrics = Arc::new(EngineMetrics::new()?);
    let audit = Arc::new(open_audit_log(data_dir)?);

    let api: Arc<dyn OrchestrationApi> = if mock_orchestrator {
        warn!("Using the in-process orchestrator, no workload will actually run");
        Arc::new(MockOrchestrationApi::new())
    } else {
        let url = orchestrator_url.ok_or_else(|| {
            miette::miette!("--orchestrator-url is required unless --mock-orchestrator is set")
        })?;
        info!("Binding through orchestrator at {}", url);
        Arc::new(HttpOrchestrationApi::new(&url))
    };

    let executor = Arc::new(BindingExecutor::new(
        api,
        Arc::new(WorkloadRegistry::new()),
        audit,
        metrics.clone(),
        config.binder.clone(),
    ));
    let scorer = Arc::new(PlacementScorer::new(&config.scorer)?);

    let token = CancellationToken::new();

    // 1. API server
    let state = Arc::new(AppState::new(
        executor.clone(),
        store.clone(),
        metrics.clone(),
    ));
    let api_server = ApiServer::new(ApiConfig { listen_addr }, state);
    let api_token = token.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_token.clone()).await {
            error!("API server error: {}", e);
            api_token.cancel();
        }
    });

    // 2. Metrics collector
    let collector = MetricsCollector::new(
        store.clone(),
        Arc::new(HttpMetricsSource::new()),
        metrics.clone(),
        config.collector.clone(),
    );
    let collector_token = token.clone();
    let collector_handle = tokio::spawn(async move { collector.run(collector_token).await });

    // 3. Scheduler
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        scorer.clone(),
        executor.clone(),
        metrics.clone(),
        config.scheduler.clone(),
    ));
    let scheduler_handle = tokio::spawn(scheduler.run(token.clone()));

    // 4. Rebalancer
    let rebalancer = Arc::new(Rebalancer::new(
        store,
        scorer,
        executor,
        metrics,
        config.rebalancer.clone(),
    ));
    let rebalancer_handle = tokio::spawn(rebalancer.run(token.clone()));

    info!("All components started, API server on {}", listen_addr);

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;
            info!("Shutting down gracefully...");
        }
        _ = token.cancelled() => {
            warn!("A component stopped unexpectedly, shutting down");
        }
    }
    token.cancel();

    let grace = config.shutdown_grace();
    let finished = tokio::time::timeout(grace, async {
        let _ = tokio::join!(
            api_handle,
            collector_handle,
            scheduler_handle,
            rebalancer_handle,
        );
    })
    .await;
    if finished.is_err() {
        warn!(
            "Components did not stop within {:?}, exiting anyway",
            grace
        );
    }

    info!("Shutdown complete");
    Ok(())
}
