use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use uptime_monitor::db::{self, store::DbStore};
use uptime_monitor::monitoring::incident::IncidentTracker;
use uptime_monitor::monitoring::pipeline::CheckPipeline;
use uptime_monitor::monitoring::prober::HttpProber;
use uptime_monitor::monitoring::scheduler::Scheduler;
use uptime_monitor::monitoring::store::MonitorStore;
use uptime_monitor::notifications::encryption::EncryptionService;
use uptime_monitor::notifications::service::Notifier;
use uptime_monitor::server::config::ServerConfig;
use uptime_monitor::web::{self, AppState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "uptime-monitor.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal.");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received.");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    // Logging depends on `log_dir`, so configuration errors go to stderr.
    let server_config = match ServerConfig::load(args.config.as_deref()) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Failed to load server configuration: {e}");
            return Err(e.into());
        }
    };

    init_logging(&server_config.log_dir);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting uptime monitor.");

    // --- Database ---
    let db_pool = db::connect(&server_config.database_url).await?;
    db::init_schema(&db_pool).await?;

    let encryption = Arc::new(EncryptionService::from_hex_key(
        &server_config.notification_encryption_key,
    )?);
    let store: Arc<dyn MonitorStore> = Arc::new(DbStore::new(db_pool.clone(), encryption.clone()));

    // --- Monitoring pipeline ---
    let tracker = Arc::new(IncidentTracker::new(server_config.failure_threshold));
    let notifier = Arc::new(
        Notifier::new(store.clone(), server_config.notifier_settings()).with_default_senders(
            server_config.email_relay.clone(),
            server_config.sms_relay.clone(),
        ),
    );
    let pipeline = Arc::new(CheckPipeline::new(
        store.clone(),
        tracker.clone(),
        notifier.clone(),
    ));
    match pipeline.restore_open_incidents().await {
        Ok(restored) => info!(restored, "Restored open incidents."),
        Err(e) => warn!(error = %e, "Could not restore open incidents; starting with a clean tracker."),
    }

    let prober = Arc::new(HttpProber::new(
        server_config.probe_location.clone(),
        server_config.cert_expiry_warning_days,
    )?);
    let scheduler = Arc::new(Scheduler::new(
        store,
        prober,
        pipeline,
        server_config.scheduler_settings(),
    ));
    scheduler.start();

    // --- HTTP API ---
    let app_state = Arc::new(AppState {
        db: db_pool,
        encryption,
        scheduler: scheduler.clone(),
        tracker,
        notifier,
        config: server_config.clone(),
    });
    let app = web::create_router(app_state);

    let listener = tokio::net::TcpListener::bind(server_config.listen_addr).await?;
    info!(address = %server_config.listen_addr, "HTTP API listening.");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    info!("Uptime monitor stopped.");
    Ok(())
}
