use anyhow::{Context, Result};
use clap::Parser;
use monitor_anomaly::{DetectionService, PassOutcome};
use monitor_api::{websocket::spawn_ws_forwarder, ApiServer, AppState};
use monitor_config::ConfigManager;
use monitor_core::{
    EventBus, MonitorConfig, MonitorEvent, NotificationSettings, SourceSet, SystemEventType,
};
use monitor_notifier::{
    email::EmailNotifier,
    logger::LogNotifier,
    manager::{spawn_alert_forwarder, NotificationManager},
    telegram::TelegramNotifier,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{signal, sync::watch, time::MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const EVENT_BUS_CAPACITY: usize = 1024;

#[derive(Parser, Debug)]
#[command(name = "funding-monitor", author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", env = "FUNDING_MONITOR_CONFIG")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Disable API server
    #[arg(long)]
    no_api: bool,

    /// Disable notifications
    #[arg(long)]
    no_notifications: bool,

    /// Run a single detection pass, print any alerts and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.debug, args.json_logs);

    info!("Starting funding monitor");

    let config = load_config(&args.config)?;

    let sources = Arc::new(monitor_source::build_sources(
        &config.sources,
        config.detection.min_volume,
    )?);
    info!("Polling sources: {}", sources.names().join(", "));

    let bus = EventBus::new(EVENT_BUS_CAPACITY);
    let detector = Arc::new(DetectionService::new(&config.detection, bus.clone()));

    if args.once {
        return run_once(&sources, &detector).await;
    }

    // The API starts before the detector is attached so early queries see 503.
    let app_state = AppState::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let api_handle = if !args.no_api && config.api.enabled {
        let server = ApiServer::new(&config.api, app_state.clone())?;
        let mut rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            let shutdown = async move {
                let _ = rx.changed().await;
            };
            if let Err(e) = server.run_until(shutdown).await {
                error!("API server error: {}", e);
            }
        }))
    } else {
        info!("API server disabled");
        None
    };

    app_state.attach(detector.clone());
    let ws_handle = spawn_ws_forwarder(&bus, app_state.clone());

    let notify_handle = if !args.no_notifications {
        let manager = Arc::new(init_notifications(&config.notification));
        info!(
            "Notification channels: {}",
            manager.get_enabled_channels().join(", ")
        );
        Some(spawn_alert_forwarder(&bus, manager))
    } else {
        info!("Notifications disabled");
        None
    };

    bus.publish(MonitorEvent::system(
        SystemEventType::Started,
        serde_json::json!({ "sources": sources.names() }),
    ));

    let poll_handle = tokio::spawn(poll_loop(
        sources,
        detector,
        Duration::from_secs(config.polling.interval_secs),
        shutdown_rx,
    ));

    wait_for_shutdown().await;

    info!("Initiating graceful shutdown...");
    let _ = shutdown_tx.send(true);
    bus.publish(MonitorEvent::system(
        SystemEventType::Stopped,
        serde_json::Value::Null,
    ));

    if let Err(e) = poll_handle.await {
        error!("Polling task failed: {}", e);
    }
    if let Some(handle) = api_handle {
        if let Err(e) = handle.await {
            error!("API task failed: {}", e);
        }
    }
    ws_handle.abort();
    if let Some(handle) = notify_handle {
        handle.abort();
    }

    info!("Funding monitor stopped");

    Ok(())
}

fn init_logging(debug: bool, json: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_config(path: &Path) -> Result<MonitorConfig> {
    let manager = if path.exists() {
        ConfigManager::from_file(path)?
    } else {
        warn!(
            "Config file {} not found, reading environment only",
            path.display()
        );
        ConfigManager::from_env()?
    };

    manager
        .validate()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;

    Ok(manager.get_config().clone())
}

fn init_notifications(config: &NotificationSettings) -> NotificationManager {
    let mut manager = NotificationManager::new();

    if config.log_enabled {
        manager.add_channel(Box::new(LogNotifier::new(true)));
    }

    if config.telegram.enabled {
        manager.add_channel(Box::new(TelegramNotifier::new(config.telegram.clone())));
    }

    if config.email.enabled {
        manager.add_channel(Box::new(EmailNotifier::new(config.email.clone())));
    }

    info!("Notification manager initialized");
    manager
}

/// Fetches from every source and runs the detector off the async workers.
///
/// The pass is claimed before fetching, so a batch from a slow fetch can
/// never land after a newer one.
async fn detection_pass(sources: &SourceSet, detector: &Arc<DetectionService>) -> Result<PassOutcome> {
    let Some(guard) = detector.try_begin_pass() else {
        return Ok(PassOutcome::Skipped);
    };
    let batch = sources.fetch_all().await;

    let outcome = tokio::task::spawn_blocking(move || guard.run(&batch))
        .await
        .context("detection pass panicked")?;

    Ok(outcome)
}

async fn run_once(sources: &SourceSet, detector: &Arc<DetectionService>) -> Result<()> {
    match detection_pass(sources, detector).await? {
        PassOutcome::Completed {
            received,
            analyzed,
            alerts,
        } => {
            info!(
                "Single pass: {} received, {} analyzed, {} alerts",
                received,
                analyzed,
                alerts.len()
            );
            println!("{}", serde_json::to_string_pretty(&alerts)?);
        }
        PassOutcome::Skipped => warn!("Single pass was skipped"),
    }

    Ok(())
}

async fn poll_loop(
    sources: Arc<SourceSet>,
    detector: Arc<DetectionService>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Polling every {}s", period.as_secs());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Ticks missed while a pass runs are dropped, not queued.
                if let Err(e) = detection_pass(&sources, &detector).await {
                    error!("Detection pass failed: {:#}", e);
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    info!("Polling stopped");
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use monitor_core::{Snapshot, SnapshotSource, TelegramConfig};
    use tokio::sync::Notify;

    /// Blocks in `fetch` until released, to hold a pass open.
    struct GatedSource {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl SnapshotSource for GatedSource {
        async fn fetch(&self) -> monitor_core::Result<Vec<Snapshot>> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(vec![])
        }

        fn name(&self) -> &str {
            "gated"
        }
    }

    fn gated_sources() -> (Arc<SourceSet>, Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let mut sources = SourceSet::new();
        sources.add_source(Arc::new(GatedSource {
            entered: entered.clone(),
            release: release.clone(),
        }));
        (Arc::new(sources), entered, release)
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["funding-monitor"]).unwrap();
        assert_eq!(args.config, PathBuf::from("config.yaml"));
        assert!(!args.debug);
        assert!(!args.once);
    }

    #[test]
    fn test_args_flags() {
        let args = Args::try_parse_from([
            "funding-monitor",
            "--config",
            "/etc/monitor.yaml",
            "--json-logs",
            "--no-api",
            "--no-notifications",
            "--once",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/monitor.yaml"));
        assert!(args.json_logs);
        assert!(args.no_api);
        assert!(args.no_notifications);
        assert!(args.once);
    }

    #[test]
    fn test_init_notifications_registers_enabled_channels() {
        let settings = NotificationSettings {
            log_enabled: true,
            telegram: TelegramConfig {
                enabled: true,
                bot_token: "token".to_string(),
                chat_ids: vec!["1".to_string()],
            },
            ..Default::default()
        };
        let manager = init_notifications(&settings);
        assert_eq!(manager.get_enabled_channels(), vec!["Log", "Telegram"]);
    }

    #[tokio::test]
    async fn test_empty_source_set_pass() {
        let detector = Arc::new(DetectionService::new(
            &Default::default(),
            EventBus::default(),
        ));
        let outcome = detection_pass(&SourceSet::new(), &detector).await.unwrap();
        assert_eq!(
            outcome,
            PassOutcome::Completed {
                received: 0,
                analyzed: 0,
                alerts: vec![],
            }
        );
    }

    #[tokio::test]
    async fn test_slow_fetch_holds_the_pass() {
        let detector = Arc::new(DetectionService::new(
            &Default::default(),
            EventBus::default(),
        ));
        let (sources, entered, release) = gated_sources();

        let first = tokio::spawn({
            let sources = sources.clone();
            let detector = detector.clone();
            async move { detection_pass(&sources, &detector).await }
        });
        entered.notified().await;

        let second = detection_pass(&SourceSet::new(), &detector).await.unwrap();
        assert_eq!(second, PassOutcome::Skipped);

        release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(matches!(first, PassOutcome::Completed { received: 0, .. }));

        let status = detector.status();
        assert_eq!(status.passes_skipped, 1);
        assert_eq!(status.passes_completed, 1);
    }

    #[tokio::test]
    async fn test_poll_loop_finishes_pass_before_stopping() {
        let detector = Arc::new(DetectionService::new(
            &Default::default(),
            EventBus::default(),
        ));
        let (sources, entered, release) = gated_sources();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(poll_loop(
            sources,
            detector.clone(),
            Duration::from_secs(3600),
            shutdown_rx,
        ));
        entered.notified().await;

        shutdown_tx.send(true).unwrap();
        assert!(!handle.is_finished());
        release.notify_one();
        handle.await.unwrap();

        assert_eq!(detector.status().passes_completed, 1);
    }
}
