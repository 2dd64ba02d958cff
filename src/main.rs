use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use bumpwatch::application::usecases::{
    AdminService, CooldownEngine, QueryService, ReminderDispatcher, ScanOnceUseCase,
};
use bumpwatch::application::{Clock, Notifier, TenantStore};
use bumpwatch::infrastructure::{
    broadcast_notifier::BroadcastNotifier,
    clock::MonotonicClock,
    console_notifier::ConsoleNotifier,
    event_bus::EventBus,
    multi_notifier::MultiNotifier,
    relay_source::{BumpDetector, RelayBumpSource},
    sqlite_store::SqliteTenantStore,
    webhook_notifier::WebhookNotifier,
};
use bumpwatch::interfaces::config::Config;
use bumpwatch::interfaces::http_api::{ApiState, build_router};

#[derive(Parser, Debug)]
#[command(name = "bumpwatch")]
struct Args {
    /// Path to config.yaml
    #[arg(long, default_value = "config.yaml")]
    config: String,

    /// Do not send external notifications (console only)
    #[arg(long)]
    dry_run: bool,

    /// Do not poll channels; rely on bumps posted to the API
    #[arg(long)]
    no_scan: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bumpwatch=info")),
        )
        .init();
    if dotenvy::dotenv().is_err() {
        let _ = dotenvy::from_path(Path::new(env!("CARGO_MANIFEST_DIR")).join(".env"));
    }
    let args = Args::parse();

    if let Err(e) = run(args).await {
        tracing::error!("bumpwatch stopped: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    // 1) load config
    let cfg = if Path::new(&args.config).exists() {
        Config::load_from_file(&args.config)?
    } else {
        tracing::warn!(path = %args.config, "config file not found, using defaults");
        Config::from_yaml("{}")?
    };
    let settings = cfg.cooldown_settings()?;

    // 2) build infra
    let db_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:bumpwatch.db?mode=rwc".to_string());
    let store = Arc::new(SqliteTenantStore::new(&db_url).await?);
    let clock = Arc::new(MonotonicClock::new());
    let bus = EventBus::new(256);

    let mut notifiers: Vec<Box<dyn Notifier>> = vec![
        Box::new(ConsoleNotifier::new()),
        Box::new(BroadcastNotifier::new(bus.clone())),
    ];
    if !args.dry_run {
        if let Ok(hook) = std::env::var("WEBHOOK_URL") {
            notifiers.push(Box::new(WebhookNotifier::new(hook)));
        } else {
            tracing::warn!("WEBHOOK_URL not set, WebhookNotifier disabled");
        }
    } else {
        tracing::warn!("--dry-run enabled: only console output");
    }
    let notifier: Arc<dyn Notifier> = Arc::new(MultiNotifier::new(notifiers));

    // 3) usecases
    let dispatcher = ReminderDispatcher::new(
        store.clone(),
        notifier.clone(),
        clock.clone(),
        settings,
        cfg.reminder_policy,
    );
    dispatcher.restore().await?;

    let engine = Arc::new(CooldownEngine::new(
        store.clone(),
        notifier,
        dispatcher.clone(),
        settings,
    ));
    let queries = Arc::new(QueryService::new(store.clone(), clock.clone(), settings));
    let admin = Arc::new(AdminService::new(store.clone(), engine.clone()));

    let detector = match &cfg.relay {
        Some(r) => BumpDetector::new(r.bot_author_id.clone(), &r.keyword),
        None => BumpDetector::default(),
    };

    // 4) http api
    let api = build_router(ApiState {
        engine: engine.clone(),
        queries,
        admin,
        clock: clock.clone(),
        detector: detector.clone(),
        api_token: std::env::var("API_TOKEN").ok(),
        event_bus: Some(bus),
    });
    let listener = tokio::net::TcpListener::bind(&cfg.http.bind).await?;
    tracing::info!(bind = %cfg.http.bind, "http api listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, api).await {
            tracing::error!("http server failed: {e}");
        }
    });

    // 5) run
    let source = match (&cfg.relay, args.no_scan) {
        (Some(r), false) => Some(RelayBumpSource::new(
            r.base_url.clone(),
            std::env::var("RELAY_TOKEN").ok(),
            detector,
            r.history_limit,
        )),
        (None, false) => {
            tracing::warn!("no relay configured, channel scanning disabled");
            None
        }
        (_, true) => None,
    };

    let scan_loop = async {
        let Some(source) = &source else {
            return std::future::pending::<()>().await;
        };
        let store: &dyn TenantStore = &*store;
        let clock: &dyn Clock = &*clock;
        let scan = ScanOnceUseCase::new(store, source, &engine, clock);
        let tick = Duration::from_secs(cfg.scan_tick_seconds);
        tracing::info!(tick_seconds = cfg.scan_tick_seconds, "channel scanning started");
        loop {
            match scan.execute().await {
                Ok(report) if report.scanned > 0 => tracing::debug!(?report, "scan pass done"),
                Ok(_) => {}
                Err(e) => tracing::error!("scan pass failed: {e}"),
            }
            tokio::time::sleep(tick).await;
        }
    };

    tokio::select! {
        _ = scan_loop => {}
        res = tokio::signal::ctrl_c() => res?,
    }

    tracing::info!(pending = dispatcher.pending_count(), "shutting down");
    dispatcher.shutdown();
    Ok(())
}
