mod collectors;
mod config;
mod evaluate;
mod http;
mod metrics;
mod monitor;
mod notify;
mod state;
mod store;
mod tail;

use axum::serve;
use clap::Parser;
use collectors::system::SystemSampler;
use config::Config;
use metrics::Metrics;
use monitor::Monitor;
use notify::Dispatcher;
use state::now_unix;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use store::JsonFileStore;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hostwatch")]
#[command(version, about = "Host metrics and log alerting with an HTTP dashboard")]
struct Cli {
    #[arg(short, long, default_value = "./config.json")]
    config: String,
    /// Run one alert cycle and exit.
    #[arg(long)]
    once: bool,
    /// Seconds between cycles, overrides `interval_secs` from the config.
    #[arg(long)]
    interval: Option<u64>,
    /// Do not start the dashboard.
    #[arg(long)]
    no_http: bool,
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_json());
        return;
    }

    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    if let Some(interval) = cli.interval {
        cfg.interval_secs = interval.max(1);
    }
    let cfg = Arc::new(cfg);

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialise metrics");
            std::process::exit(1);
        }
    };
    let dispatcher = match Dispatcher::new(cfg.smtp.clone(), cfg.alert_cooldown_secs) {
        Ok(d) => d,
        Err(err) => {
            error!(error = %err, "failed to set up SMTP transport");
            std::process::exit(1);
        }
    };

    info!(
        config = %cli.config,
        log_files = cfg.log_files.len(),
        email = dispatcher.is_enabled(),
        "starting hostwatch"
    );

    let monitor = Monitor::new(
        cfg.clone(),
        Box::new(SystemSampler::new(&cfg.disk_path)),
        Box::new(JsonFileStore::open(&cfg.state_file)),
        dispatcher,
        metrics.clone(),
    );

    if cli.once {
        let mut monitor = monitor;
        if let Err(err) = monitor.run_cycle(now_unix()).await {
            error!(error = %err, "check failed");
            std::process::exit(1);
        }
        return;
    }

    let monitor = Arc::new(Mutex::new(monitor));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = if cli.no_http {
        None
    } else {
        let cfg = cfg.clone();
        let metrics = metrics.clone();
        let monitor = monitor.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            let app = http::build_router(metrics, monitor);
            let addr: SocketAddr = match cfg.listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %cfg.listen, "invalid listen address");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "failed to bind dashboard listener");
                    return;
                }
            };
            info!(listen = %addr, "dashboard listening");

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "dashboard server error");
            }
        }))
    };

    let cycle_task = {
        let interval_secs = cfg.interval_secs;
        let monitor = monitor.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("stopping alert cycle loop");
                        break;
                    }
                    _ = ticker.tick() => {
                        let mut guard = monitor.lock().await;
                        if let Err(err) = guard.run_cycle(now_unix()).await {
                            error!(error = %err, "scheduled check failed");
                        }
                    }
                }
            }
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");

    let _ = shutdown_tx.send(true);

    let _ = cycle_task.await;
    if let Some(task) = http_task {
        let _ = task.await;
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
