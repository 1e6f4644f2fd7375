mod cache;
mod collectors;
mod config;
mod http;
mod metrics;
mod refresh;
mod state;
mod store;
mod triggers;

use axum::serve;
use cache::StatusCache;
use clap::Parser;
use collectors::probe::HttpProber;
use config::Config;
use metrics::Metrics;
use refresh::Refresher;
use std::net::SocketAddr;
use std::sync::Arc;
use store::{SiteStore, YamlFileBackend};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use triggers::SiteChangeDebouncer;

#[derive(Parser, Debug)]
#[command(name = "sitewatch")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Overrides `listen` from the config file.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "не удалось загрузить конфигурацию");
            std::process::exit(1);
        }
    };
    if let Some(listen) = cli.listen {
        cfg.listen = listen;
        if let Err(err) = cfg.validate() {
            error!(error = %err, "некорректный адрес --listen");
            std::process::exit(1);
        }
    }

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "не удалось инициализировать метрики");
            std::process::exit(1);
        }
    };
    let prober = match HttpProber::from_config(&cfg.probe) {
        Ok(p) => p,
        Err(err) => {
            error!(error = %err, "не удалось создать HTTP-клиент");
            std::process::exit(1);
        }
    };

    let backend = YamlFileBackend::new(&cfg.sites_file);
    info!(
        listen = %cfg.listen,
        sites_file = %backend.path().display(),
        refresh_interval = %humantime::format_duration(cfg.refresh_interval),
        daily_refresh_at = %cfg.daily_refresh_at,
        "запуск sitewatch"
    );

    let cache = Arc::new(StatusCache::new(
        Arc::new(SiteStore::new(Arc::new(backend))),
        Arc::new(prober),
        cfg.probe.clone(),
        cfg.refresh_interval,
        metrics.clone(),
    ));
    let (refresher, refresh_worker) = Refresher::spawn(cache);
    let debouncer = Arc::new(SiteChangeDebouncer::new(
        refresher.clone(),
        cfg.crud_debounce,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let cfg = cfg.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        let app = http::build_router(http::HttpAppState {
            metrics: metrics.clone(),
            refresher: refresher.clone(),
            store: refresher.cache().store().clone(),
            debouncer: debouncer.clone(),
        });
        tokio::spawn(async move {
            let addr: SocketAddr = match cfg.listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %cfg.listen, "некорректный адрес listen");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "не удалось запустить HTTP-сервер");
                    return;
                }
            };
            info!(%addr, "HTTP-сервер запущен");

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "ошибка HTTP-сервера");
            }
        })
    };

    let mut trigger_tasks = vec![
        tokio::spawn(triggers::run_startup(
            refresher.clone(),
            cfg.startup_delay,
            shutdown_rx.clone(),
        )),
        tokio::spawn(triggers::run_periodic(
            refresher.clone(),
            cfg.refresh_interval,
            shutdown_rx.clone(),
        )),
    ];
    if let Some(at) = cfg.daily_refresh_time() {
        trigger_tasks.push(tokio::spawn(triggers::run_daily(
            refresher.clone(),
            at,
            shutdown_rx.clone(),
        )));
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "не удалось дождаться Ctrl+C");
    }
    info!("получен Ctrl+C, выполняется остановка");

    let _ = shutdown_tx.send(true);
    debouncer.cancel();

    for task in trigger_tasks {
        let _ = task.await;
    }
    let _ = http_task.await;

    // The worker exits once the last handle is gone.
    drop(debouncer);
    drop(refresher);
    let _ = refresh_worker.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
