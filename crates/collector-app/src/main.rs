use std::env;
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context as _, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use clamp_store::ClampStore;
use collector_app::http::{self, ApiState};
use collector_app::CollectorConfig;
use poller::{command_channel, DeviceSnapshot, Poller};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config_path = parse_config_arg();
    let config = match CollectorConfig::load_with_path(config_path) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            process::exit(2);
        }
    };
    if let Err(err) = config.validate() {
        error!(error = %err, "invalid configuration");
        process::exit(2);
    }

    info!(
        host = %config.host,
        port = config.port,
        unit_id = config.unit_id,
        "qube collector starting"
    );

    if let Some(ref listen) = config.metrics_listen {
        let addr: SocketAddr = listen.parse().context("metrics listen address")?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("install prometheus exporter")?;
        info!(listen = %addr, "metrics exporter listening");
    }

    let map = Arc::new(config.load_catalog().context("load register catalog")?);
    info!(registers = map.len(), "register catalog loaded");

    let store = match ClampStore::new(&config.clamp_store_path).await {
        Ok(store) => Some(store),
        Err(err) => {
            error!(
                path = %config.clamp_store_path,
                error = %err,
                "clamp store unavailable; counter clamping will not survive restarts"
            );
            None
        }
    };

    let (snapshot_tx, snapshot_rx) = watch::channel(DeviceSnapshot::default());
    let (handle, commands) = command_channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut poller = Poller::new(
        config.identity(),
        config.client_config(),
        Arc::clone(&map),
        config.encoding,
        config.poller.clone(),
        snapshot_tx,
        commands,
        shutdown_rx,
        store,
    );
    poller.seed_clamp().await;
    let poller_task = tokio::spawn(poller.run());

    if let Some(schedule) = config.dhw_schedule.clone() {
        tokio::spawn(poller::schedule::run_dhw_schedule(
            handle.clone(),
            schedule,
            shutdown_tx.subscribe(),
        ));
    }

    let state = ApiState {
        snapshot_rx,
        handle,
        map,
        identity: config.identity(),
        started_at_ms: unix_ms(),
    };
    let app = http::router(state);
    let listener = TcpListener::bind(&config.http_listen)
        .await
        .with_context(|| format!("bind http listener on {}", config.http_listen))?;
    info!(listen = %config.http_listen, "http api listening");

    #[cfg(target_os = "linux")]
    {
        notify_ready();
        start_watchdog();
    }

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(err) = server.await {
        error!(error = %err, "http server error");
    }

    info!("shutting down");
    let _ = shutdown_tx.send(true);
    let _ = poller_task.await;
    info!("shutdown complete");
    Ok(())
}

/// Accepts `--config <path>` or `--config=<path>`.
fn parse_config_arg() -> Option<String> {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
}

#[cfg(target_os = "linux")]
fn notify_ready() {
    if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
        tracing::debug!(error = %err, "sd_notify ready failed");
    }
}

/// Pet the systemd watchdog at half the configured interval, if one is set.
#[cfg(target_os = "linux")]
fn start_watchdog() {
    let mut usec = 0u64;
    if !sd_notify::watchdog_enabled(false, &mut usec) || usec == 0 {
        return;
    }
    let interval = std::time::Duration::from_micros(usec / 2);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Watchdog]) {
                tracing::debug!(error = %err, "sd_notify watchdog failed");
            }
        }
    });
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
