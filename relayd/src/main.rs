/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use relayd::config::{DriverKind, RelayConfig};
use relayd::driver::{self, GpioCommandDriver};
use relayd::engine::Engine;
use relayd::http;
use relayd::scheduler::{timesync, SystemClock};
use relayd::shutdown::{wait_for_shutdown_signal, ShutdownReport};

// ── CLI argument definition ───────────────────────────────────────────────────

/// Relay control daemon.
///
/// Example:
///   relayd --config /etc/relayd/relayd.yaml --bind 0.0.0.0:8080
#[derive(Debug, Parser)]
#[command(
    name = "relayd",
    about = "Relay control daemon – timed, fail-safe GPIO relay actuation",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML configuration file.  Built-in defaults when omitted.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// HTTP listen address (overrides `http.bind`).
    #[arg(short = 'b', long = "bind")]
    bind: Option<SocketAddr>,

    /// Driver backend (overrides `driver.kind`).
    #[arg(short = 'd', long = "driver", value_enum)]
    driver: Option<DriverKind>,

    /// Log filter used when RUST_LOG is not set.
    #[arg(short = 'l', long = "log-level", default_value = "info")]
    log_level: String,
}

/// Why the serving phase ended.
enum Exit {
    /// Termination signal received.
    Signal,
    /// The server returned on its own, or signals could not be installed.
    Stopped(Result<()>),
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Level is controlled by the RUST_LOG env-var, falling back to --log-level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    info!("relayd starting up...");

    match run(cli).await {
        Ok(Exit::Signal) => process::exit(0),
        Ok(Exit::Stopped(Ok(()))) => {}
        Ok(Exit::Stopped(Err(e))) | Err(e) => {
            error!("{:#}", e);
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<Exit> {
    // ── Configuration ─────────────────────────────────────────────────────────
    let mut config = match &cli.config {
        Some(path) => RelayConfig::load_from_file(path)?,
        None => {
            warn!("No configuration file provided, using built-in defaults");
            RelayConfig::default()
        }
    };
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(kind) = cli.driver {
        config.driver.kind = kind;
    }

    info!(
        bind      = %config.bind,
        driver    = ?config.driver.kind,
        time_sync = ?config.time_sync.kind,
        channels  = ?config.channels.iter().map(|c| c.0).collect::<Vec<_>>(),
        schedule  = config.schedule.len(),
        "Configuration"
    );

    // ── Hardware ──────────────────────────────────────────────────────────────
    if config.driver.kind == DriverKind::Gpio {
        GpioCommandDriver::new(&config.driver.command, config.driver.call_timeout)
            .probe()
            .await
            .context("GPIO actuation tool unavailable")?;
    }

    let engine = Engine::new(
        &config,
        driver::from_config(&config.driver),
        timesync::from_config(&config.time_sync),
        Arc::new(SystemClock),
    );
    engine
        .initialize()
        .await
        .context("channel initialisation failed")?;

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("cannot bind HTTP listener on {}", config.bind))?;

    engine.start();

    // ── Serve until a signal arrives or the server stops ──────────────────────
    let mut server = tokio::spawn(http::serve(listener, engine.clone()));

    let exit = tokio::select! {
        signal = wait_for_shutdown_signal() => match signal {
            Ok(()) => Exit::Signal,
            Err(e) => Exit::Stopped(
                Err(anyhow::Error::from(e).context("cannot install signal handlers")),
            ),
        },
        joined = &mut server => {
            let result = joined
                .context("HTTP server task failed")
                .and_then(|served| served);
            Exit::Stopped(result)
        }
    };

    let report = engine.shutdown().await;
    log_shutdown(&report);

    if matches!(exit, Exit::Signal) {
        let _ = tokio::time::timeout(config.timing.shutdown_grace, server).await;
    }
    Ok(exit)
}

fn log_shutdown(report: &ShutdownReport) {
    for fault in &report.emergency.faults {
        error!(critical = true, channel = %fault.channel, "relay may still be ON after shutdown");
    }
    info!(
        confirmed_off = report.emergency.confirmed_off.len(),
        faults = report.emergency.faults.len(),
        stopped_within_grace = report.stopped_within_grace,
        "relayd stopped"
    );
}
