use std::{path::Path, process::ExitCode};

use chrono::NaiveDate;
use clap::Parser;
use metrics_loader::{consumer::IndexStore, MetricRecord};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

mod cli;
mod input;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = cli::Cli::parse();
    let config = cli.driver_config();
    let driver = config.build();
    if driver.is_none() {
        warn!("No tagged table configured, metrics will be read and discarded.");
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let store = IndexStore::new(driver, shutdown.clone());
    let mut failed = false;
    'dates: for date in cli.dates() {
        info!(%date, driver = %config.kind, table = %config.table, "Loading metrics.");
        for path in &cli.files {
            if shutdown.is_cancelled() {
                break 'dates;
            }
            if let Err(e) = load_file(&store, path, date, &shutdown).await {
                error!(path = %path.display(), error = %e, "Failed to read metrics file.");
                failed = true;
            }
        }
        store.flush_init().await;
    }

    let stats = if shutdown.is_cancelled() {
        store.interrupt().await
    } else {
        store.stop().await
    };
    info!(
        records = stats.records,
        rows = stats.rows,
        rejected = stats.rejected,
        dropped = stats.dropped,
        failed_flushes = stats.failed_flushes,
        "Done."
    );

    if failed || stats.failed_flushes > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn load_file(
    store: &IndexStore,
    path: &Path,
    date: NaiveDate,
    shutdown: &CancellationToken,
) -> std::io::Result<()> {
    let mut lines = input::open(path).await?;
    while let Some(line) = lines.next_line().await? {
        if shutdown.is_cancelled() {
            break;
        }
        if line.is_empty() {
            continue;
        }
        store.push(MetricRecord::new(line, date)).await;
    }
    Ok(())
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler.");
                if tokio::signal::ctrl_c().await.is_ok() {
                    shutdown.cancel();
                }
                return;
            }
        };
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if res.is_err() {
                    return;
                }
            }
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
    }

    info!("Received shutdown signal.");
    shutdown.cancel();
}
