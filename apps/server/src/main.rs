mod config;
mod main_lib;

use barsync_core::realtime::{LoopExit, RealtimeOptions};
use config::Config;
use main_lib::{build_engine, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing();
    tracing::info!(
        "Starting barsync: {} instruments, resolutions {:?}",
        config.sync.instruments.len(),
        config.sync.resolutions
    );

    let engine = build_engine(&config)?;
    engine.bootstrap().await?;

    if config.run_backfill {
        let summary = engine.run_configured_backfill().await?;
        tracing::info!("Backfill summary: {}", summary);
        let retry = summary.retry_subset();
        if !retry.is_empty() {
            tracing::warn!("{} series left for the next run: {:?}", retry.len(), retry);
        }
    }

    if config.realtime {
        let mut handle = engine.start_realtime_scheduler(RealtimeOptions::new(
            config.sync.instruments.clone(),
            config.sync.realtime_resolutions(),
        ))?;
        tracing::info!("Real-time polling started; press Ctrl-C to stop");
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("Stopping real-time polling");
            }
            exit = handle.finished() => {
                tracing::error!("Real-time polling ended: {}", exit?);
            }
        }

        let exit = engine.stop_realtime_scheduler(handle).await?;
        if let LoopExit::AuthFailed(reason) = exit {
            engine.shutdown().await;
            anyhow::bail!("real-time polling aborted: {}", reason);
        }
    }

    engine.shutdown().await;
    tracing::info!("barsync stopped");
    Ok(())
}
