use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::spawn;
use tokio::sync::mpsc;

use bthr_risk::{console, AcquisitionPipeline, Command, Config, MemoryStore, ReadingStore, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();

    let store: Arc<dyn ReadingStore> = if config.no_persist {
        Arc::new(MemoryStore::new())
    } else {
        let store = SqliteStore::open(&config.store)
            .await
            .with_context(|| format!("opening reading store {}", config.store.display()))?;
        Arc::new(store)
    };

    let mut pipeline = AcquisitionPipeline::new(store, config.pipeline_settings());

    let (tx_command, rx_command) = mpsc::channel(8);
    spawn(read_commands(tx_command));

    if config.autostart {
        pipeline.on_start(config.build_source()).await?;
    } else {
        info!("Type `start` to begin streaming, `stop` to pause, `quit` to exit");
    }

    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Ctrl+C handler unavailable: {err}");
            std::future::pending::<()>().await;
        }
    };

    console::run(&mut pipeline, rx_command, || config.build_source(), config.json, ctrl_c).await?;
    Ok(())
}

async fn read_commands(tx: mpsc::Sender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match Command::parse(&line) {
            Some(command) => {
                if tx.send(command).await.is_err() {
                    return;
                }
            }
            None => warn!("Unknown command {:?} (start, stop, quit)", line.trim()),
        }
    }
}
