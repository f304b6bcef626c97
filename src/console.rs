use std::future::Future;

use log::{error, info, warn};
use tokio::sync::{broadcast, mpsc};

use crate::error::PipelineError;
use crate::pipeline::{AcquisitionPipeline, PipelineEvent, Snapshot};
use crate::signal::Command;
use crate::source::HeartRateSource;

/// Drives the pipeline from terminal commands until `quit` or `shutdown` resolves,
/// then stops it.
pub async fn run<S, F>(
    pipeline: &mut AcquisitionPipeline,
    mut commands: mpsc::Receiver<Command>,
    make_source: S,
    json: bool,
    shutdown: F,
) -> Result<(), PipelineError>
where
    S: Fn() -> Box<dyn HeartRateSource>,
    F: Future<Output = ()>,
{
    let mut snapshots = pipeline.snapshots();
    let mut events = pipeline.events();
    tokio::pin!(shutdown);

    let mut commands_open = true;
    loop {
        tokio::select! {
            command = commands.recv(), if commands_open => match command {
                Some(Command::StartStreaming) => {
                    if let Err(err) = pipeline.on_start(make_source()).await {
                        warn!("{err}");
                    }
                }
                Some(Command::StopStreaming) => pipeline.on_stop().await?,
                Some(Command::Quit) => break,
                // stdin closed: keep streaming until shutdown.
                None => commands_open = false,
            },
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(snapshot) = *snapshots.borrow_and_update() else { continue; };
                print_snapshot(&snapshot, json);
            },
            event = events.recv() => match event {
                Ok(event) => report(&event),
                Err(broadcast::error::RecvError::Lagged(missed)) => warn!("Missed {missed} pipeline events"),
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = &mut shutdown => break,
        }
    }

    pipeline.on_stop().await
}

fn print_snapshot(snapshot: &Snapshot, json: bool) {
    if json {
        match serde_json::to_string(snapshot) {
            Ok(line) => println!("{line}"),
            Err(err) => warn!("Failed to encode snapshot: {err}"),
        }
        return;
    }

    let alert = if snapshot.out_of_range { "  !!" } else { "" };
    println!(
        "HR: {} bpm [{}]{alert}  z = {:.4}  risk = {:.5}  stored: {}  last: {}",
        snapshot.heart_rate,
        snapshot.status,
        snapshot.risk.z,
        snapshot.risk.probability,
        snapshot.stored_count,
        snapshot.last_status.map_or("None", |s| s.as_str()),
    );
}

fn report(event: &PipelineEvent) {
    match event {
        PipelineEvent::Started { source } => info!("Started streaming from {source}"),
        PipelineEvent::SourceUnavailable(reason) => error!("Source unavailable: {reason}"),
        PipelineEvent::MalformedNotification(err) => warn!("Dropped sample: {err}"),
        PipelineEvent::PersistenceFailed(reason) => warn!("Reading not stored: {reason}"),
        PipelineEvent::Disconnected => warn!("Sensor disconnected, streaming stopped"),
        PipelineEvent::SourceEnded => info!("Source finished"),
        PipelineEvent::Stopped => info!("Stopped"),
    }
}
