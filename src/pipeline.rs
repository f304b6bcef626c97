use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{DecodeError, PipelineError};
use crate::reading::{NewReading, Status};
use crate::risk::{FeatureVector, RiskModel, RiskResult, DEFAULT_TEMPERATURE};
use crate::source::{HeartRateSource, SampleFeed, SampleReceiver, SourceExit, SourceSignal};
use crate::store::ReadingStore;

pub const DEFAULT_CHANNEL_DEPTH: usize = 16;
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Snapshot {
    pub heart_rate: i32,
    pub status: Status,
    pub stored_count: u64,
    pub last_status: Option<Status>,
    pub risk: RiskResult,
    pub out_of_range: bool,
    pub dropped_samples: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Started { source: String },
    SourceUnavailable(String),
    MalformedNotification(DecodeError),
    PersistenceFailed(String),
    Disconnected,
    SourceEnded,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub model: RiskModel,
    pub temperature: f64,
    pub channel_depth: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            model: RiskModel::hr_only(),
            temperature: DEFAULT_TEMPERATURE,
            channel_depth: DEFAULT_CHANNEL_DEPTH,
        }
    }
}

struct Running {
    cancel: CancellationToken,
    active: Arc<AtomicBool>,
    producer: JoinHandle<()>,
    consumer: JoinHandle<()>,
}

impl Running {
    async fn join(self) -> Result<(), PipelineError> {
        self.producer.await?;
        self.consumer.await?;
        Ok(())
    }
}

pub struct AcquisitionPipeline {
    store: Arc<dyn ReadingStore>,
    settings: PipelineSettings,
    snapshots: watch::Sender<Option<Snapshot>>,
    events: broadcast::Sender<PipelineEvent>,
    running: Option<Running>,
}

impl AcquisitionPipeline {
    pub fn new(store: Arc<dyn ReadingStore>, settings: PipelineSettings) -> Self {
        let (snapshots, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        AcquisitionPipeline {
            store,
            settings,
            snapshots,
            events,
            running: None,
        }
    }

    pub fn snapshots(&self) -> watch::Receiver<Option<Snapshot>> {
        self.snapshots.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// False once stopped, or once the source ended on its own.
    pub fn is_streaming(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| running.active.load(Ordering::Acquire))
    }

    pub async fn on_start(&mut self, mut source: Box<dyn HeartRateSource>) -> Result<(), PipelineError> {
        if self.is_streaming() {
            return Err(PipelineError::AlreadyRunning);
        }
        // A previous run that ended by itself still has to be joined.
        if let Some(finished) = self.running.take() {
            finished.join().await?;
        }

        let description = source.describe();
        info!("Streaming from {description}");
        let _ = self.events.send(PipelineEvent::Started {
            source: description,
        });

        let (feed, rx) = SampleFeed::channel(self.settings.channel_depth);
        let cancel = CancellationToken::new();
        let active = Arc::new(AtomicBool::new(true));

        let consumer = Consumer {
            store: self.store.clone(),
            model: self.settings.model,
            temperature: self.settings.temperature,
            snapshots: self.snapshots.clone(),
            events: self.events.clone(),
            dropped: feed.dropped_counter(),
            active: active.clone(),
        };
        let consumer = tokio::spawn(consumer.run(rx));

        let producer_cancel = cancel.clone();
        let producer = tokio::spawn(async move {
            let terminal = match source.run(feed.clone(), producer_cancel).await {
                Ok(SourceExit::Cancelled) => None,
                Ok(SourceExit::LinkLost) => Some(SourceSignal::Disconnected),
                Ok(SourceExit::Exhausted) => Some(SourceSignal::Ended),
                Err(err) => {
                    warn!("Source unavailable: {err}");
                    Some(SourceSignal::Unavailable(err.to_string()))
                }
            };
            if let Some(signal) = terminal {
                feed.finish(signal);
            }
        });

        self.running = Some(Running {
            cancel,
            active,
            producer,
            consumer,
        });
        Ok(())
    }

    /// Cancels the source, then waits until every sample it already handed
    /// over has been stored and published and `Stopped` has been emitted.
    pub async fn on_stop(&mut self) -> Result<(), PipelineError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        running.cancel.cancel();
        running.join().await
    }
}

/// Single writer of pipeline state.
struct Consumer {
    store: Arc<dyn ReadingStore>,
    model: RiskModel,
    temperature: f64,
    snapshots: watch::Sender<Option<Snapshot>>,
    events: broadcast::Sender<PipelineEvent>,
    dropped: Arc<AtomicU64>,
    active: Arc<AtomicBool>,
}

impl Consumer {
    /// Runs until the producer drops its end of the channel, so nothing accepted is lost.
    /// Emits `Stopped` exactly once per run, whether stopped or ended by the source.
    async fn run(self, mut rx: SampleReceiver) {
        while let Some(signal) = rx.recv().await {
            match signal {
                SourceSignal::Sample(heart_rate) => {
                    let snapshot = self.process_sample(i32::from(heart_rate)).await;
                    self.snapshots.send_replace(Some(snapshot));
                }
                SourceSignal::Malformed(err) => self.emit(PipelineEvent::MalformedNotification(err)),
                SourceSignal::Unavailable(reason) => self.emit(PipelineEvent::SourceUnavailable(reason)),
                SourceSignal::Disconnected => self.emit(PipelineEvent::Disconnected),
                SourceSignal::Ended => self.emit(PipelineEvent::SourceEnded),
            }
        }
        debug!("Sample channel closed");
        self.active.store(false, Ordering::Release);
        info!("Streaming stopped");
        self.emit(PipelineEvent::Stopped);
    }

    async fn process_sample(&self, heart_rate: i32) -> Snapshot {
        let reading = NewReading::now(heart_rate);

        if let Err(err) = self.store.insert(reading).await {
            warn!("Failed to store {heart_rate} bpm reading: {err}");
            self.emit(PipelineEvent::PersistenceFailed(err.to_string()));
        }

        let risk = self
            .model
            .predict(FeatureVector::new(f64::from(heart_rate), self.temperature));
        let stored_count = self.store.count().await;
        let last_status = self.store.latest().await.map(|r| r.status);

        info!(
            "HR {heart_rate} bpm ({}), z = {:.4}, p = {:.5}, stored {stored_count}",
            reading.status, risk.z, risk.probability
        );

        Snapshot {
            heart_rate,
            status: reading.status,
            stored_count,
            last_status,
            risk,
            out_of_range: reading.status.is_out_of_range(),
            dropped_samples: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn emit(&self, event: PipelineEvent) {
        let _ = self.events.send(event);
    }
}
