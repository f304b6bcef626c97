pub mod ble;
pub mod simulated;
pub mod state;
pub mod transport;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::{DecodeError, SourceError};

pub use ble::BleSource;
pub use simulated::SimulatedSource;
pub use state::{ConnectionMachine, ConnectionState};
pub use transport::{BleCentral, BleDevice, PlatformCentral};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSignal {
    Sample(u8),
    Malformed(DecodeError),
    /// The source could not reach Streaming (no adapter, no device, discovery failure, timeout).
    Unavailable(String),
    Disconnected,
    Ended,
}

/// Why a source stopped producing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceExit {
    Cancelled,
    LinkLost,
    Exhausted,
}

#[async_trait]
pub trait HeartRateSource: Send {
    fn describe(&self) -> String;

    /// Produce samples into `feed` until cancelled, the link drops, or the source runs dry.
    async fn run(&mut self, feed: SampleFeed, cancel: CancellationToken) -> Result<SourceExit, SourceError>;
}

struct Queue {
    signals: VecDeque<SourceSignal>,
    feeds: usize,
    consumer_alive: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    ready: Notify,
    depth: usize,
    dropped: Arc<AtomicU64>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Producer half of a bounded hand-off that never blocks the source.
///
/// When the queue is full the oldest buffered sample is evicted to make room,
/// so the consumer always catches up to the most recent heart rate. Evicted
/// samples are counted; evicted malformed notices are not.
pub struct SampleFeed {
    shared: Arc<Shared>,
}

pub struct SampleReceiver {
    shared: Arc<Shared>,
}

impl SampleFeed {
    pub fn channel(depth: usize) -> (SampleFeed, SampleReceiver) {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                signals: VecDeque::new(),
                feeds: 1,
                consumer_alive: true,
            }),
            ready: Notify::new(),
            depth: depth.max(1),
            dropped: Arc::new(AtomicU64::new(0)),
        });
        let feed = SampleFeed { shared: shared.clone() };
        (feed, SampleReceiver { shared })
    }

    /// Returns false once the consumer is gone.
    pub fn push_sample(&self, heart_rate: u8) -> bool {
        self.push(SourceSignal::Sample(heart_rate))
    }

    pub fn push_malformed(&self, err: DecodeError) -> bool {
        self.push(SourceSignal::Malformed(err))
    }

    fn push(&self, signal: SourceSignal) -> bool {
        let mut queue = self.shared.lock();
        if !queue.consumer_alive {
            return false;
        }

        if queue.signals.len() >= self.shared.depth {
            let victim = queue
                .signals
                .iter()
                .position(|s| matches!(s, SourceSignal::Sample(_)))
                .or_else(|| queue.signals.iter().position(|s| matches!(s, SourceSignal::Malformed(_))));
            match victim.and_then(|index| queue.signals.remove(index)) {
                Some(SourceSignal::Sample(heart_rate)) => {
                    let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!("Consumer is behind, dropped {heart_rate} bpm ({dropped} dropped so far)");
                }
                Some(evicted) => debug!("Consumer is behind, dropped {evicted:?}"),
                None => {}
            }
        }

        queue.signals.push_back(signal);
        drop(queue);
        self.shared.ready.notify_one();
        true
    }

    /// Terminal signals are never evicted and ignore the depth.
    pub fn finish(&self, signal: SourceSignal) {
        let mut queue = self.shared.lock();
        if queue.consumer_alive {
            queue.signals.push_back(signal);
        }
        drop(queue);
        self.shared.ready.notify_one();
    }

    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        self.shared.dropped.clone()
    }

    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Clone for SampleFeed {
    fn clone(&self) -> Self {
        self.shared.lock().feeds += 1;
        SampleFeed {
            shared: self.shared.clone(),
        }
    }
}

impl Drop for SampleFeed {
    fn drop(&mut self) {
        let mut queue = self.shared.lock();
        queue.feeds -= 1;
        let last = queue.feeds == 0;
        drop(queue);
        if last {
            self.shared.ready.notify_one();
        }
    }
}

impl SampleReceiver {
    /// Next signal in arrival order; `None` once every feed is dropped and the queue is empty.
    pub async fn recv(&mut self) -> Option<SourceSignal> {
        loop {
            {
                let mut queue = self.shared.lock();
                if let Some(signal) = queue.signals.pop_front() {
                    return Some(signal);
                }
                if queue.feeds == 0 {
                    return None;
                }
            }
            self.shared.ready.notified().await;
        }
    }

    pub fn try_recv(&mut self) -> Option<SourceSignal> {
        self.shared.lock().signals.pop_front()
    }
}

impl Drop for SampleReceiver {
    fn drop(&mut self) {
        let mut queue = self.shared.lock();
        queue.consumer_alive = false;
        queue.signals.clear();
    }
}
