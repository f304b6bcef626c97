use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{HeartRateSource, SampleFeed, SourceExit};
use crate::error::SourceError;

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);
pub const MIN_BPM: u8 = 50;
pub const MAX_BPM: u8 = 130;

enum Generator {
    Random(StdRng),
    Sequence(VecDeque<u8>),
}

/// Emits one sample per interval, the first one immediately.
pub struct SimulatedSource {
    interval: Duration,
    generator: Generator,
}

impl SimulatedSource {
    /// Uniform samples in `MIN_BPM..=MAX_BPM`.
    pub fn random(interval: Duration) -> Self {
        SimulatedSource {
            interval,
            generator: Generator::Random(StdRng::from_entropy()),
        }
    }

    pub fn seeded(interval: Duration, seed: u64) -> Self {
        SimulatedSource {
            interval,
            generator: Generator::Random(StdRng::seed_from_u64(seed)),
        }
    }

    /// Replays `samples` in order, then exits with `SourceExit::Exhausted`.
    pub fn sequence(interval: Duration, samples: impl IntoIterator<Item = u8>) -> Self {
        SimulatedSource {
            interval,
            generator: Generator::Sequence(samples.into_iter().collect()),
        }
    }

    fn next_sample(&mut self) -> Option<u8> {
        match &mut self.generator {
            Generator::Random(rng) => Some(rng.gen_range(MIN_BPM..=MAX_BPM)),
            Generator::Sequence(samples) => samples.pop_front(),
        }
    }
}

#[async_trait]
impl HeartRateSource for SimulatedSource {
    fn describe(&self) -> String {
        format!("simulated ({:?} interval)", self.interval)
    }

    async fn run(&mut self, feed: SampleFeed, cancel: CancellationToken) -> Result<SourceExit, SourceError> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(SourceExit::Cancelled),
                _ = ticker.tick() => {}
            }

            let Some(heart_rate) = self.next_sample() else {
                return Ok(SourceExit::Exhausted);
            };
            debug!("simulated heartbeat: {heart_rate}");
            if !feed.push_sample(heart_rate) {
                return Ok(SourceExit::Cancelled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceSignal;

    #[test]
    fn random_samples_stay_in_range() {
        let mut source = SimulatedSource::seeded(DEFAULT_INTERVAL, 7);
        let mut seen_min = false;
        let mut seen_max = false;
        for _ in 0..10_000 {
            let hr = source.next_sample().unwrap();
            assert!((MIN_BPM..=MAX_BPM).contains(&hr));
            seen_min |= hr == MIN_BPM;
            seen_max |= hr == MAX_BPM;
        }
        assert!(seen_min && seen_max, "both bounds are inclusive");
    }

    #[tokio::test(start_paused = true)]
    async fn one_sample_per_interval() {
        let (feed, mut rx) = SampleFeed::channel(8);
        let cancel = CancellationToken::new();
        let mut source = SimulatedSource::seeded(DEFAULT_INTERVAL, 1);

        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move { source.run(feed, task_cancel).await });

        tokio::time::sleep(Duration::from_millis(2500)).await;
        cancel.cancel();
        let exit = task.await.unwrap().unwrap();
        assert_eq!(exit, SourceExit::Cancelled);

        let mut received = 0;
        while let Some(signal) = rx.try_recv() {
            assert!(matches!(signal, SourceSignal::Sample(_)));
            received += 1;
        }
        // Ticks at 0, 1000 and 2000 ms.
        assert_eq!(received, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_runs_dry() {
        let (feed, mut rx) = SampleFeed::channel(8);
        let mut source = SimulatedSource::sequence(DEFAULT_INTERVAL, [55, 75, 130]);

        let exit = source.run(feed, CancellationToken::new()).await.unwrap();
        assert_eq!(exit, SourceExit::Exhausted);

        for expected in [55, 75, 130] {
            assert_eq!(rx.recv().await, Some(SourceSignal::Sample(expected)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_emits_nothing() {
        let (feed, mut rx) = SampleFeed::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut source = SimulatedSource::random(DEFAULT_INTERVAL);
        assert_eq!(source.run(feed, cancel).await.unwrap(), SourceExit::Cancelled);
        assert!(rx.recv().await.is_none());
    }
}
