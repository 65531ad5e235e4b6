//! Rate-limited hand-off from the reader task to the display.
//!
//! The reader appends decoded text whenever the hardware delivers it; a
//! timer on the display side swaps the buffer out about thirty times a
//! second. Redraw cost is bounded by the timer, not by the input rate.

use crate::monitor::task::PeriodicTask;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Default drain period (~30 Hz).
pub const DEFAULT_DRAIN_PERIOD: Duration = Duration::from_millis(33);

/// Initial buffer reservation.
const INITIAL_CAPACITY: usize = 1 << 20;

#[derive(Debug)]
pub struct UpdateAggregator {
    buffer: Mutex<String>,
}

impl Default for UpdateAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateAggregator {
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(String::with_capacity(INITIAL_CAPACITY)),
        }
    }

    fn buffer(&self) -> MutexGuard<'_, String> {
        self.buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a chunk. Safe to call from any thread at any rate.
    pub fn add_bytes(&self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        self.buffer().push_str(chunk);
    }

    /// Everything appended since the previous drain, in order. The filled
    /// buffer is swapped out for a fresh one sized to the last batch, so the
    /// lock is held only for the swap.
    pub fn drain_and_clear(&self) -> String {
        let mut buffer = self.buffer();
        if buffer.is_empty() {
            return String::new();
        }
        let reserve = buffer.len().min(INITIAL_CAPACITY);
        std::mem::replace(&mut *buffer, String::with_capacity(reserve))
    }

    pub fn is_empty(&self) -> bool {
        self.buffer().is_empty()
    }

    /// Drain every `period` and pass non-empty batches to `consumer`.
    pub fn spawn_drain<F>(self: &Arc<Self>, period: Duration, mut consumer: F) -> PeriodicTask
    where
        F: FnMut(String) + Send + 'static,
    {
        let aggregator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let batch = aggregator.drain_and_clear();
                if !batch.is_empty() {
                    consumer(batch);
                }
            }
        });
        PeriodicTask::new("update-drain", handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_returns_appended_text_once() {
        let agg = UpdateAggregator::new();
        agg.add_bytes("abc");
        agg.add_bytes("");
        agg.add_bytes("def");
        assert_eq!(agg.drain_and_clear(), "abcdef");
        assert!(agg.is_empty());
        assert_eq!(agg.drain_and_clear(), "");
    }

    #[test]
    fn test_drain_swaps_buffer_out() {
        let agg = UpdateAggregator::new();
        agg.add_bytes("first batch");
        let drained = agg.drain_and_clear();
        assert_eq!(drained, "first batch");
        // The initial reservation travels with the batch instead of being copied.
        assert!(drained.capacity() >= INITIAL_CAPACITY);
        assert!(agg.is_empty());

        agg.add_bytes("second");
        assert_eq!(agg.drain_and_clear(), "second");
        assert!(agg.drain_and_clear().is_empty());
    }

    #[test]
    fn test_concurrent_add_and_drain_lose_nothing() {
        const WRITERS: usize = 4;
        const PER_WRITER: usize = 2_000;

        let agg = Arc::new(UpdateAggregator::new());
        let writers: Vec<_> = (0..WRITERS)
            .map(|w| {
                let agg = agg.clone();
                std::thread::spawn(move || {
                    for i in 0..PER_WRITER {
                        agg.add_bytes(&format!("{w}:{i};"));
                    }
                })
            })
            .collect();

        let drainers: Vec<_> = (0..2)
            .map(|_| {
                let agg = agg.clone();
                std::thread::spawn(move || {
                    let mut got = Vec::new();
                    for _ in 0..500 {
                        got.push(agg.drain_and_clear());
                        std::thread::yield_now();
                    }
                    got
                })
            })
            .collect();

        for w in writers {
            w.join().unwrap();
        }
        let mut drained: Vec<String> = drainers
            .into_iter()
            .flat_map(|d| d.join().unwrap())
            .collect();
        drained.push(agg.drain_and_clear());

        let mut per_writer = vec![Vec::new(); WRITERS];
        for token in drained.concat().split(';').filter(|t| !t.is_empty()) {
            let (w, i) = token.split_once(':').unwrap();
            per_writer[w.parse::<usize>().unwrap()].push(i.parse::<usize>().unwrap());
        }
        for mut seen in per_writer {
            assert_eq!(seen.len(), PER_WRITER);
            seen.sort_unstable();
            assert_eq!(seen, (0..PER_WRITER).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_single_drainer_sees_append_order() {
        let agg = Arc::new(UpdateAggregator::new());
        let writer = {
            let agg = agg.clone();
            std::thread::spawn(move || {
                for i in 0..5_000 {
                    agg.add_bytes(&format!("{i},"));
                }
            })
        };
        let mut out = String::new();
        while !writer.is_finished() {
            out.push_str(&agg.drain_and_clear());
        }
        writer.join().unwrap();
        out.push_str(&agg.drain_and_clear());

        let values: Vec<usize> = out
            .split(',')
            .filter(|t| !t.is_empty())
            .map(|t| t.parse().unwrap())
            .collect();
        assert_eq!(values, (0..5_000).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_drain_skips_empty_batches() {
        let agg = Arc::new(UpdateAggregator::new());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let task = agg.spawn_drain(DEFAULT_DRAIN_PERIOD, move |batch| {
            let _ = tx.send(batch);
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        agg.add_bytes("line 1\n");
        agg.add_bytes("line 2\n");
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(rx.recv().await.unwrap(), "line 1\nline 2\n");
        task.stop();
    }
}
