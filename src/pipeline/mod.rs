// Copyright (c) 2026 QuakeWatch Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/quakewatch/quakewatch-rs

//! Dual-stage pipeline: bounded queues between the sampler and the sink.
//!
//! The producer side never blocks: on a full queue the NEW message is
//! dropped and counted, so the real-time sampler keeps its cadence no
//! matter how slow the consumers are. The consumer side dequeues with a
//! short timeout so it can interleave periodic work. That asymmetry gives
//! the sampler strict priority.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::record::{SeismicRecord, SystemEvent};

/// Sample queue capacity.
pub const SAMPLE_QUEUE_CAPACITY: usize = 50;

/// Event queue capacity.
pub const EVENT_QUEUE_CAPACITY: usize = 20;

/// Consumer-side dequeue timeout.
pub const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(10);

/// Message types carried on the event queue.
///
/// The full record travels with the event so ownership transfers cleanly
/// to the sink; compact broadcast tuples are derived there.
#[derive(Debug)]
pub enum SinkEvent {
    /// A validated seismic record
    Seismic(SeismicRecord),
    /// A system event produced in the sampler domain
    System(SystemEvent),
}

/// Create a bounded queue pair with drop accounting.
pub fn channel<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        Producer {
            tx,
            offered: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        },
        Consumer { rx },
    )
}

/// Non-blocking producer handle. Cloneable so telemetry can read the
/// queue statistics without touching the consumer.
pub struct Producer<T> {
    tx: mpsc::Sender<T>,
    offered: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            offered: self.offered.clone(),
            dropped: self.dropped.clone(),
        }
    }
}

impl<T> Producer<T> {
    /// Try to enqueue without blocking. On a full queue the item is
    /// dropped (drop-new) and false is returned.
    pub fn offer(&self, item: T) -> bool {
        self.offered.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Total enqueue attempts since creation.
    pub fn offered(&self) -> u64 {
        self.offered.load(Ordering::Relaxed)
    }

    /// Total messages dropped on a full queue since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Messages currently waiting in the queue.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Sink-side consumer handle.
pub struct Consumer<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> Consumer<T> {
    /// Dequeue with a timeout; `None` when nothing arrived in time or the
    /// producer side is gone.
    pub async fn poll(&mut self, timeout: Duration) -> Option<T> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Dequeue without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

/// Result of a completed drop-rate window.
#[derive(Debug, Clone, Copy)]
pub struct DropRate {
    /// Dropped share of offered messages over the window, in percent
    pub percent: f64,
    /// Whether the back-pressure threshold was exceeded
    pub exceeded: bool,
}

/// Sliding-window drop-rate tracker driving the back-pressure signal.
pub struct DropRateMonitor {
    window_ms: u64,
    threshold_percent: f64,
    last_mono: u64,
    last_offered: u64,
    last_dropped: u64,
}

impl DropRateMonitor {
    /// Track drops over `window_ms` against a percentage threshold.
    pub fn new(window_ms: u64, threshold_percent: f64) -> Self {
        Self {
            window_ms,
            threshold_percent,
            last_mono: 0,
            last_offered: 0,
            last_dropped: 0,
        }
    }

    /// Feed the current totals; returns the window result each time a
    /// window completes.
    pub fn tick(&mut self, now_mono: u64, offered: u64, dropped: u64) -> Option<DropRate> {
        if now_mono.saturating_sub(self.last_mono) < self.window_ms {
            return None;
        }
        let offered_delta = offered.saturating_sub(self.last_offered);
        let dropped_delta = dropped.saturating_sub(self.last_dropped);
        self.last_mono = now_mono;
        self.last_offered = offered;
        self.last_dropped = dropped;

        if offered_delta == 0 {
            return None;
        }
        let percent = dropped_delta as f64 / offered_delta as f64 * 100.0;
        Some(DropRate {
            percent,
            exceeded: percent > self.threshold_percent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_delivers_in_order() {
        let (tx, mut rx) = channel::<u32>(8);
        for i in 0..5 {
            assert!(tx.offer(i));
        }
        for i in 0..5 {
            assert_eq!(rx.poll(DEQUEUE_TIMEOUT).await, Some(i));
        }
        assert_eq!(rx.poll(Duration::from_millis(1)).await, None);
    }

    #[tokio::test]
    async fn test_full_queue_drops_new_messages() {
        let (tx, mut rx) = channel::<u32>(2);
        assert!(tx.offer(1));
        assert!(tx.offer(2));
        // Queue full: the new message is the one dropped.
        assert!(!tx.offer(3));
        assert_eq!(tx.dropped(), 1);
        assert_eq!(tx.offered(), 3);

        assert_eq!(rx.poll(DEQUEUE_TIMEOUT).await, Some(1));
        assert_eq!(rx.poll(DEQUEUE_TIMEOUT).await, Some(2));
        assert_eq!(rx.try_recv(), None);
    }

    #[tokio::test]
    async fn test_depth_tracks_queued_messages() {
        let (tx, mut rx) = channel::<u32>(4);
        assert_eq!(tx.depth(), 0);
        tx.offer(1);
        tx.offer(2);
        assert_eq!(tx.depth(), 2);
        rx.poll(DEQUEUE_TIMEOUT).await;
        assert_eq!(tx.depth(), 1);
    }

    #[test]
    fn test_drop_rate_monitor_thresholds() {
        let mut mon = DropRateMonitor::new(10_000, 1.0);
        // First window baseline.
        assert!(mon.tick(0, 0, 0).is_none());

        // 2% drop rate over the window: exceeded.
        let rate = mon.tick(10_000, 1000, 20).unwrap();
        assert!(rate.exceeded);
        assert!((rate.percent - 2.0).abs() < 1e-9);

        // Next window clean: recovered.
        let rate = mon.tick(20_000, 2000, 20).unwrap();
        assert!(!rate.exceeded);
        assert_eq!(rate.percent, 0.0);
    }

    #[test]
    fn test_drop_rate_monitor_respects_window() {
        let mut mon = DropRateMonitor::new(10_000, 1.0);
        mon.tick(10_000, 100, 0);
        assert!(mon.tick(15_000, 200, 50).is_none());
        assert!(mon.tick(20_000, 200, 50).is_some());
    }
}
