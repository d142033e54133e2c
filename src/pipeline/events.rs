//! Subscriber registry for per-frame and per-second notifications.
//!
//! Each subscriber owns a bounded `flume` channel. Frame subscribers choose
//! how a full channel is handled:
//!
//! - [`Delivery::Block`]: the capture worker waits for room. A slow consumer
//!   therefore stalls frame production, exactly like in-line delivery.
//! - [`Delivery::DropNewest`]: the notification is discarded and counted;
//!   production never waits.
//!
//! Rate subscribers always block; they receive at most one message per
//! second. A subscriber is forgotten once its receiver is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Local};
use flume::{Receiver, Sender, TrySendError};

use crate::capture::frame::FrameSample;

/// Rate channels never need more than a few seconds of slack
pub const RATE_CHANNEL_CAPACITY: usize = 64;

/// One successfully transformed frame
#[derive(Debug, Clone)]
pub struct FrameEvent {
    pub frame: FrameSample,
    pub timestamp: Instant,
    pub sequence: u64,
}

/// Closed FPS window
#[derive(Debug, Clone, Copy)]
pub struct RateUpdate {
    pub fps: f64,
    /// Wall-clock time the window closed
    pub at: DateTime<Local>,
    /// Monotonic counterpart of `at`
    pub instant: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    #[default]
    Block,
    DropNewest,
}

struct Subscriber<T> {
    id: u64,
    tx: Sender<T>,
    delivery: Delivery,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            tx: self.tx.clone(),
            delivery: self.delivery,
        }
    }
}

#[derive(Default)]
pub struct EventHub {
    frames: Mutex<Vec<Subscriber<FrameEvent>>>,
    rates: Mutex<Vec<Subscriber<RateUpdate>>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_frames(&self, capacity: usize, delivery: Delivery) -> Receiver<FrameEvent> {
        let (tx, rx) = flume::bounded(capacity.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.frames).push(Subscriber { id, tx, delivery });
        rx
    }

    pub fn subscribe_rate(&self) -> Receiver<RateUpdate> {
        let (tx, rx) = flume::bounded(RATE_CHANNEL_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.rates).push(Subscriber {
            id,
            tx,
            delivery: Delivery::Block,
        });
        rx
    }

    pub fn emit_frame(&self, event: FrameEvent) {
        let dropped = broadcast(&self.frames, event);
        if dropped > 0 {
            self.dropped.fetch_add(dropped, Ordering::Relaxed);
            metrics::counter!("livefps_notifications_dropped").increment(dropped);
        }
    }

    pub fn emit_rate(&self, update: RateUpdate) {
        broadcast(&self.rates, update);
    }

    /// Frame notifications discarded under [`Delivery::DropNewest`]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.frames).len() + lock(&self.rates).len()
    }

    /// Move every subscriber into a new hub. Emitters still holding this
    /// one reach nobody afterwards.
    pub fn detach(&self) -> EventHub {
        let frames = std::mem::take(&mut *lock(&self.frames));
        let rates = std::mem::take(&mut *lock(&self.rates));
        EventHub {
            frames: Mutex::new(frames),
            rates: Mutex::new(rates),
            next_id: AtomicU64::new(self.next_id.load(Ordering::Relaxed)),
            dropped: AtomicU64::new(self.dropped.load(Ordering::Relaxed)),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Deliver `msg` to every live subscriber and prune disconnected ones.
/// The registry lock is not held while sending, so a blocked send never
/// prevents new subscriptions.
fn broadcast<T: Clone>(registry: &Mutex<Vec<Subscriber<T>>>, msg: T) -> u64 {
    let subscribers = lock(registry).clone();
    if subscribers.is_empty() {
        return 0;
    }

    let mut gone = Vec::new();
    let mut dropped = 0;
    for sub in &subscribers {
        let result = match sub.delivery {
            Delivery::Block => sub.tx.send(msg.clone()).map_err(|_| true),
            Delivery::DropNewest => match sub.tx.try_send(msg.clone()) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err(false),
                Err(TrySendError::Disconnected(_)) => Err(true),
            },
        };
        match result {
            Ok(()) => {}
            Err(true) => gone.push(sub.id),
            Err(false) => dropped += 1,
        }
    }

    if !gone.is_empty() {
        lock(registry).retain(|s| !gone.contains(&s.id));
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    use crate::capture::frame::PixelFormat;

    fn event(sequence: u64) -> FrameEvent {
        FrameEvent {
            frame: FrameSample::new(Bytes::from_static(&[0; 3]), 1, 1, PixelFormat::Rgb24),
            timestamp: Instant::now(),
            sequence,
        }
    }

    #[test]
    fn every_subscriber_gets_every_frame() {
        let hub = EventHub::new();
        let a = hub.subscribe_frames(8, Delivery::Block);
        let b = hub.subscribe_frames(8, Delivery::Block);
        for seq in 1..=3 {
            hub.emit_frame(event(seq));
        }
        let seqs = |rx: &Receiver<FrameEvent>| rx.try_iter().map(|e| e.sequence).collect::<Vec<_>>();
        assert_eq!(seqs(&a), vec![1, 2, 3]);
        assert_eq!(seqs(&b), vec![1, 2, 3]);
    }

    #[test]
    fn drop_newest_counts_overflow() {
        let hub = EventHub::new();
        let rx = hub.subscribe_frames(2, Delivery::DropNewest);
        for seq in 1..=5 {
            hub.emit_frame(event(seq));
        }
        assert_eq!(hub.dropped(), 3);
        assert_eq!(rx.try_iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let hub = EventHub::new();
        let rx = hub.subscribe_frames(1, Delivery::Block);
        let _rate = hub.subscribe_rate();
        assert_eq!(hub.subscriber_count(), 2);
        drop(rx);
        hub.emit_frame(event(1));
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn detached_hub_keeps_subscribers() {
        let old = EventHub::new();
        let frames = old.subscribe_frames(4, Delivery::Block);
        let rates = old.subscribe_rate();

        let hub = old.detach();
        assert_eq!(old.subscriber_count(), 0);
        assert_eq!(hub.subscriber_count(), 2);

        old.emit_frame(event(1));
        assert!(frames.try_recv().is_err());
        hub.emit_frame(event(2));
        assert_eq!(frames.try_recv().unwrap().sequence, 2);
        drop(rates);
    }
}
