// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Queue-backed broadcast receiver with blocking and timed takes.
//!
//! One [`QueueBroadcastManager`] backs each open receiving endpoint. Incoming
//! payloads go into an unbounded crossbeam channel; callers take them one at a
//! time in FIFO order. Several concurrent takers compete for distinct items.
//!
//! # Cancellation
//!
//! Blocked takers also select on a wake-up channel. [`interrupt`] swaps that
//! channel for a fresh one, which disconnects the old one and wakes every
//! thread currently waiting on it without consuming any payload. Later takes
//! are not affected.
//!
//! [`interrupt`]: QueueBroadcastManager::interrupt

use crate::error::QueueError;
use crate::receiver::{BroadcastPayload, BroadcastReceiver};
use crossbeam::channel::{self, select, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Wake-up pair. Dropping `_trigger` disconnects every clone of `signal`.
struct Wakeup {
    _trigger: Sender<()>,
    signal: Receiver<()>,
}

impl Wakeup {
    fn new() -> Self {
        let (trigger, signal) = channel::bounded(0);
        Self {
            _trigger: trigger,
            signal,
        }
    }
}

/// Unbounded FIFO buffer of broadcast payloads.
pub struct QueueBroadcastManager {
    tx: Sender<BroadcastPayload>,
    rx: Receiver<BroadcastPayload>,
    wakeup: Mutex<Wakeup>,
    closed: AtomicBool,
}

impl QueueBroadcastManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            tx,
            rx,
            wakeup: Mutex::new(Wakeup::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Take the oldest payload, blocking until one is available.
    ///
    /// # Errors
    /// - [`QueueError::Interrupted`] if [`interrupt`](Self::interrupt) was called while waiting
    /// - [`QueueError::Closed`] if the manager is (or becomes) closed
    pub fn get_broadcast(&self) -> Result<BroadcastPayload, QueueError> {
        let signal = self.arm()?;

        select! {
            recv(self.rx) -> msg => msg.map_err(|_| QueueError::Closed),
            recv(signal) -> _ => Err(self.wake_reason()),
        }
    }

    /// Take the oldest payload, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time. A zero timeout polls.
    pub fn get_broadcast_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<BroadcastPayload>, QueueError> {
        let signal = self.arm()?;

        select! {
            recv(self.rx) -> msg => msg.map(Some).map_err(|_| QueueError::Closed),
            recv(signal) -> _ => Err(self.wake_reason()),
            default(timeout) => Ok(None),
        }
    }

    /// Take the oldest payload without waiting.
    pub fn try_get_broadcast(&self) -> Option<BroadcastPayload> {
        if self.is_closed() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Discard every queued payload. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            log::debug!("[QueueManager] Cleared {} pending broadcasts", dropped);
        }
        dropped
    }

    /// Wake every thread currently blocked in a take.
    ///
    /// Woken threads get [`QueueError::Interrupted`] (or [`QueueError::Closed`]
    /// after [`close`](Self::close)). Nothing is consumed.
    pub fn interrupt(&self) {
        *self.wakeup.lock() = Wakeup::new();
    }

    /// Permanently close the manager: drop the backlog, reject new payloads
    /// and wake blocked takers.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.clear();
        self.interrupt();
    }

    /// True once [`close`](Self::close) ran.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of queued payloads.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    // The signal is cloned before the closed check so that a concurrent
    // close() either is observed here or disconnects the clone we hold.
    fn arm(&self) -> Result<Receiver<()>, QueueError> {
        let signal = self.wakeup.lock().signal.clone();
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        Ok(signal)
    }

    fn wake_reason(&self) -> QueueError {
        if self.is_closed() {
            QueueError::Closed
        } else {
            QueueError::Interrupted
        }
    }
}

impl Default for QueueBroadcastManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastReceiver for QueueBroadcastManager {
    fn receive(&self, payload: &BroadcastPayload) {
        if self.is_closed() {
            log::trace!("[QueueManager] Dropping broadcast for closed queue");
            return;
        }
        // Cannot fail: `rx` lives as long as `self`.
        let _ = self.tx.send(BroadcastPayload::clone(payload));
        log::trace!("[QueueManager] Queued broadcast ({} bytes)", payload.len());
    }
}

impl std::fmt::Debug for QueueBroadcastManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueBroadcastManager")
            .field("pending", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn payload(bytes: &[u8]) -> BroadcastPayload {
        Arc::from(bytes)
    }

    #[test]
    fn test_fifo_order() {
        let manager = QueueBroadcastManager::new();
        manager.receive(&payload(&[1]));
        manager.receive(&payload(&[2]));
        manager.receive(&payload(&[3]));
        assert_eq!(manager.len(), 3);

        assert_eq!(&manager.get_broadcast().unwrap()[..], &[1]);
        assert_eq!(&manager.get_broadcast().unwrap()[..], &[2]);
        assert_eq!(&manager.get_broadcast().unwrap()[..], &[3]);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_zero_timeout_on_empty_queue() {
        let manager = QueueBroadcastManager::new();
        let start = Instant::now();
        let result = manager.get_broadcast_timeout(Duration::ZERO).unwrap();
        assert!(result.is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_timeout_elapses() {
        let manager = QueueBroadcastManager::new();
        let start = Instant::now();
        let result = manager
            .get_broadcast_timeout(Duration::from_millis(50))
            .unwrap();
        let elapsed = start.elapsed();

        assert!(result.is_none());
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[test]
    fn test_blocking_take_wakes_on_receive() {
        let manager = Arc::new(QueueBroadcastManager::new());
        let taker = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.get_broadcast())
        };

        thread::sleep(Duration::from_millis(20));
        manager.receive(&payload(&[4, 2]));

        let taken = taker.join().unwrap().unwrap();
        assert_eq!(&taken[..], &[4, 2]);
    }

    #[test]
    fn test_interrupt_wakes_blocked_taker_without_consuming() {
        let manager = Arc::new(QueueBroadcastManager::new());
        let taker = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.get_broadcast())
        };

        // An interrupt issued before the taker blocks is not sticky, so keep
        // interrupting until it returns.
        while !taker.is_finished() {
            manager.interrupt();
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(taker.join().unwrap(), Err(QueueError::Interrupted));

        // Interrupt is not sticky
        manager.receive(&payload(&[1]));
        assert_eq!(&manager.get_broadcast().unwrap()[..], &[1]);
    }

    #[test]
    fn test_clear_discards_backlog() {
        let manager = QueueBroadcastManager::new();
        manager.receive(&payload(&[1]));
        manager.receive(&payload(&[2]));

        assert_eq!(manager.clear(), 2);
        assert!(manager.is_empty());
        assert_eq!(manager.try_get_broadcast(), None);

        // Still usable after clear
        manager.receive(&payload(&[3]));
        assert_eq!(&manager.try_get_broadcast().unwrap()[..], &[3]);
    }

    #[test]
    fn test_close_rejects_and_wakes() {
        let manager = Arc::new(QueueBroadcastManager::new());
        manager.receive(&payload(&[1]));
        manager.receive(&payload(&[2]));
        assert_eq!(&manager.get_broadcast().unwrap()[..], &[1]);

        manager.close();
        assert!(manager.is_empty());

        manager.receive(&payload(&[3]));
        assert!(manager.is_empty());
        assert_eq!(manager.get_broadcast(), Err(QueueError::Closed));
        assert_eq!(
            manager.get_broadcast_timeout(Duration::from_millis(10)),
            Err(QueueError::Closed)
        );
    }

    #[test]
    fn test_close_wakes_blocked_taker() {
        let manager = Arc::new(QueueBroadcastManager::new());
        let taker = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.get_broadcast())
        };

        thread::sleep(Duration::from_millis(20));
        manager.close();

        assert_eq!(taker.join().unwrap(), Err(QueueError::Closed));
    }

    #[test]
    fn test_competing_takers_get_distinct_items() {
        const ITEMS: usize = 200;
        let manager = Arc::new(QueueBroadcastManager::new());

        let takers: Vec<_> = (0..4)
            .map(|_| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || {
                    let mut taken = Vec::new();
                    while let Ok(Some(p)) =
                        manager.get_broadcast_timeout(Duration::from_millis(200))
                    {
                        taken.push(u16::from_be_bytes([p[0], p[1]]));
                    }
                    taken
                })
            })
            .collect();

        for i in 0..ITEMS as u16 {
            manager.receive(&payload(&i.to_be_bytes()));
        }

        let mut all: Vec<u16> = takers
            .into_iter()
            .flat_map(|t| t.join().unwrap())
            .collect();
        all.sort_unstable();

        let expected: Vec<u16> = (0..ITEMS as u16).collect();
        assert_eq!(all, expected);
    }
}
