// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receiver registrar: multi-subscriber fan-out with revocable registrations.
//!
//! # Architecture
//!
//! ```text
//! ReceiverRegistrar (one per shared dispatcher entry)
//! +-- receivers: ArcSwap<Vec<(id, Arc<dyn BroadcastReceiver>)>>
//! +-- next_id: AtomicU64
//!
//! Registration (one per register() call)
//! +-- registrar: Weak<RegistrarInner>
//! +-- id: u64
//! ```
//!
//! # Thread Safety
//!
//! - Delivery loads the current receiver list (one atomic load) and iterates
//!   that snapshot without holding any lock, so receivers may register or
//!   unregister from inside `receive()`.
//! - Register/unregister replace the list copy-on-write (`rcu`). Churn is
//!   rare compared to delivery.

use crate::dispatcher::ChannelId;
use crate::receiver::{BroadcastPayload, BroadcastReceiver};
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Registry that fans one payload out to every registered receiver.
pub trait BroadcastReceiverRegistrar: BroadcastReceiver {
    /// Add `receiver` to the fan-out set.
    ///
    /// The returned [`Registration`] removes exactly this receiver when closed
    /// or dropped.
    fn register(&self, receiver: Arc<dyn BroadcastReceiver>) -> Registration;
}

#[derive(Clone)]
struct RegisteredReceiver {
    id: u64,
    receiver: Arc<dyn BroadcastReceiver>,
}

struct RegistrarInner {
    channel: ChannelId,
    receivers: ArcSwap<Vec<RegisteredReceiver>>,
    next_id: AtomicU64,
}

impl RegistrarInner {
    fn unregister(&self, id: u64) {
        self.receivers.rcu(|current| {
            current
                .iter()
                .filter(|r| r.id != id)
                .cloned()
                .collect::<Vec<_>>()
        });
        log::debug!(
            "[Registrar] Unregistered receiver #{} from channel '{}'",
            id,
            self.channel
        );
    }
}

/// Thread-safe fan-out set of [`BroadcastReceiver`]s.
///
/// Cloning is cheap and yields a handle to the same set.
#[derive(Clone)]
pub struct ReceiverRegistrar {
    inner: Arc<RegistrarInner>,
}

impl ReceiverRegistrar {
    /// Create an empty registrar for `channel`.
    pub fn new(channel: ChannelId) -> Self {
        Self {
            inner: Arc::new(RegistrarInner {
                channel,
                receivers: ArcSwap::from_pointee(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Channel this registrar serves.
    pub fn channel(&self) -> &ChannelId {
        &self.inner.channel
    }

    /// Number of currently registered receivers.
    pub fn len(&self) -> usize {
        self.inner.receivers.load().len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `payload` to every registered receiver with panic isolation.
    ///
    /// Returns the number of receivers that panicked.
    pub fn deliver(&self, payload: &BroadcastPayload) -> usize {
        let snapshot = self.inner.receivers.load_full();
        let mut errors = 0;

        for registered in snapshot.iter() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                registered.receiver.receive(payload);
            }));

            if result.is_err() {
                errors += 1;
                log::warn!(
                    "[Registrar] Receiver #{} on channel '{}' panicked during delivery",
                    registered.id,
                    self.inner.channel
                );
            }
        }

        errors
    }
}

impl BroadcastReceiver for ReceiverRegistrar {
    fn receive(&self, payload: &BroadcastPayload) {
        self.deliver(payload);
    }
}

impl BroadcastReceiverRegistrar for ReceiverRegistrar {
    fn register(&self, receiver: Arc<dyn BroadcastReceiver>) -> Registration {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = RegisteredReceiver { id, receiver };

        self.inner.receivers.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(entry.clone());
            next
        });

        log::debug!(
            "[Registrar] Registered receiver #{} on channel '{}'",
            id,
            self.inner.channel
        );

        Registration {
            registrar: Arc::downgrade(&self.inner),
            id,
            closed: AtomicBool::new(false),
        }
    }
}

impl std::fmt::Debug for ReceiverRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverRegistrar")
            .field("channel", &self.inner.channel)
            .field("receivers", &self.len())
            .finish()
    }
}

/// Token returned by [`BroadcastReceiverRegistrar::register`].
///
/// When closed or dropped, removes its receiver from the registrar.
pub struct Registration {
    registrar: Weak<RegistrarInner>,
    id: u64,
    closed: AtomicBool,
}

impl Registration {
    /// Remove the receiver. Repeated calls are no-ops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registrar) = self.registrar.upgrade() {
            registrar.unregister(self.id);
        }
    }

    /// True once `close()` ran (or the handle was dropped).
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
