// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dispatcher sharing layer.
//!
//! Many logical endpoints open the same channel id (one per broker acceptor,
//! one per discovery group, ...). They all share a single transport
//! dispatcher, reference counted, together with the receiver registrar the
//! transport delivers into.
//!
//! # Thread Safety
//!
//! ```text
//! entries: DashMap<ChannelId, Arc<Mutex<Slot>>>
//!                                  |
//!                                  +-- shared: Option<SharedEntry{dispatcher, registrar, refs}>
//!                                  +-- retired: bool
//! ```
//!
//! - The map's shard lock is only held to find or insert a slot, never
//!   across a transport call. Shard guards are dropped before a slot is
//!   locked, so slot locks never nest inside shard locks.
//! - Create/reference/release/destroy for one channel id run under that id's
//!   slot lock. Two first opens never create two dispatchers, and a release
//!   that drops the count to zero closes the dispatcher, retires the slot and
//!   unmaps it before any waiting open proceeds. Openers that find a retired
//!   slot go back to the map for a fresh one.
//! - The transport is called with the slot lock held. A facade must not call
//!   back into this layer for the same channel id from
//!   `create_command_dispatcher` or `close`.

use super::{ChannelId, CommandDispatcher, CommandDispatcherFactory, Delivery, MemberId};
use crate::command::BroadcastCommand;
use crate::config::BroadcastConfig;
use crate::error::{DispatchError, Error, Result};
use crate::receiver::BroadcastReceiver;
use crate::registrar::{BroadcastReceiverRegistrar, ReceiverRegistrar, Registration};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// One live transport dispatcher and everything sharing it.
struct SharedEntry {
    dispatcher: Arc<dyn CommandDispatcher>,
    registrar: ReceiverRegistrar,
    references: usize,
}

/// Per channel id serialization point.
#[derive(Default)]
struct Slot {
    shared: Option<SharedEntry>,
    /// Unmapped (or about to be); lockers must fetch a fresh slot.
    retired: bool,
}

/// Reference-counted sharing of transport dispatchers, keyed by channel id.
pub struct ConcurrentBroadcastCommandDispatcherFactory {
    facade: Arc<dyn CommandDispatcherFactory>,
    config: BroadcastConfig,
    entries: DashMap<ChannelId, Arc<Mutex<Slot>>>,
    live: AtomicUsize,
}

impl ConcurrentBroadcastCommandDispatcherFactory {
    /// Wrap a group dispatch facade.
    ///
    /// # Errors
    /// [`Error::Config`] if `config` does not validate.
    pub fn new(
        facade: Arc<dyn CommandDispatcherFactory>,
        config: BroadcastConfig,
    ) -> Result<Arc<Self>> {
        config
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(Arc::new(Self::build(facade, config)))
    }

    /// Wrap a facade with [`BroadcastConfig::default`].
    pub fn with_defaults(facade: Arc<dyn CommandDispatcherFactory>) -> Arc<Self> {
        Arc::new(Self::build(facade, BroadcastConfig::default()))
    }

    fn build(facade: Arc<dyn CommandDispatcherFactory>, config: BroadcastConfig) -> Self {
        Self {
            facade,
            config,
            entries: DashMap::new(),
            live: AtomicUsize::new(0),
        }
    }

    /// Configuration applied to every endpoint on this layer.
    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    /// This member's identity in the group.
    pub fn local_member(&self) -> MemberId {
        self.facade.local_member()
    }

    /// Get the dispatcher for `id`, creating it on first use.
    ///
    /// Every call adds one reference; the returned handle removes it when
    /// closed or dropped. The transport dispatcher is closed when the last
    /// reference goes away. The transport receives the channel's registrar
    /// as its command context.
    ///
    /// Blocks while another thread creates or closes the dispatcher for the
    /// same id; other ids are not affected.
    ///
    /// # Errors
    /// Transport creation failure. Nothing is cached, the next call retries.
    pub fn create_command_dispatcher(
        self: &Arc<Self>,
        id: &ChannelId,
    ) -> std::result::Result<SharedCommandDispatcher, DispatchError> {
        let (dispatcher, registrar) = loop {
            let slot = self.slot_or_insert(id);
            let mut guard = slot.lock();
            if guard.retired {
                continue;
            }

            if let Some(entry) = guard.shared.as_mut() {
                entry.references += 1;
                log::debug!(
                    "[SharedDispatcher] Reusing dispatcher for '{}' (refs={})",
                    id,
                    entry.references
                );
                break (Arc::clone(&entry.dispatcher), entry.registrar.clone());
            }

            let registrar = ReceiverRegistrar::new(id.clone());
            let context: Arc<dyn BroadcastReceiver> = Arc::new(registrar.clone());
            let dispatcher = match self.facade.create_command_dispatcher(id, context) {
                Ok(dispatcher) => dispatcher,
                Err(e) => {
                    self.retire(id, &slot, &mut guard);
                    return Err(e);
                }
            };

            log::info!("[SharedDispatcher] Created dispatcher for channel '{}'", id);

            guard.shared = Some(SharedEntry {
                dispatcher: Arc::clone(&dispatcher),
                registrar: registrar.clone(),
                references: 1,
            });
            self.live.fetch_add(1, Ordering::AcqRel);
            break (dispatcher, registrar);
        };

        Ok(SharedCommandDispatcher {
            factory: Arc::clone(self),
            id: id.clone(),
            dispatcher,
            registrar,
            delivery: Delivery::from_self_delivery(self.config.self_delivery),
            released: AtomicBool::new(false),
        })
    }

    /// Drop one reference; close the transport dispatcher at zero.
    fn release(&self, id: &ChannelId) -> std::result::Result<(), DispatchError> {
        let Some(slot) = self.slot(id) else {
            log::debug!(
                "[SharedDispatcher] Release for unknown channel '{}' ignored",
                id
            );
            return Ok(());
        };

        let mut guard = slot.lock();
        let Some(entry) = guard.shared.as_mut() else {
            return Ok(());
        };

        entry.references = entry.references.saturating_sub(1);
        if entry.references > 0 {
            log::debug!(
                "[SharedDispatcher] Released reference on '{}' (refs={})",
                id,
                entry.references
            );
            return Ok(());
        }

        // Close while still holding the slot lock: a concurrent open for the
        // same id waits, finds the slot retired and creates a fresh dispatcher.
        let result = entry.dispatcher.close();
        guard.shared = None;
        self.live.fetch_sub(1, Ordering::AcqRel);
        self.retire(id, &slot, &mut guard);

        match &result {
            Ok(()) => log::info!("[SharedDispatcher] Closed dispatcher for channel '{}'", id),
            Err(e) => log::warn!(
                "[SharedDispatcher] Dispatcher for channel '{}' failed to close: {}",
                id,
                e
            ),
        }
        result
    }

    fn slot(&self, id: &ChannelId) -> Option<Arc<Mutex<Slot>>> {
        self.entries.get(id).map(|slot| Arc::clone(slot.value()))
    }

    fn slot_or_insert(&self, id: &ChannelId) -> Arc<Mutex<Slot>> {
        let slot = self.entries.entry(id.clone()).or_default();
        Arc::clone(slot.value())
    }

    /// Unmap `slot` (and only `slot`) for `id`. Caller holds its lock.
    fn retire(&self, id: &ChannelId, slot: &Arc<Mutex<Slot>>, guard: &mut Slot) {
        guard.retired = true;
        self.entries
            .remove_if(id, |_, mapped| Arc::ptr_eq(mapped, slot));
    }

    /// Live references on `id` (0 when no dispatcher exists).
    pub fn reference_count(&self, id: &ChannelId) -> usize {
        let Some(slot) = self.slot(id) else {
            return 0;
        };
        let guard = slot.lock();
        guard.shared.as_ref().map_or(0, |e| e.references)
    }

    /// Number of live transport dispatchers.
    pub fn dispatcher_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Registered receivers on `id` (0 when no dispatcher exists).
    pub fn receiver_count(&self, id: &ChannelId) -> usize {
        let Some(slot) = self.slot(id) else {
            return 0;
        };
        let guard = slot.lock();
        guard.shared.as_ref().map_or(0, |e| e.registrar.len())
    }
}

impl std::fmt::Debug for ConcurrentBroadcastCommandDispatcherFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentBroadcastCommandDispatcherFactory")
            .field("config", &self.config)
            .field("dispatchers", &self.dispatcher_count())
            .finish()
    }
}

/// One counted reference on a shared transport dispatcher.
///
/// When closed or dropped, releases its reference.
pub struct SharedCommandDispatcher {
    factory: Arc<ConcurrentBroadcastCommandDispatcherFactory>,
    id: ChannelId,
    dispatcher: Arc<dyn CommandDispatcher>,
    registrar: ReceiverRegistrar,
    delivery: Delivery,
    released: AtomicBool,
}

impl SharedCommandDispatcher {
    /// Channel this handle is bound to.
    pub fn channel_id(&self) -> &ChannelId {
        &self.id
    }

    /// Dispatch `command` to the group using the configured self-delivery policy.
    pub fn execute_on_group(
        &self,
        command: &BroadcastCommand,
    ) -> std::result::Result<(), DispatchError> {
        self.ensure_open()?;
        self.dispatcher.execute_on_group(command, self.delivery)
    }

    /// Dispatch `command` to one member.
    pub fn execute_on_member(
        &self,
        command: &BroadcastCommand,
        member: &MemberId,
    ) -> std::result::Result<(), DispatchError> {
        self.ensure_open()?;
        self.dispatcher.execute_on_member(command, member)
    }

    /// Subscribe `receiver` to this channel's deliveries.
    pub fn register(&self, receiver: Arc<dyn BroadcastReceiver>) -> Registration {
        self.registrar.register(receiver)
    }

    /// Release this reference. Repeated calls are no-ops.
    ///
    /// # Errors
    /// The transport close failure, when this was the last reference.
    pub fn close(&self) -> std::result::Result<(), DispatchError> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.factory.release(&self.id)
    }

    /// True once this reference was released.
    pub fn is_closed(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> std::result::Result<(), DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::Closed(self.id.clone()));
        }
        Ok(())
    }
}

impl Drop for SharedCommandDispatcher {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!(
                "[SharedDispatcher] Error releasing '{}' on drop: {}",
                self.id,
                e
            );
        }
    }
}

impl std::fmt::Debug for SharedCommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCommandDispatcher")
            .field("id", &self.id)
            .field("delivery", &self.delivery)
            .field("closed", &self.is_closed())
            .finish()
    }
}
