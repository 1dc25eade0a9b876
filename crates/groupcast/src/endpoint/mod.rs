// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broadcast endpoints over shared group command dispatchers.
//!
//! An endpoint is opened either as a broadcaster (publishes payloads to the
//! group) or as a receiver (buffers payloads from the group in a private
//! [`QueueBroadcastManager`]). Both directions obtain their dispatcher from
//! the channel's [`ConcurrentBroadcastCommandDispatcherFactory`], so any
//! number of endpoints on one channel id share one transport dispatcher.
//!
//! # Lifecycle
//!
//! The mode lives in an atomic tagged-state cell. Opening and closing are
//! claimed by compare-and-set; a losing open is a silent no-op and so is
//! closing an endpoint that is not open. Every exit from a transient state
//! happens under the session lock and is announced on a condvar:
//!
//! - an open publishes its session together with the new mode, so a close
//!   that observes an open mode always finds it;
//! - a close hands the session over and stores `CLOSED` before releasing
//!   transport resources, so an open issued meanwhile starts a new session;
//! - a close issued while an open is still acquiring waits for that open to
//!   settle, then tears it down.

mod factory;
mod mode;

pub use factory::CommandDispatcherBroadcastEndpointFactory;
pub use mode::EndpointMode;

use crate::command::BroadcastCommand;
use crate::dispatcher::{
    ChannelId, ConcurrentBroadcastCommandDispatcherFactory, SharedCommandDispatcher,
};
use crate::error::{DispatchError, Error, QueueError, Result};
use crate::queue::QueueBroadcastManager;
use crate::receiver::{BroadcastPayload, BroadcastReceiver};
use crate::registrar::Registration;
use mode::{CloseStart, ModeCell};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// Operations offered by a broadcast discovery endpoint.
pub trait BroadcastEndpoint: Send + Sync {
    /// Open as a receiver. No-op unless closed.
    fn open_client(&self) -> Result<()>;

    /// Open as a broadcaster. No-op unless closed.
    fn open_broadcaster(&self) -> Result<()>;

    /// Close the endpoint. No-op when closed.
    ///
    /// If an open is in flight, waits for it and closes what it opened. On
    /// return the endpoint holds no dispatcher reference.
    fn close(&self) -> Result<()>;

    /// Publish `payload` to the group. Ignored unless open as a broadcaster.
    fn broadcast(&self, payload: BroadcastPayload) -> Result<()>;

    /// Take the next payload, blocking until one arrives.
    ///
    /// `Ok(None)` unless open as a receiver, or once the endpoint is closed
    /// while waiting.
    fn receive_broadcast(&self) -> Result<Option<BroadcastPayload>>;

    /// Take the next payload, waiting at most `timeout`.
    fn receive_broadcast_timeout(&self, timeout: Duration) -> Result<Option<BroadcastPayload>>;
}

struct ReceiveSide {
    queue: Arc<QueueBroadcastManager>,
    registration: Registration,
}

/// Resources held while an endpoint is open.
struct Session {
    dispatcher: Arc<SharedCommandDispatcher>,
    receiver: Option<ReceiveSide>,
}

/// Broadcast endpoint backed by a shared command dispatcher.
pub struct CommandDispatcherBroadcastEndpoint {
    factory: Arc<ConcurrentBroadcastCommandDispatcherFactory>,
    channel: ChannelId,
    mode: ModeCell,
    session: Mutex<Option<Session>>,
    settled: Condvar,
}

impl CommandDispatcherBroadcastEndpoint {
    /// Create a closed endpoint for `channel`.
    pub fn new(
        factory: Arc<ConcurrentBroadcastCommandDispatcherFactory>,
        channel: ChannelId,
    ) -> Self {
        Self {
            factory,
            channel,
            mode: ModeCell::new(),
            session: Mutex::new(None),
            settled: Condvar::new(),
        }
    }

    /// Channel this endpoint is bound to.
    pub fn channel_id(&self) -> &ChannelId {
        &self.channel
    }

    /// Current mode.
    pub fn mode(&self) -> EndpointMode {
        self.mode.load()
    }

    /// Payloads waiting to be taken (0 unless open as a receiver).
    pub fn pending_broadcasts(&self) -> usize {
        self.receiving_queue().map_or(0, |queue| queue.len())
    }

    /// Wake threads blocked in `receive_broadcast()` without closing.
    ///
    /// They return [`Error::Interrupted`]; no payload is consumed.
    pub fn interrupt(&self) {
        if let Some(queue) = self.receiving_queue() {
            queue.interrupt();
        }
    }

    fn open(&self, target: EndpointMode) -> Result<()> {
        while !self.mode.begin_open() {
            if !self.mode.is_closing() {
                log::debug!(
                    "[Endpoint] Open as {:?} on '{}' ignored (mode={:?})",
                    target,
                    self.channel,
                    self.mode.load()
                );
                return Ok(());
            }
            // A close is handing its session over; it finishes under the lock
            let mut guard = self.session.lock();
            while self.mode.is_closing() {
                self.settled.wait(&mut guard);
            }
        }

        let session = match self.acquire(target) {
            Ok(session) => session,
            Err(e) => {
                {
                    let _guard = self.session.lock();
                    self.mode.abort_open();
                }
                self.settled.notify_all();
                log::debug!(
                    "[Endpoint] Open as {:?} on '{}' failed: {}",
                    target,
                    self.channel,
                    e
                );
                return Err(e.into());
            }
        };

        {
            let mut guard = self.session.lock();
            *guard = Some(session);
            self.mode.finish_open(target);
        }
        self.settled.notify_all();
        log::debug!("[Endpoint] '{}' CLOSED -> {:?}", self.channel, target);
        Ok(())
    }

    fn acquire(&self, target: EndpointMode) -> std::result::Result<Session, DispatchError> {
        let dispatcher = self.factory.create_command_dispatcher(&self.channel)?;

        let receiver = match target {
            EndpointMode::Receiver => {
                let queue = Arc::new(QueueBroadcastManager::new());
                let context: Arc<dyn BroadcastReceiver> = queue.clone();
                let registration = dispatcher.register(context);
                Some(ReceiveSide {
                    queue,
                    registration,
                })
            }
            _ => None,
        };

        Ok(Session {
            dispatcher: Arc::new(dispatcher),
            receiver,
        })
    }

    fn release(&self, session: Session) -> std::result::Result<(), DispatchError> {
        if let Some(side) = session.receiver {
            side.registration.close();
            if self.factory.config().interrupt_on_close {
                side.queue.close();
            } else {
                side.queue.clear();
            }
        }
        session.dispatcher.close()
    }

    fn receiving_queue(&self) -> Option<Arc<QueueBroadcastManager>> {
        if self.mode.load() != EndpointMode::Receiver {
            return None;
        }
        self.session
            .lock()
            .as_ref()
            .and_then(|session| session.receiver.as_ref())
            .map(|side| Arc::clone(&side.queue))
    }

    fn take(
        &self,
        take: impl FnOnce(&QueueBroadcastManager) -> std::result::Result<Option<BroadcastPayload>, QueueError>,
    ) -> Result<Option<BroadcastPayload>> {
        let Some(queue) = self.receiving_queue() else {
            return Ok(None);
        };

        match take(&*queue) {
            Ok(payload) => Ok(payload),
            Err(QueueError::Closed) => Ok(None),
            Err(QueueError::Interrupted) => Err(Error::Interrupted),
        }
    }
}

impl BroadcastEndpoint for CommandDispatcherBroadcastEndpoint {
    fn open_client(&self) -> Result<()> {
        self.open(EndpointMode::Receiver)
    }

    fn open_broadcaster(&self) -> Result<()> {
        self.open(EndpointMode::Broadcaster)
    }

    fn close(&self) -> Result<()> {
        loop {
            match self.mode.begin_close() {
                CloseStart::Idle => return Ok(()),
                CloseStart::OpenInFlight => {
                    let mut guard = self.session.lock();
                    while self.mode.is_opening() {
                        self.settled.wait(&mut guard);
                    }
                }
                CloseStart::Teardown(mode) => {
                    let session = {
                        let mut guard = self.session.lock();
                        let session = guard.take();
                        self.mode.finish_close();
                        session
                    };
                    self.settled.notify_all();
                    log::debug!("[Endpoint] '{}' {:?} -> CLOSED", self.channel, mode);

                    let result = session.map_or(Ok(()), |session| self.release(session));
                    return result.map_err(Error::from);
                }
            }
        }
    }

    fn broadcast(&self, payload: BroadcastPayload) -> Result<()> {
        if self.mode.load() != EndpointMode::Broadcaster {
            log::debug!(
                "[Endpoint] Broadcast on '{}' ignored (mode={:?})",
                self.channel,
                self.mode.load()
            );
            return Ok(());
        }

        let limit = self.factory.config().max_payload_size;
        if payload.len() > limit {
            return Err(DispatchError::Codec(format!(
                "payload of {} bytes exceeds limit of {} bytes",
                payload.len(),
                limit
            ))
            .into());
        }

        let Some(dispatcher) = self
            .session
            .lock()
            .as_ref()
            .map(|session| Arc::clone(&session.dispatcher))
        else {
            return Ok(());
        };

        match dispatcher.execute_on_group(&BroadcastCommand::new(payload)) {
            Ok(()) => Ok(()),
            // Closed between the mode check and the dispatch
            Err(DispatchError::Closed(_)) if dispatcher.is_closed() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn receive_broadcast(&self) -> Result<Option<BroadcastPayload>> {
        self.take(|queue| queue.get_broadcast().map(Some))
    }

    fn receive_broadcast_timeout(&self, timeout: Duration) -> Result<Option<BroadcastPayload>> {
        self.take(|queue| queue.get_broadcast_timeout(timeout))
    }
}

impl Drop for CommandDispatcherBroadcastEndpoint {
    fn drop(&mut self) {
        if let Err(e) = BroadcastEndpoint::close(self) {
            log::warn!("[Endpoint] Error closing '{}' on drop: {}", self.channel, e);
        }
    }
}

impl std::fmt::Debug for CommandDispatcherBroadcastEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcherBroadcastEndpoint")
            .field("channel", &self.channel)
            .field("mode", &self.mode())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BroadcastConfig;
    use crate::local::LocalGroup;
    use std::thread;
    use std::time::Instant;

    fn payload(bytes: &[u8]) -> BroadcastPayload {
        Arc::from(bytes)
    }

    fn sharing_layer(config: BroadcastConfig) -> Arc<ConcurrentBroadcastCommandDispatcherFactory> {
        let group = LocalGroup::new("endpoint-tests");
        ConcurrentBroadcastCommandDispatcherFactory::new(Arc::new(group.join()), config).unwrap()
    }

    fn endpoint(
        layer: &Arc<ConcurrentBroadcastCommandDispatcherFactory>,
    ) -> CommandDispatcherBroadcastEndpoint {
        CommandDispatcherBroadcastEndpoint::new(Arc::clone(layer), ChannelId::from("disco"))
    }

    #[test]
    fn test_modes() {
        let layer = sharing_layer(BroadcastConfig::default());
        let endpoint = endpoint(&layer);
        assert_eq!(endpoint.mode(), EndpointMode::Closed);

        endpoint.open_client().unwrap();
        assert_eq!(endpoint.mode(), EndpointMode::Receiver);

        // Second open in any direction is a no-op
        endpoint.open_broadcaster().unwrap();
        assert_eq!(endpoint.mode(), EndpointMode::Receiver);
        assert_eq!(layer.reference_count(endpoint.channel_id()), 1);

        endpoint.close().unwrap();
        endpoint.close().unwrap();
        assert_eq!(endpoint.mode(), EndpointMode::Closed);
        assert_eq!(layer.dispatcher_count(), 0);

        endpoint.open_broadcaster().unwrap();
        assert_eq!(endpoint.mode(), EndpointMode::Broadcaster);
    }

    #[test]
    fn test_self_delivery_round_trip() {
        let layer = sharing_layer(BroadcastConfig::default());
        let receiver = endpoint(&layer);
        let broadcaster = endpoint(&layer);
        receiver.open_client().unwrap();
        broadcaster.open_broadcaster().unwrap();

        broadcaster.broadcast(payload(&[1, 2, 3])).unwrap();

        let received = receiver.receive_broadcast().unwrap().unwrap();
        assert_eq!(&received[..], &[1, 2, 3]);
    }

    #[test]
    fn test_wrong_mode_operations_are_ignored() {
        let layer = sharing_layer(BroadcastConfig::default());
        let receiver = endpoint(&layer);
        let broadcaster = endpoint(&layer);

        // Closed endpoint: nothing happens
        broadcaster.broadcast(payload(&[1])).unwrap();
        assert_eq!(receiver.receive_broadcast().unwrap(), None);

        receiver.open_client().unwrap();
        broadcaster.open_broadcaster().unwrap();

        // Receivers do not publish, broadcasters do not consume
        receiver.broadcast(payload(&[2])).unwrap();
        assert_eq!(receiver.pending_broadcasts(), 0);
        assert_eq!(
            broadcaster
                .receive_broadcast_timeout(Duration::from_millis(10))
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_payload_limit() {
        let layer = sharing_layer(BroadcastConfig::default().with_max_payload_size(4));
        let receiver = endpoint(&layer);
        let broadcaster = endpoint(&layer);
        receiver.open_client().unwrap();
        broadcaster.open_broadcaster().unwrap();

        let err = broadcaster.broadcast(payload(&[0; 5])).unwrap_err();
        assert!(matches!(err, Error::Dispatch(DispatchError::Codec(_))));
        assert_eq!(receiver.pending_broadcasts(), 0);

        broadcaster.broadcast(payload(&[0; 4])).unwrap();
        assert_eq!(receiver.pending_broadcasts(), 1);
    }

    #[test]
    fn test_close_clears_backlog() {
        let layer = sharing_layer(BroadcastConfig::default());
        let receiver = endpoint(&layer);
        let broadcaster = endpoint(&layer);
        receiver.open_client().unwrap();
        broadcaster.open_broadcaster().unwrap();

        broadcaster.broadcast(payload(&[1])).unwrap();
        broadcaster.broadcast(payload(&[2])).unwrap();
        assert_eq!(receiver.pending_broadcasts(), 2);

        receiver.close().unwrap();
        assert_eq!(receiver.pending_broadcasts(), 0);
        assert_eq!(layer.receiver_count(receiver.channel_id()), 0);

        // Reopened receiver starts from an empty queue
        receiver.open_client().unwrap();
        assert_eq!(receiver.pending_broadcasts(), 0);
    }

    #[test]
    fn test_close_wakes_blocked_receiver() {
        let layer = sharing_layer(BroadcastConfig::default());
        let receiver = Arc::new(endpoint(&layer));
        receiver.open_client().unwrap();

        let waiter = {
            let receiver = Arc::clone(&receiver);
            thread::spawn(move || receiver.receive_broadcast())
        };

        thread::sleep(Duration::from_millis(20));
        receiver.close().unwrap();

        assert_eq!(waiter.join().unwrap().unwrap(), None);
    }

    #[test]
    fn test_interrupt_blocked_receiver() {
        let layer = sharing_layer(BroadcastConfig::default());
        let receiver = Arc::new(endpoint(&layer));
        receiver.open_client().unwrap();

        let waiter = {
            let receiver = Arc::clone(&receiver);
            thread::spawn(move || receiver.receive_broadcast())
        };

        while !waiter.is_finished() {
            receiver.interrupt();
            thread::sleep(Duration::from_millis(5));
        }
        assert!(matches!(waiter.join().unwrap(), Err(Error::Interrupted)));
        assert_eq!(receiver.mode(), EndpointMode::Receiver);
    }

    #[test]
    fn test_timed_receive_elapses() {
        let layer = sharing_layer(BroadcastConfig::default());
        let receiver = endpoint(&layer);
        receiver.open_client().unwrap();

        let start = Instant::now();
        let result = receiver
            .receive_broadcast_timeout(Duration::from_millis(30))
            .unwrap();
        assert_eq!(result, None);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_drop_releases_dispatcher() {
        let layer = sharing_layer(BroadcastConfig::default());
        {
            let receiver = endpoint(&layer);
            receiver.open_client().unwrap();
            assert_eq!(layer.dispatcher_count(), 1);
        }
        assert_eq!(layer.dispatcher_count(), 0);
    }
}
