// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure
#![allow(clippy::cast_possible_truncation)] // Test parameters

//! Endpoint open/close lifecycle and dispatcher sharing under concurrency.

use groupcast::{
    BroadcastCommand, BroadcastConfig, BroadcastEndpoint, BroadcastPayload, BroadcastReceiver,
    ChannelId, CommandDispatcher, CommandDispatcherBroadcastEndpoint,
    CommandDispatcherBroadcastEndpointFactory, CommandDispatcherFactory,
    ConcurrentBroadcastCommandDispatcherFactory, Delivery, DispatchError, EndpointMode, Error,
    LocalGroup, LocalMember, MemberId,
};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

struct Node {
    _group: LocalGroup,
    member: Arc<LocalMember>,
    layer: Arc<ConcurrentBroadcastCommandDispatcherFactory>,
    factory: CommandDispatcherBroadcastEndpointFactory,
}

fn node() -> Node {
    let group = LocalGroup::new("lifecycle");
    let member = Arc::new(group.join());
    let layer = ConcurrentBroadcastCommandDispatcherFactory::new(
        member.clone(),
        BroadcastConfig::default(),
    )
    .expect("valid config");
    let factory = CommandDispatcherBroadcastEndpointFactory::new(Arc::clone(&layer), "disco");
    Node {
        _group: group,
        member,
        layer,
        factory,
    }
}

fn disco() -> ChannelId {
    ChannelId::from("disco")
}

/// Local transport whose dispatcher creation and close take a while.
struct StallingTransport {
    inner: Arc<LocalMember>,
    create_stall: Duration,
    close_stall: Duration,
}

struct StallingDispatcher {
    inner: Arc<dyn CommandDispatcher>,
    close_stall: Duration,
}

impl CommandDispatcherFactory for StallingTransport {
    fn create_command_dispatcher(
        &self,
        id: &ChannelId,
        context: Arc<dyn BroadcastReceiver>,
    ) -> Result<Arc<dyn CommandDispatcher>, DispatchError> {
        thread::sleep(self.create_stall);
        let inner = self.inner.create_command_dispatcher(id, context)?;
        Ok(Arc::new(StallingDispatcher {
            inner,
            close_stall: self.close_stall,
        }))
    }

    fn local_member(&self) -> MemberId {
        self.inner.local_member()
    }
}

impl CommandDispatcher for StallingDispatcher {
    fn execute_on_group(
        &self,
        command: &BroadcastCommand,
        delivery: Delivery,
    ) -> Result<(), DispatchError> {
        self.inner.execute_on_group(command, delivery)
    }

    fn execute_on_member(
        &self,
        command: &BroadcastCommand,
        member: &MemberId,
    ) -> Result<(), DispatchError> {
        self.inner.execute_on_member(command, member)
    }

    fn close(&self) -> Result<(), DispatchError> {
        thread::sleep(self.close_stall);
        self.inner.close()
    }
}

fn stalling_node(create_stall: Duration, close_stall: Duration) -> Node {
    let group = LocalGroup::new("lifecycle");
    let member = Arc::new(group.join());
    let transport = StallingTransport {
        inner: Arc::clone(&member),
        create_stall,
        close_stall,
    };
    let layer = ConcurrentBroadcastCommandDispatcherFactory::with_defaults(Arc::new(transport));
    let factory = CommandDispatcherBroadcastEndpointFactory::new(Arc::clone(&layer), "disco");
    Node {
        _group: group,
        member,
        layer,
        factory,
    }
}

#[test]
fn test_concurrent_receiving_opens_share_one_dispatcher() {
    const RECEIVERS: usize = 16;
    let node = node();
    let barrier = Arc::new(Barrier::new(RECEIVERS));

    let endpoints: Vec<Arc<CommandDispatcherBroadcastEndpoint>> = (0..RECEIVERS)
        .map(|_| Arc::new(node.factory.create_broadcast_endpoint()))
        .collect();

    let openers: Vec<_> = endpoints
        .iter()
        .map(|endpoint| {
            let endpoint = Arc::clone(endpoint);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                endpoint.open_client()
            })
        })
        .collect();

    for opener in openers {
        opener.join().unwrap().unwrap();
    }

    assert_eq!(node.member.dispatcher_creations(&disco()), 1);
    assert_eq!(node.layer.dispatcher_count(), 1);
    assert_eq!(node.layer.reference_count(&disco()), RECEIVERS);
    assert_eq!(node.layer.receiver_count(&disco()), RECEIVERS);

    for endpoint in &endpoints {
        endpoint.close().unwrap();
    }
    assert_eq!(node.layer.dispatcher_count(), 0);
    assert_eq!(node.member.live_dispatchers(), 0);
}

#[test]
fn test_racing_opens_on_one_endpoint_take_one_reference() {
    const THREADS: usize = 8;
    let node = node();
    let endpoint = Arc::new(node.factory.create_broadcast_endpoint());
    let barrier = Arc::new(Barrier::new(THREADS));

    let openers: Vec<_> = (0..THREADS)
        .map(|i| {
            let endpoint = Arc::clone(&endpoint);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                if i % 2 == 0 {
                    endpoint.open_client()
                } else {
                    endpoint.open_broadcaster()
                }
            })
        })
        .collect();

    for opener in openers {
        opener.join().unwrap().unwrap();
    }

    assert_ne!(endpoint.mode(), EndpointMode::Closed);
    assert_eq!(node.layer.reference_count(&disco()), 1);

    endpoint.close().unwrap();
    assert_eq!(node.layer.reference_count(&disco()), 0);
}

#[test]
fn test_mode_closed_iff_opens_and_closes_balance() {
    let node = node();
    let endpoint = node.factory.create_broadcast_endpoint();

    for _ in 0..3 {
        endpoint.open_broadcaster().unwrap();
        assert_eq!(endpoint.mode(), EndpointMode::Broadcaster);
        endpoint.close().unwrap();
        assert_eq!(endpoint.mode(), EndpointMode::Closed);

        endpoint.open_client().unwrap();
        assert_eq!(endpoint.mode(), EndpointMode::Receiver);
        endpoint.close().unwrap();
        assert_eq!(endpoint.mode(), EndpointMode::Closed);
    }

    assert_eq!(node.member.dispatcher_creations(&disco()), 6);
    assert_eq!(node.layer.dispatcher_count(), 0);
}

#[test]
fn test_failed_open_leaves_endpoint_closed_and_retryable() {
    let node = node();
    let endpoint = node.factory.create_broadcast_endpoint();

    node.member.set_available(false);
    let err = endpoint.open_client().unwrap_err();
    assert!(matches!(err, Error::Dispatch(DispatchError::Unavailable(_))));
    assert_eq!(endpoint.mode(), EndpointMode::Closed);
    assert_eq!(node.layer.dispatcher_count(), 0);
    assert_eq!(node.layer.receiver_count(&disco()), 0);

    // Closing a never-opened endpoint is a no-op
    endpoint.close().unwrap();

    node.member.set_available(true);
    endpoint.open_client().unwrap();
    assert_eq!(endpoint.mode(), EndpointMode::Receiver);
    assert_eq!(node.layer.reference_count(&disco()), 1);
}

#[test]
fn test_broadcast_failure_propagates() {
    let node = node();
    let broadcaster = node.factory.open_broadcaster().unwrap();

    node.member.set_available(false);
    let err = broadcaster.broadcast(Arc::from(&[1u8][..])).unwrap_err();
    assert!(matches!(err, Error::Dispatch(DispatchError::Unavailable(_))));

    // Still open; the next broadcast goes through once the transport is back
    assert_eq!(broadcaster.mode(), EndpointMode::Broadcaster);
    node.member.set_available(true);
    broadcaster.broadcast(Arc::from(&[2u8][..])).unwrap();
}

#[test]
fn test_close_without_interrupt_keeps_waiter_blocked_until_timeout() {
    let group = LocalGroup::new("lifecycle");
    let layer = ConcurrentBroadcastCommandDispatcherFactory::new(
        Arc::new(group.join()),
        BroadcastConfig::default().without_interrupt_on_close(),
    )
    .unwrap();
    let factory = CommandDispatcherBroadcastEndpointFactory::new(layer, "disco");
    let receiver = Arc::new(factory.open_receiver().unwrap());

    let waiter = {
        let receiver = Arc::clone(&receiver);
        thread::spawn(move || receiver.receive_broadcast_timeout(Duration::from_millis(200)))
    };

    thread::sleep(Duration::from_millis(20));
    receiver.close().unwrap();

    // The queue is cleared and unregistered, so the waiter sees its timeout
    assert!(waiter.join().unwrap().unwrap().is_none());
}

#[test]
fn test_random_interleavings_release_everything() {
    const THREADS: usize = 6;
    const OPS: usize = 400;

    let node = node();
    let shared = Arc::new(node.factory.create_broadcast_endpoint());

    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let shared = Arc::clone(&shared);
            let factory = node.factory.clone();
            thread::spawn(move || {
                let mut rng = fastrand::Rng::with_seed(0x5eed + t as u64);
                let own = factory.create_broadcast_endpoint();
                for _ in 0..OPS {
                    let endpoint = if rng.bool() { &*shared } else { &own };
                    let payload: BroadcastPayload = Arc::from(&[t as u8][..]);
                    let result = match rng.u8(..6) {
                        0 => endpoint.open_client(),
                        1 => endpoint.open_broadcaster(),
                        2 => endpoint.close(),
                        3 => endpoint.broadcast(payload),
                        4 => endpoint
                            .receive_broadcast_timeout(Duration::ZERO)
                            .map(|_| ()),
                        _ => endpoint
                            .receive_broadcast_timeout(Duration::from_millis(1))
                            .map(|_| ()),
                    };
                    result.unwrap();
                }
                own.close().unwrap();
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    shared.close().unwrap();

    assert_eq!(shared.mode(), EndpointMode::Closed);
    assert_eq!(node.layer.dispatcher_count(), 0);
    assert_eq!(node.layer.reference_count(&disco()), 0);
    assert_eq!(node.member.live_dispatchers(), 0);
}

#[test]
fn test_open_during_slow_transport_close_reopens() {
    let node = stalling_node(Duration::ZERO, Duration::from_millis(300));
    let endpoint = Arc::new(node.factory.create_broadcast_endpoint());
    endpoint.open_client().unwrap();

    let closer = {
        let endpoint = Arc::clone(&endpoint);
        thread::spawn(move || endpoint.close())
    };
    thread::sleep(Duration::from_millis(50));

    // Lands while the transport close is still running
    endpoint.open_client().unwrap();
    closer.join().unwrap().unwrap();

    assert_eq!(endpoint.mode(), EndpointMode::Receiver);
    assert_eq!(node.layer.reference_count(&disco()), 1);
    assert_eq!(node.member.dispatcher_creations(&disco()), 2);

    endpoint.close().unwrap();
    assert_eq!(node.layer.dispatcher_count(), 0);
    assert_eq!(node.member.live_dispatchers(), 0);
}

#[test]
fn test_close_during_slow_open_releases_before_returning() {
    let node = stalling_node(Duration::from_millis(300), Duration::ZERO);
    let endpoint = Arc::new(node.factory.create_broadcast_endpoint());

    let opener = {
        let endpoint = Arc::clone(&endpoint);
        thread::spawn(move || endpoint.open_client())
    };
    thread::sleep(Duration::from_millis(50));

    endpoint.close().unwrap();
    assert_eq!(endpoint.mode(), EndpointMode::Closed);
    assert_eq!(node.layer.dispatcher_count(), 0);
    assert_eq!(node.layer.reference_count(&disco()), 0);

    opener.join().unwrap().unwrap();
    assert_eq!(endpoint.mode(), EndpointMode::Closed);
    assert_eq!(node.layer.dispatcher_count(), 0);
    assert_eq!(node.member.dispatcher_creations(&disco()), 1);
    assert_eq!(node.member.live_dispatchers(), 0);
}
