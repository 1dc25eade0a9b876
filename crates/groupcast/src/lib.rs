// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # groupcast - broadcast discovery over group command dispatch
//!
//! Cluster members announce themselves and discover peers over a reliable
//! group-communication channel instead of UDP multicast. Broadcast endpoints
//! publish opaque byte payloads to every group member, or buffer payloads
//! published by others and hand them out through blocking and timed reads.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use groupcast::{
//!     BroadcastEndpoint, CommandDispatcherBroadcastEndpointFactory,
//!     ConcurrentBroadcastCommandDispatcherFactory, LocalGroup, Result,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! fn main() -> Result<()> {
//!     let group = LocalGroup::new("cluster");
//!     let layer = ConcurrentBroadcastCommandDispatcherFactory::with_defaults(Arc::new(group.join()));
//!     let factory = CommandDispatcherBroadcastEndpointFactory::new(layer, "disco");
//!
//!     let receiver = factory.open_receiver()?;
//!     let broadcaster = factory.open_broadcaster()?;
//!
//!     broadcaster.broadcast(Arc::from(&b"tcp://10.0.0.7:61616"[..]))?;
//!     if let Some(payload) = receiver.receive_broadcast_timeout(Duration::from_secs(1))? {
//!         println!("discovered {}", String::from_utf8_lossy(&payload));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |  CommandDispatcherBroadcastEndpoint  (CLOSED | BROADCASTER | RECEIVER)|
//! |     broadcast()                 receive_broadcast() <- QueueManager  |
//! +---------------------------------------------------------------------+
//! |  ConcurrentBroadcastCommandDispatcherFactory                        |
//! |     one refcounted dispatcher + ReceiverRegistrar per channel id    |
//! +---------------------------------------------------------------------+
//! |  CommandDispatcherFactory / CommandDispatcher  (group transport)    |
//! |     LocalGroup for in-process groups                                |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`CommandDispatcherBroadcastEndpoint`] | Open/close state machine, publish and consume |
//! | [`ConcurrentBroadcastCommandDispatcherFactory`] | Shares one transport dispatcher per channel id |
//! | [`QueueBroadcastManager`] | FIFO buffer with blocking and timed takes |
//! | [`ReceiverRegistrar`] | Fan-out to registered receivers |
//! | [`BroadcastCommand`] | Unit dispatched to every member |
//! | [`BroadcastChannelRegistry`] | One sharing layer per group channel |
//!
//! Logging goes through the `log` facade; install any logger to see it.

pub mod command;
pub mod config;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod installer;
pub mod local;
pub mod queue;
pub mod receiver;
pub mod registrar;

pub use command::BroadcastCommand;
pub use config::{BroadcastConfig, DEFAULT_MAX_PAYLOAD_SIZE};
pub use dispatcher::{
    ChannelId, CommandDispatcher, CommandDispatcherFactory,
    ConcurrentBroadcastCommandDispatcherFactory, Delivery, MemberId, SharedCommandDispatcher,
};
pub use endpoint::{
    BroadcastEndpoint, CommandDispatcherBroadcastEndpoint,
    CommandDispatcherBroadcastEndpointFactory, EndpointMode,
};
pub use error::{DispatchError, Error, QueueError, Result};
pub use installer::BroadcastChannelRegistry;
pub use local::{LocalGroup, LocalMember};
pub use queue::QueueBroadcastManager;
pub use receiver::{BroadcastPayload, BroadcastReceiver, CallbackReceiver};
pub use registrar::{BroadcastReceiverRegistrar, ReceiverRegistrar, Registration};
