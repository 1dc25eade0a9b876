// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Group dispatch contract and the dispatcher sharing layer.
//!
//! The traits in this module are what a group-communication transport must
//! provide. Nothing here knows how commands travel between members.
//!
//! ```text
//! CommandDispatcherBroadcastEndpoint
//!        |
//!        v
//! ConcurrentBroadcastCommandDispatcherFactory   (shared.rs, one per channel)
//! +-- entries: DashMap<ChannelId, Arc<Mutex<Slot>>>   (per-id lock)
//!        |
//!        v
//! dyn CommandDispatcherFactory  -->  dyn CommandDispatcher  (transport)
//! ```

mod shared;

pub use shared::{ConcurrentBroadcastCommandDispatcherFactory, SharedCommandDispatcher};

use crate::command::BroadcastCommand;
use crate::error::DispatchError;
use crate::receiver::BroadcastReceiver;
use std::sync::Arc;

/// Opaque identifier of one logical discovery group.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(Arc<str>);

impl ChannelId {
    /// Create a channel id.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Borrow as string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChannelId {
    fn from(id: &str) -> Self {
        Self(Arc::from(id))
    }
}

impl From<String> for ChannelId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl AsRef<str> for ChannelId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChannelId({:?})", &*self.0)
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a group member, assigned by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(Arc<str>);

impl MemberId {
    /// Create a member id.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Borrow as string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which members a group dispatch reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Every member, including the sender.
    All,
    /// Every member except the sender.
    Others,
}

impl Delivery {
    /// Map the self-delivery policy to a delivery scope.
    pub fn from_self_delivery(self_delivery: bool) -> Self {
        if self_delivery {
            Delivery::All
        } else {
            Delivery::Others
        }
    }
}

/// Group dispatch facade: creates dispatchers bound to a channel id.
///
/// Supplied by the group-communication transport.
///
/// The sharing layer calls [`create_command_dispatcher`](Self::create_command_dispatcher)
/// and [`CommandDispatcher::close`] while holding the lock of that channel id.
/// Neither may open or close an endpoint on the same channel id of the same
/// layer. Other channel ids are fine.
pub trait CommandDispatcherFactory: Send + Sync {
    /// Create a dispatcher for `id`.
    ///
    /// `context` is what remote members' commands for `id` are executed
    /// against on this member (see [`command::execute`](crate::command::execute)).
    ///
    /// # Errors
    /// Transport failures; nothing must stay registered on failure.
    fn create_command_dispatcher(
        &self,
        id: &ChannelId,
        context: Arc<dyn BroadcastReceiver>,
    ) -> Result<Arc<dyn CommandDispatcher>, DispatchError>;

    /// Identity of this member in the group.
    fn local_member(&self) -> MemberId;
}

/// Handle on one transport-level dispatcher.
pub trait CommandDispatcher: Send + Sync {
    /// Deliver `command` to the current group members (best effort).
    fn execute_on_group(
        &self,
        command: &BroadcastCommand,
        delivery: Delivery,
    ) -> Result<(), DispatchError>;

    /// Deliver `command` to a single member.
    fn execute_on_member(
        &self,
        command: &BroadcastCommand,
        member: &MemberId,
    ) -> Result<(), DispatchError>;

    /// Release the dispatcher. Later dispatches fail with [`DispatchError::Closed`].
    fn close(&self) -> Result<(), DispatchError>;
}
