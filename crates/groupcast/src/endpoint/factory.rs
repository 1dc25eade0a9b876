// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint factory bound to one channel id.
//!
//! Every endpoint it creates shares the factory's sharing layer, so endpoints
//! on the same channel reuse one transport dispatcher.

use super::{BroadcastEndpoint, CommandDispatcherBroadcastEndpoint};
use crate::dispatcher::{ChannelId, ConcurrentBroadcastCommandDispatcherFactory};
use crate::error::Result;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Creates endpoints for one discovery channel.
///
/// Two factories are equal when they target the same channel id, whatever
/// sharing layer they hold.
#[derive(Clone)]
pub struct CommandDispatcherBroadcastEndpointFactory {
    factory: Arc<ConcurrentBroadcastCommandDispatcherFactory>,
    channel: ChannelId,
}

impl CommandDispatcherBroadcastEndpointFactory {
    /// Factory for endpoints on `channel` over the sharing layer `factory`.
    ///
    /// Nothing is opened until an endpoint is.
    pub fn new(
        factory: Arc<ConcurrentBroadcastCommandDispatcherFactory>,
        channel: impl Into<ChannelId>,
    ) -> Self {
        Self {
            factory,
            channel: channel.into(),
        }
    }

    /// Channel targeted by created endpoints.
    pub fn channel_id(&self) -> &ChannelId {
        &self.channel
    }

    /// New endpoint in the closed mode.
    pub fn create_broadcast_endpoint(&self) -> CommandDispatcherBroadcastEndpoint {
        CommandDispatcherBroadcastEndpoint::new(Arc::clone(&self.factory), self.channel.clone())
    }

    /// New endpoint already open as a broadcaster.
    pub fn open_broadcaster(&self) -> Result<CommandDispatcherBroadcastEndpoint> {
        let endpoint = self.create_broadcast_endpoint();
        endpoint.open_broadcaster()?;
        Ok(endpoint)
    }

    /// New endpoint already open as a receiver.
    pub fn open_receiver(&self) -> Result<CommandDispatcherBroadcastEndpoint> {
        let endpoint = self.create_broadcast_endpoint();
        endpoint.open_client()?;
        Ok(endpoint)
    }
}

impl PartialEq for CommandDispatcherBroadcastEndpointFactory {
    fn eq(&self, other: &Self) -> bool {
        self.channel == other.channel
    }
}

impl Eq for CommandDispatcherBroadcastEndpointFactory {}

impl Hash for CommandDispatcherBroadcastEndpointFactory {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.channel.hash(state);
    }
}

impl std::fmt::Debug for CommandDispatcherBroadcastEndpointFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcherBroadcastEndpointFactory")
            .field("channel", &self.channel)
            .finish()
    }
}
