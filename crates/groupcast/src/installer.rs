// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel installer: one dispatcher sharing layer per group channel.
//!
//! Every discovery group and broadcast group configured on the same group
//! channel must multiplex over the same
//! [`ConcurrentBroadcastCommandDispatcherFactory`], otherwise two layers would
//! each create a dispatcher for the same channel id. The registry installs a
//! layer on first use and hands the same one out afterwards.
//!
//! # Architecture
//!
//! ```text
//! BroadcastChannelRegistry
//! +-- channels: Mutex<HashMap<String, Weak<ConcurrentBroadcastCommandDispatcherFactory>>>
//!
//! [strong refs held by endpoint factories and open endpoints]
//! ```
//!
//! Only weak references are kept: a layer lives as long as something uses it.

use crate::config::BroadcastConfig;
use crate::dispatcher::{CommandDispatcherFactory, ConcurrentBroadcastCommandDispatcherFactory};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

/// Registry of installed sharing layers, keyed by group channel name.
pub struct BroadcastChannelRegistry {
    channels: Mutex<HashMap<String, Weak<ConcurrentBroadcastCommandDispatcherFactory>>>,
}

impl BroadcastChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide registry.
    pub fn global() -> &'static BroadcastChannelRegistry {
        static REGISTRY: OnceLock<BroadcastChannelRegistry> = OnceLock::new();
        REGISTRY.get_or_init(BroadcastChannelRegistry::new)
    }

    /// Get the sharing layer for `channel`, installing it on first use.
    ///
    /// `make_facade` runs only when nothing live is installed for `channel`;
    /// `config` is ignored when a layer already exists.
    ///
    /// # Errors
    /// Whatever `make_facade` returns, or [`Error::Config`]. Nothing is
    /// installed on failure.
    pub fn get_or_install<F>(
        &self,
        channel: &str,
        config: BroadcastConfig,
        make_facade: F,
    ) -> Result<Arc<ConcurrentBroadcastCommandDispatcherFactory>>
    where
        F: FnOnce() -> Result<Arc<dyn CommandDispatcherFactory>>,
    {
        let mut channels = self.channels.lock();

        if let Some(existing) = channels.get(channel).and_then(Weak::upgrade) {
            if existing.config() != &config {
                log::debug!(
                    "[ChannelRegistry] Channel '{}' already installed, ignoring new config",
                    channel
                );
            }
            return Ok(existing);
        }

        config.validate().map_err(|e| Error::Config(e.to_string()))?;
        let facade = make_facade()?;
        let layer = ConcurrentBroadcastCommandDispatcherFactory::new(facade, config)?;
        channels.insert(channel.to_string(), Arc::downgrade(&layer));

        log::info!(
            "[ChannelRegistry] Installed broadcast sharing layer for channel '{}'",
            channel
        );

        Ok(layer)
    }

    /// Live sharing layer for `channel`, if any.
    pub fn get(&self, channel: &str) -> Option<Arc<ConcurrentBroadcastCommandDispatcherFactory>> {
        self.channels.lock().get(channel).and_then(Weak::upgrade)
    }

    /// Forget channels whose layer was dropped.
    pub fn cleanup_expired(&self) {
        self.channels.lock().retain(|_, weak| weak.strong_count() > 0);
    }

    /// Number of channels with a live sharing layer.
    pub fn active_channel_count(&self) -> usize {
        self.channels
            .lock()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

impl Default for BroadcastChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BroadcastChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastChannelRegistry")
            .field("active_channels", &self.active_channel_count())
            .finish()
    }
}
