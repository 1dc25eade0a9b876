// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broadcast layer configuration.

/// Default upper bound for a single broadcast payload (64 KiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Configuration shared by every endpoint created through one
/// [`ConcurrentBroadcastCommandDispatcherFactory`](crate::ConcurrentBroadcastCommandDispatcherFactory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastConfig {
    /// Deliver a broadcaster's payloads back to receivers on the sending member.
    ///
    /// Self-delivery is a transport policy; the flag is handed to the facade
    /// on every group dispatch.
    pub self_delivery: bool,

    /// Wake threads blocked in `receive_broadcast()` when their endpoint closes.
    pub interrupt_on_close: bool,

    /// Largest payload accepted by `broadcast()`.
    pub max_payload_size: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            self_delivery: true,
            interrupt_on_close: true,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

impl BroadcastConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: do not deliver broadcasts to the sending member.
    pub fn without_self_delivery(mut self) -> Self {
        self.self_delivery = false;
        self
    }

    /// Builder: set self-delivery explicitly.
    pub fn with_self_delivery(mut self, enabled: bool) -> Self {
        self.self_delivery = enabled;
        self
    }

    /// Builder: leave blocked receivers waiting when their endpoint closes.
    pub fn without_interrupt_on_close(mut self) -> Self {
        self.interrupt_on_close = false;
        self
    }

    /// Builder: set the payload size limit.
    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_payload_size == 0 {
            return Err("max_payload_size must be > 0");
        }
        if self.max_payload_size > u32::MAX as usize {
            return Err("max_payload_size must fit in a u32 frame length");
        }
        Ok(())
    }
}
