// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broadcast receiver capability and a closure-based implementation.

use std::sync::Arc;

/// Opaque broadcast payload.
///
/// Shared and immutable: fan-out to several receivers clones the `Arc`, never
/// the bytes.
pub type BroadcastPayload = Arc<[u8]>;

/// Anything that wants broadcast notifications.
///
/// # Thread Safety
/// Implementations must be Send + Sync: `receive` is invoked from whatever
/// thread the group transport delivers on, possibly concurrently.
///
/// # Examples
/// ```no_run
/// use groupcast::{BroadcastPayload, BroadcastReceiver};
///
/// struct Announcements;
///
/// impl BroadcastReceiver for Announcements {
///     fn receive(&self, payload: &BroadcastPayload) {
///         println!("peer announced {} bytes", payload.len());
///     }
/// }
/// ```
pub trait BroadcastReceiver: Send + Sync {
    /// Called once per delivered payload.
    ///
    /// # Panics
    /// If this method panics, the registrar catches it and keeps delivering
    /// to the remaining receivers. The receiver stays registered.
    fn receive(&self, payload: &BroadcastPayload);
}

/// Callback-based receiver wrapper
///
/// Wraps a closure as a [`BroadcastReceiver`].
///
/// # Examples
/// ```no_run
/// use groupcast::{BroadcastPayload, CallbackReceiver};
/// use std::sync::Arc;
///
/// let receiver = Arc::new(CallbackReceiver::new(|payload: &BroadcastPayload| {
///     println!("got {} bytes", payload.len());
/// }));
/// ```
pub struct CallbackReceiver<F>
where
    F: Fn(&BroadcastPayload) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackReceiver<F>
where
    F: Fn(&BroadcastPayload) + Send + Sync,
{
    /// Create new callback receiver
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> BroadcastReceiver for CallbackReceiver<F>
where
    F: Fn(&BroadcastPayload) + Send + Sync,
{
    fn receive(&self, payload: &BroadcastPayload) {
        (self.callback)(payload);
    }
}

impl<F> std::fmt::Debug for CallbackReceiver<F>
where
    F: Fn(&BroadcastPayload) + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackReceiver").finish_non_exhaustive()
    }
}
