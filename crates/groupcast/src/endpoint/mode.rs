// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint mode and its atomic state cell.
//!
//! ```text
//!            begin_open            finish_open(target)
//! Closed ----------------> Opening -------------------> Broadcaster | Receiver
//!   ^  ^                     |                                  |
//!   |  +---- abort_open -----+                                  | begin_close
//!   |                                                           v
//!   +----------------------- finish_close ------------------ Closing
//! ```
//!
//! `Opening` and `Closing` are transient and never exposed: [`ModeCell::load`]
//! reports them as [`EndpointMode::Closed`]. Only the thread that won the
//! entry CAS moves a cell out of a transient state. A close never claims an
//! `Opening` cell; it waits for the opener to settle first.

use std::sync::atomic::{AtomicU8, Ordering};

/// Public mode of a broadcast endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointMode {
    /// Not open. Initial and terminal.
    Closed,
    /// Publishes payloads to the group.
    Broadcaster,
    /// Buffers payloads published by the group.
    Receiver,
}

const CLOSED: u8 = 0;
const OPENING: u8 = 1;
const BROADCASTER: u8 = 2;
const RECEIVER: u8 = 3;
const CLOSING: u8 = 4;

fn encode(mode: EndpointMode) -> u8 {
    match mode {
        EndpointMode::Closed => CLOSED,
        EndpointMode::Broadcaster => BROADCASTER,
        EndpointMode::Receiver => RECEIVER,
    }
}

/// Outcome of [`ModeCell::begin_close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseStart {
    /// Nothing to do: closed, or another thread is already closing.
    Idle,
    /// An open is still acquiring; wait for it and retry.
    OpenInFlight,
    /// Caller owns the teardown of an endpoint that was open in this mode.
    Teardown(EndpointMode),
}

/// Lock-free tagged state of one endpoint.
#[derive(Debug)]
pub(crate) struct ModeCell {
    state: AtomicU8,
}

impl ModeCell {
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicU8::new(CLOSED),
        }
    }

    /// Current public mode.
    pub(crate) fn load(&self) -> EndpointMode {
        match self.state.load(Ordering::Acquire) {
            BROADCASTER => EndpointMode::Broadcaster,
            RECEIVER => EndpointMode::Receiver,
            _ => EndpointMode::Closed,
        }
    }

    /// True while an open is acquiring its resources.
    pub(crate) fn is_opening(&self) -> bool {
        self.state.load(Ordering::Acquire) == OPENING
    }

    /// True while a close is between its claim and [`finish_close`](Self::finish_close).
    pub(crate) fn is_closing(&self) -> bool {
        self.state.load(Ordering::Acquire) == CLOSING
    }

    /// `Closed -> Opening`. False when the endpoint is not closed.
    pub(crate) fn begin_open(&self) -> bool {
        self.state
            .compare_exchange(CLOSED, OPENING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `Opening -> target`.
    pub(crate) fn finish_open(&self, target: EndpointMode) {
        debug_assert_ne!(target, EndpointMode::Closed);
        let previous = self.state.swap(encode(target), Ordering::AcqRel);
        debug_assert_eq!(previous, OPENING);
    }

    /// `Opening -> Closed` after a failed open.
    pub(crate) fn abort_open(&self) {
        let previous = self.state.swap(CLOSED, Ordering::AcqRel);
        debug_assert_eq!(previous, OPENING);
    }

    /// Claim the close of this endpoint.
    pub(crate) fn begin_close(&self) -> CloseStart {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let mode = match current {
                OPENING => return CloseStart::OpenInFlight,
                BROADCASTER => EndpointMode::Broadcaster,
                RECEIVER => EndpointMode::Receiver,
                _ => return CloseStart::Idle,
            };

            match self.state.compare_exchange_weak(
                current,
                CLOSING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return CloseStart::Teardown(mode),
                Err(actual) => current = actual,
            }
        }
    }

    /// `Closing -> Closed`.
    pub(crate) fn finish_close(&self) {
        let previous = self.state.swap(CLOSED, Ordering::AcqRel);
        debug_assert_eq!(previous, CLOSING);
    }
}

impl Default for ModeCell {
    fn default() -> Self {
        Self::new()
    }
}
