// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for broadcast endpoints and the group dispatch contract.

use crate::dispatcher::{ChannelId, MemberId};
use thiserror::Error;

/// Failures reported by a group dispatch facade.
///
/// These are the only errors the transport side of the contract may raise.
/// They are propagated unchanged to the caller of the endpoint operation that
/// triggered them and are never retried by this crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Group transport cannot be reached (channel down, member left, ...).
    #[error("Group transport unavailable: {0}")]
    Unavailable(String),

    /// Dispatcher was used after it was closed.
    #[error("Dispatcher for channel '{0}' is closed")]
    Closed(ChannelId),

    /// A dispatcher is already live for this channel id on this member.
    #[error("Dispatcher for channel '{0}' already exists")]
    AlreadyExists(ChannelId),

    /// Targeted member is not part of the group.
    #[error("Unknown group member: {0}")]
    UnknownMember(MemberId),

    /// Command frame could not be encoded or decoded.
    #[error("Command codec error: {0}")]
    Codec(String),
}

/// Failures of a blocking take on a [`QueueBroadcastManager`](crate::QueueBroadcastManager).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Wait was cancelled through [`QueueBroadcastManager::interrupt`](crate::QueueBroadcastManager::interrupt).
    #[error("Interrupted while waiting for a broadcast")]
    Interrupted,

    /// Manager was closed; no further payloads will ever arrive.
    #[error("Broadcast queue closed")]
    Closed,
}

/// Errors returned by broadcast endpoint operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Group dispatch failure (creation, dispatch or close).
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// A blocked receive was interrupted while the endpoint stayed open.
    #[error("Interrupted while waiting for a broadcast")]
    Interrupted,

    /// Configuration rejected by [`BroadcastConfig::validate`](crate::BroadcastConfig::validate).
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenient alias for endpoint results.
pub type Result<T> = std::result::Result<T, Error>;
