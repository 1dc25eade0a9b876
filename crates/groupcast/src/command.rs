// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broadcast command: the unit dispatched to every group member.
//!
//! The command is plain data. Transports marshal it with [`BroadcastCommand::encode`],
//! unmarshal it on the remote member with [`BroadcastCommand::decode`], then call
//! [`execute`] with the receiver context bound to their dispatcher.
//!
//! # Wire format
//!
//! ```text
//! +---------+----------------+-------------------+
//! | version | length (u32 BE)| payload (length)  |
//! | 1 byte  | 4 bytes        | opaque bytes      |
//! +---------+----------------+-------------------+
//! ```

use crate::error::DispatchError;
use crate::receiver::{BroadcastPayload, BroadcastReceiver};

/// Current command frame version.
pub const COMMAND_VERSION: u8 = 1;

/// Frame header size (version + length).
pub const COMMAND_HEADER_LEN: usize = 5;

/// "Deliver this payload to the receiver registrar on the remote member."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastCommand {
    payload: BroadcastPayload,
}

impl BroadcastCommand {
    /// Wrap a payload.
    pub fn new(payload: impl Into<BroadcastPayload>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Wrapped payload.
    pub fn payload(&self) -> &BroadcastPayload {
        &self.payload
    }

    /// Unwrap the payload.
    pub fn into_payload(self) -> BroadcastPayload {
        self.payload
    }

    /// Encode to the command frame.
    pub fn encode(&self) -> Result<Vec<u8>, DispatchError> {
        let len = u32::try_from(self.payload.len()).map_err(|_| {
            DispatchError::Codec(format!(
                "payload of {} bytes exceeds frame limit",
                self.payload.len()
            ))
        })?;

        let mut buf = Vec::with_capacity(COMMAND_HEADER_LEN + self.payload.len());
        buf.push(COMMAND_VERSION);
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Decode a command frame produced by [`encode`](Self::encode).
    pub fn decode(frame: &[u8]) -> Result<Self, DispatchError> {
        if frame.len() < COMMAND_HEADER_LEN {
            return Err(DispatchError::Codec(format!(
                "truncated header: {} bytes",
                frame.len()
            )));
        }

        let version = frame[0];
        if version != COMMAND_VERSION {
            return Err(DispatchError::Codec(format!(
                "unsupported command version {}",
                version
            )));
        }

        let len = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
        let body = &frame[COMMAND_HEADER_LEN..];
        if body.len() != len {
            return Err(DispatchError::Codec(format!(
                "length mismatch: header says {}, frame carries {}",
                len,
                body.len()
            )));
        }

        Ok(Self::new(body))
    }
}

/// Run a broadcast command on the receiving member.
///
/// Invoked by the transport once per delivery, with the context that was
/// handed to `create_command_dispatcher` for the command's channel.
pub fn execute(command: &BroadcastCommand, context: &dyn BroadcastReceiver) {
    context.receive(command.payload());
}
