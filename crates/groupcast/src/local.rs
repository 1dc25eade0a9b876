// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process group dispatch.
//!
//! [`LocalGroup`] is a complete [`CommandDispatcherFactory`] implementation
//! whose members all live in the current process. Commands are encoded to the
//! command frame and decoded again for every target member, so a payload
//! crosses the same codec it would cross on a real transport. Delivery is
//! synchronous on the dispatching thread.
//!
//! ```text
//! LocalGroup
//! +-- members: DashMap<MemberId, Arc<MemberState>>
//!
//! MemberState (one per LocalMember)
//! +-- contexts: DashMap<ChannelId, Arc<dyn BroadcastReceiver>>   live dispatchers
//! +-- creations: DashMap<ChannelId, usize>
//! +-- available: AtomicBool
//! ```

use crate::command::{self, BroadcastCommand};
use crate::dispatcher::{ChannelId, CommandDispatcher, CommandDispatcherFactory, Delivery, MemberId};
use crate::error::DispatchError;
use crate::receiver::BroadcastReceiver;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

struct GroupInner {
    name: String,
    members: DashMap<MemberId, Arc<MemberState>>,
    next_member: AtomicU64,
}

struct MemberState {
    id: MemberId,
    available: AtomicBool,
    contexts: DashMap<ChannelId, Arc<dyn BroadcastReceiver>>,
    creations: DashMap<ChannelId, usize>,
}

impl MemberState {
    fn ensure_available(&self) -> Result<(), DispatchError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(DispatchError::Unavailable(format!(
                "member '{}' is unavailable",
                self.id
            )))
        }
    }
}

/// A group whose members share one process.
#[derive(Clone)]
pub struct LocalGroup {
    inner: Arc<GroupInner>,
}

impl LocalGroup {
    /// Create an empty group.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                name: name.into(),
                members: DashMap::new(),
                next_member: AtomicU64::new(1),
            }),
        }
    }

    /// Group name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Add a member. The member leaves the group when dropped.
    pub fn join(&self) -> LocalMember {
        let n = self.inner.next_member.fetch_add(1, Ordering::Relaxed);
        let id = MemberId::new(format!("{}-{}", self.inner.name, n));
        let state = Arc::new(MemberState {
            id: id.clone(),
            available: AtomicBool::new(true),
            contexts: DashMap::new(),
            creations: DashMap::new(),
        });
        self.inner.members.insert(id.clone(), Arc::clone(&state));

        log::debug!("[LocalGroup] '{}' joined group '{}'", id, self.inner.name);

        LocalMember {
            group: Arc::clone(&self.inner),
            state,
        }
    }

    /// Current number of members.
    pub fn member_count(&self) -> usize {
        self.inner.members.len()
    }
}

impl std::fmt::Debug for LocalGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalGroup")
            .field("name", &self.inner.name)
            .field("members", &self.member_count())
            .finish()
    }
}

/// One member of a [`LocalGroup`]; the group dispatch facade for that member.
pub struct LocalMember {
    group: Arc<GroupInner>,
    state: Arc<MemberState>,
}

impl LocalMember {
    /// This member's id.
    pub fn id(&self) -> &MemberId {
        &self.state.id
    }

    /// Simulate losing (or regaining) the group connection.
    ///
    /// While unavailable, dispatcher creation and dispatch from this member
    /// fail with [`DispatchError::Unavailable`] and nothing is delivered to it.
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::Release);
        log::debug!(
            "[LocalGroup] '{}' available={}",
            self.state.id,
            available
        );
    }

    /// True unless [`set_available(false)`](Self::set_available) is in effect.
    pub fn is_available(&self) -> bool {
        self.state.available.load(Ordering::Acquire)
    }

    /// How many dispatchers this member ever created for `id`.
    pub fn dispatcher_creations(&self, id: &ChannelId) -> usize {
        self.state.creations.get(id).map(|c| *c).unwrap_or(0)
    }

    /// Channels with a live dispatcher on this member.
    pub fn live_dispatchers(&self) -> usize {
        self.state.contexts.len()
    }
}

impl CommandDispatcherFactory for LocalMember {
    fn create_command_dispatcher(
        &self,
        id: &ChannelId,
        context: Arc<dyn BroadcastReceiver>,
    ) -> Result<Arc<dyn CommandDispatcher>, DispatchError> {
        self.state.ensure_available()?;

        match self.state.contexts.entry(id.clone()) {
            Entry::Occupied(_) => return Err(DispatchError::AlreadyExists(id.clone())),
            Entry::Vacant(vacant) => {
                vacant.insert(context);
            }
        }
        *self.state.creations.entry(id.clone()).or_insert(0) += 1;

        log::debug!(
            "[LocalGroup] '{}' created dispatcher for channel '{}'",
            self.state.id,
            id
        );

        Ok(Arc::new(LocalDispatcher {
            group: Arc::clone(&self.group),
            member: Arc::clone(&self.state),
            channel: id.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn local_member(&self) -> MemberId {
        self.state.id.clone()
    }
}

impl Drop for LocalMember {
    fn drop(&mut self) {
        self.group.members.remove(&self.state.id);
        log::debug!(
            "[LocalGroup] '{}' left group '{}'",
            self.state.id,
            self.group.name
        );
    }
}

impl std::fmt::Debug for LocalMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMember")
            .field("id", &self.state.id)
            .field("available", &self.is_available())
            .finish()
    }
}

struct LocalDispatcher {
    group: Arc<GroupInner>,
    member: Arc<MemberState>,
    channel: ChannelId,
    closed: AtomicBool,
}

impl LocalDispatcher {
    fn ensure_usable(&self) -> Result<(), DispatchError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DispatchError::Closed(self.channel.clone()));
        }
        self.member.ensure_available()
    }

    fn context_of(&self, member: &MemberState) -> Option<Arc<dyn BroadcastReceiver>> {
        if !member.available.load(Ordering::Acquire) {
            return None;
        }
        member
            .contexts
            .get(&self.channel)
            .map(|context| Arc::clone(context.value()))
    }

    // Contexts are collected first so that no map guard is held while
    // receivers run.
    fn deliver(
        &self,
        command: &BroadcastCommand,
        targets: Vec<Arc<dyn BroadcastReceiver>>,
    ) -> Result<(), DispatchError> {
        let frame = command.encode()?;
        for context in targets {
            let decoded = BroadcastCommand::decode(&frame)?;
            command::execute(&decoded, context.as_ref());
        }
        Ok(())
    }
}

impl CommandDispatcher for LocalDispatcher {
    fn execute_on_group(
        &self,
        command: &BroadcastCommand,
        delivery: Delivery,
    ) -> Result<(), DispatchError> {
        self.ensure_usable()?;

        let targets: Vec<_> = self
            .group
            .members
            .iter()
            .filter(|m| delivery == Delivery::All || m.key() != &self.member.id)
            .filter_map(|m| self.context_of(m.value()))
            .collect();

        log::trace!(
            "[LocalGroup] '{}' dispatching {} bytes on '{}' to {} member(s)",
            self.member.id,
            command.payload().len(),
            self.channel,
            targets.len()
        );

        self.deliver(command, targets)
    }

    fn execute_on_member(
        &self,
        command: &BroadcastCommand,
        member: &MemberId,
    ) -> Result<(), DispatchError> {
        self.ensure_usable()?;

        let target = self
            .group
            .members
            .get(member)
            .map(|m| Arc::clone(m.value()))
            .ok_or_else(|| DispatchError::UnknownMember(member.clone()))?;

        let targets = self.context_of(&target).into_iter().collect();
        self.deliver(command, targets)
    }

    fn close(&self) -> Result<(), DispatchError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.member.contexts.remove(&self.channel);
        log::debug!(
            "[LocalGroup] '{}' closed dispatcher for channel '{}'",
            self.member.id,
            self.channel
        );
        Ok(())
    }
}
