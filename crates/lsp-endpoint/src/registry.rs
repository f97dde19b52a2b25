//! Correlation of outbound calls with their responses
//!
//! Caller threads register a slot before sending a request and then block on
//! that slot; the dispatcher thread fills the slot when the matching response
//! arrives. Every slot owns its own mutex and condition variable, so waking
//! one caller never disturbs another.
//!
//! Lock order is registry state, then slot. Waiters hold only their slot lock
//! while blocked.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lsp_endpoint_protocol::{RequestId, ResponseError};
use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use tracing::{debug, trace};

use crate::{EndpointError, Result};

/// How a pending call ended
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// The peer answered; `Err` carries its `error` member
    Response(std::result::Result<Value, ResponseError>),
    /// The transport closed before an answer arrived
    Closed,
}

#[derive(Debug, Default)]
struct PendingCall {
    slot: Mutex<Option<Completion>>,
    ready: Condvar,
}

impl PendingCall {
    /// Fill the slot and wake its waiter. Returns false if already filled.
    fn fill(&self, completion: Completion) -> bool {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(completion);
        self.ready.notify_one();
        true
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    next_id: i64,
    pending: HashMap<RequestId, Arc<PendingCall>>,
    closed: bool,
}

/// Thread-safe table of outstanding outbound calls
#[derive(Debug, Default)]
pub struct PendingCallRegistry {
    state: Mutex<RegistryState>,
}

impl PendingCallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next outbound id. Ids start at 0 and are never reused.
    pub fn allocate_id(&self) -> RequestId {
        let mut state = self.state.lock();
        Self::bump(&mut state)
    }

    fn bump(state: &mut RegistryState) -> RequestId {
        let id = state.next_id;
        state.next_id += 1;
        RequestId::Number(id)
    }

    /// Create the pending slot for `id`. Must happen before the request is
    /// sent so that a fast response always finds it.
    pub fn register(&self, id: RequestId) -> Result<()> {
        let mut state = self.state.lock();
        Self::insert(&mut state, id)
    }

    fn insert(state: &mut RegistryState, id: RequestId) -> Result<()> {
        if state.closed {
            return Err(EndpointError::TransportClosed);
        }
        if state.pending.contains_key(&id) {
            return Err(EndpointError::DuplicateId(id));
        }
        state.pending.insert(id, Arc::new(PendingCall::default()));
        Ok(())
    }

    /// Allocate an id and register it under a single lock acquisition.
    pub fn register_next(&self) -> Result<RequestId> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(EndpointError::TransportClosed);
        }
        let id = Self::bump(&mut state);
        Self::insert(&mut state, id.clone())?;
        Ok(id)
    }

    /// Deliver a response.
    ///
    /// Responses for ids nobody is waiting on (never issued, already timed
    /// out, or `None`) are dropped. Returns whether a waiter was found.
    pub fn complete(
        &self,
        id: Option<&RequestId>,
        outcome: std::result::Result<Value, ResponseError>,
    ) -> bool {
        let Some(id) = id else {
            debug!("Dropping response without id");
            return false;
        };
        let state = self.state.lock();
        match state.pending.get(id) {
            Some(call) => {
                let filled = call.fill(Completion::Response(outcome));
                if !filled {
                    debug!(%id, "Dropping duplicate response");
                }
                filled
            }
            None => {
                debug!(%id, "Dropping response for unknown or expired request");
                false
            }
        }
    }

    /// Block until `id` completes or `timeout` elapses, then remove its entry.
    ///
    /// On timeout the entry is removed immediately, so a response arriving
    /// later takes the unknown-id path. A response that lands between the
    /// timeout firing and the removal is still returned.
    pub fn wait_and_take(&self, id: &RequestId, timeout: Duration) -> Result<Completion> {
        let call = self
            .state
            .lock()
            .pending
            .get(id)
            .cloned()
            .ok_or_else(|| EndpointError::NotPending(id.clone()))?;

        let completion = {
            let mut slot = call.slot.lock();
            if slot.is_none() {
                call.ready
                    .wait_while_for(&mut slot, |slot| slot.is_none(), timeout);
            }
            slot.take()
        };

        let completion = {
            let mut state = self.state.lock();
            state.pending.remove(id);
            completion.or_else(|| call.slot.lock().take())
        };

        match completion {
            Some(completion) => {
                trace!(%id, "Pending call completed");
                Ok(completion)
            }
            None => Err(EndpointError::Timeout {
                id: id.clone(),
                timeout,
            }),
        }
    }

    /// Remove an entry without waiting, e.g. when sending its request failed.
    pub fn forget(&self, id: &RequestId) -> bool {
        self.state.lock().pending.remove(id).is_some()
    }

    /// Refuse new registrations and wake every waiter with [`Completion::Closed`].
    ///
    /// Entries stay in the table until their waiters take them.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        for call in state.pending.values() {
            call.fill(Completion::Closed);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.state.lock().pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
