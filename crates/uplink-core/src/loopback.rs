//! In-process stand-in for the uplink endpoint.
//!
//! Implements the host seams ([`EndpointDiscovery`], [`BindPrimitive`],
//! [`SessionHandle`]) without another process, so the client can be driven
//! end to end from tests and the demo. It records what the client sends and
//! lets the driver push actions or kill the endpoint.

use crate::channel::{InboundEnvelope, OutboundEnvelope, ReplyHandle};
use crate::config::BindTarget;
use crate::error::TransportError;
use crate::transport::{BindCallbacks, BindPrimitive, EndpointDiscovery, SessionHandle};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// How the loopback endpoint answers a bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopbackMode {
    /// Installed and accepts binds.
    Accepting,
    /// Installed but answers binds with a null binding.
    Refusing,
    /// Not installed; discovery reports nothing.
    Absent,
}

#[derive(Debug)]
struct EndpointState {
    mode: LoopbackMode,
    target: BindTarget,
    /// Hold bind results until `complete_bind()`.
    deferred: bool,
    callbacks: Option<BindCallbacks>,
    session: Option<Arc<LoopbackSession>>,
    reply_to: Option<ReplyHandle>,
    received: Vec<serde_json::Value>,
    subscribe_count: usize,
    bind_count: usize,
    unbind_count: usize,
}

/// Loopback endpoint. Clones share state.
#[derive(Debug, Clone)]
pub struct LoopbackEndpoint {
    state: Arc<Mutex<EndpointState>>,
}

/// Session handed out by a [`LoopbackEndpoint`].
#[derive(Debug)]
pub struct LoopbackSession {
    endpoint: Arc<Mutex<EndpointState>>,
    open: AtomicBool,
}

fn lock(state: &Mutex<EndpointState>) -> MutexGuard<'_, EndpointState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LoopbackEndpoint {
    /// Endpoint registered under the default configurator target.
    pub fn new(mode: LoopbackMode) -> Self {
        Self::with_target(mode, BindTarget::default())
    }

    pub fn with_target(mode: LoopbackMode, target: BindTarget) -> Self {
        Self {
            state: Arc::new(Mutex::new(EndpointState {
                mode,
                target,
                deferred: false,
                callbacks: None,
                session: None,
                reply_to: None,
                received: Vec::new(),
                subscribe_count: 0,
                bind_count: 0,
                unbind_count: 0,
            })),
        }
    }

    /// Endpoint that answers binds only when [`complete_bind`](Self::complete_bind) is called.
    pub fn deferred(mode: LoopbackMode) -> Self {
        let endpoint = Self::new(mode);
        lock(&endpoint.state).deferred = true;
        endpoint
    }

    pub fn mode(&self) -> LoopbackMode {
        lock(&self.state).mode
    }

    /// Answer the outstanding bind. Returns false if none is pending.
    pub fn complete_bind(&self) -> bool {
        let (callbacks, mode) = {
            let state = lock(&self.state);
            match &state.callbacks {
                Some(callbacks) if state.session.is_none() => (callbacks.clone(), state.mode),
                _ => return false,
            }
        };
        self.answer(&callbacks, mode);
        true
    }

    /// Deliver an action to the most recent subscriber.
    pub fn push_action<T: Serialize>(&self, action: &T) -> Result<(), TransportError> {
        let value = serde_json::to_value(action).map_err(|e| TransportError::Rejected {
            message: e.to_string(),
        })?;
        let reply_to = lock(&self.state).reply_to.clone();
        match reply_to {
            Some(reply_to) => reply_to.deliver(InboundEnvelope::new(value)),
            None => Err(TransportError::Closed),
        }
    }

    /// Simulate the endpoint process dying: the session closes, then the
    /// client hears a disconnect followed by binding-died.
    pub fn kill(&self) {
        let callbacks = {
            let mut state = lock(&self.state);
            if let Some(session) = state.session.take() {
                session.open.store(false, Ordering::SeqCst);
            }
            state.reply_to = None;
            state.callbacks.clone()
        };
        info!("Loopback endpoint killed");
        if let Some(callbacks) = callbacks {
            callbacks.on_disconnected();
            callbacks.on_binding_died();
        }
    }

    /// Close the session without telling the client.
    pub fn close_session(&self) {
        if let Some(session) = &lock(&self.state).session {
            session.open.store(false, Ordering::SeqCst);
        }
    }

    /// Payloads received through `send-data`, in arrival order.
    pub fn received(&self) -> Vec<serde_json::Value> {
        lock(&self.state).received.clone()
    }

    pub fn subscribe_count(&self) -> usize {
        lock(&self.state).subscribe_count
    }

    pub fn bind_count(&self) -> usize {
        lock(&self.state).bind_count
    }

    pub fn unbind_count(&self) -> usize {
        lock(&self.state).unbind_count
    }

    fn answer(&self, callbacks: &BindCallbacks, mode: LoopbackMode) {
        match mode {
            LoopbackMode::Accepting => {
                let session = Arc::new(LoopbackSession {
                    endpoint: self.state.clone(),
                    open: AtomicBool::new(true),
                });
                lock(&self.state).session = Some(session.clone());
                callbacks.on_connected(session);
            }
            LoopbackMode::Refusing => callbacks.on_null_binding(),
            // Discovery already failed; a bind should not have been issued.
            LoopbackMode::Absent => debug!("Bind on absent loopback endpoint ignored"),
        }
    }
}

impl EndpointDiscovery for LoopbackEndpoint {
    fn is_endpoint_available(&self, target: &BindTarget) -> bool {
        let state = lock(&self.state);
        state.mode != LoopbackMode::Absent && &state.target == target
    }
}

impl BindPrimitive for LoopbackEndpoint {
    fn bind(&self, target: &BindTarget, callbacks: BindCallbacks) {
        let (deferred, mode) = {
            let mut state = lock(&self.state);
            state.bind_count += 1;
            state.callbacks = Some(callbacks.clone());
            (state.deferred, state.mode)
        };
        debug!("Loopback bind requested for {}", target);
        if !deferred {
            self.answer(&callbacks, mode);
        }
    }

    fn unbind(&self, target: &BindTarget) {
        let mut state = lock(&self.state);
        state.unbind_count += 1;
        state.callbacks = None;
        state.reply_to = None;
        if let Some(session) = state.session.take() {
            session.open.store(false, Ordering::SeqCst);
        }
        debug!("Loopback unbind for {}", target);
    }
}

impl SessionHandle for LoopbackSession {
    fn send(&self, envelope: OutboundEnvelope) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut state = lock(&self.endpoint);
        match envelope {
            OutboundEnvelope::SendData { payload } => state.received.push(payload),
            OutboundEnvelope::Subscribe { reply_to } => {
                state.subscribe_count += 1;
                state.reply_to = Some(reply_to);
            }
        }
        Ok(())
    }
}
