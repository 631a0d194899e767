//! Seams to the host environment.
//!
//! The client never talks to another process itself. The host supplies:
//! - [`EndpointDiscovery`]: whether the endpoint is installed at all,
//! - [`BindPrimitive`]: the asynchronous bind and its release,
//! - [`SessionHandle`]: the send primitive of a bound session.
//!
//! Bind results come back through [`BindCallbacks`], which turns each hook
//! into a [`BindEvent`] on a single-consumer queue. The client drains that
//! queue on one task, so lifecycle transitions never run concurrently.

use crate::channel::OutboundEnvelope;
use crate::config::BindTarget;
use crate::error::TransportError;
use crate::state::LifecycleEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Send side of a bound session.
pub trait SessionHandle: Send + Sync + std::fmt::Debug {
    /// Hand an envelope to the endpoint. Must not block.
    fn send(&self, envelope: OutboundEnvelope) -> Result<(), TransportError>;
}

/// Shared reference to a bound session.
pub type SessionRef = Arc<dyn SessionHandle>;

/// Query whether an endpoint is installed on this host.
pub trait EndpointDiscovery: Send + Sync {
    fn is_endpoint_available(&self, target: &BindTarget) -> bool;
}

/// Establish and release bindings to an endpoint.
pub trait BindPrimitive: Send + Sync {
    /// Start binding to `target`. Returns immediately; the outcome arrives
    /// later through `callbacks`.
    fn bind(&self, target: &BindTarget, callbacks: BindCallbacks);

    /// Release the binding to `target`.
    fn unbind(&self, target: &BindTarget);
}

/// Everything a client needs from its host.
pub trait HostEnvironment: EndpointDiscovery + BindPrimitive {}

impl<T: EndpointDiscovery + BindPrimitive> HostEnvironment for T {}

/// Lifecycle signal from the bind primitive.
#[derive(Debug, Clone)]
pub enum BindEvent {
    Connected(SessionRef),
    Disconnected,
    BindingDied,
    NullBinding,
}

impl BindEvent {
    /// The signal without its payload.
    pub fn kind(&self) -> LifecycleEvent {
        match self {
            BindEvent::Connected(_) => LifecycleEvent::Connected,
            BindEvent::Disconnected => LifecycleEvent::Disconnected,
            BindEvent::BindingDied => LifecycleEvent::BindingDied,
            BindEvent::NullBinding => LifecycleEvent::NullBinding,
        }
    }
}

/// Hooks handed to [`BindPrimitive::bind`].
///
/// Cheap to clone and safe to call from any thread. Calls made after the
/// owning client is gone are dropped.
#[derive(Debug, Clone)]
pub struct BindCallbacks {
    target: BindTarget,
    events: mpsc::UnboundedSender<BindEvent>,
}

impl BindCallbacks {
    /// Create callbacks for `target` together with the queue they feed.
    pub fn channel(target: BindTarget) -> (Self, mpsc::UnboundedReceiver<BindEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { target, events }, rx)
    }

    pub fn target(&self) -> &BindTarget {
        &self.target
    }

    pub fn on_connected(&self, session: SessionRef) {
        self.emit(BindEvent::Connected(session));
    }

    pub fn on_disconnected(&self) {
        self.emit(BindEvent::Disconnected);
    }

    pub fn on_binding_died(&self) {
        self.emit(BindEvent::BindingDied);
    }

    pub fn on_null_binding(&self) {
        self.emit(BindEvent::NullBinding);
    }

    fn emit(&self, event: BindEvent) {
        let kind = event.kind();
        if self.events.send(event).is_err() {
            debug!("Dropping {:?} for {}: client is gone", kind, self.target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callbacks_enqueue_in_order() {
        let (callbacks, mut rx) = BindCallbacks::channel(BindTarget::default());

        callbacks.on_null_binding();
        callbacks.on_disconnected();
        callbacks.on_binding_died();

        assert_eq!(rx.try_recv().unwrap().kind(), LifecycleEvent::NullBinding);
        assert_eq!(rx.try_recv().unwrap().kind(), LifecycleEvent::Disconnected);
        assert_eq!(rx.try_recv().unwrap().kind(), LifecycleEvent::BindingDied);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_callbacks_after_receiver_dropped_are_ignored() {
        let (callbacks, rx) = BindCallbacks::channel(BindTarget::default());
        drop(rx);

        // Must not panic
        callbacks.on_disconnected();
        assert_eq!(callbacks.target(), &BindTarget::default());
    }
}
