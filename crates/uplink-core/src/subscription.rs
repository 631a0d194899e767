//! Inbound action subscription.
//!
//! A client has at most one active subscriber. Subscribing again opens a new
//! reply destination, announces it to the endpoint and closes the previous
//! one, so a replaced subscriber never sees another action.

use crate::channel::{InboundEnvelope, MessageChannel, OutboundEnvelope, ReplyHandle};
use crate::error::TransportError;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Receiver of actions pushed by the endpoint.
pub trait ActionSubscriber<A>: Send + 'static {
    fn process_action(&mut self, action: A);
}

impl<A, F> ActionSubscriber<A> for F
where
    F: FnMut(A) + Send + 'static,
{
    fn process_action(&mut self, action: A) {
        self(action)
    }
}

/// Tracks the single active reply destination.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    active: Option<ReplyHandle>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the subscribe handshake for `subscriber` over `channel`.
    ///
    /// Inbound actions are decoded into `A` on delivery; actions that do not
    /// decode are logged and dropped. On a failed handshake the previous
    /// registration stays active.
    pub fn register<A, S>(
        &mut self,
        channel: &MessageChannel,
        mut subscriber: S,
    ) -> Result<ReplyHandle, TransportError>
    where
        A: DeserializeOwned + Send + 'static,
        S: ActionSubscriber<A>,
    {
        let reply = channel.open_reply_channel(move |envelope: InboundEnvelope| {
            match serde_json::from_value::<A>(envelope.action) {
                Ok(action) => subscriber.process_action(action),
                Err(e) => warn!("Dropping inbound action that failed to decode: {}", e),
            }
        });

        if let Err(e) = channel.send(OutboundEnvelope::Subscribe {
            reply_to: reply.clone(),
        }) {
            reply.close();
            return Err(e);
        }

        if let Some(previous) = self.active.replace(reply.clone()) {
            debug!("Subscriber {} replaced by {}", previous.id(), reply.id());
            previous.close();
        }
        Ok(reply)
    }

    pub fn active(&self) -> Option<&ReplyHandle> {
        self.active.as_ref()
    }

    /// Close the active destination, if any.
    pub fn clear(&mut self) {
        if let Some(active) = self.active.take() {
            active.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Method;
    use crate::transport::SessionHandle;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::runtime::Handle;
    use tokio::sync::mpsc;

    /// Session that remembers the latest reply destination.
    #[derive(Debug, Default)]
    struct EndpointStub {
        reply_to: Mutex<Option<ReplyHandle>>,
        reject: Mutex<bool>,
    }

    impl SessionHandle for EndpointStub {
        fn send(&self, envelope: OutboundEnvelope) -> Result<(), TransportError> {
            if *self.reject.lock().unwrap() {
                return Err(TransportError::Closed);
            }
            assert_eq!(envelope.method(), Method::Subscribe);
            if let OutboundEnvelope::Subscribe { reply_to } = envelope {
                *self.reply_to.lock().unwrap() = Some(reply_to);
            }
            Ok(())
        }
    }

    impl EndpointStub {
        fn push(&self, value: serde_json::Value) -> Result<(), TransportError> {
            self.reply_to
                .lock()
                .unwrap()
                .as_ref()
                .expect("no subscriber")
                .deliver(InboundEnvelope::new(value))
        }
    }

    #[tokio::test]
    async fn test_register_announces_reply_destination() {
        let stub = Arc::new(EndpointStub::default());
        let channel = MessageChannel::new(stub.clone(), Handle::current());
        let mut registry = SubscriptionRegistry::new();

        let (tx, mut rx) = mpsc::unbounded_channel::<u32>();
        let reply = registry
            .register(&channel, move |n: u32| {
                let _ = tx.send(n);
            })
            .unwrap();

        assert_eq!(registry.active().map(|r| r.id()), Some(reply.id()));
        stub.push(serde_json::json!(5)).unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(got, Some(5));
    }

    #[tokio::test]
    async fn test_resubscribe_closes_previous() {
        let stub = Arc::new(EndpointStub::default());
        let channel = MessageChannel::new(stub.clone(), Handle::current());
        let mut registry = SubscriptionRegistry::new();

        let first = registry.register(&channel, |_: u32| {}).unwrap();
        let second = registry.register(&channel, |_: u32| {}).unwrap();

        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(registry.active().map(|r| r.id()), Some(second.id()));
    }

    #[tokio::test]
    async fn test_failed_handshake_keeps_previous() {
        let stub = Arc::new(EndpointStub::default());
        let channel = MessageChannel::new(stub.clone(), Handle::current());
        let mut registry = SubscriptionRegistry::new();

        let first = registry.register(&channel, |_: u32| {}).unwrap();
        *stub.reject.lock().unwrap() = true;

        let result = registry.register(&channel, |_: u32| {});
        assert_eq!(result.unwrap_err(), TransportError::Closed);
        assert!(!first.is_closed());
        assert_eq!(registry.active().map(|r| r.id()), Some(first.id()));
    }

    #[tokio::test]
    async fn test_undecodable_action_is_skipped() {
        let stub = Arc::new(EndpointStub::default());
        let channel = MessageChannel::new(stub.clone(), Handle::current());
        let mut registry = SubscriptionRegistry::new();

        let (tx, mut rx) = mpsc::unbounded_channel::<u32>();
        registry
            .register(&channel, move |n: u32| {
                let _ = tx.send(n);
            })
            .unwrap();

        stub.push(serde_json::json!("not a number")).unwrap();
        stub.push(serde_json::json!(9)).unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(got, Some(9));
    }

    #[tokio::test]
    async fn test_clear_closes_active() {
        let stub = Arc::new(EndpointStub::default());
        let channel = MessageChannel::new(stub, Handle::current());
        let mut registry = SubscriptionRegistry::new();

        let reply = registry.register(&channel, |_: u32| {}).unwrap();
        registry.clear();

        assert!(reply.is_closed());
        assert!(registry.active().is_none());
    }
}
