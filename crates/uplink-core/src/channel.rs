//! Typed send/receive channel over a bound session.
//!
//! Outbound traffic is a fire-and-forget [`OutboundEnvelope`] handed to the
//! session's send primitive. Inbound traffic has no implicit path back: the
//! caller first opens a reply destination ([`ReplyHandle`]) and tells the
//! endpoint about it; the endpoint then delivers [`InboundEnvelope`]s to it.
//!
//! # Delivery
//!
//! Each reply destination owns a queue drained by one spawned task, so
//! envelopes reach `on_message` in the order the transport delivered them.
//! Closing a destination stops delivery, including envelopes already queued.

use crate::config::MethodCodes;
use crate::error::TransportError;
use crate::transport::SessionRef;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use uuid::Uuid;

/// Remote-side handler an envelope is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    SendData,
    Subscribe,
}

impl Method {
    pub fn code(self) -> i32 {
        match self {
            Method::SendData => MethodCodes::SEND_DATA,
            Method::Subscribe => MethodCodes::SUBSCRIBE,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            MethodCodes::SEND_DATA => Some(Method::SendData),
            MethodCodes::SUBSCRIBE => Some(Method::Subscribe),
            _ => None,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::SendData => write!(f, "send-data"),
            Method::Subscribe => write!(f, "subscribe"),
        }
    }
}

/// Unit of outbound traffic.
#[derive(Debug, Clone)]
pub enum OutboundEnvelope {
    /// Opaque payload for the endpoint's data handler.
    SendData { payload: serde_json::Value },
    /// Where the endpoint should deliver future actions.
    Subscribe { reply_to: ReplyHandle },
}

impl OutboundEnvelope {
    pub fn method(&self) -> Method {
        match self {
            OutboundEnvelope::SendData { .. } => Method::SendData,
            OutboundEnvelope::Subscribe { .. } => Method::Subscribe,
        }
    }
}

/// Unit of inbound traffic: one action from the endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    pub action: serde_json::Value,
}

impl InboundEnvelope {
    pub fn new(action: serde_json::Value) -> Self {
        Self { action }
    }
}

/// Addressable reply destination handed to the endpoint.
///
/// Clones share the same destination. The endpoint keeps a clone and calls
/// [`deliver`](Self::deliver) for every inbound envelope.
#[derive(Clone)]
pub struct ReplyHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<InboundEnvelope>,
    closed: Arc<watch::Sender<bool>>,
}

impl std::fmt::Debug for ReplyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ReplyHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue an inbound envelope for the bound callback.
    pub fn deliver(&self, envelope: InboundEnvelope) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.tx.send(envelope).map_err(|_| TransportError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Stop delivering to the bound callback.
    pub(crate) fn close(&self) {
        if !self.closed.send_replace(true) {
            debug!("Closed reply channel {}", self.id);
        }
    }
}

/// Send/receive adapter over one session.
#[derive(Debug, Clone)]
pub struct MessageChannel {
    session: SessionRef,
    runtime: Handle,
}

impl MessageChannel {
    /// Wrap a session; reply channels are driven on `runtime`.
    pub fn new(session: SessionRef, runtime: Handle) -> Self {
        Self { session, runtime }
    }

    /// Transmit an envelope through the session.
    pub fn send(&self, envelope: OutboundEnvelope) -> Result<(), TransportError> {
        let method = envelope.method();
        debug!("Sending {} envelope", method);
        self.session.send(envelope).map_err(|e| {
            warn!("Failed to deliver {} envelope: {}", method, e);
            e
        })
    }

    /// Allocate a fresh reply destination bound to `on_message`.
    pub fn open_reply_channel<F>(&self, mut on_message: F) -> ReplyHandle
    where
        F: FnMut(InboundEnvelope) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<InboundEnvelope>();
        let (closed_tx, mut closed_rx) = watch::channel(false);
        let handle = ReplyHandle {
            id: Uuid::new_v4(),
            tx,
            closed: Arc::new(closed_tx),
        };
        let id = handle.id;

        self.runtime.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    changed = closed_rx.changed() => {
                        if changed.is_err() || *closed_rx.borrow() {
                            break;
                        }
                    }
                    envelope = rx.recv() => match envelope {
                        Some(envelope) => {
                            if *closed_rx.borrow() {
                                break;
                            }
                            on_message(envelope);
                        }
                        None => break,
                    },
                }
            }
            debug!("Reply channel {} drained", id);
        });

        debug!("Opened reply channel {}", id);
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SessionHandle;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct RecordingSession {
        sent: Mutex<Vec<Method>>,
        fail: bool,
    }

    impl SessionHandle for RecordingSession {
        fn send(&self, envelope: OutboundEnvelope) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::Rejected {
                    message: "nope".into(),
                });
            }
            self.sent.lock().unwrap().push(envelope.method());
            Ok(())
        }
    }

    fn channel(session: Arc<RecordingSession>) -> MessageChannel {
        MessageChannel::new(session, Handle::current())
    }

    #[test]
    fn test_method_codes_roundtrip() {
        for method in [Method::SendData, Method::Subscribe] {
            assert_eq!(Method::from_code(method.code()), Some(method));
        }
        assert_eq!(Method::from_code(0), None);
        assert_eq!(Method::SendData.to_string(), "send-data");
    }

    #[tokio::test]
    async fn test_send_reaches_session() {
        let session = Arc::new(RecordingSession::default());
        let channel = channel(session.clone());

        channel
            .send(OutboundEnvelope::SendData {
                payload: serde_json::json!({"a": 1}),
            })
            .unwrap();

        assert_eq!(*session.sent.lock().unwrap(), vec![Method::SendData]);
    }

    #[tokio::test]
    async fn test_send_failure_propagates() {
        let session = Arc::new(RecordingSession {
            fail: true,
            ..Default::default()
        });
        let channel = channel(session);

        let result = channel.send(OutboundEnvelope::SendData {
            payload: serde_json::Value::Null,
        });
        assert!(matches!(result, Err(TransportError::Rejected { .. })));
    }

    #[tokio::test]
    async fn test_reply_channel_delivers_in_order() {
        let channel = channel(Arc::new(RecordingSession::default()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reply = channel.open_reply_channel(move |env| {
            let _ = tx.send(env.action);
        });

        for i in 0..5 {
            reply.deliver(InboundEnvelope::new(serde_json::json!(i))).unwrap();
        }

        for i in 0..5 {
            let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(got, serde_json::json!(i));
        }
    }

    #[tokio::test]
    async fn test_closed_reply_channel_rejects_delivery() {
        let channel = channel(Arc::new(RecordingSession::default()));
        let reply = channel.open_reply_channel(|_| {});
        let remote_copy = reply.clone();

        reply.close();

        assert!(remote_copy.is_closed());
        assert_eq!(
            remote_copy.deliver(InboundEnvelope::new(serde_json::Value::Null)),
            Err(TransportError::Closed)
        );
    }

    #[tokio::test]
    async fn test_reply_handles_are_distinct() {
        let channel = channel(Arc::new(RecordingSession::default()));
        let a = channel.open_reply_channel(|_| {});
        let b = channel.open_reply_channel(|_| {});
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }
}
