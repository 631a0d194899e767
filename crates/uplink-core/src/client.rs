//! Uplink client facade.
//!
//! Construction checks that the endpoint is installed, then issues an
//! asynchronous bind and returns. Bind results are drained by one spawned
//! task that feeds the [`ConnectionStateMachine`] and owns the session slot;
//! caller operations take the same lock, so they always see a state and a
//! session that agree.
//!
//! # Example
//!
//! ```rust,ignore
//! let host = Arc::new(LoopbackEndpoint::new(LoopbackMode::Accepting));
//! let uplink = Uplink::new(host, Arc::new(MyCallbacks))?;
//!
//! uplink.watch_state().wait_for(|s| *s != LifecycleState::Uninitialized).await?;
//! uplink.send_data(&Payload::new("gps", 1).with_field("lat", 12.9))?;
//! uplink.dispose()?;
//! ```

use crate::channel::{MessageChannel, OutboundEnvelope};
use crate::config::{BindTarget, ClientConfig, MisusePolicy};
use crate::error::{Result, UplinkError};
use crate::state::{
    ConnectionStateMachine, LifecycleEvent, LifecycleState, Notification, Transition,
};
use crate::subscription::{ActionSubscriber, SubscriptionRegistry};
use crate::transport::{BindCallbacks, BindEvent, EndpointDiscovery, HostEnvironment};
use crate::types::ToPayload;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Caller-facing lifecycle callbacks. At most one fires per construction.
pub trait UplinkStateCallback: Send + Sync {
    /// The session is usable.
    fn on_uplink_ready(&self);

    /// The endpoint is installed but refused to bind.
    fn on_service_not_configured(&self);
}

struct Inner {
    machine: ConnectionStateMachine,
    /// Present exactly while `Connected`.
    channel: Option<MessageChannel>,
    subscriptions: SubscriptionRegistry,
}

struct Shared {
    host: Arc<dyn HostEnvironment>,
    config: ClientConfig,
    runtime: Handle,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<LifecycleState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn target(&self) -> &BindTarget {
        &self.config.target
    }

    /// Apply one bind event and return the notification to raise.
    fn handle_event(&self, event: BindEvent) -> Option<Notification> {
        let kind = event.kind();
        let transition = {
            let mut inner = self.lock();
            let transition = inner.machine.apply(kind);
            if let BindEvent::Connected(session) = event {
                if transition.to == LifecycleState::Connected && transition.changed() {
                    inner.channel = Some(MessageChannel::new(session, self.runtime.clone()));
                } else {
                    warn!(
                        "Ignoring connect for {} in state {}",
                        self.target(),
                        transition.from
                    );
                }
            }
            Self::teardown_if_terminal(&mut inner, &transition);
            transition
        };

        match kind {
            LifecycleEvent::BindingDied => {
                error!("Uplink binding to {} died", self.target())
            }
            LifecycleEvent::NullBinding if transition.changed() => {
                info!("Uplink service at {} not ready", self.target())
            }
            _ => {}
        }
        self.finish(&transition);
        transition.notify
    }

    fn teardown_if_terminal(inner: &mut Inner, transition: &Transition) {
        if transition.changed() && transition.to.is_terminal() {
            inner.channel = None;
            inner.subscriptions.clear();
        }
    }

    /// Release the binding if asked to and publish the new state.
    fn finish(&self, transition: &Transition) {
        if transition.release_binding {
            debug!("Releasing binding to {}", self.target());
            self.host.unbind(self.target());
        }
        if transition.changed() {
            info!("Uplink state {} -> {}", transition.from, transition.to);
            self.state_tx.send_replace(transition.to);
        }
    }

    /// Channel of the live session, after the state assertion for `operation`.
    fn connected_channel(inner: &Inner, operation: &'static str) -> Result<MessageChannel> {
        inner.machine.check(operation)?;
        inner
            .channel
            .clone()
            .ok_or(UplinkError::ContractViolation {
                operation,
                state: LifecycleState::Connected,
                reason: "connected without a session",
            })
    }
}

/// Client handle to the uplink service.
pub struct Uplink {
    shared: Arc<Shared>,
    pump: JoinHandle<()>,
}

impl std::fmt::Debug for Uplink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uplink")
            .field("target", self.shared.target())
            .field("state", &self.state())
            .finish()
    }
}

impl Uplink {
    /// Bind to the configurator's uplink service with default options.
    ///
    /// Must be called within a tokio runtime. Returns before the bind result
    /// is known; wait for `callback` (or [`watch_state`](Self::watch_state))
    /// before using the instance.
    pub fn new(
        host: Arc<dyn HostEnvironment>,
        callback: Arc<dyn UplinkStateCallback>,
    ) -> Result<Self> {
        Self::with_config(host, callback, ClientConfig::default())
    }

    /// Bind with explicit options.
    pub fn with_config(
        host: Arc<dyn HostEnvironment>,
        callback: Arc<dyn UplinkStateCallback>,
        config: ClientConfig,
    ) -> Result<Self> {
        if !Self::configurator_available(host.as_ref(), &config.target) {
            return Err(UplinkError::ConfiguratorUnavailable {
                target: config.target.to_string(),
            });
        }

        let runtime = Handle::try_current().map_err(|_| UplinkError::ContractViolation {
            operation: "construct",
            state: LifecycleState::Uninitialized,
            reason: "must be called within a tokio runtime",
        })?;

        let (state_tx, _) = watch::channel(LifecycleState::Uninitialized);
        let target = config.target.clone();
        let shared = Arc::new(Shared {
            host,
            config,
            runtime: runtime.clone(),
            inner: Mutex::new(Inner {
                machine: ConnectionStateMachine::new(),
                channel: None,
                subscriptions: SubscriptionRegistry::new(),
            }),
            state_tx,
        });

        let (callbacks, events) = BindCallbacks::channel(target.clone());
        let pump = runtime.spawn(Self::pump_events(shared.clone(), events, callback));

        info!("Binding to uplink service at {}", target);
        shared.host.bind(&target, callbacks);

        Ok(Self { shared, pump })
    }

    /// Whether an endpoint is registered for `target`.
    pub fn configurator_available<D>(discovery: &D, target: &BindTarget) -> bool
    where
        D: EndpointDiscovery + ?Sized,
    {
        let available = discovery.is_endpoint_available(target);
        debug!("Endpoint {} available: {}", target, available);
        available
    }

    async fn pump_events(
        shared: Arc<Shared>,
        mut events: mpsc::UnboundedReceiver<BindEvent>,
        callback: Arc<dyn UplinkStateCallback>,
    ) {
        while let Some(event) = events.recv().await {
            match shared.handle_event(event) {
                Some(Notification::Ready) => callback.on_uplink_ready(),
                Some(Notification::ServiceNotConfigured) => callback.on_service_not_configured(),
                None => {}
            }
        }
        debug!("Bind event queue for {} closed", shared.target());
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.shared.lock().machine.state()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.shared.state_tx.subscribe()
    }

    /// Register `subscriber` for actions pushed by the endpoint.
    ///
    /// Replaces any earlier subscriber. Actions are decoded into `A` when
    /// they arrive.
    pub fn subscribe<A, S>(&self, subscriber: S) -> Result<()>
    where
        A: DeserializeOwned + Send + 'static,
        S: ActionSubscriber<A>,
    {
        let mut inner = self.shared.lock();
        let channel = Shared::connected_channel(&inner, "subscribe")?;
        let reply = inner.subscriptions.register(&channel, subscriber)?;
        debug!("Subscribed with reply channel {}", reply.id());
        Ok(())
    }

    /// Send a payload to the uplink backend.
    pub fn send_data<P>(&self, payload: &P) -> Result<()>
    where
        P: Serialize + ?Sized,
    {
        let inner = self.shared.lock();
        let channel = Shared::connected_channel(&inner, "send_data")?;
        let payload = serde_json::to_value(payload)?;
        channel.send(OutboundEnvelope::SendData { payload })?;
        Ok(())
    }

    /// Respond to an action received from the backend.
    pub fn respond_to_action<R>(&self, response: &R) -> Result<()>
    where
        R: ToPayload + ?Sized,
    {
        self.send_data(&response.to_payload())
    }

    /// Release the service. The instance must not be used afterwards.
    ///
    /// Disposing before the bind result or disposing twice is misuse: it is
    /// logged, and with [`MisusePolicy::Strict`] also returned as an error.
    /// The binding is released at most once either way.
    pub fn dispose(&self) -> Result<()> {
        let transition = {
            let mut inner = self.shared.lock();
            let transition = inner.machine.dispose();
            Shared::teardown_if_terminal(&mut inner, &transition);
            transition
        };
        self.shared.finish(&transition);

        let Some(misuse) = transition.misuse else {
            return Ok(());
        };
        warn!("{} ({})", misuse, self.shared.target());
        match self.shared.config.misuse_policy {
            MisusePolicy::Warn => Ok(()),
            MisusePolicy::Strict => Err(UplinkError::ContractViolation {
                operation: "dispose",
                state: transition.from,
                reason: misuse.reason(),
            }),
        }
    }
}

impl Drop for Uplink {
    fn drop(&mut self) {
        let transition = {
            let mut inner = self.shared.lock();
            if inner.machine.state().is_terminal() {
                None
            } else {
                let transition = inner.machine.dispose();
                Shared::teardown_if_terminal(&mut inner, &transition);
                Some(transition)
            }
        };
        if let Some(transition) = transition {
            debug!("Uplink dropped while {}, releasing", transition.from);
            self.shared.finish(&transition);
        }
        self.pump.abort();
    }
}

#[cfg(all(test, feature = "loopback"))]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackEndpoint, LoopbackMode};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counts {
        ready: AtomicUsize,
        not_configured: AtomicUsize,
    }

    impl UplinkStateCallback for Counts {
        fn on_uplink_ready(&self) {
            self.ready.fetch_add(1, Ordering::SeqCst);
        }

        fn on_service_not_configured(&self) {
            self.not_configured.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_drop_releases_live_binding() {
        let endpoint = LoopbackEndpoint::new(LoopbackMode::Accepting);
        let counts = Arc::new(Counts::default());
        let uplink = Uplink::new(Arc::new(endpoint.clone()), counts.clone()).unwrap();
        uplink
            .watch_state()
            .wait_for(|s| *s == LifecycleState::Connected)
            .await
            .unwrap();

        drop(uplink);

        assert_eq!(endpoint.unbind_count(), 1);
        assert_eq!(counts.ready.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_after_dispose_does_not_release_again() {
        let endpoint = LoopbackEndpoint::new(LoopbackMode::Accepting);
        let uplink = Uplink::new(Arc::new(endpoint.clone()), Arc::new(Counts::default())).unwrap();
        uplink
            .watch_state()
            .wait_for(|s| *s == LifecycleState::Connected)
            .await
            .unwrap();

        uplink.dispose().unwrap();
        drop(uplink);

        assert_eq!(endpoint.unbind_count(), 1);
    }

    #[test]
    fn test_construct_outside_runtime_is_contract_violation() {
        let endpoint = LoopbackEndpoint::new(LoopbackMode::Accepting);
        let err = Uplink::new(Arc::new(endpoint), Arc::new(Counts::default())).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[tokio::test]
    async fn test_debug_shows_state() {
        let endpoint = LoopbackEndpoint::deferred(LoopbackMode::Accepting);
        let uplink = Uplink::new(Arc::new(endpoint), Arc::new(Counts::default())).unwrap();
        let rendered = format!("{:?}", uplink);
        assert!(rendered.contains("Uninitialized"));
    }
}
