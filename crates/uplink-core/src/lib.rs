//! Uplink Core - client handle to an out-of-process uplink service.
//!
//! The service lives in a separately installed configurator app. This crate
//! does not start it or talk bytes to it; the host environment injects
//! discovery, bind and send primitives (see [`transport`]). What the crate
//! owns is the connection lifecycle: binding asynchronously, tracking the
//! session through connect, refusal, loss and disposal, and only allowing
//! sends and subscriptions while the session is live.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use uplink_core::{LoopbackEndpoint, LoopbackMode, Payload, Uplink, UplinkStateCallback};
//!
//! struct Ready;
//!
//! impl UplinkStateCallback for Ready {
//!     fn on_uplink_ready(&self) { println!("ready"); }
//!     fn on_service_not_configured(&self) { println!("not configured"); }
//! }
//!
//! #[tokio::main]
//! async fn main() -> uplink_core::Result<()> {
//!     let host = Arc::new(LoopbackEndpoint::new(LoopbackMode::Accepting));
//!     let uplink = Uplink::new(host, Arc::new(Ready))?;
//!
//!     let mut state = uplink.watch_state();
//!     state.wait_for(|s| *s != uplink_core::LifecycleState::Uninitialized).await.ok();
//!
//!     uplink.subscribe(|action: uplink_core::Action| println!("{}", action.name))?;
//!     uplink.send_data(&Payload::new("device_shadow", 1).with_field("mode", "idle"))?;
//!     uplink.dispose()
//! }
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod error;
#[cfg(feature = "loopback")]
pub mod loopback;
pub mod state;
pub mod subscription;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use channel::{InboundEnvelope, MessageChannel, Method, OutboundEnvelope, ReplyHandle};
pub use client::{Uplink, UplinkStateCallback};
pub use config::{BindTarget, ClientConfig, EndpointConfig, MisusePolicy};
pub use error::{Result, TerminationCause, TransportError, UplinkError};
#[cfg(feature = "loopback")]
pub use loopback::{LoopbackEndpoint, LoopbackMode};
pub use state::{ConnectionStateMachine, LifecycleState};
pub use subscription::{ActionSubscriber, SubscriptionRegistry};
pub use transport::{
    BindCallbacks, BindEvent, BindPrimitive, EndpointDiscovery, HostEnvironment, SessionHandle,
    SessionRef,
};
pub use types::{Action, ActionResponse, Payload, ToPayload};
