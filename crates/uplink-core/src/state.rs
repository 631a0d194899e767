//! Connection lifecycle state machine.
//!
//! Owns the lifecycle state of one client instance and decides the legality
//! of every operation. Pure logic: transitions return a [`Transition`]
//! describing the side effects the caller must perform (release the binding,
//! notify the ready callback) instead of performing them.
//!
//! ```text
//!                  connected            dispose
//!  UNINITIALIZED ─────────────► CONNECTED ───────► FINISHED
//!     │     │                       │                  ▲
//!     │     │ null binding          │ disconnected     │
//!     │     ▼                       ▼                  │
//!     │  NOT_CONFIGURED          STOPPED               │
//!     │                                                │
//!     └──────────── dispose (misuse) ──────────────────┘
//! ```
//!
//! The binding is released at most once per instance, whichever path gets
//! there first.

use crate::error::{Result, TerminationCause, UplinkError};
use serde::{Deserialize, Serialize};

/// Lifecycle states of an uplink client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Bind requested, result not known yet.
    Uninitialized,
    /// Bind succeeded, the session is usable.
    Connected,
    /// The endpoint exists but refused to bind.
    NotConfigured,
    /// A live session was lost without the client disposing it.
    Stopped,
    /// The client was disposed.
    Finished,
}

impl LifecycleState {
    /// Whether no further transition can leave this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleState::NotConfigured | LifecycleState::Stopped | LifecycleState::Finished
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Uninitialized => write!(f, "UNINITIALIZED"),
            LifecycleState::Connected => write!(f, "CONNECTED"),
            LifecycleState::NotConfigured => write!(f, "SERVICE_NOT_CONFIGURED"),
            LifecycleState::Stopped => write!(f, "SERVICE_STOPPED"),
            LifecycleState::Finished => write!(f, "FINISHED"),
        }
    }
}

/// Lifecycle signals reported by the bind primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Connected,
    Disconnected,
    BindingDied,
    NullBinding,
}

/// Caller-facing notification produced by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Ready,
    ServiceNotConfigured,
}

/// Misuse of `dispose()` detected by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Misuse {
    /// Disposed before the bind result arrived.
    DisposeBeforeReady,
    /// Disposed an instance that was already disposed.
    DoubleDispose,
}

impl Misuse {
    pub fn reason(&self) -> &'static str {
        match self {
            Misuse::DisposeBeforeReady => "attempted to dispose an uninitialized instance",
            Misuse::DoubleDispose => "attempted to dispose an uplink instance twice",
        }
    }
}

impl std::fmt::Display for Misuse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

/// Outcome of feeding an event (or a dispose) to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: LifecycleState,
    pub to: LifecycleState,
    /// The caller must unbind from the endpoint.
    pub release_binding: bool,
    pub notify: Option<Notification>,
    pub misuse: Option<Misuse>,
}

impl Transition {
    fn stay(state: LifecycleState) -> Self {
        Self {
            from: state,
            to: state,
            release_binding: false,
            notify: None,
            misuse: None,
        }
    }

    /// Whether the state changed.
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Explicit lifecycle state machine for one client instance.
#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: LifecycleState,
    binding_released: bool,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMachine {
    /// Start in `Uninitialized` with the bind outstanding.
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Uninitialized,
            binding_released: false,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Whether the binding has already been handed back to the host.
    pub fn binding_released(&self) -> bool {
        self.binding_released
    }

    /// Apply a lifecycle signal from the bind primitive.
    ///
    /// Signals that make no sense in the current state leave it untouched.
    pub fn apply(&mut self, event: LifecycleEvent) -> Transition {
        let from = self.state;
        match (from, event) {
            (LifecycleState::Uninitialized, LifecycleEvent::Connected) => {
                self.move_to(LifecycleState::Connected, false, Some(Notification::Ready))
            }
            (LifecycleState::Uninitialized, LifecycleEvent::NullBinding) => self.move_to(
                LifecycleState::NotConfigured,
                true,
                Some(Notification::ServiceNotConfigured),
            ),
            (LifecycleState::Connected, LifecycleEvent::Disconnected) => {
                self.move_to(LifecycleState::Stopped, true, None)
            }
            _ => Transition::stay(from),
        }
    }

    /// Apply an explicit `dispose()`.
    pub fn dispose(&mut self) -> Transition {
        match self.state {
            LifecycleState::Connected => self.move_to(LifecycleState::Finished, true, None),
            LifecycleState::NotConfigured | LifecycleState::Stopped => {
                Transition::stay(self.state)
            }
            LifecycleState::Uninitialized => {
                let mut transition = self.move_to(LifecycleState::Finished, true, None);
                transition.misuse = Some(Misuse::DisposeBeforeReady);
                transition
            }
            LifecycleState::Finished => {
                let mut transition = Transition::stay(self.state);
                transition.misuse = Some(Misuse::DoubleDispose);
                transition
            }
        }
    }

    /// Assert that `operation` may run in the current state.
    pub fn check(&self, operation: &'static str) -> Result<()> {
        match self.state {
            LifecycleState::Connected => Ok(()),
            LifecycleState::NotConfigured => Err(UplinkError::NotConfigured),
            LifecycleState::Stopped => Err(UplinkError::Terminated {
                cause: TerminationCause::ConnectionLost,
            }),
            LifecycleState::Uninitialized => Err(UplinkError::ContractViolation {
                operation,
                state: self.state,
                reason: "attempt to use service before initialization is complete",
            }),
            // Still a caller defect, reported under the terminated kind
            LifecycleState::Finished => Err(UplinkError::Terminated {
                cause: TerminationCause::Disposed,
            }),
        }
    }

    fn move_to(
        &mut self,
        to: LifecycleState,
        release: bool,
        notify: Option<Notification>,
    ) -> Transition {
        let from = self.state;
        self.state = to;
        let release_binding = release && !self.binding_released;
        if release_binding {
            self.binding_released = true;
        }
        Transition {
            from,
            to,
            release_binding,
            notify,
            misuse: None,
        }
    }
}
