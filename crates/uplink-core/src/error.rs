//! Error types for the uplink client.
//!
//! Recoverable conditions (endpoint missing, endpoint refused, session lost,
//! transport failures) are kept apart from contract violations, which signal
//! a defect in the calling code rather than a runtime condition.

use crate::state::LifecycleState;
use thiserror::Error;

/// Failure reported by a session's send primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Session closed by the remote endpoint")]
    Closed,

    #[error("Remote endpoint rejected the envelope: {message}")]
    Rejected { message: String },
}

/// Why a client instance reports itself terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    /// The endpoint went away while connected.
    ConnectionLost,
    /// The instance was disposed by its owner.
    Disposed,
}

impl std::fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationCause::ConnectionLost => write!(f, "connection lost"),
            TerminationCause::Disposed => write!(f, "instance was disposed"),
        }
    }
}

/// Main error type for the uplink client.
#[derive(Debug, Error)]
pub enum UplinkError {
    // Construction
    #[error("Configurator unavailable: no endpoint registered for {target}")]
    ConfiguratorUnavailable { target: String },

    // State assertions
    #[error("Uplink service is not configured")]
    NotConfigured,

    #[error("Uplink service terminated: {cause}")]
    Terminated { cause: TerminationCause },

    #[error("Contract violation in {operation} while {state}: {reason}")]
    ContractViolation {
        operation: &'static str,
        state: LifecycleState,
        reason: &'static str,
    },

    // Delivery
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    // Payload encoding
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },
}

/// Result type alias for uplink operations.
pub type Result<T> = std::result::Result<T, UplinkError>;

impl From<serde_json::Error> for UplinkError {
    fn from(err: serde_json::Error) -> Self {
        UplinkError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl UplinkError {
    /// Whether this error signals misuse of the client by its caller.
    ///
    /// These are not expected to be handled in normal control flow.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            UplinkError::ContractViolation { .. }
                | UplinkError::Terminated {
                    cause: TerminationCause::Disposed
                }
        )
    }

    /// Whether this is a runtime condition the caller is expected to handle.
    pub fn is_recoverable(&self) -> bool {
        !self.is_contract_violation()
    }

    /// Whether the only way forward is constructing a new client.
    pub fn requires_new_client(&self) -> bool {
        matches!(
            self,
            UplinkError::ConfiguratorUnavailable { .. }
                | UplinkError::NotConfigured
                | UplinkError::Terminated { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = UplinkError::Terminated {
            cause: TerminationCause::ConnectionLost,
        };
        assert_eq!(err.to_string(), "Uplink service terminated: connection lost");

        let err = UplinkError::ContractViolation {
            operation: "send_data",
            state: LifecycleState::Uninitialized,
            reason: "too early",
        };
        assert_eq!(
            err.to_string(),
            "Contract violation in send_data while UNINITIALIZED: too early"
        );
    }

    #[test]
    fn test_transport_error_converts() {
        let err: UplinkError = TransportError::Closed.into();
        assert!(matches!(err, UplinkError::Transport(TransportError::Closed)));
        assert!(!err.requires_new_client());
        assert!(!err.is_contract_violation());
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_classification() {
        assert!(UplinkError::NotConfigured.requires_new_client());
        assert!(!UplinkError::NotConfigured.is_contract_violation());
        assert!(UplinkError::ConfiguratorUnavailable {
            target: "x".into()
        }
        .requires_new_client());
        assert!(UplinkError::Terminated {
            cause: TerminationCause::Disposed
        }
        .is_contract_violation());
    }
}
