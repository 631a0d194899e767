//! Centralized configuration for the uplink client.
//!
//! Identity of the configurator endpoint, envelope method codes, and the
//! per-client options.

/// Identity of the configurator app hosting the uplink service.
pub struct EndpointConfig;

impl EndpointConfig {
    pub const CONFIGURATOR_APP_ID: &'static str = "io.bytebeam.uplink.configurator";
    pub const UPLINK_SERVICE_ID: &'static str = "io.bytebeam.uplink.configurator.UplinkService";
}

/// Method codes selecting the remote-side handler of an envelope.
pub struct MethodCodes;

impl MethodCodes {
    pub const SEND_DATA: i32 = 1;
    pub const SUBSCRIBE: i32 = 2;
}

/// Action status reporting.
pub struct ActionStatusConfig;

impl ActionStatusConfig {
    /// Stream that action responses are published on.
    pub const STREAM: &'static str = "action_status";
    pub const STATE_RUNNING: &'static str = "Running";
    pub const STATE_COMPLETED: &'static str = "Completed";
    pub const STATE_FAILED: &'static str = "Failed";
}

/// Component a client binds to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindTarget {
    pub package: String,
    pub service: String,
}

impl BindTarget {
    pub fn new(package: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            service: service.into(),
        }
    }
}

impl Default for BindTarget {
    fn default() -> Self {
        Self::new(
            EndpointConfig::CONFIGURATOR_APP_ID,
            EndpointConfig::UPLINK_SERVICE_ID,
        )
    }
}

impl std::fmt::Display for BindTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.package, self.service)
    }
}

/// How `dispose()` reacts to being called outside its valid window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MisusePolicy {
    /// Log a warning and carry on.
    #[default]
    Warn,
    /// Return a contract violation after performing the same cleanup.
    Strict,
}

/// Options for one client instance.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub target: BindTarget,
    pub misuse_policy: MisusePolicy,
}
