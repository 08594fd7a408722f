use thiserror::Error;

/// Errors that can occur when driving Powered Up hubs
#[derive(Error, Debug)]
pub enum HubError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// The BLE scan itself failed
    #[error("Discovery failed: {0}")]
    DiscoveryFailed(String),

    /// Opening a connection to a hub failed
    #[error("Failed to connect to hub: {0}")]
    ConnectionFailed(String),

    /// Writing a command frame to a hub failed
    #[error("Failed to send command: {0}")]
    CommandFailed(String),

    /// The hub is not connected, or the link was lost
    #[error("Hub disconnected")]
    Disconnected,

    /// The notification subscription is already running
    #[error("Notifications already started")]
    AlreadySubscribed,

    /// Subscribing to hub notifications failed
    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    /// No hub is registered under the given identity
    #[error("Hub not found: {0}")]
    NotFound(String),

    /// A rename target was empty after trimming
    #[error("Hub name cannot be empty")]
    InvalidName,

    /// The caller gave up waiting for the execution context
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// The execution context is no longer running
    #[error("Hub execution context is not running")]
    ContextClosed,

    /// Protocol or GATT layout error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for hub operations
pub type Result<T> = std::result::Result<T, HubError>;

impl HubError {
    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_) | Self::ConnectionFailed(_) | Self::Disconnected
        )
    }

    /// Check if retrying the same operation later may succeed
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::DiscoveryFailed(_)
                | Self::ConnectionFailed(_)
                | Self::CommandFailed(_)
        )
    }

    /// Check if the transport reported the link itself as gone
    #[must_use]
    pub const fn is_link_lost(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}
