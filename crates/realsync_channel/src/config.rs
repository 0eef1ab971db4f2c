//! Channel adapter configuration.

use std::time::Duration;

/// Configuration for a [`ChannelAdapter`](crate::ChannelAdapter).
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Prefix of every channel topic.
    pub topic_prefix: String,
    /// Namespace used when a subscription names none.
    pub default_namespace: String,
    /// Maximum time to open a connection.
    pub connect_timeout: Duration,
}

impl ChannelConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            topic_prefix: "realtime".to_string(),
            default_namespace: "public".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Sets the channel topic prefix.
    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }

    /// Sets the default namespace.
    pub fn with_default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = namespace.into();
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::new()
    }
}
