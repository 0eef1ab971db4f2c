//! Configuration for the sync orchestrator.

use crate::binding::Binding;
use realsync_core::{SubscriptionDescriptor, TargetRegistry};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Largest power of two applied to the reconnect delay (a 32x multiplier).
pub const MAX_BACKOFF_EXPONENT: u32 = 5;

/// Behavior of the orchestrator's connection management.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Reconnect automatically after a failure or lost connection.
    pub auto_reconnect: bool,
    /// Base delay of the exponential backoff.
    pub reconnect_delay: Duration,
    /// Reconnect attempts before giving up. Counted after the initial attempt.
    pub max_reconnect_attempts: u32,
    /// Log every applied event at debug level.
    pub debug_logging: bool,
}

impl SyncOptions {
    /// Creates options with the default values.
    pub fn new() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_delay: Duration::from_millis(1000),
            max_reconnect_attempts: 10,
            debug_logging: cfg!(debug_assertions),
        }
    }

    /// Creates options with automatic reconnection disabled.
    pub fn no_reconnect() -> Self {
        Self::new().with_auto_reconnect(false)
    }

    /// Enables or disables automatic reconnection.
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Sets the base reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the maximum number of reconnect attempts.
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Enables or disables per-event debug logging.
    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }

    /// Calculates the delay before reconnect attempt `attempt` (0-indexed).
    ///
    /// `reconnect_delay * 2^min(attempt, 5)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 1u32 << attempt.min(MAX_BACKOFF_EXPONENT);
        self.reconnect_delay.saturating_mul(multiplier)
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps local paths to the backend topics that feed them.
///
/// Targets are looked up in the [`TargetRegistry`] under the same path the
/// subscription is configured with.
pub struct SyncConfig {
    targets: Arc<TargetRegistry>,
    subscriptions: Vec<(String, Arc<dyn Binding>)>,
}

impl SyncConfig {
    /// Creates a configuration without subscriptions.
    pub fn new(targets: Arc<TargetRegistry>) -> Self {
        Self {
            targets,
            subscriptions: Vec::new(),
        }
    }

    /// Adds a subscription for `path`, replacing any earlier one for the same path.
    pub fn with_subscription<E>(
        mut self,
        path: impl Into<String>,
        descriptor: SubscriptionDescriptor<E>,
    ) -> Self
    where
        E: Send + Sync + 'static,
    {
        let path = path.into();
        let binding: Arc<dyn Binding> = Arc::new(descriptor);
        match self.subscriptions.iter_mut().find(|(p, _)| *p == path) {
            Some(entry) => entry.1 = binding,
            None => self.subscriptions.push((path, binding)),
        }
        self
    }

    /// Returns the target registry.
    pub fn targets(&self) -> &Arc<TargetRegistry> {
        &self.targets
    }

    /// Returns the configured paths in insertion order.
    pub fn paths(&self) -> Vec<&str> {
        self.subscriptions.iter().map(|(p, _)| p.as_str()).collect()
    }

    /// Returns the number of configured subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Returns true if nothing is configured.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Arc<TargetRegistry>, Vec<(String, Arc<dyn Binding>)>) {
        (self.targets, self.subscriptions)
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("paths", &self.paths())
            .finish()
    }
}
