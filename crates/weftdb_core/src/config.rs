//! Session configuration.

use weftdb_engine::AccessMode;

/// Configuration for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Access mode requested for engine transactions opened by replay.
    pub access_mode: AccessMode,

    /// Optional label carried into log events emitted by this session.
    pub label: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_mode: AccessMode::ReadWrite,
            label: None,
        }
    }
}

impl SessionConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the access mode for engine transactions.
    #[must_use]
    pub const fn access_mode(mut self, mode: AccessMode) -> Self {
        self.access_mode = mode;
        self
    }

    /// Sets the session label used in log events.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.access_mode, AccessMode::ReadWrite);
        assert!(config.label.is_none());
    }

    #[test]
    fn builder_pattern() {
        let config = SessionConfig::new()
            .access_mode(AccessMode::ReadOnly)
            .label("sync-worker");

        assert_eq!(config.access_mode, AccessMode::ReadOnly);
        assert_eq!(config.label.as_deref(), Some("sync-worker"));
    }
}
