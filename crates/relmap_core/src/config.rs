//! Session configuration.

/// Tuning knobs for a [`crate::Session`].
///
/// Construct with [`SessionConfig::new`] and chain setters:
///
/// ```rust
/// use relmap_core::SessionConfig;
///
/// let config = SessionConfig::new().fetch_batch_size(64).log_queries(true);
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub(crate) fetch_batch_size: usize,
    pub(crate) log_queries: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fetch_batch_size: 256,
            log_queries: false,
        }
    }
}

impl SessionConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of keys per batched eager-fetch select.
    ///
    /// Values below 1 are clamped to 1.
    #[must_use]
    pub fn fetch_batch_size(mut self, size: usize) -> Self {
        self.fetch_batch_size = size.max(1);
        self
    }

    /// Logs each executed query at debug level.
    #[must_use]
    pub fn log_queries(mut self, enabled: bool) -> Self {
        self.log_queries = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::new();
        assert_eq!(config.fetch_batch_size, 256);
        assert!(!config.log_queries);
    }

    #[test]
    fn batch_size_is_clamped() {
        let config = SessionConfig::new().fetch_batch_size(0);
        assert_eq!(config.fetch_batch_size, 1);
    }
}
