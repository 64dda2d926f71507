//! Registry configuration

use chrono::Duration;

/// Lifecycle window configuration
///
/// Passed by value at construction; deadlines are computed as absolute
/// instants when a task enters the phase the window governs.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long bidding stays open after creation
    pub bidding_window: Duration,
    /// How long the worker has to deliver after assignment
    pub execution_window: Duration,
    /// How long the poster has to review after delivery
    pub review_window: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            bidding_window: Duration::hours(1),
            execution_window: Duration::hours(24),
            review_window: Duration::hours(12),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_windows() {
        let config = RegistryConfig::default();
        assert_eq!(config.bidding_window, Duration::hours(1));
        assert_eq!(config.execution_window, Duration::hours(24));
        assert_eq!(config.review_window, Duration::hours(12));
    }
}
