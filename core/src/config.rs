//! Engine configuration.

use std::time::Duration;

/// Default bound on the number of seats a single reservation may name
pub const DEFAULT_MAX_SEATS_PER_RESERVE: usize = 256;

/// Configuration for a [`ReservationEngine`](crate::engine::ReservationEngine)
///
/// # Example
///
/// ```
/// use ems_core::config::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig::default()
///     .with_access_delay(Duration::from_micros(50))
///     .with_max_seats_per_reserve(16);
/// assert_eq!(config.max_seats_per_reserve, 16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Artificial latency awaited on every event lookup and seat access.
    ///
    /// Models a slow backing store so contention can be exercised in tests.
    /// `Duration::ZERO` disables it.
    pub access_delay: Duration,
    /// Upper bound on the seats a single `reserve` call may request
    pub max_seats_per_reserve: usize,
}

impl EngineConfig {
    /// Create a configuration with explicit values
    #[must_use]
    pub const fn new(access_delay: Duration, max_seats_per_reserve: usize) -> Self {
        Self {
            access_delay,
            max_seats_per_reserve,
        }
    }

    /// Set the per-access delay
    #[must_use]
    pub const fn with_access_delay(mut self, delay: Duration) -> Self {
        self.access_delay = delay;
        self
    }

    /// Set the per-call seat bound
    #[must_use]
    pub const fn with_max_seats_per_reserve(mut self, max: usize) -> Self {
        self.max_seats_per_reserve = max;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            access_delay: Duration::ZERO,
            max_seats_per_reserve: DEFAULT_MAX_SEATS_PER_RESERVE,
        }
    }
}
