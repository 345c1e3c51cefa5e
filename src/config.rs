use std::time::Duration;

use serde::Deserialize;

/// Settings for a [`crate::ChargerClient`].
///
/// Deserializable so it can sit inside an application's own configuration file; missing
/// fields take their default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Account id the charger topics are published under
    pub user_id: String,
    /// How long to wait for a charger to answer. Durations too large to add to the current
    /// instant wait for decades instead.
    pub request_timeout: Duration,
    /// How often abandoned requests are swept out of the pending table. Values below
    /// [`ClientConfig::MIN_SWEEP_INTERVAL`] are raised to it.
    pub sweep_interval: Duration,
    /// Frames buffered per event subscriber before slow subscribers start losing frames
    pub event_capacity: usize,
    /// Reject frames followed by padding
    pub strict_frame_length: bool,
}

impl ClientConfig {
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_EVENT_CAPACITY: usize = 64;
    pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

    pub fn new(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), ..Self::default() }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_strict_frame_length(mut self, strict: bool) -> Self {
        self.strict_frame_length = strict;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            sweep_interval: Self::DEFAULT_SWEEP_INTERVAL,
            event_capacity: Self::DEFAULT_EVENT_CAPACITY,
            strict_frame_length: false,
        }
    }
}

#[test]
fn test_builder_overrides_defaults() {
    let config = ClientConfig::new("a1b2").with_request_timeout(Duration::from_millis(250)).with_strict_frame_length(true);
    assert_eq!(config.user_id, "a1b2");
    assert_eq!(config.request_timeout, Duration::from_millis(250));
    assert_eq!(config.sweep_interval, ClientConfig::DEFAULT_SWEEP_INTERVAL);
    assert_eq!(config.event_capacity, 64);
    assert!(config.strict_frame_length);
}
