use std::time::Duration;

/// Timing knobs for the core loops. Defaults match production behavior;
/// tests shrink them or drive a paused clock instead.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Interval between application-status reconciliations.
    pub poll_interval: Duration,
    /// Suppression window for repeated identical notifications.
    pub notify_cooldown: Duration,
    /// Refresh interval used when the push subscription could not be
    /// established and the sync engine runs pull-only.
    pub fallback_refresh: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            notify_cooldown: Duration::from_secs(5),
            fallback_refresh: Duration::from_secs(15),
        }
    }
}
