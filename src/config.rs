use std::time::Duration;

use crate::error::{CoschedError, Result};

/// Timing configuration for the gang-scheduling coordinator.
///
/// The admission wait handed back to the host is `permit_wait * wait_multiplier`.
/// GC sweeps run every `gc_interval` and evict group records that have stayed
/// marked for deletion for at least `expiration`.
#[derive(Debug, Clone)]
pub struct CoschedulingConfig {
    /// Base permit wait unit
    pub permit_wait: Duration,
    /// Multiplier applied to `permit_wait` when a unit is parked
    pub wait_multiplier: u32,
    /// Interval between registry GC sweeps
    pub gc_interval: Duration,
    /// How long a record may stay marked for deletion before it is reaped
    pub expiration: Duration,
}

impl Default for CoschedulingConfig {
    fn default() -> Self {
        Self {
            permit_wait: Duration::from_secs(1),
            wait_multiplier: 10,
            gc_interval: Duration::from_secs(5),
            expiration: Duration::from_secs(10),
        }
    }
}

impl CoschedulingConfig {
    pub fn with_permit_wait(mut self, permit_wait: Duration) -> Self {
        self.permit_wait = permit_wait;
        self
    }

    pub fn with_gc_interval(mut self, gc_interval: Duration) -> Self {
        self.gc_interval = gc_interval;
        self
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    /// Wait duration requested from the host when a unit is parked.
    pub fn admission_wait(&self) -> Duration {
        self.permit_wait.saturating_mul(self.wait_multiplier)
    }

    /// Zero waits or a zero GC interval are rejected.
    pub fn validate(&self) -> Result<()> {
        if self.permit_wait.is_zero() {
            return Err(CoschedError::Config("permit wait must be positive".into()));
        }
        if self.wait_multiplier == 0 {
            return Err(CoschedError::Config(
                "wait multiplier must be at least 1".into(),
            ));
        }
        if self.gc_interval.is_zero() {
            return Err(CoschedError::Config("GC interval must be positive".into()));
        }
        Ok(())
    }
}

/// Configuration for the in-process simulator host.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Names of the nodes units are placed on (round-robin)
    pub nodes: Vec<String>,
    /// Namespace submitted units live in
    pub namespace: String,
    pub coscheduling: CoschedulingConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            nodes: (1..=3).map(|i| format!("node-{}", i)).collect(),
            namespace: "default".to_string(),
            coscheduling: CoschedulingConfig::default(),
        }
    }
}

impl SimulatorConfig {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn with_nodes(mut self, nodes: Vec<String>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_coscheduling(mut self, coscheduling: CoschedulingConfig) -> Self {
        self.coscheduling = coscheduling;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coscheduling_config_default() {
        let cfg = CoschedulingConfig::default();
        assert_eq!(cfg.permit_wait, Duration::from_secs(1));
        assert_eq!(cfg.wait_multiplier, 10);
        assert_eq!(cfg.gc_interval, Duration::from_secs(5));
        assert_eq!(cfg.expiration, Duration::from_secs(10));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn admission_wait_is_ten_base_units() {
        let cfg = CoschedulingConfig::default().with_permit_wait(Duration::from_millis(20));
        assert_eq!(cfg.admission_wait(), Duration::from_millis(200));
    }

    #[test]
    fn validate_rejects_zero_durations() {
        let cfg = CoschedulingConfig::default().with_permit_wait(Duration::ZERO);
        assert!(matches!(cfg.validate(), Err(CoschedError::Config(_))));

        let cfg = CoschedulingConfig::default().with_gc_interval(Duration::ZERO);
        assert!(matches!(cfg.validate(), Err(CoschedError::Config(_))));

        let cfg = CoschedulingConfig {
            wait_multiplier: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(CoschedError::Config(_))));
    }

    #[test]
    fn simulator_config_default() {
        let cfg = SimulatorConfig::default();
        assert_eq!(cfg.nodes, vec!["node-1", "node-2", "node-3"]);
        assert_eq!(cfg.namespace, "default");
    }

    #[test]
    fn simulator_config_builders() {
        let cfg = SimulatorConfig::new("batch")
            .with_nodes(vec!["a".to_string()])
            .with_coscheduling(CoschedulingConfig::default().with_expiration(Duration::ZERO));
        assert_eq!(cfg.namespace, "batch");
        assert_eq!(cfg.nodes, vec!["a"]);
        assert!(cfg.coscheduling.expiration.is_zero());
    }
}
