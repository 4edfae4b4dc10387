use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, SchedError};

/// Post-handler pause modeling heterogeneous node speeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeSpeed {
    Low,
    Medium,
    High,
}

impl NodeSpeed {
    pub fn delay(self) -> Duration {
        match self {
            NodeSpeed::Low => Duration::from_millis(50),
            NodeSpeed::Medium => Duration::from_millis(10),
            NodeSpeed::High => Duration::from_millis(2),
        }
    }
}

impl FromStr for NodeSpeed {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(NodeSpeed::Low),
            "medium" => Ok(NodeSpeed::Medium),
            "high" => Ok(NodeSpeed::High),
            other => Err(SchedError::Config(format!(
                "unknown node speed {:?}, expected low, medium or high",
                other
            ))),
        }
    }
}

/// Immutable cluster configuration, read once at startup and threaded by
/// value into every actor.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub scheduler_node_count: u64,
    pub worker_node_count: u64,
    pub client_node_count: u64,
    pub min_election_timeout: Duration,
    pub max_election_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub channel_buffer_size: usize,
    pub node_speed_list: Vec<NodeSpeed>,
    /// Directory for per-replica debug state dumps. Disabled when unset.
    pub state_dir: Option<PathBuf>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            scheduler_node_count: 3,
            worker_node_count: 2,
            client_node_count: 1,
            min_election_timeout: Duration::from_millis(150),
            max_election_timeout: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
            channel_buffer_size: 64,
            node_speed_list: vec![NodeSpeed::Medium; 3],
            state_dir: None,
        }
    }
}

impl ClusterConfig {
    /// Majority threshold for the scheduler cohort.
    pub fn majority(&self) -> u64 {
        self.scheduler_node_count / 2 + 1
    }

    /// Speed for a given replica; the list is padded with its last value.
    pub fn node_speed(&self, id: u64) -> NodeSpeed {
        self.node_speed_list
            .get(id as usize)
            .or_else(|| self.node_speed_list.last())
            .copied()
            .unwrap_or(NodeSpeed::Medium)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler_node_count < 1 {
            return Err(SchedError::Config(
                "scheduler_node_count must be at least 1".into(),
            ));
        }
        if self.worker_node_count < 1 {
            return Err(SchedError::Config(
                "worker_node_count must be at least 1".into(),
            ));
        }
        if self.client_node_count < 1 {
            return Err(SchedError::Config(
                "client_node_count must be at least 1".into(),
            ));
        }
        if self.channel_buffer_size < 1 {
            return Err(SchedError::Config(
                "channel_buffer_size must be at least 1".into(),
            ));
        }
        if self.min_election_timeout <= self.heartbeat_interval {
            return Err(SchedError::Config(format!(
                "min_election_timeout ({:?}) must exceed heartbeat_interval ({:?})",
                self.min_election_timeout, self.heartbeat_interval
            )));
        }
        if self.max_election_timeout <= self.min_election_timeout {
            return Err(SchedError::Config(format!(
                "max_election_timeout ({:?}) must exceed min_election_timeout ({:?})",
                self.max_election_timeout, self.min_election_timeout
            )));
        }
        Ok(())
    }
}

/// Parse a comma-separated speed list, e.g. "low,medium,high".
pub fn parse_node_speeds(s: &str) -> Result<Vec<NodeSpeed>> {
    s.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(NodeSpeed::from_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ClusterConfig::default().validate().is_ok());
    }

    #[test]
    fn test_majority() {
        let mut config = ClusterConfig::default();
        config.scheduler_node_count = 1;
        assert_eq!(config.majority(), 1);
        config.scheduler_node_count = 3;
        assert_eq!(config.majority(), 2);
        config.scheduler_node_count = 4;
        assert_eq!(config.majority(), 3);
        config.scheduler_node_count = 5;
        assert_eq!(config.majority(), 3);
    }

    #[test]
    fn test_rejects_inverted_timeouts() {
        let mut config = ClusterConfig::default();
        config.min_election_timeout = Duration::from_millis(300);
        config.max_election_timeout = Duration::from_millis(150);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_heartbeat_above_election_floor() {
        let mut config = ClusterConfig::default();
        config.heartbeat_interval = Duration::from_millis(200);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_cohort() {
        let mut config = ClusterConfig::default();
        config.scheduler_node_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_node_speeds() {
        let speeds = parse_node_speeds("low, medium,HIGH").unwrap();
        assert_eq!(
            speeds,
            vec![NodeSpeed::Low, NodeSpeed::Medium, NodeSpeed::High]
        );
        assert!(parse_node_speeds("low,fast").is_err());
    }

    #[test]
    fn test_speed_list_padding() {
        let mut config = ClusterConfig::default();
        config.node_speed_list = vec![NodeSpeed::Low, NodeSpeed::High];
        assert_eq!(config.node_speed(0), NodeSpeed::Low);
        assert_eq!(config.node_speed(1), NodeSpeed::High);
        assert_eq!(config.node_speed(7), NodeSpeed::High);
    }
}
