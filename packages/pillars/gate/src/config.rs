//! Mesh configuration.
//!
//! Every option maps onto one subsystem knob; defaults match a
//! single-node deployment with signatures and real-time alerting on and
//! peer distribution off. Loadable from YAML.

use crate::trust::TrustConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use trustmesh_causal::{PruneConfig, StoreConfig};
use trustmesh_ledger::{
    AnomalyConfig, CorrelationConfig, LedgerConfig, MonitorConfig, Regulation,
};

/// Configuration load errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration parse error: {0}")]
    Parse(String),
}

/// Audit retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Default audit retention in days.
    pub default_days: u32,
    /// Overrides per category or event type.
    pub by_category: BTreeMap<String, u32>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            default_days: 365,
            by_category: BTreeMap::new(),
        }
    }
}

/// Real-time monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Gate on the anomaly/correlation/threat pipeline.
    pub real_time_alerts: bool,
    pub correlation_window_ms: i64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            real_time_alerts: true,
            correlation_window_ms: 300_000,
        }
    }
}

/// Compliance scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceConfig {
    pub enabled_regulations: BTreeSet<Regulation>,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            enabled_regulations: BTreeSet::from([
                Regulation::Gdpr,
                Regulation::Sox,
                Regulation::Hipaa,
                Regulation::PciDss,
            ]),
        }
    }
}

/// Integrity controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Compute and verify Ed25519 signatures.
    pub digital_signatures: bool,
    /// Compute and verify SHA-256 checksums.
    pub log_integrity: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            digital_signatures: true,
            log_integrity: true,
        }
    }
}

/// Writer throughput.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Audit buffer flush threshold, in entries.
    pub buffer_size: usize,
    pub flush_interval_ms: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            flush_interval_ms: 30_000,
        }
    }
}

/// Peer sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    pub enabled: bool,
    pub sync_interval_ms: u64,
    /// Peer queue acceptance required for durability acknowledgment.
    pub consensus_required: bool,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sync_interval_ms: 5_000,
            consensus_required: false,
        }
    }
}

/// Vector clock pruning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockPruneConfig {
    pub max_age_ms: i64,
    pub max_size: usize,
    pub keep_recent: usize,
    pub prune_interval_ms: u64,
}

impl Default for ClockPruneConfig {
    fn default() -> Self {
        let defaults = PruneConfig::default();
        Self {
            max_age_ms: defaults.max_age_ms,
            max_size: defaults.max_size,
            keep_recent: defaults.keep_recent,
            prune_interval_ms: 10 * 60 * 1000,
        }
    }
}

/// Top-level configuration for the whole mesh core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub node_id: Option<String>,
    pub environment: Option<String>,
    pub retention: RetentionConfig,
    pub monitoring: MonitoringConfig,
    pub compliance: ComplianceConfig,
    pub security: SecurityConfig,
    pub performance: PerformanceConfig,
    pub distribution: DistributionConfig,
    pub clock_prune: ClockPruneConfig,
    pub trust: TrustConfig,
}

impl MeshConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn node_id(&self) -> String {
        self.node_id.clone().unwrap_or_else(|| "node-0".to_string())
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            node_id: self.node_id(),
            environment: self
                .environment
                .clone()
                .unwrap_or_else(|| "production".to_string()),
            buffer_size: self.performance.buffer_size,
            flush_interval_ms: self.performance.flush_interval_ms,
            digital_signatures: self.security.digital_signatures,
            log_integrity: self.security.log_integrity,
            retention_default_days: self.retention.default_days,
            retention_by_category: self.retention.by_category.clone(),
            enabled_regulations: self.compliance.enabled_regulations.clone(),
            distribution_enabled: self.distribution.enabled,
            consensus_required: self.distribution.consensus_required,
            ..Default::default()
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            real_time_alerts: self.monitoring.real_time_alerts,
            anomaly: AnomalyConfig {
                window_ms: self.monitoring.correlation_window_ms,
                ..Default::default()
            },
            correlation: CorrelationConfig {
                window_ms: self.monitoring.correlation_window_ms,
                ..Default::default()
            },
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            prune: PruneConfig {
                max_age_ms: self.clock_prune.max_age_ms,
                max_size: self.clock_prune.max_size,
                keep_recent: self.clock_prune.keep_recent,
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MeshConfig::default();
        assert_eq!(config.retention.default_days, 365);
        assert_eq!(config.performance.buffer_size, 1000);
        assert_eq!(config.performance.flush_interval_ms, 30_000);
        assert_eq!(config.monitoring.correlation_window_ms, 300_000);
        assert!(config.security.digital_signatures);
        assert!(!config.distribution.enabled);
        assert!((config.trust.initial_score - 0.5).abs() < 1e-9);
        assert!(config.trust.trusted_locations.is_empty());
    }

    #[test]
    fn test_yaml_load() {
        let yaml = r#"
node_id: mesh-7
retention:
  default_days: 90
  by_category:
    payments: 2555
monitoring:
  real_time_alerts: false
compliance:
  enabled_regulations: [GDPR, PCI-DSS]
security:
  digital_signatures: true
  log_integrity: true
performance:
  buffer_size: 64
distribution:
  enabled: true
  sync_interval_ms: 1000
  consensus_required: true
trust:
  initial_score: 0.4
  trusted_locations: [eu-west]
"#;
        let config = MeshConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.node_id(), "mesh-7");
        assert_eq!(config.retention.by_category.get("payments"), Some(&2555));
        assert!(!config.monitoring.real_time_alerts);
        assert_eq!(config.compliance.enabled_regulations.len(), 2);
        assert!(config.distribution.consensus_required);
        assert!((config.trust.initial_score - 0.4).abs() < 1e-9);

        let ledger = config.ledger_config();
        assert_eq!(ledger.buffer_size, 64);
        assert!(ledger.consensus_required);
    }

    #[test]
    fn test_bad_yaml_is_an_error() {
        assert!(MeshConfig::from_yaml("retention: [not, a, map]").is_err());
    }
}
