// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Configuration for k8smcp
//!
//! Settings are loaded once at startup from a YAML file and are immutable for
//! the process lifetime. Every section has compiled defaults so a missing or
//! partial file is never an error. Runtime data lives under ~/.k8smcp/:
//! - ~/.k8smcp/log/ - rotated log files

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Get the base k8smcp directory (~/.k8smcp/)
pub fn base_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|p| p.join(".k8smcp"))
        .context("Could not determine home directory")
}

/// Top-level settings, mirroring the sections of the config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub kubernetes: KubernetesSettings,
    pub monitoring: MonitoringSettings,
    pub logging: LoggingSettings,
}

/// Identity of the gateway process (consumed by the protocol-framing layer,
/// which is outside this crate)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            name: "k8smcp".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Cluster access settings handed to the Kubernetes access layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesSettings {
    /// Explicit kubeconfig path; falls back to $KUBECONFIG / ~/.kube/config
    pub config_path: Option<String>,
    /// Kubeconfig context to use; None means the file's current context
    pub context: Option<String>,
    /// Default namespace for URIs that omit the namespace segment
    pub namespace: String,
    /// When false, TLS certificates are not verified (see ssl_hostname)
    pub ssl_verify: bool,
    /// Expected TLS server name, pinned when ssl_verify is disabled
    pub ssl_hostname: Option<String>,
}

impl Default for KubernetesSettings {
    fn default() -> Self {
        Self {
            config_path: None,
            context: None,
            namespace: "default".to_string(),
            ssl_verify: true,
            ssl_hostname: None,
        }
    }
}

/// Health aggregation policy: weights, cutoffs, and bounds.
///
/// The cutoffs form the level table: weighted mean >= healthy_cutoff is
/// Healthy, >= degraded_cutoff is Degraded, >= unhealthy_cutoff is Unhealthy,
/// anything below is Critical. These are policy numbers, not derived ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    /// Per-category weights for the overall score (categories default to 1.0)
    pub weights: BTreeMap<String, f64>,
    pub healthy_cutoff: f64,
    pub degraded_cutoff: f64,
    pub unhealthy_cutoff: f64,
    /// Findings reported per category before collapsing into a remainder count
    pub max_findings_per_category: usize,
    /// Per-category poll timeout in seconds
    pub poll_timeout_secs: u64,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            weights: BTreeMap::new(),
            healthy_cutoff: 90.0,
            degraded_cutoff: 70.0,
            unhealthy_cutoff: 40.0,
            max_findings_per_category: 10,
            poll_timeout_secs: 10,
        }
    }
}

impl MonitoringSettings {
    /// Weight for a category, defaulting to equal weight
    pub fn weight(&self, category: &str) -> f64 {
        self.weights.get(category).copied().unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a YAML file, or return defaults when no path is
    /// given. A missing file at an explicit path is an error; a partial file
    /// merges over defaults section by section.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let content = fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file: {}", p.display()))?;
                let settings: Settings = serde_yaml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {}", p.display()))?;
                Ok(settings)
            }
            None => Ok(Settings::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.kubernetes.namespace, "default");
        assert!(settings.kubernetes.ssl_verify);
        assert!(settings.kubernetes.config_path.is_none());
        assert_eq!(settings.monitoring.healthy_cutoff, 90.0);
        assert_eq!(settings.monitoring.degraded_cutoff, 70.0);
        assert_eq!(settings.monitoring.unhealthy_cutoff, 40.0);
        assert_eq!(settings.monitoring.max_findings_per_category, 10);
    }

    #[test]
    fn test_parse_full_file() {
        let yaml = r#"
server:
  name: mcp-k8s
  host: 0.0.0.0
  port: 9000
kubernetes:
  config_path: /etc/kube/config
  context: prod
  namespace: platform
  ssl_verify: false
  ssl_hostname: api.prod.internal
monitoring:
  healthy_cutoff: 95.0
  weights:
    nodes: 2.0
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.kubernetes.context.as_deref(), Some("prod"));
        assert_eq!(settings.kubernetes.namespace, "platform");
        assert!(!settings.kubernetes.ssl_verify);
        assert_eq!(
            settings.kubernetes.ssl_hostname.as_deref(),
            Some("api.prod.internal")
        );
        assert_eq!(settings.monitoring.healthy_cutoff, 95.0);
        assert_eq!(settings.monitoring.weight("nodes"), 2.0);
        // Unlisted categories keep equal weight
        assert_eq!(settings.monitoring.weight("pods"), 1.0);
    }

    #[test]
    fn test_partial_file_merges_over_defaults() {
        let yaml = "kubernetes:\n  namespace: staging\n";
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.kubernetes.namespace, "staging");
        // Untouched sections keep defaults
        assert!(settings.kubernetes.ssl_verify);
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn test_load_explicit_missing_path_is_error() {
        let err = Settings::load(Some(Path::new("/nonexistent/k8smcp.yaml")));
        assert!(err.is_err());
    }

    #[test]
    fn test_load_none_returns_defaults() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.server.name, "k8smcp");
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "kubernetes:\n  context: kind-local\n").unwrap();
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.kubernetes.context.as_deref(), Some("kind-local"));
    }
}
