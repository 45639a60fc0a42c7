// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Static registry of the resource kinds the gateway serves.
//!
//! The kind set is closed: every supported kind is listed here with its API
//! group, plural name, scope, and whether metrics.k8s.io carries usage data
//! for it. Handlers switch on the kind tag instead of subclassing per kind,
//! and the lookup accepts singular, plural, and the conventional kubectl
//! short aliases, case-insensitively.

use kube::discovery::ApiResource;
use serde::{Deserialize, Serialize};

/// Whether a kind lives in a namespace or at cluster scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceScope {
    Namespaced,
    Cluster,
}

/// Closed set of resource kinds the gateway serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Pod,
    Deployment,
    Service,
    ConfigMap,
    Secret,
    PersistentVolumeClaim,
    PersistentVolume,
    Node,
    Namespace,
    Event,
    Ingress,
    StatefulSet,
    DaemonSet,
    Job,
    CronJob,
    ReplicaSet,
}

/// Capability row for one kind: static configuration data, not state
#[derive(Debug, Clone, Copy)]
pub struct KindInfo {
    pub kind: &'static str,
    pub group: &'static str,
    pub version: &'static str,
    pub plural: &'static str,
    pub singular: &'static str,
    pub aliases: &'static [&'static str],
    pub scope: ResourceScope,
    /// metrics.k8s.io exposes usage data for this kind
    pub has_metrics: bool,
}

use ResourceKind::*;
use ResourceScope::*;

impl ResourceKind {
    pub const ALL: [ResourceKind; 16] = [
        Pod,
        Deployment,
        Service,
        ConfigMap,
        Secret,
        PersistentVolumeClaim,
        PersistentVolume,
        Node,
        Namespace,
        Event,
        Ingress,
        StatefulSet,
        DaemonSet,
        Job,
        CronJob,
        ReplicaSet,
    ];

    /// Capability table. Groups and plurals follow the upstream API
    /// definitions; aliases follow kubectl's short names.
    pub fn info(&self) -> &'static KindInfo {
        match self {
            Pod => &KindInfo {
                kind: "Pod",
                group: "",
                version: "v1",
                plural: "pods",
                singular: "pod",
                aliases: &["po"],
                scope: Namespaced,
                has_metrics: true,
            },
            Deployment => &KindInfo {
                kind: "Deployment",
                group: "apps",
                version: "v1",
                plural: "deployments",
                singular: "deployment",
                aliases: &["deploy"],
                scope: Namespaced,
                has_metrics: false,
            },
            Service => &KindInfo {
                kind: "Service",
                group: "",
                version: "v1",
                plural: "services",
                singular: "service",
                aliases: &["svc"],
                scope: Namespaced,
                has_metrics: false,
            },
            ConfigMap => &KindInfo {
                kind: "ConfigMap",
                group: "",
                version: "v1",
                plural: "configmaps",
                singular: "configmap",
                aliases: &["cm"],
                scope: Namespaced,
                has_metrics: false,
            },
            Secret => &KindInfo {
                kind: "Secret",
                group: "",
                version: "v1",
                plural: "secrets",
                singular: "secret",
                aliases: &[],
                scope: Namespaced,
                has_metrics: false,
            },
            PersistentVolumeClaim => &KindInfo {
                kind: "PersistentVolumeClaim",
                group: "",
                version: "v1",
                plural: "persistentvolumeclaims",
                singular: "persistentvolumeclaim",
                aliases: &["pvc"],
                scope: Namespaced,
                has_metrics: false,
            },
            PersistentVolume => &KindInfo {
                kind: "PersistentVolume",
                group: "",
                version: "v1",
                plural: "persistentvolumes",
                singular: "persistentvolume",
                aliases: &["pv"],
                scope: Cluster,
                has_metrics: false,
            },
            Node => &KindInfo {
                kind: "Node",
                group: "",
                version: "v1",
                plural: "nodes",
                singular: "node",
                aliases: &["no"],
                scope: Cluster,
                has_metrics: true,
            },
            Namespace => &KindInfo {
                kind: "Namespace",
                group: "",
                version: "v1",
                plural: "namespaces",
                singular: "namespace",
                aliases: &["ns"],
                scope: Cluster,
                has_metrics: false,
            },
            Event => &KindInfo {
                kind: "Event",
                group: "",
                version: "v1",
                plural: "events",
                singular: "event",
                aliases: &["ev"],
                scope: Namespaced,
                has_metrics: false,
            },
            Ingress => &KindInfo {
                kind: "Ingress",
                group: "networking.k8s.io",
                version: "v1",
                plural: "ingresses",
                singular: "ingress",
                aliases: &["ing"],
                scope: Namespaced,
                has_metrics: false,
            },
            StatefulSet => &KindInfo {
                kind: "StatefulSet",
                group: "apps",
                version: "v1",
                plural: "statefulsets",
                singular: "statefulset",
                aliases: &["sts"],
                scope: Namespaced,
                has_metrics: false,
            },
            DaemonSet => &KindInfo {
                kind: "DaemonSet",
                group: "apps",
                version: "v1",
                plural: "daemonsets",
                singular: "daemonset",
                aliases: &["ds"],
                scope: Namespaced,
                has_metrics: false,
            },
            Job => &KindInfo {
                kind: "Job",
                group: "batch",
                version: "v1",
                plural: "jobs",
                singular: "job",
                aliases: &[],
                scope: Namespaced,
                has_metrics: false,
            },
            CronJob => &KindInfo {
                kind: "CronJob",
                group: "batch",
                version: "v1",
                plural: "cronjobs",
                singular: "cronjob",
                aliases: &["cj"],
                scope: Namespaced,
                has_metrics: false,
            },
            ReplicaSet => &KindInfo {
                kind: "ReplicaSet",
                group: "apps",
                version: "v1",
                plural: "replicasets",
                singular: "replicaset",
                aliases: &["rs"],
                scope: Namespaced,
                has_metrics: false,
            },
        }
    }

    /// Resolve a kind token (singular, plural, or alias; any case)
    pub fn parse(token: &str) -> Option<ResourceKind> {
        let lower = token.to_lowercase();
        Self::ALL.into_iter().find(|k| {
            let info = k.info();
            info.singular == lower || info.plural == lower || info.aliases.contains(&lower.as_str())
        })
    }

    pub fn is_namespaced(&self) -> bool {
        self.info().scope == Namespaced
    }

    pub fn scope(&self) -> ResourceScope {
        self.info().scope
    }

    /// Full apiVersion string ("v1", "apps/v1", ...)
    pub fn api_version(&self) -> String {
        let info = self.info();
        if info.group.is_empty() {
            info.version.to_string()
        } else {
            format!("{}/{}", info.group, info.version)
        }
    }

    /// Build the dynamic-API descriptor for this kind
    pub fn api_resource(&self) -> ApiResource {
        let info = self.info();
        ApiResource {
            group: info.group.to_string(),
            version: info.version.to_string(),
            api_version: self.api_version(),
            kind: info.kind.to_string(),
            plural: info.plural.to_string(),
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.info().kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_singular_and_plural() {
        assert_eq!(ResourceKind::parse("pod"), Some(Pod));
        assert_eq!(ResourceKind::parse("pods"), Some(Pod));
        assert_eq!(ResourceKind::parse("deployment"), Some(Deployment));
        assert_eq!(ResourceKind::parse("deployments"), Some(Deployment));
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(ResourceKind::parse("po"), Some(Pod));
        assert_eq!(ResourceKind::parse("deploy"), Some(Deployment));
        assert_eq!(ResourceKind::parse("pvc"), Some(PersistentVolumeClaim));
        assert_eq!(ResourceKind::parse("pv"), Some(PersistentVolume));
        assert_eq!(ResourceKind::parse("sts"), Some(StatefulSet));
    }

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!(ResourceKind::parse("Pod"), Some(Pod));
        assert_eq!(ResourceKind::parse("DEPLOYMENTS"), Some(Deployment));
        assert_eq!(ResourceKind::parse("CronJob"), Some(CronJob));
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(ResourceKind::parse("widget"), None);
        assert_eq!(ResourceKind::parse(""), None);
    }

    #[test]
    fn test_scope_table() {
        assert!(Pod.is_namespaced());
        assert!(Deployment.is_namespaced());
        assert!(!Node.is_namespaced());
        assert!(!Namespace.is_namespaced());
        assert!(!PersistentVolume.is_namespaced());
    }

    #[test]
    fn test_api_version() {
        assert_eq!(Pod.api_version(), "v1");
        assert_eq!(Deployment.api_version(), "apps/v1");
        assert_eq!(Ingress.api_version(), "networking.k8s.io/v1");
        assert_eq!(Job.api_version(), "batch/v1");
    }

    #[test]
    fn test_metrics_availability() {
        assert!(Pod.info().has_metrics);
        assert!(Node.info().has_metrics);
        assert!(!Service.info().has_metrics);
        assert!(!Secret.info().has_metrics);
    }

    #[test]
    fn test_api_resource_descriptor() {
        let ar = Deployment.api_resource();
        assert_eq!(ar.group, "apps");
        assert_eq!(ar.api_version, "apps/v1");
        assert_eq!(ar.kind, "Deployment");
        assert_eq!(ar.plural, "deployments");
    }

    #[test]
    fn test_no_duplicate_tokens() {
        // Every token must resolve to exactly one kind
        let mut seen = std::collections::HashSet::new();
        for kind in ResourceKind::ALL {
            let info = kind.info();
            assert!(seen.insert(info.singular), "duplicate: {}", info.singular);
            if info.plural != info.singular {
                assert!(seen.insert(info.plural), "duplicate: {}", info.plural);
            }
            for alias in info.aliases {
                assert!(seen.insert(*alias), "duplicate: {}", alias);
            }
        }
    }
}
