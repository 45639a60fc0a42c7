// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Cluster health aggregation.
//!
//! One list call per monitored category (nodes, pods, deployments), issued
//! concurrently and joined, each bounded by a poll timeout. Members are
//! classified healthy/unhealthy with category-specific predicates, scores
//! are combined into a weighted mean, and the mean is thresholded through
//! the configured level table. Snapshots are computed fresh per call and
//! never persisted.

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Pod};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::MonitoringSettings;
use crate::error::{ConnectionError, KalError};
use crate::kubernetes::{ClusterOps, ListFilters, ResourceKind};

/// A monitored class of cluster object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Nodes,
    Pods,
    Deployments,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Nodes, Category::Pods, Category::Deployments];

    fn key(&self) -> &'static str {
        match self {
            Category::Nodes => "nodes",
            Category::Pods => "pods",
            Category::Deployments => "deployments",
        }
    }

    fn kind(&self) -> ResourceKind {
        match self {
            Category::Nodes => ResourceKind::Node,
            Category::Pods => ResourceKind::Pod,
            Category::Deployments => ResourceKind::Deployment,
        }
    }
}

/// Healthy members over total members of one category
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Score {
    pub numerator: usize,
    pub denominator: usize,
    pub percentage: f64,
}

impl Score {
    pub fn new(numerator: usize, denominator: usize) -> Self {
        debug_assert!(numerator <= denominator);
        // An empty category is vacuously healthy but carries no weight
        let percentage = if denominator == 0 {
            100.0
        } else {
            numerator as f64 / denominator as f64 * 100.0
        };
        Self {
            numerator,
            denominator,
            percentage,
        }
    }
}

/// Ordered severity ladder; the weighted mean is thresholded into one of these
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

/// One unhealthy-member record
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub category: Category,
    pub target: String,
    pub reason: String,
}

/// Composite assessment of the cluster at one instant
#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub timestamp: DateTime<Utc>,
    pub category_scores: BTreeMap<Category, Score>,
    pub overall: HealthLevel,
    pub issues: Vec<Finding>,
    pub recommendations: Vec<String>,
}

/// Computes health snapshots on demand through the access layer
pub struct HealthChecker {
    ops: Arc<dyn ClusterOps>,
    policy: MonitoringSettings,
}

/// Classified outcome of one category poll
enum CategoryOutcome {
    Scored { score: Score, findings: Vec<Finding> },
    Failed { reason: String },
}

impl HealthChecker {
    pub fn new(ops: Arc<dyn ClusterOps>, policy: MonitoringSettings) -> Self {
        Self { ops, policy }
    }

    /// Poll every category concurrently and aggregate one snapshot.
    ///
    /// A category whose poll fails or times out is excluded from the
    /// weighted mean and contributes a finding instead; it never blocks the
    /// other categories.
    pub async fn check_cluster_health(&self) -> Result<HealthSnapshot, ConnectionError> {
        let (nodes, pods, deployments) = tokio::join!(
            self.poll(Category::Nodes),
            self.poll(Category::Pods),
            self.poll(Category::Deployments),
        );

        let mut category_scores = BTreeMap::new();
        let mut issues = Vec::new();
        let mut poll_failures = 0usize;

        for (category, outcome) in [
            (Category::Nodes, nodes?),
            (Category::Pods, pods?),
            (Category::Deployments, deployments?),
        ] {
            match outcome {
                CategoryOutcome::Scored { score, findings } => {
                    debug!(
                        category = category.key(),
                        healthy = score.numerator,
                        total = score.denominator,
                        "Category polled"
                    );
                    category_scores.insert(category, score);
                    issues.extend(self.cap_findings(category, findings));
                }
                CategoryOutcome::Failed { reason } => {
                    warn!(category = category.key(), reason = %reason, "Category poll failed");
                    poll_failures += 1;
                    issues.push(Finding {
                        category,
                        target: category.key().to_string(),
                        reason: format!("health poll failed: {}", reason),
                    });
                }
            }
        }

        let overall = self.overall_level(&category_scores, poll_failures);
        let recommendations = self.recommendations(&category_scores, poll_failures);

        Ok(HealthSnapshot {
            timestamp: Utc::now(),
            category_scores,
            overall,
            issues,
            recommendations,
        })
    }

    /// One bounded list call plus classification for a category
    async fn poll(&self, category: Category) -> Result<CategoryOutcome, ConnectionError> {
        let timeout = Duration::from_secs(self.policy.poll_timeout_secs);
        let listing = tokio::time::timeout(
            timeout,
            self.ops
                .list(category.kind(), None, true, &ListFilters::default()),
        )
        .await;

        let items = match listing {
            Err(_) => {
                return Ok(CategoryOutcome::Failed {
                    reason: format!("timed out after {:?}", timeout),
                });
            }
            Ok(Err(KalError::Connection(e))) => return Err(e),
            Ok(Err(KalError::Api(e))) => {
                return Ok(CategoryOutcome::Failed { reason: e.message });
            }
            Ok(Ok(items)) => items,
        };

        let total = items.len();
        let mut findings = Vec::new();
        for item in &items {
            if let Err(finding) = classify(category, item) {
                findings.push(finding);
            }
        }

        Ok(CategoryOutcome::Scored {
            score: Score::new(total - findings.len(), total),
            findings,
        })
    }

    /// First N findings per category, plus a count of the remainder
    fn cap_findings(&self, category: Category, findings: Vec<Finding>) -> Vec<Finding> {
        let cap = self.policy.max_findings_per_category;
        if findings.len() <= cap {
            return findings;
        }
        let remainder = findings.len() - cap;
        let mut capped: Vec<Finding> = findings.into_iter().take(cap).collect();
        capped.push(Finding {
            category,
            target: category.key().to_string(),
            reason: format!("and {} more unhealthy {}", remainder, category.key()),
        });
        capped
    }

    /// Weighted mean over scorable categories, thresholded by the level table.
    /// Empty categories carry no weight. With nothing scorable the verdict
    /// depends on why: all-empty is Healthy, all-failed is Critical.
    fn overall_level(
        &self,
        scores: &BTreeMap<Category, Score>,
        poll_failures: usize,
    ) -> HealthLevel {
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for (category, score) in scores {
            if score.denominator == 0 {
                continue;
            }
            let weight = self.policy.weight(category.key());
            weighted_sum += score.percentage * weight;
            weight_total += weight;
        }

        if weight_total == 0.0 {
            return if poll_failures > 0 {
                HealthLevel::Critical
            } else {
                HealthLevel::Healthy
            };
        }

        let mean = weighted_sum / weight_total;
        if mean >= self.policy.healthy_cutoff {
            HealthLevel::Healthy
        } else if mean >= self.policy.degraded_cutoff {
            HealthLevel::Degraded
        } else if mean >= self.policy.unhealthy_cutoff {
            HealthLevel::Unhealthy
        } else {
            HealthLevel::Critical
        }
    }

    /// Deterministic rule list keyed off categories scoring below the
    /// Healthy cutoff
    fn recommendations(
        &self,
        scores: &BTreeMap<Category, Score>,
        poll_failures: usize,
    ) -> Vec<String> {
        let mut out = Vec::new();
        for category in Category::ALL {
            let Some(score) = scores.get(&category) else {
                continue;
            };
            if score.denominator == 0 || score.percentage >= self.policy.healthy_cutoff {
                continue;
            }
            out.push(match category {
                Category::Nodes => {
                    "Nodes degraded: inspect node conditions, taints, and kubelet health on the affected nodes".to_string()
                }
                Category::Pods => {
                    "Pods unhealthy: check recent events and container logs for the pods listed in issues".to_string()
                }
                Category::Deployments => {
                    "Deployments below desired capacity: compare rollout status and replica availability".to_string()
                }
            });
        }
        if poll_failures > 0 {
            out.push(
                "One or more health polls failed: verify API server reachability and list permissions"
                    .to_string(),
            );
        }
        out
    }
}

/// Classify one member; Err carries the finding for an unhealthy member
fn classify(category: Category, item: &Value) -> Result<(), Finding> {
    match category {
        Category::Nodes => classify_node(item),
        Category::Pods => classify_pod(item),
        Category::Deployments => classify_deployment(item),
    }
}

/// Healthy iff a Ready condition with status "True" is present
fn classify_node(item: &Value) -> Result<(), Finding> {
    let name = member_name(item);
    let node: Node = serde_json::from_value(item.clone()).map_err(|e| Finding {
        category: Category::Nodes,
        target: name.clone(),
        reason: format!("unreadable node object: {}", e),
    })?;

    let ready = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false);

    if ready {
        Ok(())
    } else {
        Err(Finding {
            category: Category::Nodes,
            target: name,
            reason: "node is not Ready".to_string(),
        })
    }
}

/// Healthy iff phase is Running or Succeeded; the reason text of anything
/// else is collected into the finding
fn classify_pod(item: &Value) -> Result<(), Finding> {
    let name = member_name(item);
    let pod: Pod = serde_json::from_value(item.clone()).map_err(|e| Finding {
        category: Category::Pods,
        target: name.clone(),
        reason: format!("unreadable pod object: {}", e),
    })?;

    let status = pod.status.as_ref();
    let phase = status
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown");
    if matches!(phase, "Running" | "Succeeded") {
        return Ok(());
    }

    let detail = status
        .and_then(|s| s.reason.clone().or_else(|| s.message.clone()))
        .map(|r| format!("{}: {}", phase, r))
        .unwrap_or_else(|| format!("phase {}", phase));

    Err(Finding {
        category: Category::Pods,
        target: name,
        reason: detail,
    })
}

/// Healthy iff available replicas match the desired count (absent spec
/// replicas default to 1, per the API)
fn classify_deployment(item: &Value) -> Result<(), Finding> {
    let name = member_name(item);
    let deployment: Deployment = serde_json::from_value(item.clone()).map_err(|e| Finding {
        category: Category::Deployments,
        target: name.clone(),
        reason: format!("unreadable deployment object: {}", e),
    })?;

    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let available = deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0);

    if available == desired {
        Ok(())
    } else {
        Err(Finding {
            category: Category::Deployments,
            target: name,
            reason: format!("{}/{} replicas available", available, desired),
        })
    }
}

/// "namespace/name" identity for findings, or just the name at cluster scope
fn member_name(item: &Value) -> String {
    let metadata = &item["metadata"];
    let name = metadata["name"].as_str().unwrap_or("<unnamed>");
    match metadata["namespace"].as_str() {
        Some(ns) => format!("{}/{}", ns, name),
        None => name.to_string(),
    }
}
