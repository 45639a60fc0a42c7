// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Kubernetes access layer: connection resolution, typed cluster operations,
//! and the kubectl alternate executor.

mod client;
mod kubectl;
pub mod resources;

pub use client::{ConnectionStrategy, K8sClient};
pub use kubectl::Kubectl;
pub use resources::{ResourceKind, ResourceScope};

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::KalError;

/// Parameters to push down to the Kubernetes API on list calls
#[derive(Debug, Clone, Default)]
pub struct ListFilters {
    /// Label selector string (e.g., "app=nginx,version=v1")
    pub label_selector: Option<String>,
    /// Field selector string (e.g., "status.phase=Running")
    pub field_selector: Option<String>,
}

/// Captured output of a command executed inside a pod
#[derive(Debug, Clone, serde::Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Result of a delete call, distinguishing the idempotent already-gone case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyAbsent,
}

/// Cluster operations the router, dispatcher, and health engine consume.
///
/// The production implementation is [`K8sClient`]; tests substitute mocks to
/// assert call counts and inject canned populations. Resources travel as
/// JSON values with `apiVersion`/`kind` injected, the shape list endpoints
/// return them in.
#[async_trait]
pub trait ClusterOps: Send + Sync {
    /// Fetch a single resource by name
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, KalError>;

    /// List resources of a kind; `all_namespaces` overrides `namespace`
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        all_namespaces: bool,
        filters: &ListFilters,
    ) -> Result<Vec<Value>, KalError>;

    /// Create a resource from a full manifest
    async fn create(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        manifest: &Value,
    ) -> Result<Value, KalError>;

    /// Replace an existing resource with a full manifest
    async fn replace(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        manifest: &Value,
    ) -> Result<Value, KalError>;

    /// Apply a strategic-merge-style patch
    async fn patch_merge(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> Result<Value, KalError>;

    /// Delete a resource; absent resources report `AlreadyAbsent`, not an error
    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DeleteOutcome, KalError>;

    /// Tail of a pod's logs, bounded by `tail_lines`
    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        tail_lines: u32,
    ) -> Result<String, KalError>;

    /// Run a command in a pod, bounded by `timeout`
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        command: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, KalError>;
}
