// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Operation dispatcher for mutating intents.
//!
//! Every invocation walks Validate -> Execute -> Verify -> Report with no
//! cross-request state. Structural problems are rejected before any network
//! call; cluster rejections (404, 409, 403) come back as a structured
//! failure payload naming the resource and the reported reason. Only a
//! connection-resolution failure escapes as an error, because nothing else
//! can proceed without one.
//!
//! Idempotency rules: deleting an absent resource succeeds with an
//! "already absent" note, and scaling to the current replica count succeeds
//! without issuing a mutate call.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{ConnectionError, KalError, ValidationError};
use crate::kubernetes::{ClusterOps, DeleteOutcome, ResourceKind};

/// Default log tail when the caller does not bound it
pub const DEFAULT_LOG_TAIL: u32 = 100;

/// Reference to the resource an operation touched
#[derive(Debug, Clone, Serialize)]
pub struct ResourceRef {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceRef {
    fn new(kind: ResourceKind, namespace: Option<&str>, name: &str) -> Self {
        Self {
            kind: kind.info().kind.to_string(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }
}

/// Uniform report for every mutating call; failures are carried here rather
/// than raised
#[derive(Debug, Serialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceRef>,
}

impl OperationResult {
    fn ok(message: impl Into<String>, resource: Option<ResourceRef>) -> Self {
        Self {
            success: true,
            message: message.into(),
            resource,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            resource: None,
        }
    }
}

/// Dispatcher outcome: a report, unless the cluster was unreachable entirely
pub type OpOutcome = Result<OperationResult, ConnectionError>;

/// Executes mutating intents through the access layer
pub struct Dispatcher {
    ops: Arc<dyn ClusterOps>,
    default_namespace: String,
}

impl Dispatcher {
    pub fn new(ops: Arc<dyn ClusterOps>, default_namespace: impl Into<String>) -> Self {
        Self {
            ops,
            default_namespace: default_namespace.into(),
        }
    }

    fn namespace_or_default<'a>(&'a self, namespace: Option<&'a str>) -> &'a str {
        namespace.unwrap_or(&self.default_namespace)
    }

    /// Create a resource from a YAML manifest
    pub async fn create_resource(&self, manifest_yaml: &str) -> OpOutcome {
        let manifest = match Manifest::parse(manifest_yaml) {
            Ok(m) => m,
            Err(e) => return Ok(OperationResult::fail(e.to_string())),
        };
        let ns = manifest
            .namespace
            .as_deref()
            .or(manifest.kind.is_namespaced().then_some(self.default_namespace.as_str()));

        info!(kind = %manifest.kind, name = %manifest.name, "Creating resource");
        match self.ops.create(manifest.kind, ns, &manifest.body).await {
            Ok(_) => Ok(OperationResult::ok(
                format!("Created {} '{}'", manifest.kind, manifest.name),
                Some(ResourceRef::new(manifest.kind, ns, &manifest.name)),
            )),
            Err(e) => self.report_failure(e),
        }
    }

    /// Replace an existing resource with a YAML manifest
    pub async fn update_resource(&self, manifest_yaml: &str) -> OpOutcome {
        let manifest = match Manifest::parse(manifest_yaml) {
            Ok(m) => m,
            Err(e) => return Ok(OperationResult::fail(e.to_string())),
        };
        let ns = manifest
            .namespace
            .as_deref()
            .or(manifest.kind.is_namespaced().then_some(self.default_namespace.as_str()));

        info!(kind = %manifest.kind, name = %manifest.name, "Updating resource");
        match self
            .ops
            .replace(manifest.kind, ns, &manifest.name, &manifest.body)
            .await
        {
            Ok(_) => Ok(OperationResult::ok(
                format!("Updated {} '{}'", manifest.kind, manifest.name),
                Some(ResourceRef::new(manifest.kind, ns, &manifest.name)),
            )),
            Err(e) => self.report_failure(e),
        }
    }

    /// Delete a resource. Deleting an already-absent resource is success:
    /// the desired state (gone) holds either way.
    pub async fn delete_resource(
        &self,
        kind_token: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> OpOutcome {
        let Some(kind) = ResourceKind::parse(kind_token) else {
            return Ok(OperationResult::fail(
                ValidationError::UnknownKind(kind_token.to_string()).to_string(),
            ));
        };
        let ns = kind
            .is_namespaced()
            .then(|| self.namespace_or_default(namespace));

        info!(kind = %kind, name = %name, namespace = ?ns, "Deleting resource");
        match self.ops.delete(kind, ns, name).await {
            Ok(DeleteOutcome::Deleted) => Ok(OperationResult::ok(
                format!("Deleted {} '{}'", kind, name),
                Some(ResourceRef::new(kind, ns, name)),
            )),
            Ok(DeleteOutcome::AlreadyAbsent) => Ok(OperationResult::ok(
                format!("{} '{}' already absent", kind, name),
                Some(ResourceRef::new(kind, ns, name)),
            )),
            Err(e) => self.report_failure(e),
        }
    }

    /// Scale a deployment to an absolute replica count. Scaling to the
    /// current count is a no-op success with no mutate call issued.
    pub async fn scale_deployment(
        &self,
        name: &str,
        namespace: Option<&str>,
        replicas: i64,
    ) -> OpOutcome {
        if replicas < 0 {
            return Ok(OperationResult::fail(
                ValidationError::NegativeReplicas(replicas).to_string(),
            ));
        }
        let kind = ResourceKind::Deployment;
        let ns = Some(self.namespace_or_default(namespace));

        let current = match self.ops.get(kind, ns, name).await {
            Ok(obj) => obj["spec"]["replicas"].as_i64().unwrap_or(1),
            Err(e) => return self.report_failure(e),
        };

        if current == replicas {
            return Ok(OperationResult::ok(
                format!("Deployment '{}' already at {} replicas", name, replicas),
                Some(ResourceRef::new(kind, ns, name)),
            ));
        }

        info!(name = %name, from = current, to = replicas, "Scaling deployment");
        let patch = json!({"spec": {"replicas": replicas}});
        match self.ops.patch_merge(kind, ns, name, &patch).await {
            Ok(_) => Ok(OperationResult::ok(
                format!(
                    "Scaled deployment '{}' from {} to {} replicas",
                    name, current, replicas
                ),
                Some(ResourceRef::new(kind, ns, name)),
            )),
            Err(e) => self.report_failure(e),
        }
    }

    /// Trigger a rolling restart by bumping the pod-template restart
    /// annotation. Returns once the patch is accepted; does not wait for
    /// the rollout to complete.
    pub async fn restart_deployment(&self, name: &str, namespace: Option<&str>) -> OpOutcome {
        let kind = ResourceKind::Deployment;
        let ns = Some(self.namespace_or_default(namespace));

        info!(name = %name, namespace = ?ns, "Restarting deployment");
        let patch = json!({
            "spec": {
                "template": {
                    "metadata": {
                        "annotations": {
                            "kubectl.kubernetes.io/restartedAt": Utc::now().to_rfc3339()
                        }
                    }
                }
            }
        });
        match self.ops.patch_merge(kind, ns, name, &patch).await {
            Ok(_) => Ok(OperationResult::ok(
                format!("Restart of deployment '{}' triggered", name),
                Some(ResourceRef::new(kind, ns, name)),
            )),
            Err(e) => self.report_failure(e),
        }
    }

    /// Create a namespace by name
    pub async fn create_namespace(&self, name: &str) -> OpOutcome {
        let kind = ResourceKind::Namespace;
        let manifest = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": name}
        });

        info!(name = %name, "Creating namespace");
        match self.ops.create(kind, None, &manifest).await {
            Ok(_) => Ok(OperationResult::ok(
                format!("Created namespace '{}'", name),
                Some(ResourceRef::new(kind, None, name)),
            )),
            Err(e) => self.report_failure(e),
        }
    }

    /// Fetch a bounded tail of a pod's logs
    pub async fn get_logs(
        &self,
        pod: &str,
        namespace: Option<&str>,
        container: Option<&str>,
        tail_lines: Option<u32>,
    ) -> OpOutcome {
        let ns = self.namespace_or_default(namespace);
        let tail = tail_lines.unwrap_or(DEFAULT_LOG_TAIL);
        match self.ops.pod_logs(ns, pod, container, tail).await {
            Ok(logs) => Ok(OperationResult::ok(
                logs,
                Some(ResourceRef::new(ResourceKind::Pod, Some(ns), pod)),
            )),
            Err(e) => self.report_failure(e),
        }
    }

    /// Run a command in a pod, bounded by a timeout
    pub async fn exec_command(
        &self,
        pod: &str,
        namespace: Option<&str>,
        container: Option<&str>,
        command: &[String],
        timeout: Duration,
    ) -> OpOutcome {
        if command.is_empty() {
            return Ok(OperationResult::fail(
                ValidationError::EmptyCommand.to_string(),
            ));
        }
        let ns = self.namespace_or_default(namespace);
        match self.ops.exec(ns, pod, container, command, timeout).await {
            Ok(output) => {
                let success = output.exit_code == 0;
                let mut message = output.stdout;
                if !output.stderr.is_empty() {
                    message.push_str(&output.stderr);
                }
                if !success {
                    message.push_str(&format!("\n(exit code {})", output.exit_code));
                }
                Ok(OperationResult {
                    success,
                    message,
                    resource: Some(ResourceRef::new(ResourceKind::Pod, Some(ns), pod)),
                })
            }
            Err(e) => self.report_failure(e),
        }
    }

    /// Fold access-layer failures into the report shape; only connection
    /// loss propagates
    fn report_failure(&self, err: KalError) -> OpOutcome {
        match err {
            KalError::Connection(e) => Err(e),
            KalError::Api(e) => {
                warn!(error = %e, "Operation failed");
                Ok(OperationResult::fail(e.message))
            }
        }
    }
}

/// A validated manifest: parsed YAML plus the fields every mutation needs
#[derive(Debug)]
struct Manifest {
    kind: ResourceKind,
    name: String,
    namespace: Option<String>,
    body: Value,
}

impl Manifest {
    fn parse(yaml: &str) -> Result<Self, ValidationError> {
        let body: Value = serde_yaml::from_str(yaml)
            .map_err(|e| ValidationError::Yaml(e.to_string()))?;
        if !body.is_object() {
            return Err(ValidationError::NotAMapping);
        }
        if body["apiVersion"].as_str().is_none() {
            return Err(ValidationError::MissingField("apiVersion"));
        }
        let kind_token = body["kind"]
            .as_str()
            .ok_or(ValidationError::MissingField("kind"))?;
        let kind = ResourceKind::parse(kind_token)
            .ok_or_else(|| ValidationError::UnknownKind(kind_token.to_string()))?;
        let name = body["metadata"]["name"]
            .as_str()
            .ok_or(ValidationError::MissingField("metadata.name"))?
            .to_string();
        let namespace = body["metadata"]["namespace"].as_str().map(str::to_string);
        Ok(Self {
            kind,
            name,
            namespace,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::kubernetes::{CommandOutput, ListFilters};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock cluster with one deployment at a fixed replica count and a
    /// mutable set of "existing" resource names. Counts every call class.
    struct MockCluster {
        replicas: i64,
        existing: Mutex<Vec<String>>,
        gets: AtomicUsize,
        patches: AtomicUsize,
        creates: AtomicUsize,
        deletes: AtomicUsize,
    }

    impl MockCluster {
        fn new(replicas: i64, existing: &[&str]) -> Self {
            Self {
                replicas,
                existing: Mutex::new(existing.iter().map(|s| s.to_string()).collect()),
                gets: AtomicUsize::new(0),
                patches: AtomicUsize::new(0),
                creates: AtomicUsize::new(0),
                deletes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ClusterOps for MockCluster {
        async fn get(
            &self,
            kind: ResourceKind,
            namespace: Option<&str>,
            name: &str,
        ) -> Result<Value, KalError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            if !self.existing.lock().unwrap().contains(&name.to_string()) {
                return Err(ApiError::new(
                    Some(404),
                    format!("{} '{}' not found in namespace '{}'", kind, name, namespace.unwrap_or("-")),
                )
                .into());
            }
            Ok(json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": {"name": name, "namespace": namespace},
                "spec": {"replicas": self.replicas},
                "status": {"availableReplicas": self.replicas}
            }))
        }

        async fn list(
            &self,
            _kind: ResourceKind,
            _namespace: Option<&str>,
            _all_namespaces: bool,
            _filters: &ListFilters,
        ) -> Result<Vec<Value>, KalError> {
            Ok(vec![])
        }

        async fn create(
            &self,
            _kind: ResourceKind,
            _namespace: Option<&str>,
            manifest: &Value,
        ) -> Result<Value, KalError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(manifest.clone())
        }

        async fn replace(
            &self,
            _kind: ResourceKind,
            _namespace: Option<&str>,
            _name: &str,
            manifest: &Value,
        ) -> Result<Value, KalError> {
            Ok(manifest.clone())
        }

        async fn patch_merge(
            &self,
            _kind: ResourceKind,
            _namespace: Option<&str>,
            name: &str,
            _patch: &Value,
        ) -> Result<Value, KalError> {
            self.patches.fetch_add(1, Ordering::SeqCst);
            if !self.existing.lock().unwrap().contains(&name.to_string()) {
                return Err(ApiError::new(Some(404), format!("'{}' not found", name)).into());
            }
            Ok(json!({}))
        }

        async fn delete(
            &self,
            _kind: ResourceKind,
            _namespace: Option<&str>,
            name: &str,
        ) -> Result<DeleteOutcome, KalError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            let mut existing = self.existing.lock().unwrap();
            match existing.iter().position(|n| n == name) {
                Some(pos) => {
                    existing.remove(pos);
                    Ok(DeleteOutcome::Deleted)
                }
                None => Ok(DeleteOutcome::AlreadyAbsent),
            }
        }

        async fn pod_logs(
            &self,
            _namespace: &str,
            _pod: &str,
            _container: Option<&str>,
            tail_lines: u32,
        ) -> Result<String, KalError> {
            Ok(format!("last {} lines", tail_lines))
        }

        async fn exec(
            &self,
            _namespace: &str,
            _pod: &str,
            _container: Option<&str>,
            command: &[String],
            _timeout: Duration,
        ) -> Result<CommandOutput, KalError> {
            Ok(CommandOutput {
                stdout: command.join(" "),
                stderr: String::new(),
                exit_code: 0,
            })
        }
    }

    fn dispatcher(mock: Arc<MockCluster>) -> Dispatcher {
        Dispatcher::new(mock, "default")
    }

    #[tokio::test]
    async fn test_scale_noop_when_already_at_count() {
        let mock = Arc::new(MockCluster::new(3, &["web"]));
        let d = dispatcher(mock.clone());
        let result = d.scale_deployment("web", None, 3).await.unwrap();
        assert!(result.success);
        assert!(result.message.contains("already at 3 replicas"));
        // The no-op path must not issue a mutate call
        assert_eq!(mock.patches.load(Ordering::SeqCst), 0);
        assert_eq!(mock.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scale_patches_when_count_differs() {
        let mock = Arc::new(MockCluster::new(3, &["web"]));
        let d = dispatcher(mock.clone());
        let result = d.scale_deployment("web", None, 5).await.unwrap();
        assert!(result.success);
        assert!(result.message.contains("from 3 to 5"));
        assert_eq!(mock.patches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scale_negative_replicas_rejected_locally() {
        let mock = Arc::new(MockCluster::new(3, &["web"]));
        let d = dispatcher(mock.clone());
        let result = d.scale_deployment("web", None, -1).await.unwrap();
        assert!(!result.success);
        // Validation failures never reach the cluster
        assert_eq!(mock.gets.load(Ordering::SeqCst), 0);
        assert_eq!(mock.patches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_scale_missing_deployment_reports_not_found() {
        let mock = Arc::new(MockCluster::new(3, &[]));
        let d = dispatcher(mock);
        let result = d.scale_deployment("ghost", None, 2).await.unwrap();
        assert!(!result.success);
        assert!(result.message.contains("ghost"));
    }

    #[tokio::test]
    async fn test_delete_twice_succeeds_both_times() {
        let mock = Arc::new(MockCluster::new(1, &["web"]));
        let d = dispatcher(mock.clone());

        let first = d.delete_resource("deployment", "web", None).await.unwrap();
        assert!(first.success);
        assert!(first.message.contains("Deleted"));

        let second = d.delete_resource("deployment", "web", None).await.unwrap();
        assert!(second.success);
        assert!(second.message.contains("already absent"));

        assert_eq!(mock.deletes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_delete_unknown_kind_rejected_locally() {
        let mock = Arc::new(MockCluster::new(1, &["web"]));
        let d = dispatcher(mock.clone());
        let result = d.delete_resource("widget", "web", None).await.unwrap();
        assert!(!result.success);
        assert!(result.message.contains("widget"));
        assert_eq!(mock.deletes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_restart_patches_template_annotation() {
        let mock = Arc::new(MockCluster::new(1, &["web"]));
        let d = dispatcher(mock.clone());
        let result = d.restart_deployment("web", Some("prod")).await.unwrap();
        assert!(result.success);
        assert!(result.message.contains("triggered"));
        assert_eq!(mock.patches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_create_resource_valid_manifest() {
        let mock = Arc::new(MockCluster::new(1, &[]));
        let d = dispatcher(mock.clone());
        let yaml = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: app-config\n  namespace: prod\ndata:\n  key: value\n";
        let result = d.create_resource(yaml).await.unwrap();
        assert!(result.success, "{}", result.message);
        assert_eq!(mock.creates.load(Ordering::SeqCst), 1);
        let resource = result.resource.unwrap();
        assert_eq!(resource.kind, "ConfigMap");
        assert_eq!(resource.name, "app-config");
        assert_eq!(resource.namespace.as_deref(), Some("prod"));
    }

    #[tokio::test]
    async fn test_create_resource_invalid_yaml_rejected_locally() {
        let mock = Arc::new(MockCluster::new(1, &[]));
        let d = dispatcher(mock.clone());
        let result = d.create_resource(": not yaml: [").await.unwrap();
        assert!(!result.success);
        assert_eq!(mock.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_create_resource_missing_name_rejected() {
        let mock = Arc::new(MockCluster::new(1, &[]));
        let d = dispatcher(mock.clone());
        let yaml = "apiVersion: v1\nkind: ConfigMap\nmetadata: {}\n";
        let result = d.create_resource(yaml).await.unwrap();
        assert!(!result.success);
        assert!(result.message.contains("metadata.name"));
        assert_eq!(mock.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_create_resource_unknown_kind_rejected() {
        let mock = Arc::new(MockCluster::new(1, &[]));
        let d = dispatcher(mock);
        let yaml = "apiVersion: v1\nkind: Widget\nmetadata:\n  name: x\n";
        let result = d.create_resource(yaml).await.unwrap();
        assert!(!result.success);
        assert!(result.message.contains("Widget"));
    }

    #[tokio::test]
    async fn test_create_namespace() {
        let mock = Arc::new(MockCluster::new(1, &[]));
        let d = dispatcher(mock.clone());
        let result = d.create_namespace("staging").await.unwrap();
        assert!(result.success);
        assert_eq!(mock.creates.load(Ordering::SeqCst), 1);
        assert!(result.resource.unwrap().namespace.is_none());
    }

    #[tokio::test]
    async fn test_exec_empty_command_rejected_locally() {
        let mock = Arc::new(MockCluster::new(1, &[]));
        let d = dispatcher(mock);
        let result = d
            .exec_command("web-0", None, None, &[], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_exec_reports_stdout() {
        let mock = Arc::new(MockCluster::new(1, &[]));
        let d = dispatcher(mock);
        let command = vec!["uname".to_string(), "-a".to_string()];
        let result = d
            .exec_command("web-0", None, None, &command, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.message, "uname -a");
    }

    #[tokio::test]
    async fn test_logs_default_tail_applied() {
        let mock = Arc::new(MockCluster::new(1, &[]));
        let d = dispatcher(mock);
        let result = d.get_logs("web-0", None, None, None).await.unwrap();
        assert!(result.success);
        assert_eq!(result.message, format!("last {} lines", DEFAULT_LOG_TAIL));
    }

    #[test]
    fn test_manifest_reads_namespace() {
        let yaml = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: api\n  namespace: prod\nspec: {}\n";
        let manifest = Manifest::parse(yaml).unwrap();
        assert_eq!(manifest.kind, ResourceKind::Deployment);
        assert_eq!(manifest.name, "api");
        assert_eq!(manifest.namespace.as_deref(), Some("prod"));
    }

    #[test]
    fn test_manifest_missing_api_version() {
        let yaml = "kind: Pod\nmetadata:\n  name: x\n";
        assert_eq!(
            Manifest::parse(yaml).unwrap_err(),
            ValidationError::MissingField("apiVersion")
        );
    }
}
