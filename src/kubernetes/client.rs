// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Kubernetes access layer client.
//!
//! Resolves a working cluster connection by probing an ordered strategy chain
//! (in-cluster service account, then kubeconfig) and caches the winner for
//! the process lifetime. An authentication failure on the cached strategy
//! triggers exactly one step-down to the next candidate; transient read
//! failures are retried with bounded exponential backoff.

use async_trait::async_trait;
use futures::future::BoxFuture;
use kube::api::{DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::kubectl::Kubectl;
use super::resources::ResourceKind;
use super::{ClusterOps, CommandOutput, DeleteOutcome, ListFilters};
use crate::config::KubernetesSettings;
use crate::error::{ApiError, ConnectionError, KalError};

/// Timeout for connecting to the K8s API
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for reading K8s API responses
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum attempts for transient read failures
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (doubles each retry)
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Page size for paginated list requests
const PAGE_SIZE: u32 = 500;

/// Conventional service-account token mount location
const SERVICE_ACCOUNT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// One candidate access mode, probed in chain order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStrategy {
    InCluster,
    KubeconfigFile(PathBuf),
    KubeconfigDefault,
}

impl std::fmt::Display for ConnectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InCluster => write!(f, "in-cluster"),
            Self::KubeconfigFile(path) => write!(f, "kubeconfig:{}", path.display()),
            Self::KubeconfigDefault => write!(f, "kubeconfig:default"),
        }
    }
}

/// The resolved connection: a pooled client plus the strategy that produced it
#[derive(Clone)]
struct ActiveConnection {
    client: Client,
    strategy: ConnectionStrategy,
}

/// Kubernetes client with lazy, cached connection resolution.
///
/// The handle is cheap to share; the inner kube client is safe for
/// concurrent reuse.
pub struct K8sClient {
    settings: KubernetesSettings,
    /// Cached strategy selection; the write lock doubles as the gate that
    /// keeps concurrent first-callers from racing probes
    connection: RwLock<Option<ActiveConnection>>,
    kubectl: Kubectl,
}

impl K8sClient {
    /// Create a client without connecting (no I/O); resolution happens on
    /// the first operation
    pub fn new(settings: KubernetesSettings) -> Self {
        let kubectl = Kubectl::new(
            settings.config_path.as_deref().map(expand_home),
            settings.context.clone(),
        );
        Self {
            settings,
            connection: RwLock::new(None),
            kubectl,
        }
    }

    /// Resolve the connection, returning the active strategy.
    ///
    /// First-success-wins over the candidate chain; the result is cached and
    /// not re-probed until an authentication failure forces a step-down.
    pub async fn resolve(&self) -> Result<ConnectionStrategy, ConnectionError> {
        Ok(self.connection().await?.strategy)
    }

    async fn connection(&self) -> Result<ActiveConnection, ConnectionError> {
        {
            let guard = self.connection.read().await;
            if let Some(conn) = guard.as_ref() {
                return Ok(conn.clone());
            }
        }

        let mut guard = self.connection.write().await;
        // Another caller may have resolved while we waited for the lock
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self.probe_chain(self.candidates()).await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Replace the cached strategy after an authentication failure.
    /// Probes only the candidates after the failed one.
    async fn step_down(&self, failed: &ConnectionStrategy) -> Result<ActiveConnection, ConnectionError> {
        let mut guard = self.connection.write().await;
        if let Some(conn) = guard.as_ref()
            && conn.strategy != *failed
        {
            // A concurrent caller already stepped down
            return Ok(conn.clone());
        }

        let remaining = remaining_candidates(self.candidates(), failed);
        if remaining.is_empty() {
            *guard = None;
            return Err(ConnectionError::StrategiesExhausted);
        }

        match self.probe_chain(remaining).await {
            Ok(conn) => {
                *guard = Some(conn.clone());
                Ok(conn)
            }
            Err(_) => {
                *guard = None;
                Err(ConnectionError::StrategiesExhausted)
            }
        }
    }

    /// Candidate access modes in priority order, based on what the
    /// environment offers
    fn candidates(&self) -> Vec<ConnectionStrategy> {
        let mut candidates = Vec::new();
        if in_cluster_signals_present() {
            candidates.push(ConnectionStrategy::InCluster);
        }
        if let Some(path) = &self.settings.config_path {
            candidates.push(ConnectionStrategy::KubeconfigFile(expand_home(path)));
        } else if default_kubeconfig_present() {
            candidates.push(ConnectionStrategy::KubeconfigDefault);
        }
        candidates
    }

    async fn probe_chain(
        &self,
        candidates: Vec<ConnectionStrategy>,
    ) -> Result<ActiveConnection, ConnectionError> {
        if candidates.is_empty() {
            return Err(ConnectionError::NoUsableCredentials(
                "no in-cluster signals and no kubeconfig found".to_string(),
            ));
        }

        let mut failures = Vec::new();
        for strategy in candidates {
            match self.probe(&strategy).await {
                Ok(client) => {
                    info!(strategy = %strategy, "Kubernetes connection established");
                    return Ok(ActiveConnection { client, strategy });
                }
                Err(e) => {
                    warn!(strategy = %strategy, error = %e, "Connection strategy failed");
                    failures.push(format!("{}: {}", strategy, e));
                }
            }
        }

        Err(ConnectionError::NoUsableCredentials(failures.join("; ")))
    }

    /// Build a client for one strategy and verify it with a lightweight
    /// version call
    async fn probe(&self, strategy: &ConnectionStrategy) -> anyhow::Result<Client> {
        let mut config = match strategy {
            ConnectionStrategy::InCluster => Config::incluster()?,
            ConnectionStrategy::KubeconfigFile(path) => {
                let kubeconfig = Kubeconfig::read_from(path)?;
                Config::from_custom_kubeconfig(kubeconfig, &self.kubeconfig_options()).await?
            }
            ConnectionStrategy::KubeconfigDefault => {
                let kubeconfig = Kubeconfig::read()?;
                Config::from_custom_kubeconfig(kubeconfig, &self.kubeconfig_options()).await?
            }
        };

        config.connect_timeout = Some(CONNECT_TIMEOUT);
        config.read_timeout = Some(READ_TIMEOUT);
        self.apply_tls_policy(&mut config);

        let client = Client::try_from(config)?;
        let version = client.apiserver_version().await?;
        debug!(strategy = %strategy, version = %version.git_version, "Probe succeeded");
        Ok(client)
    }

    fn kubeconfig_options(&self) -> KubeConfigOptions {
        KubeConfigOptions {
            context: self.settings.context.clone(),
            ..Default::default()
        }
    }

    fn apply_tls_policy(&self, config: &mut Config) {
        if self.settings.ssl_verify {
            return;
        }
        config.accept_invalid_certs = true;
        match &self.settings.ssl_hostname {
            Some(hostname) => {
                config.tls_server_name = Some(hostname.clone());
                info!(hostname = %hostname, "TLS verification disabled, server name pinned");
            }
            None => {
                warn!("TLS verification disabled with no pinned hostname, accepting any certificate");
            }
        }
    }

    /// Run an API call against the cached connection, stepping down exactly
    /// once on an authentication-class failure
    async fn call_with_stepdown<T>(
        &self,
        what: &str,
        mut call: impl FnMut(Client) -> BoxFuture<'static, Result<T, kube::Error>> + Send,
    ) -> Result<T, KalError>
    where
        T: Send,
    {
        let conn = self.connection().await?;
        match call(conn.client.clone()).await {
            Ok(value) => Ok(value),
            Err(err) if is_auth_error(&err) => {
                warn!(
                    strategy = %conn.strategy,
                    error = %err,
                    "Authentication failure, stepping down connection strategy"
                );
                let next = self.step_down(&conn.strategy).await?;
                call(next.client)
                    .await
                    .map_err(|e| ApiError::from_kube(&e, what).into())
            }
            Err(err) => Err(ApiError::from_kube(&err, what).into()),
        }
    }

    /// Resolved namespace for a namespaced kind: explicit or configured default
    fn namespace_or_default<'a>(&'a self, namespace: Option<&'a str>) -> &'a str {
        namespace.unwrap_or(&self.settings.namespace)
    }

    /// Current usage for a kind, from the metrics pipeline. Only meaningful
    /// for kinds the capability table marks as having metrics.
    pub async fn resource_usage(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
    ) -> Result<String, KalError> {
        let info = kind.info();
        if !info.has_metrics {
            return Err(ApiError::new(
                None,
                format!("usage data is not available for kind '{}'", info.plural),
            )
            .into());
        }
        let ns = kind
            .is_namespaced()
            .then(|| self.namespace_or_default(namespace));
        self.kubectl
            .top(info.plural, ns)
            .await
            .map_err(KalError::Api)
    }
}

#[async_trait]
impl ClusterOps for K8sClient {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, KalError> {
        let what = format!("{} '{}'", kind, name);
        let ns = self.namespace_or_default(namespace).to_string();
        let name = name.to_string();
        self.call_with_stepdown(&what, move |client| {
            let api = api_handle(client, kind, Some(&ns), false);
            let name = name.clone();
            Box::pin(async move {
                let obj = get_with_retry(&api, &name).await?;
                Ok(decorate(to_value(obj), kind))
            })
        })
        .await
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        all_namespaces: bool,
        filters: &ListFilters,
    ) -> Result<Vec<Value>, KalError> {
        let what = format!("{} list", kind);
        let ns = self.namespace_or_default(namespace).to_string();
        let params = build_list_params(filters);
        debug!(
            kind = %kind,
            namespace = %ns,
            all_namespaces = all_namespaces,
            "Listing resources"
        );
        self.call_with_stepdown(&what, move |client| {
            let api = api_handle(client, kind, Some(&ns), all_namespaces);
            let params = params.clone();
            Box::pin(async move {
                let items = list_all_pages(&api, &params).await?;
                Ok(items
                    .into_iter()
                    .map(|item| decorate(to_value(item), kind))
                    .collect())
            })
        })
        .await
    }

    async fn create(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        manifest: &Value,
    ) -> Result<Value, KalError> {
        let what = format!("create {}", kind);
        let ns = self.namespace_or_default(namespace).to_string();
        let manifest = manifest.clone();
        self.call_with_stepdown(&what, move |client| {
            let api = api_handle(client, kind, Some(&ns), false);
            let manifest = manifest.clone();
            Box::pin(async move {
                let obj: DynamicObject =
                    serde_json::from_value(manifest).map_err(kube::Error::SerdeError)?;
                let created = api.create(&PostParams::default(), &obj).await?;
                Ok(decorate(to_value(created), kind))
            })
        })
        .await
    }

    async fn replace(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        manifest: &Value,
    ) -> Result<Value, KalError> {
        let what = format!("replace {} '{}'", kind, name);
        let ns = self.namespace_or_default(namespace).to_string();
        let name = name.to_string();
        let manifest = manifest.clone();
        self.call_with_stepdown(&what, move |client| {
            let api = api_handle(client, kind, Some(&ns), false);
            let name = name.clone();
            let manifest = manifest.clone();
            Box::pin(async move {
                let obj: DynamicObject =
                    serde_json::from_value(manifest).map_err(kube::Error::SerdeError)?;
                let replaced = api.replace(&name, &PostParams::default(), &obj).await?;
                Ok(decorate(to_value(replaced), kind))
            })
        })
        .await
    }

    async fn patch_merge(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> Result<Value, KalError> {
        let what = format!("patch {} '{}'", kind, name);
        let ns = self.namespace_or_default(namespace).to_string();
        let name = name.to_string();
        let patch = patch.clone();
        self.call_with_stepdown(&what, move |client| {
            let api = api_handle(client, kind, Some(&ns), false);
            let name = name.clone();
            let patch = patch.clone();
            Box::pin(async move {
                let patched = api
                    .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
                Ok(decorate(to_value(patched), kind))
            })
        })
        .await
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DeleteOutcome, KalError> {
        let what = format!("delete {} '{}'", kind, name);
        let ns = self.namespace_or_default(namespace).to_string();
        let name = name.to_string();
        self.call_with_stepdown(&what, move |client| {
            let api = api_handle(client, kind, Some(&ns), false);
            let name = name.clone();
            Box::pin(async move {
                match api.delete(&name, &DeleteParams::default()).await {
                    Ok(_) => Ok(DeleteOutcome::Deleted),
                    // Absent already: idempotent-delete semantics
                    Err(kube::Error::Api(resp)) if resp.code == 404 => {
                        Ok(DeleteOutcome::AlreadyAbsent)
                    }
                    Err(e) => Err(e),
                }
            })
        })
        .await
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        tail_lines: u32,
    ) -> Result<String, KalError> {
        // Alternate executor: log tailing goes through kubectl
        self.kubectl
            .pod_logs(namespace, pod, container, tail_lines)
            .await
            .map_err(KalError::Api)
    }

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        command: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, KalError> {
        // Alternate executor: interactive exec goes through kubectl
        self.kubectl
            .exec(namespace, pod, container, command, timeout)
            .await
            .map_err(KalError::Api)
    }
}

/// Build an API handle for a kind, honoring scope and the all-namespaces flag
fn api_handle(
    client: Client,
    kind: ResourceKind,
    namespace: Option<&str>,
    all_namespaces: bool,
) -> Api<DynamicObject> {
    let ar = kind.api_resource();
    if kind.is_namespaced() && !all_namespaces {
        Api::namespaced_with(client, namespace.unwrap_or("default"), &ar)
    } else {
        Api::all_with(client, &ar)
    }
}

fn to_value(obj: DynamicObject) -> Value {
    serde_json::to_value(obj).unwrap_or(Value::Null)
}

/// Inject apiVersion and kind (the list API doesn't include these per-item)
fn decorate(mut value: Value, kind: ResourceKind) -> Value {
    if let Value::Object(map) = &mut value {
        map.insert("apiVersion".to_string(), Value::String(kind.api_version()));
        map.insert(
            "kind".to_string(),
            Value::String(kind.info().kind.to_string()),
        );
    }
    value
}

fn build_list_params(filters: &ListFilters) -> ListParams {
    let mut params = ListParams::default();
    if let Some(labels) = &filters.label_selector {
        params = params.labels(labels);
    }
    if let Some(fields) = &filters.field_selector {
        params = params.fields(fields);
    }
    params
}

/// Fetch a single resource with retry for transient failures
async fn get_with_retry(api: &Api<DynamicObject>, name: &str) -> Result<DynamicObject, kube::Error> {
    let mut attempt = 0;
    loop {
        match api.get(name).await {
            Ok(obj) => return Ok(obj),
            Err(e) if is_retryable_error(&e) && attempt + 1 < MAX_RETRIES => {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                warn!(
                    name = %name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "Retryable error, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// List all pages of a resource, retrying each page on transient failures
async fn list_all_pages(
    api: &Api<DynamicObject>,
    base_params: &ListParams,
) -> Result<Vec<DynamicObject>, kube::Error> {
    let mut all_items = Vec::new();
    let mut continue_token: Option<String> = None;

    loop {
        let mut params = base_params.clone().limit(PAGE_SIZE);
        if let Some(token) = &continue_token {
            params = params.continue_token(token);
        }

        let list = list_page_with_retry(api, &params).await?;
        all_items.extend(list.items);

        match list.metadata.continue_ {
            Some(token) if !token.is_empty() => {
                debug!(total_so_far = all_items.len(), "Fetched page, continuing");
                continue_token = Some(token);
            }
            _ => break,
        }
    }

    Ok(all_items)
}

async fn list_page_with_retry(
    api: &Api<DynamicObject>,
    params: &ListParams,
) -> Result<kube::api::ObjectList<DynamicObject>, kube::Error> {
    let mut attempt = 0;
    loop {
        match api.list(params).await {
            Ok(list) => return Ok(list),
            Err(e) if is_retryable_error(&e) && attempt + 1 < MAX_RETRIES => {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_attempts = MAX_RETRIES,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "Retryable error, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Transient failures worth retrying on read paths
fn is_retryable_error(err: &kube::Error) -> bool {
    match err {
        // Network/connection errors are retryable
        kube::Error::HyperError(_) | kube::Error::Service(_) => true,
        // API errors: retry on 429 (rate limit), 503 (unavailable), 504 (timeout)
        kube::Error::Api(resp) => matches!(resp.code, 429 | 503 | 504),
        _ => false,
    }
}

/// Authentication-class failures that justify a strategy step-down.
/// 403 is authorization, not authentication; a different strategy would not
/// change the verdict, so it is reported instead of stepped around.
fn is_auth_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Auth(_) => true,
        kube::Error::Api(resp) => resp.code == 401,
        _ => false,
    }
}

/// Candidates remaining after dropping everything up to and including the
/// failed strategy
fn remaining_candidates(
    candidates: Vec<ConnectionStrategy>,
    failed: &ConnectionStrategy,
) -> Vec<ConnectionStrategy> {
    match candidates.iter().position(|c| c == failed) {
        Some(pos) => candidates.into_iter().skip(pos + 1).collect(),
        // Failed strategy no longer a candidate (environment changed); try all
        None => candidates,
    }
}

fn in_cluster_signals_present() -> bool {
    std::env::var_os("KUBERNETES_SERVICE_HOST").is_some()
        && std::env::var_os("KUBERNETES_SERVICE_PORT").is_some()
        && std::fs::File::open(SERVICE_ACCOUNT_TOKEN_PATH).is_ok()
}

fn default_kubeconfig_present() -> bool {
    if std::env::var_os("KUBECONFIG").is_some_and(|v| !v.is_empty()) {
        return true;
    }
    dirs::home_dir()
        .map(|home| home.join(".kube").join("config").exists())
        .unwrap_or(false)
}

/// Expand a leading "~/" to the home directory
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "test".to_string(),
            code,
        })
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable_error(&api_error(429)));
        assert!(is_retryable_error(&api_error(503)));
        assert!(is_retryable_error(&api_error(504)));
        assert!(!is_retryable_error(&api_error(404)));
        assert!(!is_retryable_error(&api_error(409)));
        assert!(!is_retryable_error(&api_error(401)));
    }

    #[test]
    fn test_auth_classification() {
        assert!(is_auth_error(&api_error(401)));
        // Forbidden is authorization, not authentication
        assert!(!is_auth_error(&api_error(403)));
        assert!(!is_auth_error(&api_error(503)));
    }

    #[test]
    fn test_remaining_candidates_skips_through_failed() {
        let chain = vec![
            ConnectionStrategy::InCluster,
            ConnectionStrategy::KubeconfigDefault,
        ];
        let remaining = remaining_candidates(chain, &ConnectionStrategy::InCluster);
        assert_eq!(remaining, vec![ConnectionStrategy::KubeconfigDefault]);
    }

    #[test]
    fn test_remaining_candidates_exhausted() {
        let chain = vec![
            ConnectionStrategy::InCluster,
            ConnectionStrategy::KubeconfigDefault,
        ];
        let remaining = remaining_candidates(chain, &ConnectionStrategy::KubeconfigDefault);
        assert!(remaining.is_empty());
    }

    #[test]
    fn test_explicit_kubeconfig_becomes_candidate() {
        let settings = KubernetesSettings {
            config_path: Some("/etc/kube/config".to_string()),
            ..Default::default()
        };
        let client = K8sClient::new(settings);
        let candidates = client.candidates();
        assert!(candidates.contains(&ConnectionStrategy::KubeconfigFile(PathBuf::from(
            "/etc/kube/config"
        ))));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/.kube/config"), home.join(".kube/config"));
        }
    }

    #[test]
    fn test_decorate_injects_type_fields() {
        let value = decorate(
            serde_json::json!({"metadata": {"name": "web"}}),
            ResourceKind::Deployment,
        );
        assert_eq!(value["apiVersion"], "apps/v1");
        assert_eq!(value["kind"], "Deployment");
        assert_eq!(value["metadata"]["name"], "web");
    }

    #[test]
    fn test_strategy_display() {
        assert_eq!(ConnectionStrategy::InCluster.to_string(), "in-cluster");
        assert_eq!(
            ConnectionStrategy::KubeconfigFile(PathBuf::from("/tmp/kc")).to_string(),
            "kubeconfig:/tmp/kc"
        );
    }
}
