// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Resource URI router.
//!
//! Parses `k8s://[namespace/]kind[/name]` strings into typed locators and
//! dispatches them to the access layer. The namespace segment is optional
//! for namespaced kinds (the configured default fills in) and the literal
//! token `all` selects an all-namespaces listing. Unknown kinds and extra
//! segments are hard parse errors so nothing is silently truncated.
//!
//! Responses are projected into a bounded flattened view rather than the
//! full manifest: list queries carry status but never spec, get queries
//! carry both.

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use tracing::debug;

use crate::error::{ConnectionError, KalError, ParseError};
use crate::kubernetes::{ClusterOps, ListFilters, ResourceKind, ResourceScope};

/// Namespace-position sentinel meaning "search all namespaces"
pub const ALL_NAMESPACES: &str = "all";

static SEGMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").unwrap());

/// Parsed, typed identifier for a cluster resource. Immutable; consumed once
/// per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLocator {
    pub kind: ResourceKind,
    /// Resolved namespace; None for cluster-scoped kinds and all-namespace lists
    pub namespace: Option<String>,
    /// The `all` sentinel, threaded through as a flag rather than a name
    pub all_namespaces: bool,
    /// None means a list query, Some means a get query
    pub name: Option<String>,
}

impl ResourceLocator {
    /// Canonical URI form: lowercase plural kind, explicit namespace
    pub fn to_uri(&self) -> String {
        let plural = self.kind.info().plural;
        let mut uri = String::from("k8s://");
        if self.all_namespaces {
            uri.push_str(ALL_NAMESPACES);
            uri.push('/');
        } else if let Some(ns) = &self.namespace {
            uri.push_str(ns);
            uri.push('/');
        }
        uri.push_str(plural);
        if let Some(name) = &self.name {
            uri.push('/');
            uri.push_str(name);
        }
        uri
    }
}

/// Parse a resource URI against the registry.
///
/// Grammar: `scheme "://" [ namespace "/" ] kind [ "/" name ]` with scheme
/// `k8s` or `kubernetes`. A two-segment path is disambiguated kind-first:
/// if the first segment is a known kind the second is a name, otherwise the
/// first is a namespace and the second must be a kind.
pub fn parse(uri: &str, default_namespace: &str) -> Result<ResourceLocator, ParseError> {
    let trimmed = uri.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    let (scheme, rest) = trimmed
        .split_once("://")
        .ok_or_else(|| ParseError::Scheme(trimmed.to_string()))?;
    if scheme != "k8s" && scheme != "kubernetes" {
        return Err(ParseError::Scheme(scheme.to_string()));
    }

    let segments: Vec<&str> = rest.trim_matches('/').split('/').collect();
    for segment in &segments {
        if !SEGMENT.is_match(segment) {
            return Err(ParseError::InvalidSegment(segment.to_string()));
        }
    }

    let (namespace_token, kind_token, name) = match segments.as_slice() {
        [kind] => (None, *kind, None),
        [first, second] => {
            if ResourceKind::parse(first).is_some() {
                (None, *first, Some(second.to_string()))
            } else {
                (Some(*first), *second, None)
            }
        }
        [namespace, kind, name] => (Some(*namespace), *kind, Some(name.to_string())),
        _ => return Err(ParseError::TrailingSegments(trimmed.to_string())),
    };

    let kind = ResourceKind::parse(kind_token)
        .ok_or_else(|| ParseError::UnknownKind(kind_token.to_string()))?;

    let all_namespaces = namespace_token == Some(ALL_NAMESPACES);
    if all_namespaces && name.is_some() {
        return Err(ParseError::NameWithAllNamespaces);
    }

    match kind.scope() {
        ResourceScope::Cluster => {
            if let Some(ns) = namespace_token {
                return Err(ParseError::NamespaceOnClusterScoped {
                    namespace: ns.to_string(),
                    kind: kind.info().plural.to_string(),
                });
            }
            Ok(ResourceLocator {
                kind,
                namespace: None,
                all_namespaces: false,
                name,
            })
        }
        ResourceScope::Namespaced => {
            let namespace = if all_namespaces {
                None
            } else {
                Some(
                    namespace_token
                        .map(str::to_string)
                        .unwrap_or_else(|| default_namespace.to_string()),
                )
            };
            Ok(ResourceLocator {
                kind,
                namespace,
                all_namespaces,
                name,
            })
        }
    }
}

/// Flattened projection of a resource, bounded for transport to the caller
#[derive(Debug, Clone, Serialize)]
pub struct ResourceView {
    pub kind: String,
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(rename = "creationTimestamp", skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<Value>,
}

/// Project a raw object into the documented view. `detailed` adds spec;
/// list results stay status-only to bound payload size.
pub fn project(obj: &Value, detailed: bool) -> ResourceView {
    let metadata = &obj["metadata"];
    let non_null = |v: &Value| {
        if v.is_null() { None } else { Some(v.clone()) }
    };

    ResourceView {
        kind: obj["kind"].as_str().unwrap_or_default().to_string(),
        api_version: obj["apiVersion"].as_str().unwrap_or_default().to_string(),
        name: metadata["name"].as_str().unwrap_or_default().to_string(),
        namespace: metadata["namespace"].as_str().map(str::to_string),
        creation_timestamp: metadata["creationTimestamp"].as_str().map(str::to_string),
        labels: non_null(&metadata["labels"]),
        annotations: non_null(&metadata["annotations"]),
        status: non_null(&obj["status"]),
        spec: if detailed { non_null(&obj["spec"]) } else { None },
    }
}

/// Outcome of routing a locator: a single view, a listing, or a structured
/// error payload (API rejections are folded here, never raised further)
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RouteResult {
    Single(ResourceView),
    Listing {
        kind: String,
        count: usize,
        items: Vec<ResourceView>,
    },
    Error {
        error: String,
    },
}

/// Read-path router: translates locators into access-layer calls
pub struct Router {
    ops: Arc<dyn ClusterOps>,
    default_namespace: String,
}

impl Router {
    pub fn new(ops: Arc<dyn ClusterOps>, default_namespace: impl Into<String>) -> Self {
        Self {
            ops,
            default_namespace: default_namespace.into(),
        }
    }

    pub fn parse(&self, uri: &str) -> Result<ResourceLocator, ParseError> {
        parse(uri, &self.default_namespace)
    }

    /// Dispatch a locator by (scope, has-name) to the matching handler
    pub async fn route(&self, locator: &ResourceLocator) -> Result<RouteResult, ConnectionError> {
        debug!(uri = %locator.to_uri(), "Routing resource query");
        match &locator.name {
            Some(name) => {
                let result = self
                    .ops
                    .get(locator.kind, locator.namespace.as_deref(), name)
                    .await;
                match result {
                    Ok(obj) => Ok(RouteResult::Single(project(&obj, true))),
                    Err(KalError::Api(err)) => Ok(RouteResult::Error {
                        error: err.message,
                    }),
                    Err(KalError::Connection(err)) => Err(err),
                }
            }
            None => {
                let result = self
                    .ops
                    .list(
                        locator.kind,
                        locator.namespace.as_deref(),
                        locator.all_namespaces,
                        &ListFilters::default(),
                    )
                    .await;
                match result {
                    Ok(items) => Ok(RouteResult::Listing {
                        kind: locator.kind.info().plural.to_string(),
                        count: items.len(),
                        items: items.iter().map(|obj| project(obj, false)).collect(),
                    }),
                    Err(KalError::Api(err)) => Ok(RouteResult::Error {
                        error: err.message,
                    }),
                    Err(KalError::Connection(err)) => Err(err),
                }
            }
        }
    }
}
