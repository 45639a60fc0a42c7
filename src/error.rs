// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Error taxonomy for the gateway core.
//!
//! Four classes with distinct propagation rules:
//! - [`ParseError`] and [`ValidationError`] are local and never reach the cluster
//! - [`ApiError`] is folded into result payloads at the router/dispatcher boundary
//! - [`ConnectionError`] is the only class allowed to terminate request handling

use thiserror::Error;

/// A resource URI that does not match the documented grammar.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty resource URI")]
    Empty,

    #[error("unsupported URI scheme '{0}' (expected k8s:// or kubernetes://)")]
    Scheme(String),

    #[error("unknown resource kind '{0}'")]
    UnknownKind(String),

    #[error("invalid URI segment '{0}'")]
    InvalidSegment(String),

    #[error("trailing segments after resource name in '{0}'")]
    TrailingSegments(String),

    #[error("namespace '{namespace}' given for cluster-scoped kind '{kind}'")]
    NamespaceOnClusterScoped { namespace: String, kind: String },

    #[error("cannot address a named resource across all namespaces")]
    NameWithAllNamespaces,
}

/// No working path to a cluster could be established.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("no usable Kubernetes credentials: {0}")]
    NoUsableCredentials(String),

    #[error("all connection strategies exhausted after authentication failure")]
    StrategiesExhausted,
}

/// The cluster rejected an API call.
///
/// Carries the HTTP-like status when one was reported so callers can
/// distinguish not-found, conflict, and forbidden without string matching.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApiError {
    pub status: Option<u16>,
    pub message: String,
}

impl ApiError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Build from a kube client error, scoping the message to the resource
    /// the call was about.
    pub fn from_kube(err: &kube::Error, what: &str) -> Self {
        match err {
            kube::Error::Api(resp) => Self {
                status: Some(resp.code),
                message: format!("{}: {} ({})", what, resp.message, resp.reason),
            },
            other => Self {
                status: None,
                message: format!("{}: {}", what, other),
            },
        }
    }

}

/// A mutation payload that failed structural checks before any network call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("manifest is not valid YAML: {0}")]
    Yaml(String),

    #[error("manifest is not a mapping")]
    NotAMapping,

    #[error("manifest is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("unknown resource kind '{0}' in manifest")]
    UnknownKind(String),

    #[error("replicas must be >= 0, got {0}")]
    NegativeReplicas(i64),

    #[error("command must not be empty")]
    EmptyCommand,
}

/// Combined error surface of the Kubernetes access layer.
///
/// Dispatcher and router unwrap this at their boundary: `Api` becomes a
/// structured failure payload, `Connection` propagates.
#[derive(Debug, Error)]
pub enum KalError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Api(#[from] ApiError),
}
