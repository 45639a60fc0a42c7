// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "k8smcp")]
#[command(author, version, about = "Kubernetes access core for an LLM tool gateway")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Kubeconfig context to use (overrides the config file)
    #[arg(short = 'C', long)]
    pub context: Option<String>,

    /// Default namespace for URIs that omit one (overrides the config file)
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Read a resource or listing by URI (k8s://[namespace/]kind[/name])
    Read {
        uri: String,
    },

    /// Compute a cluster health snapshot
    Health,

    /// Resolve the cluster connection and report the active strategy
    Status,

    /// Create a resource from a YAML manifest file
    Apply {
        /// Manifest file path
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Replace an existing resource from a YAML manifest file
    Replace {
        /// Manifest file path
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Delete the resource addressed by a URI
    Delete {
        uri: String,
    },

    /// Scale a deployment to an absolute replica count
    Scale {
        /// Deployment URI (k8s://[namespace/]deployments/name)
        uri: String,
        #[arg(short, long)]
        replicas: i64,
    },

    /// Trigger a rolling restart of a deployment
    Restart {
        /// Deployment URI (k8s://[namespace/]deployments/name)
        uri: String,
    },

    /// Create a namespace
    CreateNamespace {
        name: String,
    },

    /// Show current resource usage for a kind with metrics (nodes, pods)
    Usage {
        /// Kind URI (k8s://nodes, k8s://[namespace/]pods, k8s://all/pods)
        uri: String,
    },

    /// Fetch the tail of a pod's logs
    Logs {
        /// Pod URI (k8s://[namespace/]pods/name)
        uri: String,
        #[arg(long)]
        container: Option<String>,
        /// Lines to return from the end of the log
        #[arg(long, default_value = "100")]
        tail: u32,
    },

    /// Execute a command in a pod
    Exec {
        /// Pod URI (k8s://[namespace/]pods/name)
        uri: String,
        #[arg(long)]
        container: Option<String>,
        /// Command timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
        /// Command and arguments
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}
