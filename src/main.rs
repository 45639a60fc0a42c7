// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod cli;
pub mod config;
mod error;
mod health;
mod kubernetes;
mod operations;
mod router;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::prelude::*;

use cli::{Args, Command};
use health::HealthChecker;
use kubernetes::K8sClient;
use operations::Dispatcher;
use router::Router;

/// Initialize logging with file output and optional stderr
fn init_logging(level: &str, verbose: bool) {
    use tracing_rolling_file::{RollingConditionBase, RollingFileAppenderBase};
    use tracing_subscriber::fmt::format::FmtSpan;

    // Create log directory
    let log_dir = config::base_dir()
        .map(|p| p.join("log"))
        .unwrap_or_else(|_| std::path::PathBuf::from("."));

    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Could not create log directory: {}", e);
        return;
    }

    // File appender with size-based rotation: max 10MB per file, up to 5
    // files, also rotated daily
    let log_path = log_dir.join("k8smcp.log");
    let condition = RollingConditionBase::new().daily().max_size(10 * 1024 * 1024);

    let file_appender = match RollingFileAppenderBase::new(log_path, condition, 5) {
        Ok(appender) => appender,
        Err(e) => {
            eprintln!("Warning: Could not create log file: {}", e);
            return;
        }
    };

    // Use non-blocking writer for better performance
    let (non_blocking, _guard) = file_appender.get_non_blocking_appender();
    // Leak the guard to keep the background writer alive
    std::mem::forget(_guard);

    let filter = if verbose {
        "k8smcp=debug".to_string()
    } else {
        format!("k8smcp={}", level)
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    // File layer (always enabled)
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_span_events(FmtSpan::NONE);

    if verbose {
        // Both file and stderr output
        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::NONE);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(stderr_layer)
            .init();
    } else {
        // File only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (aws-lc-rs)
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let args = Args::parse();

    let mut settings = config::Settings::load(args.config.as_deref())?;
    if let Some(context) = &args.context {
        settings.kubernetes.context = Some(context.clone());
    }
    if let Some(namespace) = &args.namespace {
        settings.kubernetes.namespace = namespace.clone();
    }

    init_logging(&settings.logging.level, args.verbose);
    tracing::debug!(
        server = %settings.server.name,
        host = %settings.server.host,
        port = settings.server.port,
        "Loaded configuration"
    );

    let client = Arc::new(K8sClient::new(settings.kubernetes.clone()));
    let default_namespace = settings.kubernetes.namespace.clone();
    let router = Router::new(client.clone(), default_namespace.clone());
    let dispatcher = Dispatcher::new(client.clone(), default_namespace);
    let checker = HealthChecker::new(client.clone(), settings.monitoring.clone());

    let payload = match &args.command {
        Command::Read { uri } => {
            let locator = router.parse(uri)?;
            let result = router.route(&locator).await?;
            serde_json::to_value(result)?
        }
        Command::Health => {
            let snapshot = checker.check_cluster_health().await?;
            serde_json::to_value(snapshot)?
        }
        Command::Status => {
            let strategy = client.resolve().await?;
            serde_json::json!({"connection": strategy.to_string()})
        }
        Command::Apply { file } => {
            let manifest = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read manifest file: {}", file.display()))?;
            serde_json::to_value(dispatcher.create_resource(&manifest).await?)?
        }
        Command::Replace { file } => {
            let manifest = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read manifest file: {}", file.display()))?;
            serde_json::to_value(dispatcher.update_resource(&manifest).await?)?
        }
        Command::Delete { uri } => {
            let locator = router.parse(uri)?;
            let name = named(&locator, "delete")?;
            let result = dispatcher
                .delete_resource(
                    locator.kind.info().singular,
                    name,
                    locator.namespace.as_deref(),
                )
                .await?;
            serde_json::to_value(result)?
        }
        Command::Scale { uri, replicas } => {
            let locator = router.parse(uri)?;
            let name = named(&locator, "scale")?;
            let result = dispatcher
                .scale_deployment(name, locator.namespace.as_deref(), *replicas)
                .await?;
            serde_json::to_value(result)?
        }
        Command::Restart { uri } => {
            let locator = router.parse(uri)?;
            let name = named(&locator, "restart")?;
            let result = dispatcher
                .restart_deployment(name, locator.namespace.as_deref())
                .await?;
            serde_json::to_value(result)?
        }
        Command::CreateNamespace { name } => {
            serde_json::to_value(dispatcher.create_namespace(name).await?)?
        }
        Command::Usage { uri } => {
            let locator = router.parse(uri)?;
            match client
                .resource_usage(locator.kind, locator.namespace.as_deref())
                .await
            {
                Ok(usage) => serde_json::json!({
                    "kind": locator.kind.info().plural,
                    "usage": usage,
                }),
                Err(error::KalError::Api(e)) => serde_json::json!({"error": e.message}),
                Err(error::KalError::Connection(e)) => return Err(e.into()),
            }
        }
        Command::Logs {
            uri,
            container,
            tail,
        } => {
            let locator = router.parse(uri)?;
            let name = named(&locator, "logs")?;
            let result = dispatcher
                .get_logs(
                    name,
                    locator.namespace.as_deref(),
                    container.as_deref(),
                    Some(*tail),
                )
                .await?;
            serde_json::to_value(result)?
        }
        Command::Exec {
            uri,
            container,
            timeout,
            command,
        } => {
            let locator = router.parse(uri)?;
            let name = named(&locator, "exec")?;
            let result = dispatcher
                .exec_command(
                    name,
                    locator.namespace.as_deref(),
                    container.as_deref(),
                    command,
                    Duration::from_secs(*timeout),
                )
                .await?;
            serde_json::to_value(result)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

/// Mutating verbs address exactly one resource; a list URI is a usage error
fn named<'a>(locator: &'a router::ResourceLocator, verb: &str) -> Result<&'a str> {
    locator
        .name
        .as_deref()
        .ok_or_else(|| anyhow!("{} requires a URI naming a single resource", verb))
}
