// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! kubectl alternate executor.
//!
//! Used only for operations the structured client does not express
//! atomically here: pod exec and bounded log tails. Never consulted for
//! reads and never part of connection resolution; credentials come from the
//! same kubeconfig/context the structured client was configured with.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::CommandOutput;
use crate::error::ApiError;

/// Hard ceiling on log tails, independent of what the caller asks for
const MAX_TAIL_LINES: u32 = 10_000;

pub struct Kubectl {
    kubeconfig_path: Option<PathBuf>,
    context: Option<String>,
}

impl Kubectl {
    pub fn new(kubeconfig_path: Option<PathBuf>, context: Option<String>) -> Self {
        Self {
            kubeconfig_path,
            context,
        }
    }

    fn command(&self, namespace: Option<&str>) -> Command {
        let mut cmd = Command::new("kubectl");
        if let Some(path) = &self.kubeconfig_path {
            cmd.arg("--kubeconfig").arg(path);
        }
        if let Some(context) = &self.context {
            cmd.arg("--context").arg(context);
        }
        if let Some(namespace) = namespace {
            cmd.arg("-n").arg(namespace);
        }
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        cmd
    }

    /// Fetch the tail of a pod's logs, bounded by `tail_lines`
    pub async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        tail_lines: u32,
    ) -> Result<String, ApiError> {
        let tail = tail_lines.min(MAX_TAIL_LINES);
        let mut cmd = self.command(Some(namespace));
        cmd.arg("logs").arg(pod).arg(format!("--tail={}", tail));
        if let Some(container) = container {
            cmd.arg("-c").arg(container);
        }

        debug!(pod = %pod, namespace = %namespace, tail = tail, "Fetching pod logs via kubectl");
        let output = run_bounded(cmd, Duration::from_secs(30), "kubectl logs").await?;
        if output.exit_code != 0 {
            return Err(ApiError::new(
                None,
                format!(
                    "logs for pod '{}' in namespace '{}' failed: {}",
                    pod,
                    namespace,
                    output.stderr.trim()
                ),
            ));
        }
        Ok(output.stdout)
    }

    /// Run a command inside a pod, bounded by `timeout`
    pub async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        command: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ApiError> {
        let mut cmd = self.command(Some(namespace));
        cmd.arg("exec").arg(pod);
        if let Some(container) = container {
            cmd.arg("-c").arg(container);
        }
        cmd.arg("--").args(command);

        debug!(
            pod = %pod,
            namespace = %namespace,
            command = %command.join(" "),
            "Executing command in pod via kubectl"
        );
        run_bounded(cmd, timeout, "kubectl exec").await
    }

    /// Current usage from the metrics pipeline (kubectl top)
    pub async fn top(&self, kind_plural: &str, namespace: Option<&str>) -> Result<String, ApiError> {
        let mut cmd = self.command(namespace);
        cmd.arg("top").arg(kind_plural);

        debug!(kind = %kind_plural, namespace = ?namespace, "Fetching resource usage via kubectl");
        let output = run_bounded(cmd, Duration::from_secs(30), "kubectl top").await?;
        if output.exit_code != 0 {
            return Err(ApiError::new(
                None,
                format!("usage for {} failed: {}", kind_plural, output.stderr.trim()),
            ));
        }
        Ok(output.stdout)
    }
}

/// Run a subprocess with a hard timeout, capturing its output
async fn run_bounded(
    mut cmd: Command,
    timeout: Duration,
    what: &str,
) -> Result<CommandOutput, ApiError> {
    let run = async {
        cmd.output()
            .await
            .map_err(|e| ApiError::new(None, format!("{} failed to start: {}", what, e)))
    };

    let output = tokio::time::timeout(timeout, run)
        .await
        .map_err(|_| ApiError::new(None, format!("{} timed out after {:?}", what, timeout)))??;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_kills_process() {
        // A command that outlives its deadline must come back as a timeout error
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        cmd.kill_on_drop(true);
        let result = run_bounded(cmd, Duration::from_millis(50), "sleep").await;
        let err = result.unwrap_err();
        assert!(err.message.contains("timed out"), "got: {}", err.message);
    }

    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo out; echo err >&2; exit 3");
        let output = run_bounded(cmd, Duration::from_secs(5), "sh").await.unwrap();
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert_eq!(output.exit_code, 3);
    }

    #[tokio::test]
    async fn test_missing_binary_is_error() {
        let cmd = Command::new("definitely-not-a-real-binary-k8smcp");
        let result = run_bounded(cmd, Duration::from_secs(1), "missing").await;
        assert!(result.is_err());
    }
}
