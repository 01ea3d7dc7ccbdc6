//! Container runtime driven through the `podman` (or `docker`) CLI.
//!
//! Builders run detached; status is read with `inspect`, output with
//! `logs`, and cleanup uses `rm -f` so a still-running builder is killed.

use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{ContainerError, ContainerHandle, ContainerRuntime, ContainerSpec, ContainerStatus};

/// Container runtime using a docker-compatible CLI
pub struct CliContainerRuntime {
    /// Runtime binary (default: "podman")
    binary_path: String,
}

impl Default for CliContainerRuntime {
    fn default() -> Self {
        Self::new("podman")
    }
}

impl CliContainerRuntime {
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    /// Arguments for `run -d`
    fn run_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            spec.name.clone(),
        ];

        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push(spec.image.clone());
        args
    }

    async fn invoke(&self, args: &[String]) -> Result<Output, ContainerError> {
        debug!(binary = %self.binary_path, ?args, "Invoking container runtime");

        Command::new(&self.binary_path)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                ContainerError::Runtime(format!("failed to execute {}: {}", self.binary_path, e))
            })
    }
}

/// Parse `inspect --format '{{.State.Status}} {{.State.ExitCode}}'` output
fn parse_inspect(output: &str) -> Result<ContainerStatus, ContainerError> {
    let mut parts = output.split_whitespace();
    let state = parts.next().unwrap_or_default();
    let exit_code = parts
        .next()
        .map(|c| c.parse::<i64>())
        .transpose()
        .map_err(|e| ContainerError::Runtime(format!("unparseable exit code in '{}': {}", output.trim(), e)))?;

    match state {
        "created" | "configured" | "initialized" => Ok(ContainerStatus::Created),
        "running" | "paused" | "restarting" | "stopping" => Ok(ContainerStatus::Running),
        "exited" | "stopped" | "dead" => Ok(ContainerStatus::Exited {
            exit_code: exit_code.unwrap_or(-1),
        }),
        other => Err(ContainerError::Runtime(format!(
            "unknown container state '{}'",
            other
        ))),
    }
}

fn is_missing_container(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("no such container") || lower.contains("no container with name or id")
}

#[async_trait]
impl ContainerRuntime for CliContainerRuntime {
    fn name(&self) -> &str {
        &self.binary_path
    }

    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle, ContainerError> {
        let output = self
            .invoke(&Self::run_args(spec))
            .await
            .map_err(|e| ContainerError::StartFailed {
                name: spec.name.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::StartFailed {
                name: spec.name.clone(),
                reason: format!(
                    "exit code {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                ),
            });
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(ContainerHandle {
            id,
            name: spec.name.clone(),
        })
    }

    async fn status(&self, handle: &ContainerHandle) -> Result<ContainerStatus, ContainerError> {
        let output = self
            .invoke(&[
                "inspect".to_string(),
                "--format".to_string(),
                "{{.State.Status}} {{.State.ExitCode}}".to_string(),
                handle.id.clone(),
            ])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::Runtime(format!(
                "inspect {} failed: {}",
                handle.id,
                stderr.trim()
            )));
        }

        parse_inspect(&String::from_utf8_lossy(&output.stdout))
    }

    async fn logs(&self, handle: &ContainerHandle) -> Result<Vec<String>, ContainerError> {
        let output = self.invoke(&["logs".to_string(), handle.id.clone()]).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::Runtime(format!(
                "logs {} failed: {}",
                handle.id,
                stderr.trim()
            )));
        }

        // Builders write structured records to stdout and diagnostics to stderr
        let mut lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect();
        lines.extend(
            String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(str::to_string),
        );
        lines.retain(|l| !l.trim().is_empty());

        Ok(lines)
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), ContainerError> {
        let output = self
            .invoke(&["rm".to_string(), "-f".to_string(), handle.id.clone()])
            .await
            .map_err(|e| ContainerError::RemoveFailed {
                id: handle.id.clone(),
                reason: e.to_string(),
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_missing_container(&stderr) {
            debug!(container = %handle.id, "Container already removed");
            return Ok(());
        }

        Err(ContainerError::RemoveFailed {
            id: handle.id.clone(),
            reason: stderr.trim().to_string(),
        })
    }
}
