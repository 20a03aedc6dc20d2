//! SSH command execution tool.
//!
//! Connection details come from the credential resolver (connector `ssh`),
//! never from tool arguments; with nothing configured the tool reports
//! `connector_not_configured`. The command runs through the system `ssh`
//! client in batch mode under a hard timeout.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::context::current_credential_resolver;
use crate::tools::{Tool, ToolErrorKind, ToolOutput};

/// Cap on captured stdout/stderr persisted into the tool message.
const OUTPUT_CAP: usize = 20_000;

/// Default and maximum command deadlines, in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const MAX_TIMEOUT_SECS: u64 = 300;

pub struct SshExecTool;

#[async_trait]
impl Tool for SshExecTool {
    fn name(&self) -> &str {
        "ssh_exec"
    }

    fn description(&self) -> &str {
        "Runs a shell command on a remote host over SSH. Arguments: host (required), \
         command (required), timeout_seconds (default 60). Connection credentials \
         come from the ssh integration, not from arguments."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "host": {"type": "string"},
                "command": {"type": "string"},
                "timeout_seconds": {"type": "integer"}
            },
            "required": ["host", "command"]
        })
    }

    async fn invoke(&self, args: Value) -> ToolOutput {
        // Resolver first: no ssh credentials means the connector is not set up.
        let Some(resolver) = current_credential_resolver() else {
            return ToolOutput::err(
                ToolErrorKind::ConnectorNotConfigured,
                "ssh is not connected for this account",
            )
            .with_connector("ssh");
        };
        let Some(credentials) = resolver.get("ssh").await else {
            return ToolOutput::err(
                ToolErrorKind::ConnectorNotConfigured,
                "ssh is not connected for this account",
            )
            .with_connector("ssh");
        };

        let (Some(host), Some(command)) = (
            args.get("host").and_then(Value::as_str),
            args.get("command").and_then(Value::as_str),
        ) else {
            return ToolOutput::err(
                ToolErrorKind::ValidationError,
                "'host' and 'command' are required",
            );
        };
        let timeout_secs = args
            .get("timeout_seconds")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .min(MAX_TIMEOUT_SECS);

        let user = credentials.get("user").and_then(Value::as_str);
        let port = credentials.get("port").and_then(Value::as_u64);
        let identity_file = credentials.get("identity_file").and_then(Value::as_str);

        let mut ssh = Command::new("ssh");
        ssh.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new");
        if let Some(identity_file) = identity_file {
            ssh.arg("-i").arg(identity_file);
        }
        if let Some(port) = port {
            ssh.arg("-p").arg(port.to_string());
        }
        let target = match user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        };
        ssh.arg(target).arg(command);
        ssh.kill_on_drop(true);

        let run = tokio::time::timeout(
            std::time::Duration::from_secs(timeout_secs),
            ssh.output(),
        )
        .await;
        let output = match run {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ToolOutput::err(
                    ToolErrorKind::ExecutionError,
                    format!("ssh could not be spawned: {e}"),
                )
            }
            Err(_) => {
                return ToolOutput::err(
                    ToolErrorKind::ExecutionError,
                    format!("ssh command timed out after {timeout_secs}s"),
                )
            }
        };

        let stdout = cap(&String::from_utf8_lossy(&output.stdout));
        let stderr = cap(&String::from_utf8_lossy(&output.stderr));
        let exit_code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            return ToolOutput::err(
                ToolErrorKind::ExecutionError,
                format!("ssh exited with status {exit_code}: {stderr}"),
            );
        }
        ToolOutput::ok(json!({
            "stdout": stdout,
            "stderr": stderr,
            "exit_code": exit_code,
        }))
    }
}

fn cap(s: &str) -> String {
    s.chars().take(OUTPUT_CAP).collect()
}
