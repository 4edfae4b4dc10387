use std::process::Stdio;

use tokio::process::Command;

/// Executes job inputs by running shell commands and capturing their output.
#[derive(Debug, Clone, Default)]
pub struct JobExecutor;

impl JobExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run `sh -c <input>` and return the captured output: stdout when the
    /// command produced any, stderr or the spawn error otherwise.
    pub async fn execute(&self, input: &str) -> String {
        let result = Command::new("sh")
            .arg("-c")
            .arg(input)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        match result {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                tracing::debug!(
                    exit_code = ?output.status.code(),
                    "Job command finished"
                );
                if !stdout.is_empty() {
                    stdout
                } else if !stderr.is_empty() {
                    stderr
                } else {
                    format!("exit code: {:?}", output.status.code())
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Job execution failed");
                e.to_string()
            }
        }
    }
}
