// src/topology/command.rs
use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("{program} could not be started: {source}")]
    Unavailable {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("{program} exited with status {code:?}")]
    Failed { program: String, code: Option<i32> },
}

/// Runs an interface-listing tool and returns its stdout.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[&str]) -> Result<String, ProbeError>;
}

/// Runs tools as real subprocesses, killing any that overrun `timeout`.
#[derive(Debug, Clone)]
pub struct SystemToolRunner {
    timeout: Duration,
}

impl SystemToolRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ToolRunner for SystemToolRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<String, ProbeError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if cfg!(unix) {
            cmd.env("LC_ALL", "C");
        }

        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ProbeError::Unavailable {
                    program: program.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(ProbeError::TimedOut {
                    program: program.to_string(),
                    timeout: self.timeout,
                })
            }
        };

        if !output.status.success() {
            return Err(ProbeError::Failed {
                program: program.to_string(),
                code: output.status.code(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_tool_is_unavailable() {
        let runner = SystemToolRunner::new(Duration::from_secs(1));
        let err = runner
            .run("definitely-not-an-interface-tool", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Unavailable { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_tool_times_out() {
        let runner = SystemToolRunner::new(Duration::from_millis(50));
        let err = runner.run("sleep", &["5"]).await.unwrap_err();
        assert!(matches!(err, ProbeError::TimedOut { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout() {
        let runner = SystemToolRunner::new(Duration::from_secs(5));
        let out = runner.run("echo", &["inet"]).await.unwrap();
        assert_eq!(out.trim(), "inet");

        let err = runner.run("false", &[]).await.unwrap_err();
        assert!(matches!(err, ProbeError::Failed { code: Some(1), .. }));
    }
}
