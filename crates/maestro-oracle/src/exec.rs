use crate::backends::BackendRegistry;
use async_trait::async_trait;
use maestro_core::MaestroResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

/// Default oracle timeout: 5 minutes.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
/// Hard cap on captured stdout/stderr bytes.
pub const DEFAULT_CAPTURE_CAP: usize = 2 * 1024 * 1024;

/// One delegation to an external agent backend.
#[derive(Debug, Clone)]
pub struct OracleRequest {
    pub agent: String,
    pub prompt: String,
    pub timeout: Duration,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl OracleRequest {
    pub fn new(agent: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            prompt: prompt.into(),
            timeout: DEFAULT_TIMEOUT,
            env: HashMap::new(),
            cwd: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cwd(mut self, cwd: PathBuf) -> Self {
        self.cwd = Some(cwd);
        self
    }
}

/// Terminal outcome of an oracle invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum OracleStatus {
    Success,
    Failed { exit_code: i32 },
    TimedOut,
}

/// Captured result. Output is returned verbatim — the adapter never
/// interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleResponse {
    pub status: OracleStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub stdout_truncated: bool,
    #[serde(default)]
    pub stderr_truncated: bool,
}

impl OracleResponse {
    pub fn is_success(&self) -> bool {
        self.status == OracleStatus::Success
    }
}

/// Uniform interface to external agent backends.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn exec(&self, request: OracleRequest) -> MaestroResult<OracleResponse>;
}

/// Spawns backend CLIs as child processes.
///
/// The prompt travels as a single argv element — nothing is ever passed
/// through a shell. Stdout and stderr are drained by dedicated readers
/// with byte caps so a chatty child can neither block on a full pipe nor
/// exhaust memory.
pub struct ProcessOracle {
    registry: BackendRegistry,
    capture_cap: usize,
}

impl ProcessOracle {
    pub fn new(registry: BackendRegistry) -> Self {
        Self {
            registry,
            capture_cap: DEFAULT_CAPTURE_CAP,
        }
    }

    pub fn with_capture_cap(mut self, cap: usize) -> Self {
        self.capture_cap = cap;
        self
    }
}

#[async_trait]
impl Oracle for ProcessOracle {
    async fn exec(&self, request: OracleRequest) -> MaestroResult<OracleResponse> {
        let profile = self.registry.profile_for(&request.agent);
        let start = Instant::now();

        let mut cmd = tokio::process::Command::new(&profile.program);
        cmd.args(&profile.base_args);
        cmd.arg(&request.prompt);
        for (key, value) in profile.env.iter().chain(request.env.iter()) {
            cmd.env(key, value);
        }
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        info!(
            agent = %request.agent,
            backend = %profile.kind,
            prompt_len = request.prompt.len(),
            timeout_ms = request.timeout.as_millis() as u64,
            "Oracle exec"
        );

        let mut child = cmd.spawn()?;

        // Dedicated drains keep reading past the cap so the child never
        // blocks on a full pipe.
        let cap = self.capture_cap;
        let stdout_task = child
            .stdout
            .take()
            .map(|pipe| tokio::spawn(drain_capped(pipe, cap)));
        let stderr_task = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(drain_capped(pipe, cap)));

        let wait = tokio::time::timeout(request.timeout, child.wait()).await;

        // Kill before draining: the drains only hit EOF once the child's
        // pipe ends close.
        let status = match wait {
            Err(_) => {
                warn!(agent = %request.agent, timeout_ms = request.timeout.as_millis() as u64, "Oracle timed out, killing child");
                let _ = child.kill().await;
                OracleStatus::TimedOut
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(exit)) if exit.success() => OracleStatus::Success,
            Ok(Ok(exit)) => OracleStatus::Failed {
                exit_code: exit.code().unwrap_or(-1),
            },
        };

        let (stdout, stdout_truncated) = match stdout_task {
            Some(task) => task.await.unwrap_or_default(),
            None => (Vec::new(), false),
        };
        let (stderr, stderr_truncated) = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => (Vec::new(), false),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        Ok(OracleResponse {
            status,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            duration_ms,
            stdout_truncated,
            stderr_truncated,
        })
    }
}

/// Read a pipe to EOF, keeping at most `cap` bytes.
async fn drain_capped<R: tokio::io::AsyncRead + Unpin>(mut pipe: R, cap: usize) -> (Vec<u8>, bool) {
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if kept.len() < cap {
                    let take = n.min(cap - kept.len());
                    kept.extend_from_slice(&buf[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }
    (kept, truncated)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::backends::{BackendKind, BackendProfile, BackendRegistry};

    fn shell_registry(script: &str) -> BackendRegistry {
        // Tests use /bin/sh as the "backend binary"; the prompt arrives as
        // the positional argument after -c's script, exactly one argv
        // element.
        let mut registry = BackendRegistry::new();
        registry.set_profile(BackendProfile {
            kind: BackendKind::Claude,
            program: "/bin/sh".into(),
            base_args: vec!["-c".into(), script.into(), "sh".into()],
            env: HashMap::new(),
        });
        registry
    }

    #[tokio::test]
    async fn test_success_captures_stdout_verbatim() {
        let oracle = ProcessOracle::new(shell_registry("printf 'result: %s' \"$1\""));
        let response = oracle
            .exec(OracleRequest::new("developer", "build the form"))
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(response.stdout, "result: build the form");
        assert!(!response.stdout_truncated);
    }

    #[tokio::test]
    async fn test_prompt_is_not_shell_interpreted() {
        let oracle = ProcessOracle::new(shell_registry("printf '%s' \"$1\""));
        let hostile = "$(rm -rf /tmp/nope); `echo pwned`";
        let response = oracle
            .exec(OracleRequest::new("developer", hostile))
            .await
            .unwrap();
        // The hostile prompt comes back literally, unexpanded.
        assert_eq!(response.stdout, hostile);
    }

    #[tokio::test]
    async fn test_failure_reports_exit_code_and_stderr() {
        let oracle = ProcessOracle::new(shell_registry("echo boom >&2; exit 3"));
        let response = oracle
            .exec(OracleRequest::new("qa", "x"))
            .await
            .unwrap();
        assert_eq!(response.status, OracleStatus::Failed { exit_code: 3 });
        assert!(response.stderr.contains("boom"));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let oracle = ProcessOracle::new(shell_registry("sleep 30"));
        let start = Instant::now();
        let response = oracle
            .exec(
                OracleRequest::new("architect", "x")
                    .with_timeout(Duration::from_millis(200)),
            )
            .await
            .unwrap();
        assert_eq!(response.status, OracleStatus::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_output_capped_with_truncation_flag() {
        let oracle = ProcessOracle::new(shell_registry(
            "dd if=/dev/zero bs=1024 count=64 2>/dev/null | tr '\\0' 'x'",
        ))
        .with_capture_cap(1024);
        let response = oracle.exec(OracleRequest::new("dev", "x")).await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.stdout.len(), 1024);
        assert!(response.stdout_truncated);
    }

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let mut registry = BackendRegistry::new();
        registry.set_profile(BackendProfile {
            kind: BackendKind::Claude,
            program: "/nonexistent/claude-bin".into(),
            base_args: vec![],
            env: HashMap::new(),
        });
        let oracle = ProcessOracle::new(registry);
        assert!(oracle.exec(OracleRequest::new("dev", "x")).await.is_err());
    }

    #[tokio::test]
    async fn test_env_passthrough() {
        let oracle = ProcessOracle::new(shell_registry("printf '%s' \"$MAESTRO_TEST_VAR\""));
        let mut request = OracleRequest::new("dev", "x");
        request.env.insert("MAESTRO_TEST_VAR".into(), "42".into());
        let response = oracle.exec(request).await.unwrap();
        assert_eq!(response.stdout, "42");
    }
}
