//! Execution of the external verification and notification scripts.

use std::fmt::Debug;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn};


#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    /// set if the command could not be started, exited with a failure code or timed out
    pub error: Option<String>,
}
impl ShellOutput {
    pub fn failed(error: impl Into<String>) -> ShellOutput {
        ShellOutput {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Runs a shell command line with a timeout. Failures are reported in the returned
///  [ShellOutput] rather than as errors: a failing script is an observation, not a fault.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ShellRunner: Debug + Send + Sync + 'static {
    async fn run(&self, command: &str, timeout: Duration) -> ShellOutput;
}


/// Runs commands as `sh -c <command>` in a process group of their own. A command exceeding its
///  timeout receives SIGINT, and after the grace period, everything left in its process group
///  is killed.
#[derive(Debug)]
pub struct ProcessShellRunner {
    pub grace_period: Duration,
}
impl Default for ProcessShellRunner {
    fn default() -> Self {
        ProcessShellRunner {
            grace_period: Duration::from_secs(1),
        }
    }
}

#[async_trait]
impl ShellRunner for ProcessShellRunner {
    async fn run(&self, command: &str, timeout: Duration) -> ShellOutput {
        if command.trim().is_empty() {
            return ShellOutput::failed("cannot run an empty command");
        }

        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return ShellOutput::failed(format!("failed to start `{}`: {}", command, e)),
        };
        debug!("started `{}` with pid {:?}", command, child.id());

        let (stdout, stdout_reader) = spawn_reader(child.stdout.take());
        let (stderr, stderr_reader) = spawn_reader(child.stderr.take());

        let error = tokio::select! {
            status = child.wait() => {
                match status {
                    Ok(status) if status.success() => None,
                    Ok(status) => Some(format!("`{}` failed: {}", command, status)),
                    Err(e) => Some(format!("failed to wait for `{}`: {}", command, e)),
                }
            }
            _ = time::sleep(timeout) => {
                warn!("`{}` did not finish within {:?}, interrupting", command, timeout);
                let group = child.id().map(|pid| Pid::from_raw(pid as i32));
                if let Some(group) = group {
                    if let Err(e) = signal::killpg(group, Signal::SIGINT) {
                        warn!("failed to send SIGINT to `{}`: {}", command, e);
                    }
                }
                let exited = time::timeout(self.grace_period, child.wait()).await.is_ok();

                // processes started by the command in the background
                if let Some(group) = group {
                    match signal::killpg(group, Signal::SIGKILL) {
                        Ok(()) | Err(Errno::ESRCH) => {}
                        Err(e) => warn!("failed to kill the process group of `{}`: {}", command, e),
                    }
                }
                if !exited {
                    warn!("`{}` ignored SIGINT, killing it", command);
                    if let Err(e) = child.kill().await {
                        warn!("failed to kill `{}`: {}", command, e);
                    }
                }
                Some(format!("`{}` timed out after {:?}", command, timeout))
            }
        };

        // processes started by the script may still hold the pipes open
        for reader in [stdout_reader, stderr_reader] {
            let abort_handle = reader.abort_handle();
            if time::timeout(self.grace_period, reader).await.is_err() {
                abort_handle.abort();
            }
        }

        ShellOutput {
            stdout: take_output(&stdout),
            stderr: take_output(&stderr),
            error,
        }
    }
}

fn spawn_reader<R>(source: Option<R>) -> (Arc<Mutex<Vec<u8>>>, JoinHandle<()>)
where R: AsyncRead + Unpin + Send + 'static
{
    let buf = Arc::new(Mutex::new(Vec::new()));
    let target = buf.clone();
    let handle = tokio::spawn(async move {
        let Some(mut source) = source else {
            return;
        };
        let mut chunk = [0u8; 4096];
        loop {
            match source.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut target) = target.lock() {
                        target.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }
    });
    (buf, handle)
}

fn take_output(buf: &Mutex<Vec<u8>>) -> String {
    match buf.lock() {
        Ok(mut buf) => String::from_utf8_lossy(&std::mem::take(&mut *buf)).into_owned(),
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use rstest::rstest;
    use super::*;

    fn runner() -> ProcessShellRunner {
        ProcessShellRunner {
            grace_period: Duration::from_millis(200),
        }
    }

    #[rstest]
    #[case("echo UP", "UP\n", "", false)]
    #[case("printf DOWN", "DOWN", "", false)]
    #[case("true", "", "", false)]
    #[case("echo oops >&2", "", "oops\n", false)]
    #[case("echo partial; exit 3", "partial\n", "", true)]
    #[tokio::test]
    async fn test_run(#[case] command: &str, #[case] stdout: &str, #[case] stderr: &str, #[case] has_error: bool) {
        let output = runner().run(command, Duration::from_secs(10)).await;

        assert_eq!(output.stdout, stdout);
        assert_eq!(output.stderr, stderr);
        assert_eq!(output.error.is_some(), has_error);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[tokio::test]
    async fn test_empty_command(#[case] command: &str) {
        let output = runner().run(command, Duration::from_secs(1)).await;
        assert_eq!(output, ShellOutput::failed("cannot run an empty command"));
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let output = runner().run("echo started; sleep 30", Duration::from_millis(500)).await;

        assert_eq!(output.stdout, "started\n");
        assert!(output.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_timeout_kills_process_ignoring_sigint() {
        let output = runner().run("trap '' INT; echo stubborn; while true; do sleep 1; done", Duration::from_millis(500)).await;

        assert_eq!(output.stdout, "stubborn\n");
        assert!(output.error.unwrap().contains("timed out"));
    }

    fn is_running(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            // a zombie waiting to be reaped is not running
            Ok(stat) => !stat.contains(") Z "),
            Err(_) => false,
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_background_processes() {
        let start = std::time::Instant::now();
        let output = runner().run("sleep 30 & echo $!; wait", Duration::from_millis(500)).await;

        assert!(output.error.unwrap().contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(5));

        let background_pid = output.stdout.trim().to_string();
        assert!(!background_pid.is_empty());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!is_running(&background_pid));
    }
}
