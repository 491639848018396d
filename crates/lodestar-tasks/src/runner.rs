//! Command execution for a single task attempt

use std::future::pending;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lodestar_core::RunContext;
use lodestar_project::{Task, TaskKind};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::RunError;
use crate::reporter::{PipelineEvent, TaskReporter};

/// How long a signalled process group gets before it is killed outright
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Captured result of one finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Spawns task processes and streams their output to a reporter
#[derive(Clone)]
pub struct TaskRunner {
    context: Arc<RunContext>,
    reporter: Arc<dyn TaskReporter>,
}

impl TaskRunner {
    pub fn new(context: Arc<RunContext>, reporter: Arc<dyn TaskReporter>) -> Self {
        Self { context, reporter }
    }

    /// Run one attempt of `task`, dispatching on its kind.
    ///
    /// The child is killed when `cancel` fires or the task's timeout
    /// elapses.
    pub async fn execute(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, RunError> {
        let args: &[String] = if self.context.is_primary_target(&task.target) {
            self.context.passthrough_args.as_slice()
        } else {
            &[]
        };

        let mut cmd = match &task.kind {
            TaskKind::NoOp => return Ok(CommandOutput {
                exit_code: Some(0),
                ..Default::default()
            }),
            TaskKind::Shell { script } => {
                let mut line = script.clone();
                for arg in args {
                    line.push(' ');
                    line.push_str(&shell_quote(arg));
                }
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(line);
                cmd
            }
            TaskKind::System { command, args: base } => {
                let mut cmd = Command::new(command);
                cmd.args(base).args(args);
                cmd
            }
        };

        let root = &self.context.workspace_root;
        cmd.current_dir(root.join(&task.project_root))
            .env("LODESTAR_TARGET", &task.target)
            .env("LODESTAR_PROJECT_ROOT", root.join(&task.project_root))
            .env("LODESTAR_WORKSPACE_ROOT", root)
            .envs(&task.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so signals reach everything the task spawns
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(target = %task.target, command = %task.kind, "spawning");
        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|error| RunError::Spawn {
            command: task.kind.to_string(),
            error,
        })?;

        let pid = child.id();

        let stdout_task = tokio::spawn(read_lines(
            child.stdout.take(),
            task.target.clone(),
            false,
            self.reporter.clone(),
        ));
        let stderr_task = tokio::spawn(read_lines(
            child.stderr.take(),
            task.target.clone(),
            true,
            self.reporter.clone(),
        ));

        let timeout = task.options.timeout.map(Duration::from_secs);
        let outcome = {
            // Output is complete once every process holding the pipes exits,
            // which may be well after the direct child
            let completed = async {
                let status = child.wait().await?;
                let stdout = stdout_task.await.unwrap_or_default();
                let stderr = stderr_task.await.unwrap_or_default();
                Ok::<_, std::io::Error>((status, stdout, stderr))
            };

            tokio::select! {
                result = completed => result.map_err(RunError::from),
                _ = deadline(timeout) => Err(RunError::Timeout(timeout.unwrap_or_default())),
                _ = cancel.cancelled() => Err(RunError::Cancelled),
            }
        };

        match outcome {
            Ok((status, stdout, stderr)) => Ok(CommandOutput {
                exit_code: status.code(),
                stdout: stdout.join("\n"),
                stderr: stderr.join("\n"),
                duration: started.elapsed(),
            }),
            Err(e) => {
                if let RunError::Timeout(_) = e {
                    warn!(target = %task.target, "timed out, terminating process group");
                } else {
                    debug!(target = %task.target, "cancelled, terminating process group");
                }
                terminate(&mut child, pid, &task.target).await;
                Err(e)
            }
        }
    }
}

/// Send SIGTERM to the child's process group, escalating to SIGKILL when
/// the child outlives the grace period. Stragglers in the group are killed
/// either way.
async fn terminate(child: &mut Child, pid: Option<u32>, label: &str) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        signal_group(pid, libc::SIGTERM);
        if tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_err() {
            warn!(target = %label, pid, "process ignored SIGTERM, killing");
        }
        signal_group(pid, libc::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pid;

    if matches!(child.try_wait(), Ok(Some(_))) {
        return;
    }
    if let Err(e) = child.kill().await {
        warn!(target = %label, error = %e, "failed to kill process");
    }
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: libc::c_int) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: a negative pid addresses the process group created for the
    // spawned child; kill has no memory safety preconditions.
    unsafe {
        libc::kill(-pgid, signal);
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => pending().await,
    }
}

async fn read_lines<R>(
    reader: Option<R>,
    label: String,
    is_stderr: bool,
    reporter: Arc<dyn TaskReporter>,
) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut lines = Vec::new();
    let Some(reader) = reader else {
        return lines;
    };

    let mut reader = BufReader::new(reader).lines();
    while let Ok(Some(line)) = reader.next_line().await {
        reporter.report(&PipelineEvent::Output {
            label: label.clone(),
            line: line.clone(),
            is_stderr,
        });
        lines.push(line);
    }
    lines
}

fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@+".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::CollectingReporter;
    use tempfile::TempDir;

    fn shell(script: &str) -> Task {
        Task::new(
            "app",
            "run",
            TaskKind::Shell {
                script: script.to_string(),
            },
        )
    }

    fn runner(root: &std::path::Path) -> (TaskRunner, Arc<CollectingReporter>) {
        runner_with_args(root, &[])
    }

    fn runner_with_args(
        root: &std::path::Path,
        args: &[&str],
    ) -> (TaskRunner, Arc<CollectingReporter>) {
        std::fs::create_dir_all(root.join("app")).unwrap();
        let reporter = Arc::new(CollectingReporter::default());
        let context = RunContext::new(root)
            .with_primary_targets(["app:run"])
            .with_passthrough_args(args.iter().copied());
        (TaskRunner::new(Arc::new(context), reporter.clone()), reporter)
    }

    #[tokio::test]
    async fn test_shell_output_and_env() {
        let temp = TempDir::new().unwrap();
        let (runner, reporter) = runner(temp.path());

        let task = shell("echo \"$LODESTAR_TARGET\" && echo oops >&2; basename \"$(pwd)\"");
        let output = runner.execute(&task, &CancellationToken::new()).await.unwrap();

        assert!(output.success());
        assert_eq!(output.stdout, "app:run\napp");
        assert_eq!(output.stderr, "oops");
        assert!(reporter
            .events()
            .iter()
            .any(|e| matches!(e, PipelineEvent::Output { is_stderr: true, line, .. } if line == "oops")));
    }

    #[tokio::test]
    async fn test_passthrough_args_are_quoted() {
        let temp = TempDir::new().unwrap();
        let (runner, _) = runner_with_args(temp.path(), &["it's"]);

        let output = runner
            .execute(&shell("echo"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.stdout, "it's");
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let temp = TempDir::new().unwrap();
        let (runner, _) = runner(temp.path());

        let output = runner
            .execute(&shell("exit 3"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_noop_passes_without_spawning() {
        let runner = TaskRunner::new(
            Arc::new(RunContext::new("/does/not/exist")),
            Arc::new(CollectingReporter::default()),
        );
        let task = Task::new("app", "all", TaskKind::NoOp);
        assert!(runner
            .execute(&task, &CancellationToken::new())
            .await
            .unwrap()
            .success());
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let temp = TempDir::new().unwrap();
        let (runner, _) = runner(temp.path());
        let task = Task::new(
            "app",
            "run",
            TaskKind::System {
                command: "lodestar-definitely-missing-binary".into(),
                args: vec![],
            },
        );

        let err = runner
            .execute(&task, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let temp = TempDir::new().unwrap();
        let (runner, _) = runner(temp.path());
        let mut task = shell("sleep 30");
        task.options.timeout = Some(1);

        let started = Instant::now();
        let err = runner
            .execute(&task, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_timeout_covers_background_processes() {
        let temp = TempDir::new().unwrap();
        let (runner, _) = runner(temp.path());
        let mut task = shell("(sleep 3; touch ../survived) & echo started");
        task.options.timeout = Some(1);

        let started = Instant::now();
        let err = runner
            .execute(&task, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(3));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!temp.path().join("survived").exists());
    }

    #[tokio::test]
    async fn test_cancellation_kills_process() {
        let temp = TempDir::new().unwrap();
        let (runner, _) = runner(temp.path());
        let token = CancellationToken::new();

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = runner.execute(&shell("sleep 30"), &token).await.unwrap_err();
        assert!(matches!(err, RunError::Cancelled));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("--watch"), "--watch");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}
