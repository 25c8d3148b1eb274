//! Subprocess execution for the external version-control tool.
//!
//! Every invocation is an argument array handed to [`tokio::process::Command`];
//! nothing goes through a shell. Commands always run with a working directory
//! inside one resolved repository and under a hard timeout.
//!
//! Three modes:
//! - [`CommandRunner::run`]: buffered, waits for exit and returns all output
//! - [`CommandRunner::stream`]: returns a [`CommandStream`] over live stdout
//! - [`CommandRunner::run_pipeline`]: two or more processes joined by OS pipes,
//!   used for `git archive | tar -tv` and archive compression

use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument, warn};

const MAX_STDERR_BYTES: usize = 10 * 1024;

/// Characters that never reach a subprocess argument built from a request.
const FORBIDDEN_CHARS: &[char] = &['`', '\'', '"', '&', '|', '<', '>', ';', '$', '\\'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("timed out after {timeout:?} while running `{program}`")]
    Timeout { program: String, timeout: Duration },
    #[error("failed waiting for `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{program}` exited with status {}", .status_code.map_or("signal".to_string(), |c| c.to_string()))]
    Failed {
        program: String,
        status_code: Option<i32>,
        stderr: String,
    },
    #[error("refusing unsafe argument {0:?}")]
    UnsafeArgument(String),
}

impl CommandError {
    pub fn stderr(&self) -> Option<&str> {
        match self {
            CommandError::Failed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

/// Reject values that could be read as an option, carry shell
/// metacharacters, or climb out of the repository.
///
/// Applies to every request-derived value placed into an argument list:
/// references, commit hashes and repository-relative paths.
pub fn validate_argument(value: &str) -> Result<(), CommandError> {
    let unsafe_value = value.is_empty()
        || value.starts_with('-')
        || value.chars().any(|c| c.is_control() || FORBIDDEN_CHARS.contains(&c))
        || value.split('/').any(|segment| segment == "..");
    if unsafe_value {
        return Err(CommandError::UnsafeArgument(value.to_string()));
    }
    Ok(())
}

/// Where the last stage of a pipeline writes its stdout.
#[derive(Debug)]
pub enum Sink {
    Capture,
    File(std::fs::File),
}

#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run to completion and return buffered output; non-zero exit is an error.
    pub async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        self.run_with_timeout(spec, self.timeout).await
    }

    #[instrument(skip(self, spec), fields(command = %spec, cwd = %spec.cwd.display()))]
    pub async fn run_with_timeout(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        debug!("running command");
        let child = spec.command().spawn().map_err(|source| CommandError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| CommandError::Wait {
                program: spec.program.clone(),
                source,
            })?,
            Err(_) => {
                return Err(CommandError::Timeout {
                    program: spec.program.clone(),
                    timeout,
                });
            }
        };

        check_status(&spec.program, output.status, &output.stderr)?;

        let mut stderr = output.stderr;
        stderr.truncate(MAX_STDERR_BYTES);
        Ok(CommandOutput {
            status_code: output.status.code(),
            stdout: output.stdout,
            stderr,
        })
    }

    /// Spawn and hand back the live stdout pipe.
    ///
    /// The child is killed when the stream is dropped or the timeout expires,
    /// so a client that disconnects mid-response takes the process down with it.
    #[instrument(skip(self, spec), fields(command = %spec, cwd = %spec.cwd.display()))]
    pub fn stream(&self, spec: &CommandSpec) -> Result<CommandStream, CommandError> {
        debug!("streaming command");
        let mut child = spec.command().spawn().map_err(|source| CommandError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let stdout = child.stdout.take().ok_or_else(|| CommandError::Wait {
            program: spec.program.clone(),
            source: io::Error::new(io::ErrorKind::BrokenPipe, "stdout was not piped"),
        })?;
        let stderr = child.stderr.take().map(collect_stderr);

        Ok(CommandStream {
            program: spec.program.clone(),
            child,
            stdout: ReaderStream::new(stdout),
            stderr,
            deadline: Box::pin(tokio::time::sleep(self.timeout)),
            timeout: self.timeout,
            finished: false,
        })
    }

    /// Run `stages` connected stdout-to-stdin, the last one writing to `sink`.
    ///
    /// Succeeds only if every stage exits zero. The returned stdout is empty
    /// unless the sink is [`Sink::Capture`].
    #[instrument(skip(self, stages, sink), fields(stages = stages.len()))]
    pub async fn run_pipeline(
        &self,
        stages: &[CommandSpec],
        sink: Sink,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let Some(last_index) = stages.len().checked_sub(1) else {
            return Ok(CommandOutput {
                status_code: Some(0),
                stdout: Vec::new(),
                stderr: Vec::new(),
            });
        };

        let mut children: Vec<(String, Child)> = Vec::with_capacity(stages.len());
        let mut upstream: Option<ChildStdout> = None;
        let mut sink = Some(sink);

        for (index, spec) in stages.iter().enumerate() {
            debug!(command = %spec, "spawning pipeline stage");
            let mut command = spec.command();
            if let Some(previous) = upstream.take() {
                let stdin = TryInto::<Stdio>::try_into(previous).map_err(|source| CommandError::Spawn {
                    program: spec.program.clone(),
                    source,
                })?;
                command.stdin(stdin);
            }
            if index == last_index {
                if let Some(Sink::File(file)) = sink.take() {
                    command.stdout(Stdio::from(file));
                }
            }

            let mut child = command.spawn().map_err(|source| CommandError::Spawn {
                program: spec.program.clone(),
                source,
            })?;
            if index != last_index {
                upstream = child.stdout.take();
            }
            children.push((spec.program.clone(), child));
        }

        let waits = children.into_iter().map(|(program, child)| async move {
            let output = child
                .wait_with_output()
                .await
                .map_err(|source| CommandError::Wait {
                    program: program.clone(),
                    source,
                })?;
            Ok::<_, CommandError>((program, output))
        });

        let outputs = match tokio::time::timeout(timeout, futures::future::try_join_all(waits)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(CommandError::Timeout {
                    program: stages[0].program.clone(),
                    timeout,
                });
            }
        };

        let mut stderr = Vec::new();
        for (program, output) in &outputs {
            check_status(program, output.status, &output.stderr)?;
            stderr.extend_from_slice(&output.stderr);
        }
        stderr.truncate(MAX_STDERR_BYTES);

        let (_, last) = outputs.into_iter().last().ok_or_else(|| CommandError::Wait {
            program: stages[last_index].program.clone(),
            source: io::Error::other("pipeline produced no output"),
        })?;

        Ok(CommandOutput {
            status_code: last.status.code(),
            stdout: last.stdout,
            stderr,
        })
    }
}

fn check_status(program: &str, status: ExitStatus, stderr: &[u8]) -> Result<(), CommandError> {
    if status.success() {
        return Ok(());
    }
    let mut stderr = stderr.to_vec();
    stderr.truncate(MAX_STDERR_BYTES);
    Err(CommandError::Failed {
        program: program.to_string(),
        status_code: status.code(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

fn collect_stderr(mut stderr: ChildStderr) -> JoinHandle<Vec<u8>> {
    tokio::spawn(async move {
        let mut buffer = Vec::new();
        if let Err(e) = stderr.read_to_end(&mut buffer).await {
            debug!(error = %e, "failed to read child stderr");
        }
        buffer.truncate(MAX_STDERR_BYTES);
        buffer
    })
}

/// Live stdout of a running subprocess.
pub struct CommandStream {
    program: String,
    child: Child,
    stdout: ReaderStream<ChildStdout>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    deadline: Pin<Box<Sleep>>,
    timeout: Duration,
    finished: bool,
}

impl CommandStream {
    /// Wait for the first chunk of output before committing to a response.
    ///
    /// A process that exits non-zero without writing anything becomes
    /// [`CommandError::Failed`] carrying its stderr; otherwise the returned
    /// stream replays the first chunk and continues with the rest.
    pub async fn prime(mut self) -> Result<BoxStream<'static, io::Result<Bytes>>, CommandError> {
        match self.next().await {
            Some(Ok(first)) => Ok(stream::once(async move { Ok(first) }).chain(self).boxed()),
            Some(Err(e)) if e.kind() == io::ErrorKind::TimedOut => Err(CommandError::Timeout {
                program: self.program.clone(),
                timeout: self.timeout,
            }),
            Some(Err(source)) => Err(CommandError::Wait {
                program: self.program.clone(),
                source,
            }),
            None => {
                let deadline: Instant = self.deadline.deadline();
                let status = match tokio::time::timeout_at(deadline, self.child.wait()).await {
                    Ok(status) => status.map_err(|source| CommandError::Wait {
                        program: self.program.clone(),
                        source,
                    })?,
                    Err(_) => {
                        return Err(CommandError::Timeout {
                            program: self.program.clone(),
                            timeout: self.timeout,
                        });
                    }
                };
                let stderr = match self.stderr.take() {
                    Some(handle) => handle.await.unwrap_or_default(),
                    None => Vec::new(),
                };
                check_status(&self.program, status, &stderr)?;
                Ok(stream::empty().boxed())
            }
        }
    }
}

impl Stream for CommandStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        if this.deadline.as_mut().poll(cx).is_ready() {
            this.finished = true;
            warn!(program = %this.program, timeout = ?this.timeout, "killing streamed command after timeout");
            if let Err(e) = this.child.start_kill() {
                debug!(error = %e, "child already exited");
            }
            return Poll::Ready(Some(Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("`{}` timed out after {:?}", this.program, this.timeout),
            ))));
        }

        match this.stdout.poll_next_unpin(cx) {
            Poll::Ready(Some(chunk)) => {
                if chunk.is_err() {
                    this.finished = true;
                }
                Poll::Ready(Some(chunk))
            }
            Poll::Ready(None) => {
                this.finished = true;
                if let Ok(Some(status)) = this.child.try_wait() {
                    if !status.success() {
                        warn!(program = %this.program, %status, "streamed command failed after writing output");
                    }
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str, cwd: &Path) -> CommandSpec {
        CommandSpec::new("sh", cwd).arg("-c").arg(script)
    }

    #[test]
    fn validate_argument_accepts_refs_and_paths() {
        for ok in ["HEAD", "main", "v1.2.3", "feature/x", "abc123", "src/lib.rs", "HEAD~2"] {
            assert!(validate_argument(ok).is_ok(), "{ok}");
        }
    }

    #[test]
    fn validate_argument_rejects_hazards() {
        for bad in [
            "",
            "--output=/etc/passwd",
            "-n1",
            "a`id`",
            "a'b",
            "a\"b",
            "a&b",
            "a|b",
            "a<b",
            "a>b",
            "a;b",
            "$(id)",
            "a\nb",
            "../secret",
            "src/../../x",
        ] {
            assert!(
                matches!(validate_argument(bad), Err(CommandError::UnsafeArgument(_))),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn display_joins_program_and_args() {
        let spec = CommandSpec::new("git", "/tmp").args(["log", "-n1"]);
        assert_eq!(spec.to_string(), "git log -n1");
    }

    #[tokio::test]
    async fn run_captures_stdout_in_working_dir() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("marker"), "here").unwrap();
        let runner = CommandRunner::new(Duration::from_secs(5));

        let output = runner.run(&sh("cat marker", tmp.path())).await.unwrap();
        assert_eq!(output.stdout_lossy(), "here");
        assert_eq!(output.status_code, Some(0));
    }

    #[tokio::test]
    async fn run_reports_failure_with_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = CommandRunner::new(Duration::from_secs(5));

        let err = runner
            .run(&sh("echo broken >&2; exit 3", tmp.path()))
            .await
            .unwrap_err();
        match err {
            CommandError::Failed {
                status_code, stderr, ..
            } => {
                assert_eq!(status_code, Some(3));
                assert_eq!(stderr.trim(), "broken");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = CommandRunner::new(Duration::from_millis(100));

        let started = std::time::Instant::now();
        let err = runner.run(&sh("sleep 5", tmp.path())).await.unwrap_err();
        assert!(matches!(err, CommandError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn run_reports_spawn_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = CommandRunner::new(Duration::from_secs(1));
        let spec = CommandSpec::new("definitely-not-a-real-binary-xyz", tmp.path());

        assert!(matches!(
            runner.run(&spec).await,
            Err(CommandError::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn stream_yields_all_output() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = CommandRunner::new(Duration::from_secs(5));

        let stream = runner
            .stream(&sh("printf 'one\\n'; printf 'two\\n'", tmp.path()))
            .unwrap()
            .prime()
            .await
            .unwrap();
        let chunks: Vec<Bytes> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks.concat(), b"one\ntwo\n");
    }

    #[tokio::test]
    async fn prime_turns_silent_failure_into_error() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = CommandRunner::new(Duration::from_secs(5));

        let err = runner
            .stream(&sh("echo 'bad revision' >&2; exit 128", tmp.path()))
            .unwrap()
            .prime()
            .await
            .err().expect("expected prime() to fail");
        assert_eq!(err.stderr().map(str::trim), Some("bad revision"));
    }

    #[tokio::test]
    async fn prime_accepts_silent_success() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = CommandRunner::new(Duration::from_secs(5));

        let stream = runner.stream(&sh("true", tmp.path())).unwrap().prime().await.unwrap();
        let chunks: Vec<_> = stream.collect().await;
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn stream_is_killed_on_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = CommandRunner::new(Duration::from_millis(200));

        let stream = runner
            .stream(&sh("echo start; sleep 10; echo never", tmp.path()))
            .unwrap()
            .prime()
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let items: Vec<io::Result<Bytes>> = stream.collect().await;
        assert!(started.elapsed() < Duration::from_secs(5));
        let last = items.last().unwrap();
        assert_eq!(last.as_ref().unwrap_err().kind(), io::ErrorKind::TimedOut);
        let text: Vec<u8> = items
            .iter()
            .filter_map(|i| i.as_ref().ok())
            .flat_map(|b| b.to_vec())
            .collect();
        assert_eq!(text, b"start\n");
    }

    /// True once `pid` has exited; a zombie awaiting reaping counts as exited.
    fn exited(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(") ")
                .is_some_and(|(_, rest)| rest.starts_with('Z')),
            Err(_) => true,
        }
    }

    async fn wait_for_exit(pid: &str) -> bool {
        for _ in 0..50 {
            if exited(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        false
    }

    #[tokio::test]
    async fn dropping_a_stream_kills_the_child() {
        if !Path::new("/proc/self/stat").exists() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let runner = CommandRunner::new(Duration::from_secs(60));
        let script = "echo $$ > pid; echo start; sleep 30; echo never";

        // client went away after the first chunk
        let mut primed = runner
            .stream(&sh(script, tmp.path()))
            .unwrap()
            .prime()
            .await
            .unwrap();
        assert_eq!(primed.next().await.unwrap().unwrap(), Bytes::from_static(b"start\n"));
        let pid = std::fs::read_to_string(tmp.path().join("pid")).unwrap();
        let pid = pid.trim().to_string();
        assert!(!exited(&pid));
        drop(primed);
        assert!(wait_for_exit(&pid).await, "pid {pid} survived the dropped body");

        // unprimed stream dropped mid-output
        std::fs::remove_file(tmp.path().join("pid")).unwrap();
        let mut stream = runner.stream(&sh(script, tmp.path())).unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"start\n"));
        let pid = std::fs::read_to_string(tmp.path().join("pid")).unwrap();
        let pid = pid.trim().to_string();
        drop(stream);
        assert!(wait_for_exit(&pid).await, "pid {pid} survived the dropped stream");
    }

    #[tokio::test]
    async fn pipeline_connects_stages() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = CommandRunner::new(Duration::from_secs(5));
        let stages = [
            sh("printf 'hello\\nworld\\n'", tmp.path()),
            CommandSpec::new("tr", tmp.path()).args(["a-z", "A-Z"]),
        ];

        let output = runner
            .run_pipeline(&stages, Sink::Capture, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.stdout_lossy(), "HELLO\nWORLD\n");
    }

    #[tokio::test]
    async fn pipeline_writes_to_file_sink() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("out.txt");
        let runner = CommandRunner::new(Duration::from_secs(5));
        let stages = [sh("echo payload", tmp.path())];

        let file = std::fs::File::create(&target).unwrap();
        let output = runner
            .run_pipeline(&stages, Sink::File(file), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(output.stdout.is_empty());
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "payload\n");
    }

    #[tokio::test]
    async fn pipeline_fails_if_any_stage_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = CommandRunner::new(Duration::from_secs(5));
        let stages = [sh("echo data; exit 2", tmp.path()), CommandSpec::new("cat", tmp.path())];

        let err = runner
            .run_pipeline(&stages, Sink::Capture, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommandError::Failed {
                status_code: Some(2),
                ..
            }
        ));
    }
}
