//! Local transport that runs the interpreter as a child process.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{ChildStdin, Command},
};

use crate::{
    Authority, Credentials, HostChannel, HostEndpoint, HostInput, HostTransport, OutputKind,
    StartupInfo, TransportError, config::InterpreterSettings,
};

/// Line-oriented transport over the interpreter's standard streams.
///
/// Each submitted expression or response is written as one line to stdin;
/// stdout and stderr lines are forwarded as output. The host is ready as soon
/// as the process has started. On unix an interrupt sends SIGINT to the
/// interpreter's process group.
#[derive(Debug, Clone)]
pub struct ProcessTransport {
    executable: String,
    args: Vec<String>,
}

impl ProcessTransport {
    #[must_use]
    pub fn new<I>(executable: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            executable: executable.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn from_settings(settings: &InterpreterSettings) -> Self {
        Self::new(settings.executable.clone(), settings.args.clone())
    }
}

#[async_trait]
impl HostTransport for ProcessTransport {
    async fn connect(
        &self,
        _authority: &Authority,
        _credentials: Option<&Credentials>,
        startup: &StartupInfo,
    ) -> Result<HostChannel, TransportError> {
        let program = resolve_executable_path(&self.executable)
            .await
            .ok_or_else(|| TransportError::Unavailable(format!("interpreter not found: {}", self.executable)))?;

        let mut cmd = Command::new(&program);
        cmd.args(&self.args)
            .args(&startup.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !startup.working_dir.as_os_str().is_empty() {
            cmd.current_dir(&startup.working_dir);
        }

        let mut child = cmd
            .group_spawn()
            .map_err(|e| TransportError::Unavailable(format!("failed to start {}: {e}", program.display())))?;

        let inner = child.inner();
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (inner.stdin.take(), inner.stdout.take(), inner.stderr.take())
        else {
            return Err(TransportError::Unavailable("interpreter stdio not captured".to_string()));
        };

        tracing::info!(program = %program.display(), host = %startup.name, "Started local interpreter");

        let (channel, endpoint) = HostChannel::pair();
        tokio::spawn(pump(child, stdin, stdout, stderr, endpoint));
        Ok(channel)
    }
}

async fn pump(
    mut child: AsyncGroupChild,
    mut stdin: ChildStdin,
    stdout: tokio::process::ChildStdout,
    stderr: tokio::process::ChildStderr,
    mut endpoint: HostEndpoint,
) {
    let outlet = endpoint.outlet();
    let mut stdout = BufReader::new(stdout).lines();
    let mut stderr = BufReader::new(stderr).lines();
    let mut stderr_open = true;

    outlet.mark_ready();

    loop {
        tokio::select! {
            input = endpoint.recv() => match input {
                Some(HostInput::Evaluate(text) | HostInput::Respond(text)) => {
                    if let Err(e) = write_line(&mut stdin, &text).await {
                        tracing::warn!("Failed to write to interpreter: {e}");
                        break;
                    }
                }
                Some(HostInput::Interrupt) => interrupt(&child),
                Some(HostInput::Shutdown) | None => break,
            },
            line = stdout.next_line() => match line {
                Ok(Some(line)) => {
                    outlet.output(OutputKind::Stdout, line + "\n");
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Error reading interpreter stdout: {e}");
                    break;
                }
            },
            line = stderr.next_line(), if stderr_open => match line {
                Ok(Some(line)) => {
                    outlet.output(OutputKind::Stderr, line + "\n");
                }
                Ok(None) | Err(_) => stderr_open = false,
            },
        }
    }

    if let Err(e) = child.start_kill() {
        tracing::debug!("Interpreter already stopped: {e}");
    }
    match child.wait().await {
        Ok(status) => tracing::info!(%status, "Local interpreter exited"),
        Err(e) => tracing::warn!("Failed to reap interpreter: {e}"),
    }
    outlet.exit();
}

/// Send SIGINT to the interpreter's process group.
#[cfg(unix)]
fn interrupt(child: &AsyncGroupChild) {
    use command_group::{Signal, UnixChildExt};

    if let Err(e) = child.signal(Signal::SIGINT) {
        tracing::warn!("Failed to interrupt interpreter: {e}");
    }
}

#[cfg(not(unix))]
fn interrupt(_child: &AsyncGroupChild) {
    tracing::debug!("Interrupting a local interpreter is not supported on this platform");
}

async fn write_line(stdin: &mut ChildStdin, text: &str) -> std::io::Result<()> {
    stdin.write_all(text.as_bytes()).await?;
    if !text.ends_with('\n') {
        stdin.write_all(b"\n").await?;
    }
    stdin.flush().await
}

/// Resolve an executable by name or path.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }

    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use crate::HostOutput;

    use super::*;

    #[tokio::test]
    async fn test_missing_interpreter_is_unavailable() {
        let transport = ProcessTransport::new("definitely-not-an-interpreter-4821", Vec::<String>::new());
        let err = transport
            .connect(&Authority::local(), None, &StartupInfo::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_cat_echoes_input() {
        let transport = ProcessTransport::new("cat", Vec::<String>::new());
        let mut channel = transport
            .connect(&Authority::local(), None, &StartupInfo::default())
            .await
            .unwrap();
        channel.wait_ready().await.unwrap();

        let (sender, mut output) = channel.into_parts();
        sender.send(HostInput::Respond("hello".into())).unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(5), output.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            msg,
            HostOutput::Output {
                kind: OutputKind::Stdout,
                text: "hello\n".into()
            }
        );

        sender.send(HostInput::Shutdown).unwrap();
        let exited = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(msg) = output.recv().await {
                if msg == HostOutput::Exited {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();
        assert!(exited);
    }

    #[tokio::test]
    async fn test_interrupt_signals_process_group() {
        let transport = ProcessTransport::new("sleep", ["30"]);
        let mut channel = transport
            .connect(&Authority::local(), None, &StartupInfo::default())
            .await
            .unwrap();
        channel.wait_ready().await.unwrap();

        let (sender, mut output) = channel.into_parts();
        sender.send(HostInput::Interrupt).unwrap();

        // sleep dies on SIGINT, closing stdout well before its 30 seconds.
        let msg = tokio::time::timeout(Duration::from_secs(5), output.recv())
            .await
            .expect("interpreter ignored the interrupt");
        assert_eq!(msg, Some(HostOutput::Exited));
    }
}
