//! Command execution.
//!
//! Runs a command line through the host shell and captures its combined
//! output. Execution never fails the caller: spawn errors, non-zero exits and
//! timeouts all come back as a human-readable `Error: ...` text so the chat
//! operator always sees a result.
//!
//! On Unix each command runs in its own process group. A command that times
//! out or is abandoned takes its whole group down with it.

pub mod encoding;

use std::borrow::Cow;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::logging::targets;

pub use encoding::normalize_to_text;

/// Which command interpreter to hand the command line to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellKind {
    /// `sh -c <line>`
    Unix,
    /// `cmd /C <line>`
    Windows,
}

impl ShellKind {
    /// Pick the interpreter for the host operating system.
    pub fn detect() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }

    pub fn program(&self) -> &'static str {
        match self {
            Self::Unix => "sh",
            Self::Windows => "cmd",
        }
    }

    pub fn flag(&self) -> &'static str {
        match self {
            Self::Unix => "-c",
            Self::Windows => "/C",
        }
    }

    /// Render `word` as one argument on this shell's command line.
    ///
    /// `None` when the shell cannot express it: a NUL byte for `sh`, a
    /// double quote for `cmd`.
    pub fn quote(&self, word: &str) -> Option<String> {
        match self {
            Self::Unix => shlex::try_quote(word).ok().map(Cow::into_owned),
            Self::Windows if word.contains('"') => None,
            Self::Windows => Some(format!("\"{word}\"")),
        }
    }
}

/// Capability to run a command line and collect its output.
///
/// Implementations must not fail: any problem is reported inside the
/// returned bytes.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command_line: &str) -> Vec<u8>;
}

/// Runs command lines through the host shell.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: ShellKind,
    program: String,
    timeout: Option<Duration>,
}

impl ShellRunner {
    pub fn new(shell: ShellKind, timeout: Option<Duration>) -> Self {
        Self {
            shell,
            program: shell.program().to_string(),
            timeout,
        }
    }

    /// Runner for the host shell.
    pub fn detect(timeout: Option<Duration>) -> Self {
        Self::new(ShellKind::detect(), timeout)
    }

    #[cfg(test)]
    fn with_program(shell: ShellKind, program: &str) -> Self {
        Self {
            shell,
            program: program.to_string(),
            timeout: None,
        }
    }

    pub fn shell(&self) -> ShellKind {
        self.shell
    }

    fn build_command(&self, command_line: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(self.shell.flag());
        push_command_line(&mut cmd, command_line);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

/// Kills the child's process group unless disarmed once the child has exited.
struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.filter(|&pid| pid > 1),
        }
    }

    fn disarm(mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_process_group(pgid);
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => debug!(target: targets::EXEC, pgid, "killed process group"),
        // Already gone.
        Err(Errno::ESRCH) => {}
        Err(e) => warn!(target: targets::EXEC, pgid, error = %e, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command_line: &str) -> Vec<u8> {
        let mut cmd = self.build_command(command_line);
        debug!(target: targets::EXEC, command = %command_line, "running command");

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(target: targets::EXEC, command = %command_line, error = %e, "failed to start command");
                return error_text(&e.to_string(), &[]);
            }
        };
        let group = ProcessGroupGuard::new(child.id());
        let waiting = child.wait_with_output();

        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, waiting).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        target: targets::EXEC,
                        command = %command_line,
                        timeout = ?limit,
                        "command timed out"
                    );
                    return error_text(&format!("command timed out after {limit:?}"), &[]);
                }
            },
            None => waiting.await,
        };
        group.disarm();

        match result {
            Err(e) => {
                warn!(target: targets::EXEC, command = %command_line, error = %e, "failed to collect command output");
                error_text(&e.to_string(), &[])
            }
            Ok(output) => {
                let combined = combine_streams(output.stdout, output.stderr);
                if output.status.success() {
                    combined
                } else {
                    warn!(
                        target: targets::EXEC,
                        command = %command_line,
                        status = %output.status,
                        "command exited with failure"
                    );
                    error_text(&describe_status(output.status), &combined)
                }
            }
        }
    }
}

/// Run a command line and normalize the output to text.
pub async fn run_to_text(runner: &dyn CommandRunner, command_line: &str) -> String {
    let bytes = runner.run(command_line).await;
    normalize_to_text(&bytes)
}

#[cfg(windows)]
fn push_command_line(cmd: &mut Command, command_line: &str) {
    // cmd.exe does its own parsing; quoting by the std argument builder would
    // break embedded quotes.
    cmd.raw_arg(command_line);
}

#[cfg(not(windows))]
fn push_command_line(cmd: &mut Command, command_line: &str) {
    cmd.arg(command_line);
}

fn combine_streams(mut stdout: Vec<u8>, stderr: Vec<u8>) -> Vec<u8> {
    stdout.extend_from_slice(&stderr);
    stdout
}

fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit status {code}"),
        None => status.to_string(),
    }
}

fn error_text(message: &str, output: &[u8]) -> Vec<u8> {
    let mut text = format!("Error: {message}").into_bytes();
    if !output.is_empty() {
        text.push(b'\n');
        text.extend_from_slice(output);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_kind_programs() {
        assert_eq!(ShellKind::Unix.program(), "sh");
        assert_eq!(ShellKind::Unix.flag(), "-c");
        assert_eq!(ShellKind::Windows.program(), "cmd");
        assert_eq!(ShellKind::Windows.flag(), "/C");
    }

    #[test]
    fn test_detect_matches_host() {
        let expected = if cfg!(windows) {
            ShellKind::Windows
        } else {
            ShellKind::Unix
        };
        assert_eq!(ShellKind::detect(), expected);
        assert_eq!(ShellRunner::detect(None).shell(), expected);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_line_passed_as_single_argument() {
        let runner = ShellRunner::new(ShellKind::Unix, None);
        let cmd = runner.build_command("ls -la | grep x");
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "sh");
        let args: Vec<_> = std_cmd.get_args().collect();
        assert_eq!(args, vec!["-c", "ls -la | grep x"]);
    }

    #[test]
    fn test_unix_quote_leaves_plain_paths_alone() {
        assert_eq!(
            ShellKind::Unix.quote("commands/status.sh").as_deref(),
            Some("commands/status.sh")
        );
    }

    #[test]
    fn test_unix_quote_keeps_path_as_one_word() {
        for path in [
            "my scripts/status.sh",
            "/srv/it's here/run.sh",
            "dir;rm -rf x/$(id).sh",
        ] {
            let quoted = ShellKind::Unix.quote(path).unwrap();
            assert_eq!(shlex::split(&quoted), Some(vec![path.to_string()]), "{quoted}");
        }
        assert_eq!(ShellKind::Unix.quote("a\0b"), None);
    }

    #[test]
    fn test_windows_quote() {
        assert_eq!(
            ShellKind::Windows.quote(r"C:\my scripts\status.bat").as_deref(),
            Some(r#""C:\my scripts\status.bat""#)
        );
        assert_eq!(ShellKind::Windows.quote(r#"a"b"#), None);
    }

    #[test]
    fn test_error_text_without_output() {
        assert_eq!(error_text("boom", &[]), b"Error: boom".to_vec());
    }

    #[test]
    fn test_error_text_appends_output() {
        assert_eq!(
            error_text("exit status 2", b"oops\n"),
            b"Error: exit status 2\noops\n".to_vec()
        );
    }

    #[test]
    fn test_combine_streams_stdout_first() {
        assert_eq!(
            combine_streams(b"out\n".to_vec(), b"err\n".to_vec()),
            b"out\nerr\n".to_vec()
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_echo_output() {
        let runner = ShellRunner::new(ShellKind::Unix, None);
        assert_eq!(runner.run("echo hi").await, b"hi\n".to_vec());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_features_are_available() {
        let runner = ShellRunner::new(ShellKind::Unix, None);
        let output = run_to_text(&runner, "printf 'a\\nb\\n' | wc -l | tr -d ' '").await;
        assert_eq!(output, "2\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stderr_is_captured() {
        let runner = ShellRunner::new(ShellKind::Unix, None);
        let output = run_to_text(&runner, "echo out; echo err 1>&2").await;
        assert!(output.contains("out\n"));
        assert!(output.contains("err\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_synthesizes_error() {
        let runner = ShellRunner::new(ShellKind::Unix, None);
        let output = run_to_text(&runner, "echo partial; exit 3").await;
        assert_eq!(output, "Error: exit status 3\npartial\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_script_reports_error() {
        let runner = ShellRunner::new(ShellKind::Unix, None);
        let output = run_to_text(&runner, "/nonexistent/script.sh").await;
        assert!(output.starts_with("Error: exit status 127"), "{output}");
    }

    #[tokio::test]
    async fn test_spawn_failure_synthesizes_error() {
        let runner = ShellRunner::with_program(ShellKind::Unix, "/nonexistent/shell-binary");
        let output = run_to_text(&runner, "echo hi").await;
        assert!(output.starts_with("Error: "), "{output}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_synthesizes_error() {
        let runner = ShellRunner::new(ShellKind::Unix, Some(Duration::from_millis(200)));
        let output = run_to_text(&runner, "sleep 5").await;
        assert_eq!(output, "Error: command timed out after 200ms");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_background_children() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("survivor");
        let quoted = ShellKind::Unix.quote(&marker.to_string_lossy()).unwrap();
        let runner = ShellRunner::new(ShellKind::Unix, Some(Duration::from_millis(200)));

        let output = run_to_text(&runner, &format!("(sleep 1; touch {quoted}) & wait")).await;
        assert!(output.starts_with("Error: command timed out"), "{output}");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "background child outlived the timeout");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_legacy_encoded_output_is_transcoded() {
        let runner = ShellRunner::new(ShellKind::Unix, None);
        // Windows-1251 bytes for "Да"
        let output = run_to_text(&runner, r"printf '\304\340'").await;
        assert_eq!(output, "Да");
    }
}
