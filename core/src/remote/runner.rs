//! Local process runner abstraction.
//!
//! `CommandRunner` is the trait the SSH shell uses to spawn the local `ssh`
//! client. `ProcessRunner` is the production implementation. `MockRunner` is
//! the test double that records calls and returns preset outputs.

use std::collections::VecDeque;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Mutex;

use tracing::debug;


/// Captured result of one finished process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code; `None` if the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: &str) -> Self {
        CommandOutput {
            status: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: &str) -> Self {
        CommandOutput {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}


/// Trait for running a local program to completion.
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, feeding `stdin` if given. An `Err` means the
    /// process could not be started at all; a non-zero exit is an `Ok`.
    fn run(&self, program: &str, args: &[String], stdin: Option<&[u8]>) -> std::io::Result<CommandOutput>;
}


/// Production runner that spawns the program directly (no local shell).
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, program: &str, args: &[String], stdin: Option<&[u8]>) -> std::io::Result<CommandOutput> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // The child may exit before reading all of its input (ssh failing
        // auth, for one). The write error is held until the exit status is
        // known so the child is always reaped.
        let mut write_error = None;
        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                if let Err(e) = pipe.write_all(input) {
                    debug!(program, error = %e, "stdin closed early");
                    write_error = Some(e);
                }
                // Dropping the pipe closes it so the remote `cat` sees EOF.
            }
        }

        let output = child.wait_with_output()?;
        if let Some(e) = write_error {
            if output.status.success() {
                return Err(e);
            }
        }
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}


/// One invocation recorded by `MockRunner`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
}


/// Test-double runner that records invocations and replays queued outputs.
/// Once the queue is empty every call succeeds with empty output.
#[derive(Debug, Default)]
pub struct MockRunner {
    responses: Mutex<VecDeque<std::io::Result<CommandOutput>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: Vec<CommandOutput>) -> Self {
        MockRunner {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a spawn failure for the next call.
    pub fn push_spawn_error(&self, message: &str) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Err(std::io::Error::new(std::io::ErrorKind::NotFound, message.to_string())));
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, program: &str, args: &[String], stdin: Option<&[u8]>) -> std::io::Result<CommandOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                program: program.to_string(),
                args: args.to_vec(),
                stdin: stdin.map(|s| s.to_vec()),
            });
        }
        let next = self.responses.lock().ok().and_then(|mut q| q.pop_front());
        next.unwrap_or_else(|| Ok(CommandOutput::ok("")))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_runner_records_calls() {
        let runner = MockRunner::new();
        runner.run("ssh", &["host".into(), "true".into()], None).unwrap();
        runner.run("ssh", &["host".into()], Some(b"data")).unwrap();
        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].args, vec!["host".to_string(), "true".to_string()]);
        assert_eq!(calls[1].stdin.as_deref(), Some(&b"data"[..]));
    }

    #[test]
    fn mock_runner_replays_in_order() {
        let runner = MockRunner::with_responses(vec![CommandOutput::ok("first"), CommandOutput::failed(2, "nope")]);
        assert_eq!(runner.run("x", &[], None).unwrap().stdout, "first");
        let second = runner.run("x", &[], None).unwrap();
        assert!(!second.success());
        assert_eq!(second.status, Some(2));
        assert!(runner.run("x", &[], None).unwrap().success());
    }

    #[test]
    fn mock_runner_spawn_error() {
        let runner = MockRunner::new();
        runner.push_spawn_error("ssh: not found");
        assert!(runner.run("ssh", &[], None).is_err());
    }

    #[test]
    fn process_runner_captures_exit_and_stdin() {
        let runner = ProcessRunner;
        let out = runner
            .run("sh", &["-c".into(), "cat; echo err >&2; exit 3".into()], Some(b"hello"))
            .unwrap();
        assert_eq!(out.status, Some(3));
        assert_eq!(out.stdout, "hello");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[test]
    fn process_runner_reports_exit_when_stdin_is_not_drained() {
        let input = vec![b'x'; 4 * 1024 * 1024];
        let out = ProcessRunner
            .run("sh", &["-c".into(), "echo denied >&2; exit 255".into()], Some(&input))
            .unwrap();
        assert_eq!(out.status, Some(255));
        assert_eq!(out.stderr.trim(), "denied");
    }

    #[test]
    fn process_runner_fails_when_successful_child_drops_stdin() {
        let input = vec![b'x'; 4 * 1024 * 1024];
        let err = ProcessRunner
            .run("sh", &["-c".into(), "exec 0<&-; exit 0".into()], Some(&input))
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }
}
