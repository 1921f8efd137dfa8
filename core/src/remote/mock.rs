//! In-memory remote shell for testing.
//!
//! Records every command and written file per host, answers commands from
//! scripted rules, and counts concurrently open sessions so tests can check
//! the installer's concurrency bound.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::runner::CommandOutput;
use super::{RemoteError, RemoteShell, Session};


#[derive(Debug, Clone)]
struct Rule {
    host: Option<String>,
    needle: String,
    output: CommandOutput,
}

#[derive(Debug, Default)]
struct Inner {
    commands: Vec<(String, String)>,
    files: HashMap<(String, String), (Vec<u8>, u32)>,
    rules: Vec<Rule>,
    unreachable: HashSet<String>,
    failing_writes: HashSet<String>,
}


/// Scriptable `RemoteShell`. Unmatched commands succeed with empty output.
#[derive(Debug, Default)]
pub struct MockShell {
    inner: Mutex<Inner>,
    delay: Duration,
    open: AtomicUsize,
    max_open: AtomicUsize,
}

impl MockShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every `run`, keeping sessions open long enough
    /// for overlap to be observable.
    pub fn with_delay(delay: Duration) -> Self {
        MockShell {
            delay,
            ..Self::default()
        }
    }

    /// Answer commands containing `needle` (on `host`, or any host if
    /// `None`) with `output`. The first matching rule wins.
    pub fn respond(&self, host: Option<&str>, needle: &str, output: CommandOutput) {
        self.lock().rules.push(Rule {
            host: host.map(str::to_string),
            needle: needle.to_string(),
            output,
        });
    }

    /// Make `connect` to `host` fail.
    pub fn set_unreachable(&self, host: &str) {
        self.lock().unreachable.insert(host.to_string());
    }

    /// Make every `write_file` on `host` fail.
    pub fn fail_writes(&self, host: &str) {
        self.lock().failing_writes.insert(host.to_string());
    }

    /// Commands run on `host`, in order.
    pub fn commands_for(&self, host: &str) -> Vec<String> {
        self.lock()
            .commands
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn command_count(&self) -> usize {
        self.lock().commands.len()
    }

    /// Content and mode of a file written to `host`.
    pub fn file(&self, host: &str, path: &str) -> Option<(Vec<u8>, u32)> {
        self.lock()
            .files
            .get(&(host.to_string(), path.to_string()))
            .cloned()
    }

    /// Paths written on `host`, sorted.
    pub fn files_on(&self, host: &str) -> Vec<String> {
        let mut paths: Vec<String> = self
            .lock()
            .files
            .keys()
            .filter(|(h, _)| h == host)
            .map(|(_, p)| p.clone())
            .collect();
        paths.sort();
        paths
    }

    /// Highest number of sessions that were open at the same time.
    pub fn max_concurrent_sessions(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl RemoteShell for MockShell {
    fn connect(&self, host: &str) -> Result<Session, RemoteError> {
        if self.lock().unreachable.contains(host) {
            return Err(RemoteError::Connection {
                host: host.to_string(),
                message: "connection refused".into(),
            });
        }
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now, Ordering::SeqCst);
        Ok(Session::new(host))
    }

    fn run(&self, session: &Session, command: &str) -> Result<CommandOutput, RemoteError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let host = session.host();
        let output = {
            let mut inner = self.lock();
            inner.commands.push((host.to_string(), command.to_string()));
            inner
                .rules
                .iter()
                .find(|r| r.host.as_deref().map_or(true, |h| h == host) && command.contains(&r.needle))
                .map(|r| r.output.clone())
                .unwrap_or_else(|| CommandOutput::ok(""))
        };
        if output.success() {
            Ok(output)
        } else {
            Err(RemoteError::Exec {
                host: host.to_string(),
                command: command.to_string(),
                status: output.status,
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
    }

    fn write_file(&self, session: &Session, path: &str, content: &[u8], mode: u32) -> Result<(), RemoteError> {
        let host = session.host();
        let mut inner = self.lock();
        if inner.failing_writes.contains(host) {
            return Err(RemoteError::Exec {
                host: host.to_string(),
                command: format!("write {}", path),
                status: Some(1),
                stdout: String::new(),
                stderr: "No space left on device".into(),
            });
        }
        inner
            .files
            .insert((host.to_string(), path.to_string()), (content.to_vec(), mode));
        Ok(())
    }

    fn close(&self, _session: Session) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}
