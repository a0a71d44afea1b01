use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_stream::{wrappers::LinesStream, StreamExt};
use tracing::{debug, warn};

#[cfg(test)]
pub mod testing;

/// One external program call: program, arguments, working directory and
/// extra environment.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
    /// Stay in our process group so the program can use the terminal.
    pub foreground: bool,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
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

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn envs<'a, I>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = &'a (String, String)>,
    {
        self.envs.extend(envs.into_iter().cloned());
        self
    }

    pub fn foreground(mut self) -> Self {
        self.foreground = true;
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);

        command.args(&self.args);

        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        for (key, value) in &self.envs {
            command.env(key, value);
        }

        // own group, so cancelling can kill make together with its jobs
        if !self.foreground {
            command.process_group(0);
        }

        command.kill_on_drop(true);

        command
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;

        for arg in &self.args {
            write!(f, " {arg}")?;
        }

        Ok(())
    }
}

/// Exit status of a finished invocation. `code` is `None` when the process
/// was terminated by a signal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Exit {
    pub code: Option<i32>,
}

impl Exit {
    pub const SUCCESS: Exit = Exit { code: Some(0) };

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for Exit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("a signal"),
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs to completion, forwarding output to the log.
    async fn run(&self, invocation: &Invocation) -> io::Result<Exit>;

    /// Runs to completion and returns captured stdout.
    async fn output(&self, invocation: &Invocation) -> io::Result<(Exit, String)>;

    /// Stops whatever is left of invocations that were dropped before they
    /// finished and waits for it to exit.
    async fn shutdown(&self) {}
}

const SHUTDOWN_POLL: Duration = Duration::from_millis(50);
const SHUTDOWN_LIMIT: Duration = Duration::from_secs(10);

/// `(state, process group)` from the contents of `/proc/<pid>/stat`.
fn stat_fields(stat: &str) -> Option<(&str, i32)> {
    // the command name may itself contain spaces and parentheses
    let (_, rest) = stat.rsplit_once(')')?;
    let mut fields = rest.split_whitespace();

    let state = fields.next()?;
    let _parent = fields.next()?;
    let group = fields.next()?.parse().ok()?;

    Some((state, group))
}

fn is_live(state: &str) -> bool {
    !matches!(state, "Z" | "X")
}

/// Whether any process of the group is still running. Zombies only wait
/// to be reaped and hold nothing open.
fn group_running(group: i32) -> bool {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return false;
    };

    entries
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.bytes().all(|b| b.is_ascii_digit()))
        })
        .filter_map(|entry| std::fs::read_to_string(entry.path().join("stat")).ok())
        .any(|stat| stat_fields(&stat).is_some_and(|(state, g)| g == group && is_live(state)))
}

fn kill_group(group: i32) {
    match killpg(Pid::from_raw(group), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => warn!("cannot kill process group {}: {}", group, err),
    }
}

/// Kills the child's whole process group when dropped before `finish`.
struct GroupGuard<'a> {
    group: Option<i32>,
    abandoned: &'a Mutex<Vec<i32>>,
}

impl<'a> GroupGuard<'a> {
    fn new(invocation: &Invocation, child: &Child, abandoned: &'a Mutex<Vec<i32>>) -> Self {
        let group = if invocation.foreground {
            None
        } else {
            child.id().and_then(|pid| i32::try_from(pid).ok())
        };

        Self { group, abandoned }
    }

    fn finish(mut self) {
        self.group = None;
    }
}

impl Drop for GroupGuard<'_> {
    fn drop(&mut self) {
        if let Some(group) = self.group.take() {
            kill_group(group);
            self.abandoned
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(group);
        }
    }
}

/// Runs invocations as real processes, each in its own process group.
#[derive(Debug, Default)]
pub struct SystemRunner {
    abandoned: Mutex<Vec<i32>>,
}

impl SystemRunner {
    fn abandoned(&self) -> MutexGuard<'_, Vec<i32>> {
        self.abandoned.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> io::Result<Exit> {
        debug!("running: {}", invocation);

        let mut child = invocation
            .command()
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let guard = GroupGuard::new(invocation, &child, &self.abandoned);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("failed to capture stdout"))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("failed to capture stderr"))?;

        let stdout = LinesStream::new(BufReader::new(stdout).lines());
        let stderr = LinesStream::new(BufReader::new(stderr).lines());

        let mut stdio_merged = StreamExt::merge(stdout, stderr);

        // tool output is only shown at DEBUG, which `--verbose` turns on
        while let Some(line) = stdio_merged.next().await {
            debug!(target: "tool", "{}", line?);
        }

        let status = child.wait().await?;

        guard.finish();

        Ok(Exit {
            code: status.code(),
        })
    }

    async fn output(&self, invocation: &Invocation) -> io::Result<(Exit, String)> {
        debug!("capturing: {}", invocation);

        let child = invocation
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let guard = GroupGuard::new(invocation, &child, &self.abandoned);

        let output = child.wait_with_output().await?;

        guard.finish();

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

        Ok((
            Exit {
                code: output.status.code(),
            },
            stdout,
        ))
    }

    async fn shutdown(&self) {
        let groups: Vec<i32> = self.abandoned().drain(..).collect();

        for group in groups {
            kill_group(group);

            let mut waited = Duration::ZERO;

            while group_running(group) && waited < SHUTDOWN_LIMIT {
                tokio::time::sleep(SHUTDOWN_POLL).await;
                waited += SHUTDOWN_POLL;
            }

            if group_running(group) {
                warn!("process group {} is still running", group);
            }
        }
    }
}
