//! Running helper programs with redirected standard streams.

use crate::error::ChildFailure;
use crate::{GitError, Result};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use tracing::{debug, warn};

/// What to connect a child's standard stream to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdioMode {
    /// Share the parent's stream.
    #[default]
    Inherit,
    /// Connect to the null device.
    Null,
    /// Create a pipe owned by the [`ChildProcess`].
    Piped,
}

impl StdioMode {
    fn to_stdio(self) -> Stdio {
        match self {
            Self::Inherit => Stdio::inherit(),
            Self::Null => Stdio::null(),
            Self::Piped => Stdio::piped(),
        }
    }
}

/// An argument vector plus environment, built up front and spawned as a
/// whole.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    program: OsString,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
    dir: Option<PathBuf>,
    stdin: StdioMode,
    stdout: StdioMode,
    stderr: StdioMode,
}

impl CommandBuilder {
    /// Starts a command line for `program`.
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            args: Vec::new(),
            env: Vec::new(),
            dir: None,
            stdin: StdioMode::Inherit,
            stdout: StdioMode::Inherit,
            stderr: StdioMode::Inherit,
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    /// Appends `arg` only when `cond` holds.
    pub fn arg_if(self, cond: bool, arg: impl AsRef<OsStr>) -> Self {
        if cond {
            self.arg(arg)
        } else {
            self
        }
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    /// Sets an environment variable for the child.
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .push((key.as_ref().to_owned(), value.as_ref().to_owned()));
        self
    }

    /// Runs the child in `dir`.
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.dir = Some(dir.as_ref().to_owned());
        self
    }

    /// Sets standard input.
    pub fn stdin(mut self, mode: StdioMode) -> Self {
        self.stdin = mode;
        self
    }

    /// Sets standard output.
    pub fn stdout(mut self, mode: StdioMode) -> Self {
        self.stdout = mode;
        self
    }

    /// Sets standard error.
    pub fn stderr(mut self, mode: StdioMode) -> Self {
        self.stderr = mode;
        self
    }

    /// The program name.
    pub fn program(&self) -> &OsStr {
        &self.program
    }

    /// The arguments, in order, without the program name.
    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Starts the child.
    ///
    /// A program that cannot be found is reported as
    /// [`ChildFailure::NotFound`].
    pub fn spawn(&self) -> Result<ChildProcess> {
        let name = self.program.to_string_lossy().into_owned();
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(self.stdin.to_stdio())
            .stdout(self.stdout.to_stdio())
            .stderr(self.stderr.to_stdio());
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }

        debug!(command = %self, "spawning");
        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => GitError::Child {
                program: name.clone(),
                failure: ChildFailure::NotFound,
            },
            _ => GitError::Io(e),
        })?;

        Ok(ChildProcess {
            program: name,
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            child,
            reaped: false,
        })
    }
}

impl fmt::Display for CommandBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// A running child and the pipe ends the parent owns.
///
/// Dropping it closes every pipe and waits for the process.
pub struct ChildProcess {
    program: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    reaped: bool,
}

impl ChildProcess {
    /// Program name as spawned.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The write end of the child's standard input, if piped and open.
    pub fn stdin(&mut self) -> Option<&mut ChildStdin> {
        self.stdin.as_mut()
    }

    /// The read end of the child's standard output, if piped.
    pub fn stdout(&mut self) -> Option<&mut ChildStdout> {
        self.stdout.as_mut()
    }

    /// The read end of the child's standard error, if piped.
    pub fn stderr(&mut self) -> Option<&mut ChildStderr> {
        self.stderr.as_mut()
    }

    /// Takes ownership of the child's standard output.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Closes standard input, signalling end of input to the child.
    pub fn close_stdin(&mut self) {
        self.stdin.take();
    }

    /// Writes all of `data` to the child's standard input.
    pub fn write_stdin(&mut self, data: &[u8]) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            GitError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "child standard input is closed",
            ))
        })?;
        stdin.write_all(data)?;
        Ok(())
    }

    /// Closes the remaining pipes, waits for exit and classifies the result.
    pub fn finish(mut self) -> Result<()> {
        let status = self.wait()?;
        match classify(status) {
            None => Ok(()),
            Some(failure) => Err(GitError::Child {
                program: self.program.clone(),
                failure,
            }),
        }
    }

    fn wait(&mut self) -> Result<ExitStatus> {
        self.stdin.take();
        self.stdout.take();
        self.stderr.take();
        let status = self.child.wait()?;
        self.reaped = true;
        debug!(program = %self.program, %status, "child exited");
        Ok(status)
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if !self.reaped {
            if let Err(e) = self.wait() {
                warn!(program = %self.program, error = %e, "failed to reap child");
            }
        }
    }
}

/// Turns an exit status into a failure, or `None` on success.
pub fn classify(status: ExitStatus) -> Option<ChildFailure> {
    if status.success() {
        return None;
    }
    if let Some(code) = status.code() {
        return Some(ChildFailure::Failed { code });
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(ChildFailure::Signaled { signal });
        }
    }
    Some(ChildFailure::Failed { code: -1 })
}
