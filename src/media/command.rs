use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::debug;

/// External tool invocation, built up argument by argument
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub description: String,
}

impl ExternalCommand {
    /// Create a new command for `program`
    pub fn new<S1: Into<String>, S2: Into<String>>(program: S1, description: S2) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add a `--name value` pair
    pub fn flag<S1: Into<String>, S2: ToString>(self, name: S1, value: S2) -> Self {
        self.arg(name).arg(value.to_string())
    }

    /// Add a `--name <path>` pair
    pub fn path_flag<S: Into<String>, P: AsRef<Path>>(self, name: S, path: P) -> Self {
        self.arg(name).arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add a trailing path argument
    pub fn path<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Run in `dir` instead of the current directory
    pub fn current_dir<P: Into<PathBuf>>(mut self, dir: Option<P>) -> Self {
        self.working_dir = dir.map(Into::into);
        self
    }

    /// Run to completion, capturing stdout and stderr.
    ///
    /// Waiting happens on the tokio reactor, so a long-running tool does not
    /// hold a runtime worker thread.
    pub async fn execute(&self) -> std::io::Result<Output> {
        debug!("Executing {}: {} {:?}", self.description, self.program, self.args);

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        cmd.output().await
    }
}

/// Last few lines of a tool's stderr, for error messages
pub fn stderr_tail(output: &Output, max_lines: usize) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}
