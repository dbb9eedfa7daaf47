use crate::error::{AutomationError, AutomationResult};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// A program invocation with extra environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
        }
    }

    /// Split a configured command line with shell quoting rules.
    pub fn parse(command_line: &str) -> AutomationResult<Self> {
        let mut parts = shlex::split(command_line)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                AutomationError::Config(format!("cannot parse command '{}'", command_line))
            })?;
        let program = parts.remove(0);
        Ok(Self {
            program,
            args: parts,
            env: Vec::new(),
        })
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    /// Command line for logs. Environment values are never included.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last `n` non-empty lines of stdout and stderr combined.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let lines: Vec<&str> = self
            .stdout
            .lines()
            .chain(self.stderr.lines())
            .filter(|l| !l.trim().is_empty())
            .collect();
        lines[lines.len().saturating_sub(n)..]
            .iter()
            .map(|l| l.to_string())
            .collect()
    }
}

/// Runs external commands and captures their output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec, cwd: &Path) -> AutomationResult<CommandOutput>;
}

/// [`CommandRunner`] backed by `tokio::process` with a per-command timeout.
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec, cwd: &Path) -> AutomationResult<CommandOutput> {
        debug!("Running `{}` in {}", spec.display(), cwd.display());
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(AutomationError::external(
                    &format!("failed to run `{}`", spec.display()),
                    e,
                ))
            }
            Err(_) => {
                warn!("`{}` timed out after {:?}", spec.display(), self.timeout);
                return Err(AutomationError::ExternalIo(format!(
                    "`{}` timed out after {:?}",
                    spec.display(),
                    self.timeout
                )));
            }
        };
        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_line() {
        let spec = CommandSpec::parse("npm run 'build:prod' --silent").unwrap();
        assert_eq!(spec.program, "npm");
        assert_eq!(spec.args, vec!["run", "build:prod", "--silent"]);
        assert!(CommandSpec::parse("").is_err());
        assert!(CommandSpec::parse("echo 'unterminated").is_err());
    }

    #[test]
    fn test_tail() {
        let output = CommandOutput {
            exit_code: Some(1),
            stdout: "a\nb\n\nc\n".to_string(),
            stderr: "err\n".to_string(),
        };
        assert_eq!(output.tail(2), vec!["c", "err"]);
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_process_runner_captures_output() {
        let runner = ProcessRunner::default();
        let output = runner
            .run(&CommandSpec::new("sh", ["-c", "echo out; echo err >&2; exit 3"]), Path::new("."))
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_process_runner_timeout() {
        let runner = ProcessRunner::new(Duration::from_millis(100));
        let err = runner
            .run(&CommandSpec::new("sleep", ["5"]), Path::new("."))
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::ExternalIo(_)));
    }
}
