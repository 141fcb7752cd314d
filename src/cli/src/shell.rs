//! Shell-command jobs.
//!
//! Each configured job shells out on every invocation. Child stdout and
//! stderr are streamed into the invocation's output buffers and mirrored to
//! the parent's stdio; cancellation (explicit or timeout) kills the child.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tempo_core::config::JobConfig;
use tempo_core::error::Error;
use tempo_core::jobs::{Job, JobContext, JobResult};
use tempo_core::schedule::{self, SharedSchedule};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// A job that runs a command on each invocation.
pub struct ShellJob {
    name: String,
    description: Option<String>,
    command: Vec<String>,
    schedule: Option<SharedSchedule>,
    timeout: Option<Duration>,
    discard_output: bool,
}

impl ShellJob {
    /// Build a shell job from a config entry. Fails when the entry names no
    /// command or its schedule does not parse.
    pub fn from_config(config: &JobConfig) -> anyhow::Result<Self> {
        let command = config.resolved_command();
        anyhow::ensure!(
            !command.is_empty(),
            "job `{}`: exec and command unset",
            config.name
        );

        let parsed = match &config.schedule {
            Some(expression) => Some(schedule::parse(expression)?),
            None => None,
        };

        let description = config
            .description
            .clone()
            .or_else(|| Some(command.join(" ")));

        Ok(Self {
            name: config.name.clone(),
            description,
            command,
            schedule: parsed,
            timeout: config.timeout,
            discard_output: config.discard_output,
        })
    }

    /// The command this job runs.
    pub fn command(&self) -> &[String] {
        &self.command
    }
}

#[async_trait]
impl Job for ShellJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<String> {
        self.description.clone()
    }

    fn schedule(&self) -> Option<SharedSchedule> {
        self.schedule.clone()
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn should_write_output(&self) -> bool {
        !self.discard_output
    }

    async fn execute(&self, ctx: &JobContext) -> JobResult {
        let Some((program, args)) = self.command.split_first() else {
            return Err(Error::job("empty command"));
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::job(format!("spawn {program}: {e}")))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_pump = pump(stdout, ctx.clone(), false);
        let err_pump = pump(stderr, ctx.clone(), true);

        // Drain the pipes while waiting so the child never blocks on a
        // full pipe buffer.
        let wait_all = async {
            let (status, _, _) = tokio::join!(child.wait(), out_pump, err_pump);
            status
        };
        tokio::pin!(wait_all);

        let status = tokio::select! {
            status = &mut wait_all => {
                status.map_err(|e| Error::job(format!("wait {program}: {e}")))?
            }
            _ = ctx.cancelled() => {
                // kill_on_drop reaps the child as it goes out of scope.
                return Err(Error::JobCancelled);
            }
        };

        if status.success() {
            Ok(())
        } else {
            Err(Error::job(format!("{program}: {status}")))
        }
    }
}

/// Drain a child stream into the invocation buffers, mirroring to the
/// parent's stdio.
async fn pump<R>(stream: Option<R>, ctx: JobContext, is_stderr: bool)
where
    R: AsyncRead + Unpin,
{
    use std::io::Write;

    let Some(mut stream) = stream else { return };
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let bytes = &chunk[..n];
                if is_stderr {
                    ctx.write_error_output(bytes);
                    let _ = std::io::stderr().write_all(bytes);
                } else {
                    ctx.write_output(bytes);
                    let _ = std::io::stdout().write_all(bytes);
                }
            }
        }
    }
}
