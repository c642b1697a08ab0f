//! Supervised child processes
//!
//! Children are launched with piped output (forwarded to the log) and are
//! polled for liveness by the supervisor loop rather than watched through
//! exit callbacks.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use crate::config::ProcessConfig;
use crate::error::{Error, Result};

/// Values substituted into process arguments at launch
#[derive(Debug, Clone, Default)]
pub struct LaunchVars {
    pub couch_url: String,
    pub database: String,
    pub web_host: String,
    pub web_port: String,
}

impl LaunchVars {
    /// Expand `{couch_url}`, `{database}`, `{web_host}` and `{web_port}`
    pub fn expand(&self, arg: &str) -> String {
        arg.replace("{couch_url}", &self.couch_url)
            .replace("{database}", &self.database)
            .replace("{web_host}", &self.web_host)
            .replace("{web_port}", &self.web_port)
    }
}

/// A child process whose death recycles the node
pub struct SupervisedChild {
    name: String,
    child: Child,
}

impl SupervisedChild {
    /// Launch a child process described by `config`
    pub fn spawn(name: &str, config: &ProcessConfig, vars: &LaunchVars) -> Result<Self> {
        let args: Vec<String> = config.args.iter().map(|a| vars.expand(a)).collect();

        let mut command = Command::new(&config.command);
        command
            .args(&args)
            .envs(&config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        tracing::info!("Launching {}: {} {}", name, config.command.display(), args.join(" "));

        let mut child = command.spawn().map_err(|e| Error::ProcessLaunch {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        if let Some(stdout) = child.stdout.take() {
            forward_output(name.to_string(), stdout, false);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(name.to_string(), stderr, true);
        }

        Ok(Self {
            name: name.to_string(),
            child,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS process id, if the process has not been reaped
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Non-blocking liveness check; `Some` once the process has exited
    pub fn exit_status(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Kill the process and wait up to `grace` for it to be reaped
    pub async fn terminate(&mut self, grace: Duration) -> Result<()> {
        if self.exit_status()?.is_some() {
            return Ok(());
        }

        self.child.start_kill()?;
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => {
                tracing::info!("{} terminated ({})", self.name, status?);
                Ok(())
            }
            Err(_) => Err(Error::ProcessTerminate {
                name: self.name.clone(),
                reason: format!("did not exit within {:?}", grace),
            }),
        }
    }
}

fn forward_output<R>(name: String, stream: R, is_stderr: bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if is_stderr => tracing::warn!(process = %name, "{}", line),
                Ok(Some(line)) => tracing::info!(process = %name, "{}", line),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(process = %name, "Output stream closed: {}", e);
                    break;
                }
            }
        }
    });
}
