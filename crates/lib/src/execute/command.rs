//! Running a rule's action.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::process::Command;
use tracing::{debug, info};

use super::types::ExecuteError;
use crate::rules::BuildRule;

/// Runs the action of one rule.
pub trait RuleExecutor: Send + Sync + 'static {
  fn execute(&self, rule: Arc<BuildRule>) -> impl Future<Output = Result<(), ExecuteError>> + Send;
}

/// Runs actions as child processes in the project root.
///
/// The output's parent directory is created first. The command sees `OUT`
/// (absolute output path) and `BUCKLE_TARGET` on top of the action's own env.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
  project_root: PathBuf,
}

impl CommandExecutor {
  pub fn new(project_root: impl Into<PathBuf>) -> Self {
    Self {
      project_root: project_root.into(),
    }
  }

  pub fn project_root(&self) -> &Path {
    &self.project_root
  }
}

impl RuleExecutor for CommandExecutor {
  async fn execute(&self, rule: Arc<BuildRule>) -> Result<(), ExecuteError> {
    let Some(action) = rule.action() else {
      debug!(target = %rule.target(), "rule has no action");
      return Ok(());
    };
    let target = rule.target();
    let output = rule.output().map(|output| self.project_root.join(output));

    if let Some(parent) = output.as_deref().and_then(Path::parent) {
      tokio::fs::create_dir_all(parent).await.map_err(|source| ExecuteError::Io {
        target: target.clone(),
        path: parent.to_path_buf(),
        source,
      })?;
    }

    info!(target = %target, cmd = %action, "running action");
    let mut command = Command::new(&action.program);
    command
      .args(&action.args)
      .current_dir(&self.project_root)
      .env("BUCKLE_TARGET", target.to_string())
      .envs(&action.env);
    if let Some(output) = &output {
      command.env("OUT", output);
    }

    let result = command.output().await.map_err(|source| ExecuteError::Io {
      target: target.clone(),
      path: PathBuf::from(&action.program),
      source,
    })?;

    if !result.status.success() {
      let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
      if !stderr.is_empty() {
        debug!(target = %target, stderr = %stderr, "command stderr");
      }
      return Err(ExecuteError::CmdFailed {
        target: target.clone(),
        cmd: action.to_string(),
        code: result.status.code(),
        stderr,
      });
    }

    if let Some(output) = output
      && !output.exists()
    {
      return Err(ExecuteError::OutputMissing {
        target: target.clone(),
        path: output,
      });
    }
    Ok(())
  }
}
