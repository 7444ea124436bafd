//! `PREFLIGHT_CHECK` (§4.6): runs a language-appropriate syntactic
//! validator over the repaired repository before it is committed.

use std::path::Path;
use std::process::Stdio;

use repair_core::error::RepairError;
use tokio::process::Command;

/// Runs `command` (a shell command line, e.g. `"python -m py_compile **/*.py"`
/// or `"cargo check"`) with `cwd` as the working directory. A non-zero
/// exit fails the step with the captured stderr.
pub async fn run(command: &str, cwd: &Path) -> Result<(), RepairError> {
    if command.trim().is_empty() {
        return Ok(());
    }

    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| RepairError::ExternalCommand {
            program: command.to_string(),
            exit_code: None,
            stderr: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(RepairError::ExternalCommand {
            program: command.to_string(),
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_command_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        run("", tmp.path()).await.unwrap();
    }

    #[tokio::test]
    async fn non_zero_exit_surfaces_as_external_command_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = run("exit 1", tmp.path()).await.unwrap_err();
        assert!(matches!(err, RepairError::ExternalCommand { .. }));
    }

    #[tokio::test]
    async fn zero_exit_succeeds() {
        let tmp = tempfile::tempdir().unwrap();
        run("true", tmp.path()).await.unwrap();
    }
}
