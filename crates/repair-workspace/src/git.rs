//! Thin async wrapper over the system `git` binary, grounded on the
//! original's `GitService` (`subprocess.run(["git", ...])`) and the
//! teacher's `CLIExecutionAdapter` (`tokio::process::Command`, captured
//! stdout/stderr, non-zero exit surfaced as an error).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use repair_core::error::RepairError;
use tokio::process::Command;

const PROXYLESS_VARS: &[&str] = &[
    "http_proxy",
    "https_proxy",
    "all_proxy",
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "ALL_PROXY",
];

/// A git working tree, wrapping the system `git` binary.
pub struct GitService {
    cwd: PathBuf,
}

impl GitService {
    #[must_use]
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }

    async fn run(&self, args: &[&str], env: Option<&HashMap<String, String>>, disable_proxy: bool) -> Result<String, RepairError> {
        run_git(&self.cwd, args, env, disable_proxy).await
    }

    /// Clones `repo_url` into `dest_dir`, creating its parent directory
    /// first. Run from the current directory, not `dest_dir` (which
    /// does not exist yet).
    pub async fn clone(repo_url: &str, dest_dir: &Path) -> Result<(), RepairError> {
        if let Some(parent) = dest_dir.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RepairError::Workspace(format!("creating workspace parent dir: {e}")))?;
        }
        run_git(
            &std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            &["clone", repo_url, &dest_dir.to_string_lossy()],
            None,
            false,
        )
        .await?;
        Ok(())
    }

    pub async fn checkout_new_branch(&self, branch_name: &str) -> Result<(), RepairError> {
        self.run(&["checkout", "-b", branch_name], None, false).await?;
        Ok(())
    }

    pub async fn checkout(&self, branch_name: &str) -> Result<(), RepairError> {
        self.run(&["checkout", branch_name], None, false).await?;
        Ok(())
    }

    pub async fn add_all(&self) -> Result<(), RepairError> {
        self.run(&["add", "."], None, false).await?;
        Ok(())
    }

    pub async fn commit(&self, message: &str) -> Result<(), RepairError> {
        self.run(&["commit", "-m", message], None, false).await?;
        Ok(())
    }

    pub async fn push(&self, remote: &str, branch_name: &str) -> Result<(), RepairError> {
        self.run(&["push", remote, branch_name], None, false).await?;
        Ok(())
    }

    /// Pushes with a short-lived askpass script so the token never
    /// touches the stored remote URL. The script is removed on every
    /// return path, matching the original's `finally: os.remove(...)`.
    pub async fn push_with_token(&self, remote: &str, branch_name: &str, token: &str) -> Result<(), RepairError> {
        let askpass = AskpassScript::write(token)?;
        let mut env = HashMap::new();
        env.insert("GIT_TERMINAL_PROMPT".to_string(), "0".to_string());
        env.insert("GIT_ASKPASS".to_string(), askpass.path.to_string_lossy().to_string());
        env.insert("GIT_ASKPASS_TOKEN".to_string(), token.to_string());
        self.run(&["push", remote, branch_name], Some(&env), false).await?;
        Ok(())
    }

    pub async fn fetch(&self, remote: &str, branch_name: &str) -> Result<(), RepairError> {
        self.run(&["fetch", remote, branch_name], None, false).await?;
        Ok(())
    }

    /// Checks out `branch_name` tracking `remote/branch_name`, creating
    /// the local branch if it doesn't already exist.
    pub async fn checkout_branch_from_remote(&self, branch_name: &str, remote: &str) -> Result<(), RepairError> {
        let tracking = format!("{remote}/{branch_name}");
        self.run(&["checkout", "-B", branch_name, &tracking], None, false).await?;
        Ok(())
    }

    pub async fn set_remote_url(&self, remote: &str, url: &str) -> Result<(), RepairError> {
        self.run(&["remote", "set-url", remote, url], None, false).await?;
        Ok(())
    }

    pub async fn current_commit(&self) -> Result<String, RepairError> {
        let out = self.run(&["rev-parse", "HEAD"], None, false).await?;
        Ok(out.trim().to_string())
    }
}

/// Deletes itself on drop, mirroring the Python original's
/// `finally: os.remove(askpass_path)` — whichever return path the
/// caller takes, the temp file does not outlive the push.
struct AskpassScript {
    path: PathBuf,
}

impl AskpassScript {
    fn write(_token: &str) -> Result<Self, RepairError> {
        let path = std::env::temp_dir().join(format!("repair_askpass_{}.sh", uuid::Uuid::new_v4().simple()));
        let script = "#!/bin/sh\necho \"$GIT_ASKPASS_TOKEN\"\n";
        std::fs::write(&path, script).map_err(|e| RepairError::Workspace(format!("writing askpass script: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(&path, perms)
                .map_err(|e| RepairError::Workspace(format!("chmod askpass script: {e}")))?;
        }
        Ok(Self { path })
    }
}

impl Drop for AskpassScript {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn run_git(
    cwd: &Path,
    args: &[&str],
    env: Option<&HashMap<String, String>>,
    disable_proxy: bool,
) -> Result<String, RepairError> {
    let mut command = Command::new("git");
    if disable_proxy {
        command.arg("-c").arg("http.proxy=").arg("-c").arg("https.proxy=");
        for var in PROXYLESS_VARS {
            command.env(var, "");
        }
    }
    command
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(env) = env {
        for (k, v) in env {
            command.env(k, v);
        }
    }

    let output = command
        .output()
        .await
        .map_err(|e| RepairError::ExternalCommand {
            program: "git".to_string(),
            exit_code: None,
            stderr: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(RepairError::ExternalCommand {
            program: format!("git {}", args.join(" ")),
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_external_command_error_for_missing_repo() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = GitService::new(tmp.path());
        let err = svc.checkout("main").await.unwrap_err();
        assert!(matches!(err, RepairError::ExternalCommand { .. }));
    }

    #[tokio::test]
    async fn clone_and_commit_round_trip() {
        let src = tempfile::tempdir().unwrap();
        run_git(src.path(), &["init", "-q"], None, false).await.unwrap();
        run_git(src.path(), &["config", "user.email", "a@b.c"], None, false).await.unwrap();
        run_git(src.path(), &["config", "user.name", "tester"], None, false).await.unwrap();
        std::fs::write(src.path().join("README.md"), "hi").unwrap();
        let svc = GitService::new(src.path());
        svc.add_all().await.unwrap();
        svc.commit("initial").await.unwrap();
        let sha = svc.current_commit().await.unwrap();
        assert_eq!(sha.len(), 40);
    }
}
