//! Exclusive per-task directory allocation and bounded-retry release,
//! grounded on `WorkspaceManager.allocate`/`release`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use repair_core::error::RepairError;
use tracing::warn;

use crate::slug::repo_slug;

const RELEASE_ATTEMPTS: u32 = 8;
const RELEASE_RETRY_DELAY: Duration = Duration::from_millis(250);

pub struct WorkspaceManager {
    base_dir: PathBuf,
}

impl WorkspaceManager {
    /// Creates the manager, ensuring `base_dir` exists.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, RepairError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)
            .map_err(|e| RepairError::Workspace(format!("creating workspaces root: {e}")))?;
        let base_dir = base_dir
            .canonicalize()
            .map_err(|e| RepairError::Workspace(format!("resolving workspaces root: {e}")))?;
        Ok(Self { base_dir })
    }

    /// Allocates `<slug>-ws-<epoch>-<short>` under the base dir.
    /// Exclusive: fails if the name is already taken.
    pub fn allocate(&self, repo_url: Option<&str>, trace_id: Option<&str>) -> Result<PathBuf, RepairError> {
        let slug = repo_url.map(repo_slug).unwrap_or_default();
        let short: String = trace_id
            .map(|t| t.chars().filter(|c| *c != '-').take(8).collect::<String>())
            .filter(|s| s.len() == 8)
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect());
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let name = if slug.is_empty() {
            format!("ws-{ts}-{short}")
        } else {
            format!("{slug}-ws-{ts}-{short}")
        };
        let path = self.base_dir.join(name);
        std::fs::create_dir(&path).map_err(|e| {
            RepairError::Workspace(format!("allocating workspace {}: {e}", path.display()))
        })?;
        Ok(path)
    }

    /// Removes the workspace directory, retrying past transient
    /// permission errors. Refuses to touch anything outside the base
    /// directory.
    pub async fn release(&self, path: &Path) -> Result<(), RepairError> {
        let abs = match path.canonicalize() {
            Ok(p) => p,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(RepairError::Workspace(format!("resolving workspace path: {e}"))),
        };
        if !abs.starts_with(&self.base_dir) {
            return Err(RepairError::PathViolation(format!(
                "refusing to release path outside workspaces root: {}",
                abs.display()
            )));
        }

        let mut last_err = None;
        for attempt in 0..RELEASE_ATTEMPTS {
            match std::fs::remove_dir_all(&abs) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => {
                    warn!(attempt, path = %abs.display(), error = %e, "workspace release failed, retrying");
                    last_err = Some(e);
                    tokio::time::sleep(RELEASE_RETRY_DELAY).await;
                }
            }
        }
        Err(RepairError::Workspace(format!(
            "releasing workspace {} after {RELEASE_ATTEMPTS} attempts: {}",
            abs.display(),
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_is_exclusive() {
        let root = tempfile::tempdir().unwrap();
        let mgr = WorkspaceManager::new(root.path()).unwrap();
        let a = mgr.allocate(Some("https://github.com/acme/widgets.git"), Some("trace-1234")).unwrap();
        assert!(a.file_name().unwrap().to_string_lossy().starts_with("widgets-ws-"));
        // A second allocation with the same trace id collides with the
        // same name only if issued in the same second; assert directory
        // creation is exclusive by re-attempting the literal path.
        assert!(std::fs::create_dir(&a).is_err());
    }

    #[tokio::test]
    async fn release_refuses_paths_outside_root() {
        let root = tempfile::tempdir().unwrap();
        let mgr = WorkspaceManager::new(root.path()).unwrap();
        let outside = tempfile::tempdir().unwrap();
        let err = mgr.release(outside.path()).await.unwrap_err();
        assert!(matches!(err, RepairError::PathViolation(_)));
    }

    #[tokio::test]
    async fn release_removes_an_allocated_workspace() {
        let root = tempfile::tempdir().unwrap();
        let mgr = WorkspaceManager::new(root.path()).unwrap();
        let path = mgr.allocate(None, None).unwrap();
        std::fs::write(path.join("file.txt"), "x").unwrap();
        mgr.release(&path).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn release_of_missing_path_is_a_no_op() {
        let root = tempfile::tempdir().unwrap();
        let mgr = WorkspaceManager::new(root.path()).unwrap();
        let gone = root.path().join("never-existed");
        mgr.release(&gone).await.unwrap();
    }
}
