//! Code-Host Adapter: a uniform branch/commit/PR capability over
//! GitHub and GitLab, each delegating git plumbing to
//! `repair_workspace::GitService` and owning only the REST calls
//! proper to its host.

pub mod github;
pub mod gitlab;

use async_trait::async_trait;
use repair_core::error::RepairError;

/// The capability set required by the Task Runner's state machine,
/// independent of which code host backs a given repository.
#[async_trait]
pub trait CodeHostAdapter: Send + Sync {
    /// Creates and checks out a new local branch named
    /// `fix/<reason>-<epoch>`, returning the branch name.
    async fn create_fix_branch(&self, reason: &str) -> Result<String, RepairError>;

    /// Stages, commits, and pushes the working tree to `branch`.
    async fn commit_and_push(&self, branch: &str, message: &str) -> Result<(), RepairError>;

    /// Opens a pull/merge request from `branch` against the repo's
    /// default branch, returning its web URL.
    async fn create_pull_request(&self, branch: &str, title: &str, body: &str) -> Result<String, RepairError>;

    /// Fetches and checks out the head branch of an existing PR/MR,
    /// returning its branch name.
    async fn fetch_pr_branch(&self, pr_number: u64) -> Result<String, RepairError>;

    /// Returns the working tree to `base_branch`, leaving it neutral
    /// before the workspace is released.
    async fn clean_up(&self, base_branch: &str) -> Result<(), RepairError>;
}

pub use github::GitHubAdapter;
pub use gitlab::GitLabAdapter;

/// `fix/<reason>-<epoch>`, matching `create_fix_branch` across both
/// the Python original and the teacher's branch-naming convention.
pub(crate) fn fix_branch_name(reason: &str) -> String {
    let epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let slug = reason.to_lowercase().replace(' ', "-");
    format!("fix/{slug}-{epoch}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fix_branch_name_slugifies_and_stamps() {
        let name = fix_branch_name("Null Pointer");
        assert!(name.starts_with("fix/null-pointer-"));
    }
}
