//! GitHub implementation of `CodeHostAdapter`, grounded on
//! `GitHubService` (`github_service.py`) for the capability contract
//! and `controller/src/tasks/github.rs` for octocrab construction.

use async_trait::async_trait;
use octocrab::Octocrab;
use repair_core::error::RepairError;
use repair_workspace::GitService;

use crate::{fix_branch_name, CodeHostAdapter};

pub struct GitHubAdapter {
    octocrab: Octocrab,
    repo_full_name: String,
    token: String,
    git: GitService,
}

impl GitHubAdapter {
    /// `repo_full_name` is `owner/repo`; `token` is a personal access
    /// token with repo scope.
    pub fn new(cwd: impl Into<std::path::PathBuf>, repo_full_name: &str, token: &str) -> Result<Self, RepairError> {
        let octocrab = Octocrab::builder()
            .personal_token(token.to_string())
            .build()
            .map_err(|e| RepairError::RemoteApi(format!("building GitHub client: {e}")))?;
        Ok(Self {
            octocrab,
            repo_full_name: repo_full_name.to_string(),
            token: token.to_string(),
            git: GitService::new(cwd),
        })
    }

    fn owner_repo(&self) -> Result<(&str, &str), RepairError> {
        self.repo_full_name
            .split_once('/')
            .ok_or_else(|| RepairError::Validation(format!("GITHUB_REPO must be owner/repo, got `{}`", self.repo_full_name)))
    }

    /// Rewrites `origin` to an x-access-token URL so push doesn't need
    /// an askpass round-trip, matching `_maybe_configure_https_auth`.
    async fn configure_https_auth(&self) -> Result<(), RepairError> {
        let (owner, repo) = self.owner_repo()?;
        let url = format!("https://x-access-token:{}@github.com/{owner}/{repo}.git", self.token);
        self.git.set_remote_url("origin", &url).await
    }
}

#[async_trait]
impl CodeHostAdapter for GitHubAdapter {
    async fn create_fix_branch(&self, reason: &str) -> Result<String, RepairError> {
        let branch = fix_branch_name(reason);
        self.git.checkout_new_branch(&branch).await?;
        Ok(branch)
    }

    async fn commit_and_push(&self, branch: &str, message: &str) -> Result<(), RepairError> {
        self.configure_https_auth().await?;
        self.git.add_all().await?;
        self.git.commit(message).await?;
        self.git.push("origin", branch).await
    }

    async fn create_pull_request(&self, branch: &str, title: &str, body: &str) -> Result<String, RepairError> {
        let (owner, repo) = self.owner_repo()?;
        let repo_handle = self
            .octocrab
            .repos(owner, repo)
            .get()
            .await
            .map_err(|e| RepairError::RemoteApi(format!("fetching repo {owner}/{repo}: {e}")))?;
        let base = repo_handle.default_branch.unwrap_or_else(|| "main".to_string());

        let pr = self
            .octocrab
            .pulls(owner, repo)
            .create(title, branch, base)
            .body(body)
            .send()
            .await
            .map_err(|e| RepairError::RemoteApi(format!("creating pull request: {e}")))?;

        pr.html_url
            .map(|u| u.to_string())
            .ok_or_else(|| RepairError::RemoteApi("GitHub API did not return an html_url".to_string()))
    }

    async fn fetch_pr_branch(&self, pr_number: u64) -> Result<String, RepairError> {
        let (owner, repo) = self.owner_repo()?;
        let pr = self
            .octocrab
            .pulls(owner, repo)
            .get(pr_number)
            .await
            .map_err(|e| RepairError::RemoteApi(format!("fetching PR #{pr_number}: {e}")))?;
        let branch = pr.head.ref_field;
        if branch.is_empty() {
            return Err(RepairError::RemoteApi("GitHub PR head branch not found".to_string()));
        }
        self.configure_https_auth().await?;
        self.git.fetch("origin", &branch).await?;
        self.git.checkout_branch_from_remote(&branch, "origin").await?;
        Ok(branch)
    }

    async fn clean_up(&self, base_branch: &str) -> Result<(), RepairError> {
        self.git.checkout(base_branch).await
    }
}
