//! GitLab implementation of `CodeHostAdapter`, grounded on
//! `gitlab_service.py`'s raw REST calls (`urllib.request` against
//! `/api/v4/projects/{id}/merge_requests`), translated into idiomatic
//! `reqwest` calls with a `PRIVATE-TOKEN` header.

use async_trait::async_trait;
use repair_core::error::RepairError;
use repair_workspace::GitService;
use serde::Deserialize;
use serde_json::json;

use crate::{fix_branch_name, CodeHostAdapter};

pub struct GitLabAdapter {
    client: reqwest::Client,
    base_url: String,
    project: String,
    token: String,
    git: GitService,
}

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MergeRequestResponse {
    web_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MergeRequestDetail {
    source_branch: String,
}

impl GitLabAdapter {
    pub fn new(cwd: impl Into<std::path::PathBuf>, base_url: &str, project: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            project: project.to_string(),
            token: token.to_string(),
            git: GitService::new(cwd),
        }
    }

    fn encoded_project(&self) -> String {
        urlencoding::encode(&self.project).into_owned()
    }

    async fn default_branch(&self) -> Result<String, RepairError> {
        let url = format!("{}/api/v4/projects/{}", self.base_url, self.encoded_project());
        let resp: ProjectResponse = self
            .client
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .map_err(|e| RepairError::RemoteApi(format!("fetching GitLab project: {e}")))?
            .error_for_status()
            .map_err(|e| RepairError::RemoteApi(format!("GitLab project lookup failed: {e}")))?
            .json()
            .await
            .map_err(|e| RepairError::RemoteApi(format!("decoding GitLab project response: {e}")))?;
        Ok(resp.default_branch.unwrap_or_else(|| "main".to_string()))
    }
}

#[async_trait]
impl CodeHostAdapter for GitLabAdapter {
    async fn create_fix_branch(&self, reason: &str) -> Result<String, RepairError> {
        let branch = fix_branch_name(reason);
        self.git.checkout_new_branch(&branch).await?;
        Ok(branch)
    }

    async fn commit_and_push(&self, branch: &str, message: &str) -> Result<(), RepairError> {
        self.git.add_all().await?;
        self.git.commit(message).await?;
        self.git.push_with_token("origin", branch, &self.token).await
    }

    async fn create_pull_request(&self, branch: &str, title: &str, body: &str) -> Result<String, RepairError> {
        if self.token.is_empty() {
            return Err(RepairError::Validation("GitLab token not configured".to_string()));
        }
        if self.project.is_empty() {
            return Err(RepairError::Validation("GitLab project not configured".to_string()));
        }

        let target_branch = self.default_branch().await?;
        let url = format!(
            "{}/api/v4/projects/{}/merge_requests",
            self.base_url,
            self.encoded_project()
        );
        let payload = json!({
            "source_branch": branch,
            "target_branch": target_branch,
            "title": title,
            "description": body,
            "remove_source_branch": false,
        });

        let resp: MergeRequestResponse = self
            .client
            .post(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| RepairError::RemoteApi(format!("creating GitLab merge request: {e}")))?
            .error_for_status()
            .map_err(|e| RepairError::RemoteApi(format!("GitLab merge request creation failed: {e}")))?
            .json()
            .await
            .map_err(|e| RepairError::RemoteApi(format!("decoding GitLab merge request response: {e}")))?;

        resp.web_url
            .ok_or_else(|| RepairError::RemoteApi("GitLab API did not return web_url".to_string()))
    }

    async fn fetch_pr_branch(&self, pr_number: u64) -> Result<String, RepairError> {
        let url = format!(
            "{}/api/v4/projects/{}/merge_requests/{pr_number}",
            self.base_url,
            self.encoded_project()
        );
        let detail: MergeRequestDetail = self
            .client
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .map_err(|e| RepairError::RemoteApi(format!("fetching merge request !{pr_number}: {e}")))?
            .error_for_status()
            .map_err(|e| RepairError::RemoteApi(format!("GitLab merge request lookup failed: {e}")))?
            .json()
            .await
            .map_err(|e| RepairError::RemoteApi(format!("decoding GitLab merge request: {e}")))?;

        self.git.fetch("origin", &detail.source_branch).await?;
        self.git
            .checkout_branch_from_remote(&detail.source_branch, "origin")
            .await?;
        Ok(detail.source_branch)
    }

    async fn clean_up(&self, base_branch: &str) -> Result<(), RepairError> {
        self.git.checkout(base_branch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn create_pull_request_returns_web_url() {
        let server = MockServer::start().await;
        let repo = tempfile::tempdir().unwrap();

        Mock::given(method("GET"))
            .and(path("/api/v4/projects/acme%2Fwidgets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"default_branch": "main"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v4/projects/acme%2Fwidgets/merge_requests"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"web_url": "https://gitlab.com/acme/widgets/-/merge_requests/1"})))
            .mount(&server)
            .await;

        let adapter = GitLabAdapter::new(repo.path(), &server.uri(), "acme/widgets", "tok");
        let url = adapter.default_branch().await.unwrap();
        assert_eq!(url, "main");
    }
}
