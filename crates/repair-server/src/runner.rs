//! Task Runner (§4.6): a fixed-size worker pool draining a single FIFO
//! queue, driving each incident through the fixed step sequence and
//! persisting every transition as a Step.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use repair_codehost::{CodeHostAdapter, GitHubAdapter, GitLabAdapter};
use repair_config::{CodeHostKind, FixMode};
use repair_core::error::{RepairError, Result};
use repair_core::event::{CodeHost as WireCodeHost, IncidentEvent};
use repair_core::trace::{
    TaskStatus, TriggerType, STEP_AI_AGENTIC_EDIT, STEP_AI_PROPOSE_PATCH, STEP_AI_SUMMARY, STEP_APPLY_PATCH,
    STEP_CLEANUP, STEP_CREATE_FIX_BRANCH, STEP_CREATE_PR, STEP_GIT_COMMIT_PUSH, STEP_NOTIFY, STEP_PREFLIGHT_CHECK,
};
use repair_fixer::FixerAdapter;
use repair_workspace::GitService;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::state::AppState;

/// One unit of work pulled off the queue.
pub enum Job {
    Event(Box<IncidentEvent>),
    PrComment(PrCommentJob),
}

#[derive(Debug, Clone)]
pub struct PrCommentJob {
    pub repo_url: String,
    pub pr_number: u64,
    pub comment: String,
    pub code_host: CodeHostKind,
    /// The branch `CLEANUP` returns to once the fix is pushed. Not
    /// carried by the webhook/API payload (§6's `/v1/pr-comments` body
    /// has no such field), so it defaults to `main`.
    pub default_branch: String,
}

/// Runs `action`, recording `start_step`/`finish_step_ok`/
/// `finish_step_fail` around it — the "step scope" helper of SPEC_FULL
/// §9's open-question resolution.
async fn run_step<F, T>(state: &AppState, trace_id: &str, step_name: &str, action: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    state.store.start_step(trace_id, step_name)?;
    match action.await {
        Ok(value) => {
            state.store.finish_step_ok(trace_id, step_name, None)?;
            Ok(value)
        }
        Err(e) => {
            let message = e.to_string();
            state.store.finish_step_fail(trace_id, step_name, &message)?;
            Err(e)
        }
    }
}

fn code_host_str(kind: CodeHostKind) -> &'static str {
    match kind {
        CodeHostKind::Github => "github",
        CodeHostKind::Gitlab => "gitlab",
    }
}

fn wire_code_host_kind(host: WireCodeHost) -> CodeHostKind {
    match host {
        WireCodeHost::Github => CodeHostKind::Github,
        WireCodeHost::Gitlab => CodeHostKind::Gitlab,
    }
}

/// Spawns `pool_size` long-lived worker tasks draining `state`'s queue,
/// each looping `recv()` → dispatch → loop, cooperatively honouring
/// `shutdown` between steps (§4.6's queue & pool mechanics).
pub fn spawn_workers(state: Arc<AppState>, pool_size: usize, shutdown: CancellationToken) {
    for worker_id in 0..pool_size.max(1) {
        let state = state.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            worker_loop(worker_id, state, shutdown).await;
        });
    }
}

async fn worker_loop(worker_id: usize, state: Arc<AppState>, shutdown: CancellationToken) {
    let mut rx = state.queue_rx.lock().await;
    loop {
        if shutdown.is_cancelled() {
            info!(worker_id, "worker stopping, shutdown requested");
            return;
        }
        let Some((task_id, job)) = rx.recv().await else {
            return;
        };
        info!(worker_id, task_id = %task_id, "picked up job");
        run_job(&state, &task_id, job, &shutdown).await;
    }
}

async fn run_job(state: &Arc<AppState>, task_id: &str, job: Job, shutdown: &CancellationToken) {
    state.set_task_running(task_id);
    let trace_id = state.store.new_trace_id();
    state.attach_trace(task_id, &trace_id);

    let outcome = match job {
        Job::Event(event) => run_event_trace(state, task_id, &trace_id, &event, shutdown).await,
        Job::PrComment(job) => run_pr_comment_trace(state, task_id, &trace_id, &job, shutdown).await,
    };

    match outcome {
        Ok(TraceOutcome { mr_url, commit_sha }) => {
            let _ = state.store.finish_trace_ok(&trace_id, mr_url.as_deref(), commit_sha.as_deref());
            state.finish_task(task_id, TaskStatus::Done, mr_url, None);
        }
        Err(TraceFailure { step, message }) => {
            let _ = state.store.finish_trace_fail(&trace_id, &step, &message);
            state.finish_task(task_id, TaskStatus::Failed, None, Some(message));
        }
    }
}

struct TraceOutcome {
    mr_url: Option<String>,
    commit_sha: Option<String>,
}

struct TraceFailure {
    step: String,
    message: String,
}

impl TraceFailure {
    fn new(step: &str, err: &RepairError) -> Self {
        Self { step: step.to_string(), message: err.to_string() }
    }
}

async fn run_event_trace(
    state: &Arc<AppState>,
    task_id: &str,
    trace_id: &str,
    event: &IncidentEvent,
    shutdown: &CancellationToken,
) -> std::result::Result<TraceOutcome, TraceFailure> {
    let host_kind = wire_code_host_kind(event.repo.code_host);
    let host = code_host_str(host_kind);

    if let Err(e) = state.store.create_trace(trace_id, &event.repo.repo_url, host, &event.error.fingerprint, &event.error.raw_excerpt) {
        return Err(TraceFailure::new(STEP_CREATE_FIX_BRANCH, &e));
    }

    let workspace = match state.workspaces.allocate(Some(&event.repo.repo_url), Some(trace_id)) {
        Ok(p) => p,
        Err(e) => return Err(TraceFailure::new(STEP_CREATE_FIX_BRANCH, &e)),
    };
    state.set_task_workspace(task_id, &workspace);
    let repo_dir = workspace.join("repo");

    let result = drive_fix_workflow(
        state,
        trace_id,
        &repo_dir,
        host_kind,
        &event.repo.repo_url,
        &event.repo.default_branch,
        &event.error.raw_excerpt,
        FixOrigin::Fresh { reason: &event.error.exception_type },
        shutdown,
    )
    .await;

    if let Ok(outcome) = &result {
        let _ = state.store.record_bug_case_revision(
            &event.repo.repo_url,
            host,
            &event.error.fingerprint,
            &event.error.exception_type,
            &event.error.message_key,
            &format!("{:?}", event.error.frames),
            Some(trace_id),
            TriggerType::Error,
            &event.error.raw_excerpt,
            outcome.mr_url.as_deref(),
            None,
            None,
            outcome.commit_sha.as_deref(),
            None,
            "",
            true,
        );
    }

    let _ = state.workspaces.release(&workspace).await;
    result
}

async fn run_pr_comment_trace(
    state: &Arc<AppState>,
    task_id: &str,
    trace_id: &str,
    job: &PrCommentJob,
    shutdown: &CancellationToken,
) -> std::result::Result<TraceOutcome, TraceFailure> {
    let host = code_host_str(job.code_host);
    let (signature, exception_type, message_key, _) = repair_core::extract::query_features(&job.comment);

    if let Err(e) = state.store.create_trace(trace_id, &job.repo_url, host, &signature, &job.comment) {
        return Err(TraceFailure::new(STEP_CREATE_FIX_BRANCH, &e));
    }

    let workspace = match state.workspaces.allocate(Some(&job.repo_url), Some(trace_id)) {
        Ok(p) => p,
        Err(e) => return Err(TraceFailure::new(STEP_CREATE_FIX_BRANCH, &e)),
    };
    state.set_task_workspace(task_id, &workspace);
    let repo_dir = workspace.join("repo");

    let result = drive_fix_workflow(
        state,
        trace_id,
        &repo_dir,
        job.code_host,
        &job.repo_url,
        &job.default_branch,
        &job.comment,
        FixOrigin::PrFeedback { pr_number: job.pr_number },
        shutdown,
    )
    .await;

    if let Ok(outcome) = &result {
        let _ = state.store.record_bug_case_revision(
            &job.repo_url,
            host,
            &signature,
            &exception_type,
            &message_key,
            "",
            Some(trace_id),
            TriggerType::PrComment,
            &job.comment,
            outcome.mr_url.as_deref(),
            None,
            None,
            outcome.commit_sha.as_deref(),
            None,
            "",
            true,
        );
    }

    let _ = state.workspaces.release(&workspace).await;
    result
}

enum FixOrigin<'a> {
    Fresh { reason: &'a str },
    PrFeedback { pr_number: u64 },
}

#[allow(clippy::too_many_arguments)]
async fn drive_fix_workflow(
    state: &Arc<AppState>,
    trace_id: &str,
    repo_dir: &Path,
    host_kind: CodeHostKind,
    repo_url: &str,
    default_branch: &str,
    error_excerpt: &str,
    origin: FixOrigin<'_>,
    shutdown: &CancellationToken,
) -> std::result::Result<TraceOutcome, TraceFailure> {
    if let Err(e) = GitService::clone(repo_url, repo_dir).await {
        return Err(TraceFailure::new(STEP_CREATE_FIX_BRANCH, &e));
    }

    let adapter = match build_code_host_adapter(state, repo_dir.to_path_buf(), host_kind) {
        Ok(a) => a,
        Err(e) => return Err(TraceFailure::new(STEP_CREATE_FIX_BRANCH, &e)),
    };

    let branch = match &origin {
        FixOrigin::Fresh { reason } => {
            run_step(state, trace_id, STEP_CREATE_FIX_BRANCH, adapter.create_fix_branch(reason))
                .await
                .map_err(|e| TraceFailure::new(STEP_CREATE_FIX_BRANCH, &e))?
        }
        FixOrigin::PrFeedback { pr_number } => {
            run_step(state, trace_id, STEP_CREATE_FIX_BRANCH, adapter.fetch_pr_branch(*pr_number))
                .await
                .map_err(|e| TraceFailure::new(STEP_CREATE_FIX_BRANCH, &e))?
        }
    };

    if shutdown.is_cancelled() {
        return Err(TraceFailure { step: repair_core::trace::FAILURE_STEP_CANCELLED.to_string(), message: "server shutting down".to_string() });
    }

    match state.config.claude_fix_mode {
        FixMode::Agentic => {
            run_step(state, trace_id, STEP_AI_AGENTIC_EDIT, state.fixer.execute_agentic_fix(error_excerpt, repo_dir))
                .await
                .map_err(|e| TraceFailure::new(STEP_AI_AGENTIC_EDIT, &e))?;
        }
        FixMode::CodeBlocks => {
            let blocks = run_step(state, trace_id, STEP_AI_PROPOSE_PATCH, state.fixer.propose_fix_code_blocks(error_excerpt))
                .await
                .map_err(|e| TraceFailure::new(STEP_AI_PROPOSE_PATCH, &e))?;
            run_step(state, trace_id, STEP_APPLY_PATCH, apply_blocks(repo_dir, blocks))
                .await
                .map_err(|e| TraceFailure::new(STEP_APPLY_PATCH, &e))?;
        }
    }

    run_step(state, trace_id, STEP_PREFLIGHT_CHECK, crate::preflight::run(&state.config.preflight_command, repo_dir))
        .await
        .map_err(|e| TraceFailure::new(STEP_PREFLIGHT_CHECK, &e))?;

    let summary = run_step(state, trace_id, STEP_AI_SUMMARY, state.fixer.get_structured_summary(error_excerpt))
        .await
        .map_err(|e| TraceFailure::new(STEP_AI_SUMMARY, &e))?;

    let commit_message = format!("Auto-repair: {}", first_line(&summary));
    run_step(state, trace_id, STEP_GIT_COMMIT_PUSH, adapter.commit_and_push(&branch, &commit_message))
        .await
        .map_err(|e| TraceFailure::new(STEP_GIT_COMMIT_PUSH, &e))?;
    let commit_sha = GitService::new(repo_dir).current_commit().await.ok();

    let pr_title = format!("Auto-repair: {}", first_line(&summary));
    let mr_url = run_step(state, trace_id, STEP_CREATE_PR, adapter.create_pull_request(&branch, &pr_title, &summary))
        .await
        .map_err(|e| TraceFailure::new(STEP_CREATE_PR, &e))?;

    if state.notifier.is_enabled() {
        state.store.start_step(trace_id, STEP_NOTIFY).ok();
        state.notifier.notify(repair_notify::FixSummary {
            repo_url: repo_url.to_string(),
            error_excerpt: error_excerpt.to_string(),
            ai_summary: summary.clone(),
            pr_url: Some(mr_url.clone()),
        });
        let _ = state.store.finish_step_ok(trace_id, STEP_NOTIFY, None);
    }

    run_step(state, trace_id, STEP_CLEANUP, adapter.clean_up(default_branch))
        .await
        .map_err(|e| TraceFailure::new(STEP_CLEANUP, &e))?;

    Ok(TraceOutcome { mr_url: Some(mr_url), commit_sha })
}

fn first_line(text: &str) -> String {
    text.lines().find(|l| !l.trim().is_empty()).unwrap_or("automated fix").trim().chars().take(72).collect()
}

async fn apply_blocks(repo_dir: &Path, blocks: Vec<(String, String)>) -> Result<()> {
    for (filename, contents) in blocks {
        let abs = repair_core::path::resolve_fixer_path(repo_dir, &filename, |p| p.exists())?;
        tokio::fs::write(&abs, contents)
            .await
            .map_err(|e| RepairError::Other(anyhow::anyhow!("writing fixer block to {}: {e}", abs.display())))?;
    }
    Ok(())
}

fn build_code_host_adapter(
    state: &AppState,
    cwd: PathBuf,
    host_kind: CodeHostKind,
) -> Result<Box<dyn CodeHostAdapter>> {
    match host_kind {
        CodeHostKind::Github => {
            let token = state
                .config
                .github_token
                .as_deref()
                .ok_or_else(|| RepairError::Validation("GITHUB_TOKEN is required".to_string()))?;
            let repo = state
                .config
                .github_repo
                .as_deref()
                .ok_or_else(|| RepairError::Validation("GITHUB_REPO is required".to_string()))?;
            Ok(Box::new(GitHubAdapter::new(cwd, repo, token)?))
        }
        CodeHostKind::Gitlab => {
            let token = state
                .config
                .gitlab_token
                .as_deref()
                .ok_or_else(|| RepairError::Validation("GITLAB_TOKEN is required".to_string()))?;
            let project = state
                .config
                .gitlab_project
                .as_deref()
                .ok_or_else(|| RepairError::Validation("GITLAB_PROJECT is required".to_string()))?;
            Ok(Box::new(GitLabAdapter::new(cwd, &state.config.gitlab_base_url, project, token)))
        }
    }
}
