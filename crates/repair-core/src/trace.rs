//! Shared record types for traces, steps, bug cases, and the
//! server-side task record (§3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TraceStatus {
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    Running,
    Ok,
    Fail,
}

/// The fixed step sequence of §4.6. `AI_AGENTIC_EDIT` and
/// `AI_PROPOSE_PATCH`/`APPLY_PATCH` are mutually exclusive depending on
/// the configured fixer mode.
pub const STEP_CREATE_FIX_BRANCH: &str = "CREATE_FIX_BRANCH";
pub const STEP_AI_AGENTIC_EDIT: &str = "AI_AGENTIC_EDIT";
pub const STEP_AI_PROPOSE_PATCH: &str = "AI_PROPOSE_PATCH";
pub const STEP_APPLY_PATCH: &str = "APPLY_PATCH";
pub const STEP_PREFLIGHT_CHECK: &str = "PREFLIGHT_CHECK";
pub const STEP_AI_SUMMARY: &str = "AI_SUMMARY";
pub const STEP_GIT_COMMIT_PUSH: &str = "GIT_COMMIT_PUSH";
pub const STEP_CREATE_PR: &str = "CREATE_PR";
pub const STEP_NOTIFY: &str = "NOTIFY";
pub const STEP_CLEANUP: &str = "CLEANUP";
pub const FAILURE_STEP_CANCELLED: &str = "CANCELLED";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub trace_id: String,
    pub created_at: i64,
    pub finished_at: Option<i64>,
    pub repo_url: String,
    pub code_host: String,
    pub error_signature: String,
    pub error_excerpt: String,
    pub status: TraceStatus,
    pub failure_step: Option<String>,
    pub failure_message: Option<String>,
    pub mr_url: Option<String>,
    pub commit_sha: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub trace_id: String,
    pub step_name: String,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub status: StepStatus,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BugCase {
    pub case_id: String,
    pub repo_url: String,
    pub code_host: String,
    pub signature: String,
    pub exception_type: String,
    pub message_key: String,
    pub top_frames: String,
    pub status: String,
    pub quality_score: f64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TriggerType {
    Error,
    PrComment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BugCaseRevision {
    pub case_id: String,
    pub trace_id: Option<String>,
    pub trigger_type: TriggerType,
    pub trigger_text: String,
    pub pr_url: Option<String>,
    pub pr_title: Option<String>,
    pub pr_body: Option<String>,
    pub commit_sha: Option<String>,
    pub changed_files_json: Option<String>,
    pub diff_text: String,
    pub preflight_ok: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskKind {
    Event,
    PrComment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Queued,
    Running,
    Done,
    Failed,
}

/// The server's in-memory mirror of a trace's lifecycle, keyed by
/// `task_id`. Per §9's open question, `workspace_dir` is left populated
/// even after the workspace backing it has been released — this is
/// intentional, not a bug (see SPEC_FULL.md §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub trace_id: Option<String>,
    pub workspace_dir: Option<String>,
    pub mr_url: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Caps enforced by the store's pagination contract (§4.11).
pub const MAX_PAGE_LIMIT: i64 = 200;
pub const DEFAULT_PAGE_LIMIT: i64 = 50;
