//! Shared server state (§4.6, §4.11): the task map, trace/case store,
//! workspace manager, fixer adapter, notifier, and the single job queue
//! the worker pool drains.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use repair_config::ServerConfig;
use repair_core::trace::{TaskKind, TaskRecord, TaskStatus};
use repair_fixer::FixerAdapter;
use repair_notify::Notifier;
use repair_store::TraceStore;
use repair_workspace::WorkspaceManager;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::runner::Job;

pub struct AppState {
    pub config: ServerConfig,
    pub store: TraceStore,
    pub workspaces: WorkspaceManager,
    pub fixer: Arc<dyn FixerAdapter>,
    pub notifier: Notifier,
    tasks: Mutex<HashMap<String, TaskRecord>>,
    queue_tx: mpsc::UnboundedSender<(String, Job)>,
    pub queue_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(String, Job)>>,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: ServerConfig,
        store: TraceStore,
        workspaces: WorkspaceManager,
        fixer: Arc<dyn FixerAdapter>,
        notifier: Notifier,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            config,
            store,
            workspaces,
            fixer,
            notifier,
            tasks: Mutex::new(HashMap::new()),
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(queue_rx),
        })
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, HashMap<String, TaskRecord>> {
        self.tasks.lock().expect("task map mutex poisoned")
    }

    /// Creates a `QUEUED` task record and enqueues its job, in that
    /// order, so a client polling `GET /v1/tasks/{id}` right after the
    /// enqueuing `POST` never sees a 404.
    pub fn enqueue(&self, kind: TaskKind, job: Job) -> String {
        let task_id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        let record = TaskRecord {
            task_id: task_id.clone(),
            kind,
            status: TaskStatus::Queued,
            trace_id: None,
            workspace_dir: None,
            mr_url: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.tasks().insert(task_id.clone(), record);
        let _ = self.queue_tx.send((task_id.clone(), job));
        task_id
    }

    #[must_use]
    pub fn get_task(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks().get(task_id).cloned()
    }

    pub fn set_task_running(&self, task_id: &str) {
        let mut tasks = self.tasks();
        if let Some(task) = tasks.get_mut(task_id) {
            task.status = TaskStatus::Running;
            task.updated_at = chrono::Utc::now().timestamp();
        }
    }

    pub fn attach_trace(&self, task_id: &str, trace_id: &str) {
        let mut tasks = self.tasks();
        if let Some(task) = tasks.get_mut(task_id) {
            task.trace_id = Some(trace_id.to_string());
            task.updated_at = chrono::Utc::now().timestamp();
        }
    }

    pub fn set_task_workspace(&self, task_id: &str, path: &Path) {
        let mut tasks = self.tasks();
        if let Some(task) = tasks.get_mut(task_id) {
            task.workspace_dir = Some(path.display().to_string());
            task.updated_at = chrono::Utc::now().timestamp();
        }
    }

    pub fn finish_task(&self, task_id: &str, status: TaskStatus, mr_url: Option<String>, error: Option<String>) {
        let mut tasks = self.tasks();
        if let Some(task) = tasks.get_mut(task_id) {
            task.status = status;
            task.mr_url = mr_url;
            task.error = error;
            task.updated_at = chrono::Utc::now().timestamp();
        }
    }

    /// Lists tasks newest-first, for a debug/listing endpoint if one is
    /// ever wired up; primarily exercised by tests today.
    #[must_use]
    pub fn list_tasks(&self) -> Vec<TaskRecord> {
        let mut items: Vec<_> = self.tasks().values().cloned().collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items
    }
}
