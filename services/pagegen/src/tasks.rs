//! Task-progress store
//!
//! A keyed map of generation tasks with status transitions
//! (Queued → Running → Completed | Failed, plus Paused in between). Pause
//! suspends the workflow at its next checkpoint via a `Notify` gate — the
//! worker parks on the notify, never polls. Task state is volatile by
//! design: it does not survive restarts, only the history log does.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
}

impl TaskStatus {
    fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Externally visible task state.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub keyword: String,
    pub status: TaskStatus,
    /// Latest human-readable progress line (retry/wait reasons included).
    pub detail: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct TaskEntry {
    record: TaskRecord,
    resume: Arc<Notify>,
}

/// In-memory task store shared between route handlers and workers.
///
/// Uses a std `RwLock` — every operation is a quick map access with no
/// await inside, and the sync lock lets the orchestrator's status callback
/// write progress lines directly.
#[derive(Default)]
pub struct TaskStore {
    tasks: RwLock<HashMap<Uuid, TaskEntry>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a task in Queued state and return its record.
    pub fn create(&self, keyword: &str) -> TaskRecord {
        let now = Utc::now();
        let record = TaskRecord {
            id: Uuid::new_v4(),
            keyword: keyword.to_string(),
            status: TaskStatus::Queued,
            detail: "queued".to_string(),
            created_at: now,
            updated_at: now,
            page_url: None,
            error: None,
        };
        let entry = TaskEntry {
            record: record.clone(),
            resume: Arc::new(Notify::new()),
        };
        self.write().insert(record.id, entry);
        info!(task_id = %record.id, keyword, "task created");
        record
    }

    pub fn get(&self, id: &Uuid) -> Option<TaskRecord> {
        self.read().get(id).map(|e| e.record.clone())
    }

    /// All tasks, newest first.
    pub fn list(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> =
            self.read().values().map(|e| e.record.clone()).collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    pub fn set_running(&self, id: &Uuid) {
        self.update(id, |r| {
            r.status = TaskStatus::Running;
            r.detail = "generating".to_string();
        });
    }

    /// Record a progress line without changing status.
    pub fn set_detail(&self, id: &Uuid, detail: &str) {
        self.update(id, |r| r.detail = detail.to_string());
    }

    pub fn complete(&self, id: &Uuid, page_url: &str) {
        self.update(id, |r| {
            r.status = TaskStatus::Completed;
            r.detail = "published".to_string();
            r.page_url = Some(page_url.to_string());
        });
    }

    pub fn fail(&self, id: &Uuid, error: &str) {
        self.update(id, |r| {
            r.status = TaskStatus::Failed;
            r.detail = "failed".to_string();
            r.error = Some(error.to_string());
        });
    }

    /// Pause a task. Returns false for unknown or already-terminal tasks.
    pub fn pause(&self, id: &Uuid) -> bool {
        let mut tasks = self.write();
        match tasks.get_mut(id) {
            Some(entry) if !entry.record.status.is_terminal() => {
                entry.record.status = TaskStatus::Paused;
                entry.record.updated_at = Utc::now();
                info!(task_id = %id, "task paused");
                true
            }
            _ => false,
        }
    }

    /// Resume a paused task, releasing the worker at its checkpoint.
    pub fn resume(&self, id: &Uuid) -> bool {
        let mut tasks = self.write();
        match tasks.get_mut(id) {
            Some(entry) if entry.record.status == TaskStatus::Paused => {
                entry.record.status = TaskStatus::Running;
                entry.record.updated_at = Utc::now();
                entry.resume.notify_one();
                info!(task_id = %id, "task resumed");
                true
            }
            _ => false,
        }
    }

    /// Park until the task is not paused. Workers call this between
    /// workflow steps; it returns immediately for a running task.
    pub async fn wait_if_paused(&self, id: &Uuid) {
        loop {
            let gate = {
                let tasks = self.read();
                match tasks.get(id) {
                    Some(entry) if entry.record.status == TaskStatus::Paused => {
                        Some(entry.resume.clone())
                    }
                    _ => None,
                }
            };
            match gate {
                Some(notify) => {
                    debug!(task_id = %id, "worker parked at pause gate");
                    notify.notified().await;
                }
                None => return,
            }
        }
    }

    fn update(&self, id: &Uuid, mutate: impl FnOnce(&mut TaskRecord)) {
        if let Some(entry) = self.write().get_mut(id) {
            mutate(&mut entry.record);
            entry.record.updated_at = Utc::now();
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, TaskEntry>> {
        self.tasks.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, TaskEntry>> {
        self.tasks.write().unwrap_or_else(|e| e.into_inner())
    }
}
