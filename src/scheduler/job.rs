use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ClustermError, Result};

pub const DEFAULT_MAX_LOG_LINES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Active,
    Errored,
    Completed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Idle => write!(f, "idle"),
            JobStatus::Active => write!(f, "active"),
            JobStatus::Errored => write!(f, "errored"),
            JobStatus::Completed => write!(f, "completed"),
        }
    }
}

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Work executed by the active job in the background.
pub type JobRunner = Box<dyn FnOnce(CancellationToken, JobLog) -> BoxFuture<Result<()>> + Send>;

/// Called exactly once with the job's terminal status and error.
pub type OnComplete = Box<dyn FnOnce(JobStatus, Option<ClustermError>) -> BoxFuture<()> + Send>;

/// Line-oriented log sink shared between a running job and status readers.
///
/// Holds at most `max_lines` lines; the oldest lines are dropped first.
#[derive(Debug, Clone)]
pub struct JobLog {
    lines: Arc<Mutex<VecDeque<String>>>,
    max_lines: usize,
}

impl Default for JobLog {
    fn default() -> Self {
        Self::new()
    }
}

impl JobLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_LOG_LINES)
    }

    pub fn with_capacity(max_lines: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::new())),
            max_lines: max_lines.max(1),
        }
    }

    pub fn append(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        while lines.len() >= self.max_lines {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    pub fn lines(&self) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Snapshot of a job for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: Uuid,
    pub description: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub logs: Vec<String>,
}

/// Time source for job timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Source of job ids.
pub type IdGenerator = Arc<dyn Fn() -> Uuid + Send + Sync>;

pub fn random_ids() -> IdGenerator {
    Arc::new(Uuid::new_v4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_log_keeps_newest_lines() {
        let log = JobLog::with_capacity(3);
        for i in 0..5 {
            log.append(format!("line {}", i));
        }
        assert_eq!(log.lines(), vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn job_log_at_capacity_drops_one_line_per_append() {
        let log = JobLog::with_capacity(DEFAULT_MAX_LOG_LINES);
        for i in 0..DEFAULT_MAX_LOG_LINES + 3 {
            log.append(format!("line {}", i));
        }
        let lines = log.lines();
        assert_eq!(lines.len(), DEFAULT_MAX_LOG_LINES);
        assert_eq!(lines[0], "line 3");
        assert_eq!(
            lines.last().map(String::as_str),
            Some(format!("line {}", DEFAULT_MAX_LOG_LINES + 2).as_str())
        );
    }

    #[test]
    fn job_log_clones_share_lines() {
        let log = JobLog::new();
        let writer = log.clone();
        writer.append("hello");
        assert_eq!(log.lines(), vec!["hello"]);
        assert!(!log.is_empty());
    }

    #[test]
    fn job_status_display() {
        assert_eq!(JobStatus::Active.to_string(), "active");
        assert_eq!(JobStatus::Errored.to_string(), "errored");
    }
}
