use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Waiting,
    Done,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Waiting => write!(f, "waiting"),
            JobStatus::Done => write!(f, "done"),
        }
    }
}

/// A replicated job record. The `id` counter restarts on every leader
/// election, so the `(term, id)` pair is the job's identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: u64,
    pub term: u64,
    pub status: JobStatus,
    pub input: String,
    pub output: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    /// A fresh, unstamped job as a client submits it. The leader assigns
    /// `id` and `term` when it accepts the entry.
    pub fn new(input: String) -> Self {
        Self {
            id: 0,
            term: 0,
            status: JobStatus::Waiting,
            input,
            output: None,
            submitted_at: Utc::now(),
        }
    }

    /// The `id-term` reference identifying this job across the cohort.
    pub fn reference(&self) -> String {
        format!("{}-{}", self.id, self.term)
    }
}
