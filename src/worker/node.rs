use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::jobs::{Job, JobStatus};
use crate::transport::{NodeId, WorkerInbox};
use crate::worker::JobExecutor;

/// A worker node: drains its inbound job queue, executes each job and keeps
/// the finished records around for inspection.
pub struct WorkerNode {
    card: NodeId,
    inbox: WorkerInbox,
    executor: JobExecutor,
    completed: Arc<RwLock<Vec<Job>>>,
}

impl WorkerNode {
    pub fn new(id: u64, inbox: WorkerInbox) -> (Self, Arc<RwLock<Vec<Job>>>) {
        let completed = Arc::new(RwLock::new(Vec::new()));
        let node = Self {
            card: NodeId::worker(id),
            inbox,
            executor: JobExecutor::new(),
            completed: completed.clone(),
        };
        (node, completed)
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(node = %self.card, "Worker ready");
        loop {
            let job = tokio::select! {
                _ = cancel.cancelled() => break,
                maybe = self.inbox.jobs.recv() => match maybe {
                    Some(job) => job,
                    None => break,
                },
            };
            self.execute(job).await;
        }
        tracing::info!(node = %self.card, "Worker shutting down");
    }

    async fn execute(&self, mut job: Job) {
        tracing::info!(
            node = %self.card,
            job = %job.reference(),
            input = %job.input,
            "Executing job"
        );
        let output = self.executor.execute(&job.input).await;
        job.output = Some(output);
        job.status = JobStatus::Done;
        tracing::info!(node = %self.card, job = %job.reference(), "Job done");
        self.completed.write().await.push(job);
    }
}
