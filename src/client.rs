//! Client node: submits jobs to the cohort and follows leader redirects.

use rand::Rng;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::config::ClusterConfig;
use crate::jobs::Job;
use crate::raft::log::LogEntry;
use crate::transport::{ClientInbox, CommandPayload, NodeId, RequestCommand, Router};

const MAX_SUBMIT_ATTEMPTS: usize = 8;

/// One job submission. `first_target` pins the initial scheduler; when
/// unset, a random one is chosen, as for every retry without a leader hint.
#[derive(Debug)]
pub struct Submission {
    pub input: String,
    pub first_target: Option<u64>,
}

pub struct ClientNode {
    card: NodeId,
    inbox: ClientInbox,
    submissions: mpsc::Receiver<Submission>,
    router: Router,
    config: ClusterConfig,
}

impl ClientNode {
    pub fn new(
        id: u64,
        inbox: ClientInbox,
        config: ClusterConfig,
        router: Router,
    ) -> (Self, mpsc::Sender<Submission>) {
        let (submit_tx, submissions) = mpsc::channel(config.channel_buffer_size);
        (
            Self {
                card: NodeId::client(id),
                inbox,
                submissions,
                router,
                config,
            },
            submit_tx,
        )
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let submission = tokio::select! {
                _ = cancel.cancelled() => break,
                maybe = self.submissions.recv() => match maybe {
                    Some(submission) => submission,
                    None => break,
                },
            };
            self.submit(submission).await;
        }
    }

    /// Send the entry to a scheduler and retry on rejection, preferring the
    /// returned leader hint. Gives up after a bounded number of attempts.
    async fn submit(&mut self, submission: Submission) {
        // Late responses from a previous submission are stale by now.
        while self.inbox.response_command.try_recv().is_ok() {}

        let cohort = self.router.scheduler_count();
        let mut target = submission
            .first_target
            .filter(|&id| id < cohort)
            .unwrap_or_else(|| random_scheduler(cohort));

        for attempt in 1..=MAX_SUBMIT_ATTEMPTS {
            self.router.send_request_command(RequestCommand {
                from: self.card,
                to: NodeId::scheduler(target),
                term: 0,
                payload: CommandPayload::AppendEntry {
                    entry: LogEntry::open(Job::new(submission.input.clone())),
                },
            });

            match timeout(
                self.config.max_election_timeout,
                self.inbox.response_command.recv(),
            )
            .await
            {
                Ok(Some(response)) if response.success => {
                    tracing::info!(
                        node = %self.card,
                        leader = %response.from,
                        input = %submission.input,
                        attempt,
                        "Submission accepted"
                    );
                    return;
                }
                Ok(Some(response)) => {
                    tracing::debug!(
                        node = %self.card,
                        rejected_by = %response.from,
                        leader_hint = ?response.leader_id,
                        "Submission rejected, retrying"
                    );
                    target = response
                        .leader_id
                        .filter(|&id| id < cohort)
                        .unwrap_or_else(|| random_scheduler(cohort));
                }
                Ok(None) => return,
                Err(_) => {
                    tracing::debug!(
                        node = %self.card,
                        target,
                        attempt,
                        "Submission timed out, retrying elsewhere"
                    );
                    target = random_scheduler(cohort);
                }
            }
            sleep(self.config.heartbeat_interval).await;
        }

        tracing::warn!(
            node = %self.card,
            input = %submission.input,
            attempts = MAX_SUBMIT_ATTEMPTS,
            "Giving up on submission"
        );
    }
}

fn random_scheduler(cohort: u64) -> u64 {
    rand::thread_rng().gen_range(0..cohort)
}
