//! The scheduler replica actor.
//!
//! Each replica is a single task that owns its consensus state exclusively
//! and talks to the rest of the cohort only through mailboxes. One handler
//! runs at a time; every handler runs to completion, enqueues its outbound
//! messages and returns to the select loop.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::ClusterConfig;
use crate::dump::StateDumper;
use crate::jobs::{pick_worker, Job};
use crate::raft::log::{EntryKind, Log, LogEntry};
use crate::raft::rpc;
use crate::raft::state::{RaftRole, ReplicaState};
use crate::raft::timer::random_election_timeout;
use crate::transport::{
    CommandKind, CommandPayload, NodeId, RequestCommand, RequestVote, ResponseCommand,
    ResponseVote, Router, SchedulerInbox, SynchronizePayload,
};

/// Point-in-time copy of a replica's observable state, published on a watch
/// channel after every handler and rendered into the debug dump file.
#[derive(Debug, Clone, Serialize)]
pub struct ReplicaSnapshot {
    pub id: u64,
    pub role: RaftRole,
    pub current_term: u64,
    pub voted_for: Option<u64>,
    pub leader_id: Option<u64>,
    pub commit_index: u64,
    pub is_started: bool,
    pub is_crashed: bool,
    pub log: Vec<LogEntry>,
    pub next_index: Vec<u64>,
    pub match_index: Vec<u64>,
}

pub struct SchedulerReplica {
    card: NodeId,
    config: ClusterConfig,
    state: ReplicaState,
    log: Log,
    router: Router,
    inbox: SchedulerInbox,
    /// Drawn once at init and fixed for the replica's lifetime.
    election_timeout: Duration,
    speed_delay: Duration,
    /// Highest index already pushed through the dispatcher bridge.
    applied_index: u64,
    /// Replication and submission traffic received before Start.
    deferred: VecDeque<RequestCommand>,
    dumper: Option<StateDumper>,
    snapshot_tx: watch::Sender<ReplicaSnapshot>,
}

impl SchedulerReplica {
    pub fn new(
        id: u64,
        config: ClusterConfig,
        router: Router,
        inbox: SchedulerInbox,
    ) -> (Self, watch::Receiver<ReplicaSnapshot>) {
        let state = ReplicaState::new(id, config.scheduler_node_count);
        let election_timeout =
            random_election_timeout(config.min_election_timeout, config.max_election_timeout);
        let speed_delay = config.node_speed(id).delay();

        let dumper = config.state_dir.as_deref().and_then(|dir| {
            StateDumper::new(dir, id)
                .map_err(|e| {
                    tracing::warn!(id, error = %e, "Failed to create state dump file");
                })
                .ok()
        });

        let replica = Self {
            card: NodeId::scheduler(id),
            config,
            state,
            log: Log::new(),
            router,
            inbox,
            election_timeout,
            speed_delay,
            applied_index: 0,
            deferred: VecDeque::new(),
            dumper,
            snapshot_tx: watch::channel(ReplicaSnapshot {
                id,
                role: RaftRole::Follower,
                current_term: 0,
                voted_for: None,
                leader_id: None,
                commit_index: 0,
                is_started: false,
                is_crashed: false,
                log: Vec::new(),
                next_index: Vec::new(),
                match_index: Vec::new(),
            })
            .0,
        };
        replica.publish_snapshot();
        let snapshot_rx = replica.snapshot_tx.subscribe();
        (replica, snapshot_rx)
    }

    /// Run the replica until cancellation.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            node = %self.card,
            election_timeout_ms = self.election_timeout.as_millis() as u64,
            "Replica initialized, waiting for the start command"
        );

        // Before Start only command traffic is drained; replication and
        // submissions are parked, votes stay queued in their mailboxes.
        while !self.state.is_started {
            tokio::select! {
                _ = cancel.cancelled() => return,
                maybe = self.inbox.request_command.recv() => {
                    match maybe {
                        Some(request) => self.handle_prestart_command(request),
                        None => return,
                    }
                }
            }
        }
        tracing::info!(node = %self.card, "Replica started");
        self.publish_snapshot();

        while let Some(request) = self.deferred.pop_front() {
            self.handle_request_command(request);
            self.after_handler().await;
        }

        loop {
            let timeout = self.current_timeout();
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(request) = self.inbox.request_command.recv() => {
                    self.handle_request_command(request);
                }
                Some(response) = self.inbox.response_command.recv() => {
                    self.handle_response_command(response);
                }
                Some(request) = self.inbox.request_vote.recv() => {
                    self.handle_request_vote(request);
                }
                Some(response) = self.inbox.response_vote.recv() => {
                    self.handle_response_vote(response);
                }
                _ = sleep(timeout) => {
                    self.handle_timeout();
                }
            }
            self.after_handler().await;
        }

        tracing::info!(node = %self.card, "Replica shutting down");
    }

    /// Post-handler cadence: debug dump, commit recomputation and dispatch,
    /// snapshot publication, then the per-node speed pause.
    async fn after_handler(&mut self) {
        if let Some(dumper) = &self.dumper {
            dumper.write(&self.snapshot());
        }
        self.advance_commit_index();
        self.dispatch_committed();
        self.publish_snapshot();
        sleep(self.speed_delay).await;
    }

    /// Election timeout for followers and candidates, heartbeat interval for
    /// the leader. The sleep is re-armed on every loop iteration, so any
    /// message receipt resets it.
    fn current_timeout(&self) -> Duration {
        match self.state.role {
            RaftRole::Follower | RaftRole::Candidate => self.election_timeout,
            RaftRole::Leader => self.config.heartbeat_interval,
        }
    }

    fn handle_prestart_command(&mut self, request: RequestCommand) {
        match request.payload.kind() {
            CommandKind::Start | CommandKind::Crash | CommandKind::Recover => {
                self.handle_control(request.payload.kind());
            }
            CommandKind::Synchronize | CommandKind::AppendEntry => {
                tracing::debug!(
                    node = %self.card,
                    from = %request.from,
                    kind = %request.payload.kind(),
                    "Parking message received before start"
                );
                self.deferred.push_back(request);
            }
        }
    }

    fn handle_request_command(&mut self, request: RequestCommand) {
        let kind = request.payload.kind();
        tracing::trace!(
            node = %self.card,
            from = %request.from,
            kind = %kind,
            "Handling request command"
        );
        match request.payload {
            CommandPayload::Synchronize(sync) => {
                if self.state.is_crashed {
                    tracing::debug!(node = %self.card, "Crashed, ignoring synchronize");
                    return;
                }
                let response = rpc::handle_synchronize(
                    &mut self.state,
                    &mut self.log,
                    request.from,
                    request.term,
                    &sync,
                );
                self.router.send_response_command(response);
            }
            CommandPayload::AppendEntry { entry } => {
                if self.state.is_crashed {
                    tracing::debug!(node = %self.card, "Crashed, ignoring append entry");
                    return;
                }
                let router = self.router.clone();
                let response = rpc::handle_append_entry(
                    &mut self.state,
                    &mut self.log,
                    request.from,
                    request.term,
                    entry,
                    move || pick_worker(&router),
                );
                self.router.send_response_command(response);
            }
            CommandPayload::Start | CommandPayload::Crash | CommandPayload::Recover => {
                self.handle_control(kind);
            }
        }
    }

    /// Start, Crash and Recover toggles. Each is idempotent and processed
    /// even while crashed; none produces a response.
    fn handle_control(&mut self, kind: CommandKind) {
        match kind {
            CommandKind::Start => {
                if self.state.is_started {
                    tracing::debug!(node = %self.card, "Already started");
                } else {
                    self.state.is_started = true;
                }
            }
            CommandKind::Crash => {
                if self.state.is_crashed {
                    tracing::debug!(node = %self.card, "Already crashed");
                } else {
                    self.state.is_crashed = true;
                    tracing::warn!(node = %self.card, "Crashed");
                }
            }
            CommandKind::Recover => {
                if self.state.is_crashed {
                    self.state.is_crashed = false;
                    tracing::info!(node = %self.card, "Recovered");
                } else {
                    tracing::debug!(node = %self.card, "Not crashed, recover is a no-op");
                }
            }
            CommandKind::Synchronize | CommandKind::AppendEntry => unreachable!(),
        }
    }

    fn handle_response_command(&mut self, response: ResponseCommand) {
        if self.state.is_crashed {
            tracing::debug!(node = %self.card, "Crashed, ignoring command response");
            return;
        }
        match response.kind {
            CommandKind::Synchronize => {
                rpc::handle_synchronize_response(&mut self.state, &response);
            }
            other => {
                tracing::error!(
                    node = %self.card,
                    kind = %other,
                    from = %response.from,
                    "Unknown response command type, discarding"
                );
            }
        }
    }

    fn handle_request_vote(&mut self, request: RequestVote) {
        if self.state.is_crashed {
            tracing::debug!(node = %self.card, "Crashed, ignoring vote request");
            return;
        }
        let response = rpc::handle_request_vote(&mut self.state, &self.log, &request);
        self.router.send_response_vote(response);
    }

    fn handle_response_vote(&mut self, response: ResponseVote) {
        if self.state.is_crashed {
            tracing::debug!(node = %self.card, "Crashed, ignoring vote response");
            return;
        }
        self.state.observe_term(response.term);

        if self.state.role != RaftRole::Candidate || self.state.current_term != response.term {
            tracing::debug!(
                node = %self.card,
                from = %response.from,
                "Not a candidate of the response term, ignoring vote response"
            );
            return;
        }
        if response.vote_granted && self.state.record_vote() {
            self.become_leader();
        }
    }

    fn handle_timeout(&mut self) {
        if self.state.is_crashed {
            tracing::debug!(node = %self.card, "Crashed, ignoring timeout");
            return;
        }
        match self.state.role {
            RaftRole::Follower => {
                tracing::warn!(
                    node = %self.card,
                    timeout_ms = self.election_timeout.as_millis() as u64,
                    "Leader does not respond, starting election"
                );
                self.start_new_election();
            }
            RaftRole::Candidate => {
                tracing::warn!(
                    node = %self.card,
                    term = self.state.current_term,
                    "No majority before timeout, starting new election"
                );
                self.start_new_election();
            }
            RaftRole::Leader => {
                self.broadcast_synchronize();
            }
        }
    }

    fn start_new_election(&mut self) {
        self.state.begin_election();
        tracing::info!(
            node = %self.card,
            term = self.state.current_term,
            "Starting election"
        );
        // A cohort of one wins on its own vote.
        if self.state.vote_count > self.state.cohort_size / 2 {
            self.become_leader();
            return;
        }
        self.broadcast_request_vote();
    }

    fn become_leader(&mut self) {
        self.state.become_leader(self.log.last_index());
        tracing::info!(
            node = %self.card,
            term = self.state.current_term,
            last_index = self.log.last_index(),
            "Leader elected"
        );
        self.broadcast_synchronize();
    }

    fn broadcast_request_vote(&self) {
        let last_log_index = self.log.last_index();
        let last_log_term = self.log.term_at(last_log_index);
        for peer in self.peers() {
            self.router.send_request_vote(RequestVote {
                from: self.card,
                to: NodeId::scheduler(peer),
                term: self.state.current_term,
                candidate_id: self.state.id,
                last_log_index,
                last_log_term,
            });
        }
    }

    fn broadcast_synchronize(&self) {
        for peer in self.peers() {
            self.send_synchronize(peer);
        }
    }

    fn send_synchronize(&self, peer: u64) {
        let next = self.state.next_index[peer as usize];
        let prev_index = next - 1;
        self.router.send_request_command(RequestCommand {
            from: self.card,
            to: NodeId::scheduler(peer),
            term: self.state.current_term,
            payload: CommandPayload::Synchronize(SynchronizePayload {
                prev_index,
                prev_term: self.log.term_at(prev_index),
                entries: self.log.range(next, self.log.last_index()),
                commit_index: self.state.commit_index,
            }),
        });
    }

    fn peers(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.state.cohort_size).filter(move |&i| i != self.state.id)
    }

    /// Leader-side commit advancement: the largest index replicated on a
    /// strict majority commits, but only when it belongs to the current term.
    fn advance_commit_index(&mut self) {
        if !self.state.is_leader() {
            return;
        }
        let median = self.state.majority_match_index(self.log.last_index());
        if median > self.state.commit_index && self.log.term_at(median) == self.state.current_term
        {
            tracing::debug!(
                node = %self.card,
                commit_index = median,
                "Commit index advanced"
            );
            self.state.commit_index = median;
        }
    }

    /// Dispatcher bridge: enqueue newly committed jobs to their assigned
    /// workers. Only the leader dispatches; followers just advance the
    /// marker so a later election does not replay old entries.
    fn dispatch_committed(&mut self) {
        while self.applied_index < self.state.commit_index {
            self.applied_index += 1;
            let Some(entry) = self.log.entry(self.applied_index) else {
                break;
            };
            if !self.state.is_leader() || entry.kind != EntryKind::OpenJob {
                continue;
            }
            let job: Job = entry.job.clone();
            tracing::info!(
                node = %self.card,
                job = %job.reference(),
                worker_id = entry.worker_id,
                "Dispatching committed job"
            );
            self.router.send_job(entry.worker_id, job);
        }
    }

    fn snapshot(&self) -> ReplicaSnapshot {
        ReplicaSnapshot {
            id: self.state.id,
            role: self.state.role,
            current_term: self.state.current_term,
            voted_for: self.state.voted_for,
            leader_id: self.state.leader_id,
            commit_index: self.state.commit_index,
            is_started: self.state.is_started,
            is_crashed: self.state.is_crashed,
            log: self.log.entries().to_vec(),
            next_index: self.state.next_index.clone(),
            match_index: self.state.match_index.clone(),
        }
    }

    fn publish_snapshot(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}
