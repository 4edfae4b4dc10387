//! In-process message transport for the cohort.
//!
//! Every node owns bounded inbound mailboxes; the [`Router`] is the immutable
//! startup snapshot of all sender halves, cloned into each actor. Sends never
//! block: a full mailbox drops the message (drop-newest); senders resend on
//! their next heartbeat or timeout.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::ClusterConfig;
use crate::jobs::picker::LoadOracle;
use crate::jobs::Job;
use crate::raft::log::LogEntry;

/// Node type within the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeKind {
    Client,
    Scheduler,
    Worker,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Client => write!(f, "Client"),
            NodeKind::Scheduler => write!(f, "Scheduler"),
            NodeKind::Worker => write!(f, "Worker"),
        }
    }
}

/// Identity card of a node: its type and id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeId {
    pub kind: NodeKind,
    pub id: u64,
}

impl NodeId {
    pub fn client(id: u64) -> Self {
        Self {
            kind: NodeKind::Client,
            id,
        }
    }

    pub fn scheduler(id: u64) -> Self {
        Self {
            kind: NodeKind::Scheduler,
            id,
        }
    }

    pub fn worker(id: u64) -> Self {
        Self {
            kind: NodeKind::Worker,
            id,
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.kind, self.id)
    }
}

/// Kinds of command traffic carried by [`RequestCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandKind {
    Synchronize,
    AppendEntry,
    Start,
    Crash,
    Recover,
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandKind::Synchronize => write!(f, "Synchronize"),
            CommandKind::AppendEntry => write!(f, "AppendEntry"),
            CommandKind::Start => write!(f, "Start"),
            CommandKind::Crash => write!(f, "Crash"),
            CommandKind::Recover => write!(f, "Recover"),
        }
    }
}

/// Body of a `Synchronize` request: the leader's consistency point, the
/// entries from `next_index` onward, and its commit index.
#[derive(Debug, Clone)]
pub struct SynchronizePayload {
    pub prev_index: u64,
    pub prev_term: u64,
    pub entries: Vec<LogEntry>,
    pub commit_index: u64,
}

/// Payload of a command request.
#[derive(Debug, Clone)]
pub enum CommandPayload {
    /// Leader-to-follower log replication; doubles as the heartbeat.
    Synchronize(SynchronizePayload),
    /// Client submission of a single entry.
    AppendEntry { entry: LogEntry },
    Start,
    Crash,
    Recover,
}

impl CommandPayload {
    pub fn kind(&self) -> CommandKind {
        match self {
            CommandPayload::Synchronize(_) => CommandKind::Synchronize,
            CommandPayload::AppendEntry { .. } => CommandKind::AppendEntry,
            CommandPayload::Start => CommandKind::Start,
            CommandPayload::Crash => CommandKind::Crash,
            CommandPayload::Recover => CommandKind::Recover,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestCommand {
    pub from: NodeId,
    pub to: NodeId,
    pub term: u64,
    pub payload: CommandPayload,
}

#[derive(Debug, Clone)]
pub struct ResponseCommand {
    pub from: NodeId,
    pub to: NodeId,
    pub term: u64,
    pub kind: CommandKind,
    pub success: bool,
    pub match_index: u64,
    pub leader_id: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RequestVote {
    pub from: NodeId,
    pub to: NodeId,
    pub term: u64,
    pub candidate_id: u64,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone)]
pub struct ResponseVote {
    pub from: NodeId,
    pub to: NodeId,
    pub term: u64,
    pub vote_granted: bool,
}

/// Sender halves of one scheduler's mailboxes.
#[derive(Debug, Clone)]
pub struct SchedulerPorts {
    pub request_command: mpsc::Sender<RequestCommand>,
    pub response_command: mpsc::Sender<ResponseCommand>,
    pub request_vote: mpsc::Sender<RequestVote>,
    pub response_vote: mpsc::Sender<ResponseVote>,
}

/// Receiver halves of one scheduler's mailboxes.
#[derive(Debug)]
pub struct SchedulerInbox {
    pub request_command: mpsc::Receiver<RequestCommand>,
    pub response_command: mpsc::Receiver<ResponseCommand>,
    pub request_vote: mpsc::Receiver<RequestVote>,
    pub response_vote: mpsc::Receiver<ResponseVote>,
}

#[derive(Debug, Clone)]
pub struct WorkerPorts {
    pub jobs: mpsc::Sender<Job>,
}

#[derive(Debug)]
pub struct WorkerInbox {
    pub jobs: mpsc::Receiver<Job>,
}

#[derive(Debug, Clone)]
pub struct ClientPorts {
    pub response_command: mpsc::Sender<ResponseCommand>,
}

#[derive(Debug)]
pub struct ClientInbox {
    pub response_command: mpsc::Receiver<ResponseCommand>,
}

/// Immutable routing snapshot over every node's inbound mailboxes.
#[derive(Debug, Clone)]
pub struct Router {
    schedulers: Vec<SchedulerPorts>,
    workers: Vec<WorkerPorts>,
    clients: Vec<ClientPorts>,
}

impl Router {
    /// Build all mailboxes for the configured topology, returning the router
    /// and the receiver halves to hand to each actor.
    pub fn build(
        config: &ClusterConfig,
    ) -> (
        Router,
        Vec<SchedulerInbox>,
        Vec<WorkerInbox>,
        Vec<ClientInbox>,
    ) {
        let cap = config.channel_buffer_size;

        let mut schedulers = Vec::new();
        let mut scheduler_inboxes = Vec::new();
        for _ in 0..config.scheduler_node_count {
            let (request_command_tx, request_command_rx) = mpsc::channel(cap);
            let (response_command_tx, response_command_rx) = mpsc::channel(cap);
            let (request_vote_tx, request_vote_rx) = mpsc::channel(cap);
            let (response_vote_tx, response_vote_rx) = mpsc::channel(cap);
            schedulers.push(SchedulerPorts {
                request_command: request_command_tx,
                response_command: response_command_tx,
                request_vote: request_vote_tx,
                response_vote: response_vote_tx,
            });
            scheduler_inboxes.push(SchedulerInbox {
                request_command: request_command_rx,
                response_command: response_command_rx,
                request_vote: request_vote_rx,
                response_vote: response_vote_rx,
            });
        }

        let mut workers = Vec::new();
        let mut worker_inboxes = Vec::new();
        for _ in 0..config.worker_node_count {
            let (jobs_tx, jobs_rx) = mpsc::channel(cap);
            workers.push(WorkerPorts { jobs: jobs_tx });
            worker_inboxes.push(WorkerInbox { jobs: jobs_rx });
        }

        let mut clients = Vec::new();
        let mut client_inboxes = Vec::new();
        for _ in 0..config.client_node_count {
            let (response_command_tx, response_command_rx) = mpsc::channel(cap);
            clients.push(ClientPorts {
                response_command: response_command_tx,
            });
            client_inboxes.push(ClientInbox {
                response_command: response_command_rx,
            });
        }

        (
            Router {
                schedulers,
                workers,
                clients,
            },
            scheduler_inboxes,
            worker_inboxes,
            client_inboxes,
        )
    }

    pub fn scheduler_count(&self) -> u64 {
        self.schedulers.len() as u64
    }

    pub fn send_request_command(&self, request: RequestCommand) {
        let to = request.to;
        let Some(ports) = self.scheduler_ports(to) else {
            tracing::error!(to = %to, "No scheduler mailbox for request command");
            return;
        };
        deliver(ports.request_command.try_send(request), to, "RequestCommand");
    }

    /// Route a command response to its recipient: schedulers and clients
    /// both receive them.
    pub fn send_response_command(&self, response: ResponseCommand) {
        let to = response.to;
        match to.kind {
            NodeKind::Scheduler => {
                let Some(ports) = self.scheduler_ports(to) else {
                    tracing::error!(to = %to, "No scheduler mailbox for response command");
                    return;
                };
                deliver(
                    ports.response_command.try_send(response),
                    to,
                    "ResponseCommand",
                );
            }
            NodeKind::Client => {
                let Some(ports) = self.clients.get(to.id as usize) else {
                    tracing::error!(to = %to, "No client mailbox for response command");
                    return;
                };
                deliver(
                    ports.response_command.try_send(response),
                    to,
                    "ResponseCommand",
                );
            }
            NodeKind::Worker => {
                tracing::error!(to = %to, "Workers do not receive command responses");
            }
        }
    }

    pub fn send_request_vote(&self, request: RequestVote) {
        let to = request.to;
        let Some(ports) = self.scheduler_ports(to) else {
            tracing::error!(to = %to, "No scheduler mailbox for vote request");
            return;
        };
        deliver(ports.request_vote.try_send(request), to, "RequestVote");
    }

    pub fn send_response_vote(&self, response: ResponseVote) {
        let to = response.to;
        let Some(ports) = self.scheduler_ports(to) else {
            tracing::error!(to = %to, "No scheduler mailbox for vote response");
            return;
        };
        deliver(ports.response_vote.try_send(response), to, "ResponseVote");
    }

    /// Enqueue a committed job to a worker. Best-effort: a full queue drops
    /// the job with a warning.
    pub fn send_job(&self, worker_id: u64, job: Job) {
        let to = NodeId::worker(worker_id);
        let Some(ports) = self.workers.get(worker_id as usize) else {
            tracing::error!(to = %to, "No worker mailbox for job dispatch");
            return;
        };
        deliver(ports.jobs.try_send(job), to, "Job");
    }

    fn scheduler_ports(&self, to: NodeId) -> Option<&SchedulerPorts> {
        if to.kind != NodeKind::Scheduler {
            return None;
        }
        self.schedulers.get(to.id as usize)
    }
}

impl LoadOracle for Router {
    fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Number of jobs sitting in the worker's inbound queue. Reads the
    /// channel's free capacity, so the value may be momentarily stale.
    fn queue_depth(&self, worker_id: u64) -> usize {
        self.workers
            .get(worker_id as usize)
            .map(|w| w.jobs.max_capacity() - w.jobs.capacity())
            .unwrap_or(usize::MAX)
    }
}

fn deliver<T>(result: Result<(), mpsc::error::TrySendError<T>>, to: NodeId, what: &'static str) {
    match result {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!(to = %to, message = what, "Mailbox full, dropping message");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!(to = %to, message = what, "Mailbox closed, dropping message");
        }
    }
}
