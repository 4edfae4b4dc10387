//! Cluster assembly: builds the transport, spawns every actor and exposes
//! the control surface the shell (and the test harness) drives.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::{ClientNode, Submission};
use crate::config::ClusterConfig;
use crate::error::{Result, SchedError};
use crate::jobs::Job;
use crate::raft::replica::{ReplicaSnapshot, SchedulerReplica};
use crate::raft::state::RaftRole;
use crate::transport::{CommandPayload, NodeId, RequestCommand, Router};
use crate::worker::WorkerNode;

pub struct SchedulerHandle {
    pub id: u64,
    pub snapshot: watch::Receiver<ReplicaSnapshot>,
}

pub struct WorkerHandle {
    pub id: u64,
    pub completed: Arc<RwLock<Vec<Job>>>,
}

pub struct Cluster {
    config: ClusterConfig,
    router: Router,
    pub schedulers: Vec<SchedulerHandle>,
    pub workers: Vec<WorkerHandle>,
    clients: Vec<mpsc::Sender<Submission>>,
    next_client: AtomicUsize,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Cluster {
    /// Validate the configuration, wire up all mailboxes and spawn one task
    /// per node.
    pub fn spawn(config: ClusterConfig) -> Result<Self> {
        config.validate()?;

        let (router, scheduler_inboxes, worker_inboxes, client_inboxes) = Router::build(&config);
        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        let mut schedulers = Vec::new();
        for (id, inbox) in scheduler_inboxes.into_iter().enumerate() {
            let (replica, snapshot) =
                SchedulerReplica::new(id as u64, config.clone(), router.clone(), inbox);
            schedulers.push(SchedulerHandle {
                id: id as u64,
                snapshot,
            });
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                replica.run(cancel).await;
            }));
        }

        let mut workers = Vec::new();
        for (id, inbox) in worker_inboxes.into_iter().enumerate() {
            let (worker, completed) = WorkerNode::new(id as u64, inbox);
            workers.push(WorkerHandle {
                id: id as u64,
                completed,
            });
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                worker.run(cancel).await;
            }));
        }

        let mut clients = Vec::new();
        for (id, inbox) in client_inboxes.into_iter().enumerate() {
            let (client, submit_tx) =
                ClientNode::new(id as u64, inbox, config.clone(), router.clone());
            clients.push(submit_tx);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                client.run(cancel).await;
            }));
        }

        tracing::info!(
            schedulers = config.scheduler_node_count,
            workers = config.worker_node_count,
            clients = config.client_node_count,
            "Cluster spawned"
        );

        Ok(Self {
            config,
            router,
            schedulers,
            workers,
            clients,
            next_client: AtomicUsize::new(0),
            cancel,
            handles,
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Broadcast the Start command to the whole cohort.
    pub fn start_all(&self) {
        for id in 0..self.config.scheduler_node_count {
            self.send_control(id, CommandPayload::Start);
        }
    }

    pub fn crash(&self, id: u64) -> Result<()> {
        self.check_scheduler(id)?;
        self.send_control(id, CommandPayload::Crash);
        Ok(())
    }

    pub fn recover(&self, id: u64) -> Result<()> {
        self.check_scheduler(id)?;
        self.send_control(id, CommandPayload::Recover);
        Ok(())
    }

    /// Hand a submission to the next client, round-robin.
    pub async fn submit(&self, input: String) -> Result<()> {
        self.submit_via(input, None).await
    }

    /// Hand a submission to the next client with an explicit first target.
    pub async fn submit_via(&self, input: String, first_target: Option<u64>) -> Result<()> {
        let index = self.next_client.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        self.clients[index]
            .send(Submission {
                input,
                first_target,
            })
            .await
            .map_err(|_| SchedError::ChannelClosed("client submissions"))
    }

    pub fn snapshot(&self, id: u64) -> Result<ReplicaSnapshot> {
        self.check_scheduler(id)?;
        Ok(self.schedulers[id as usize].snapshot.borrow().clone())
    }

    pub fn snapshots(&self) -> Vec<ReplicaSnapshot> {
        self.schedulers
            .iter()
            .map(|handle| handle.snapshot.borrow().clone())
            .collect()
    }

    /// The live leader, if one is currently known: a non-crashed replica in
    /// the Leader role. A crashed replica may still believe it leads; it is
    /// not counted here.
    pub fn leader_id(&self) -> Option<u64> {
        self.snapshots()
            .iter()
            .filter(|snap| snap.role == RaftRole::Leader && !snap.is_crashed)
            .max_by_key(|snap| snap.current_term)
            .map(|snap| snap.id)
    }

    /// Cancel every actor and wait for them to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
        tracing::info!("Cluster stopped");
    }

    fn check_scheduler(&self, id: u64) -> Result<()> {
        if id >= self.config.scheduler_node_count {
            return Err(SchedError::UnknownScheduler(id));
        }
        Ok(())
    }

    fn send_control(&self, id: u64, payload: CommandPayload) {
        self.router.send_request_command(RequestCommand {
            from: NodeId::client(0),
            to: NodeId::scheduler(id),
            term: 0,
            payload,
        });
    }
}
