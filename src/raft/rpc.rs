//! RPC handlers for the consensus core.
//!
//! These are pure functions over a replica's state and log; the actor in
//! `replica` routes mailbox traffic here and sends the returned responses.
//! Crash handling happens at the actor level: a crashed replica never
//! reaches these functions.

use crate::jobs::JobStatus;
use crate::raft::log::{Log, LogEntry};
use crate::raft::state::{RaftRole, ReplicaState};
use crate::transport::{
    CommandKind, NodeId, RequestVote, ResponseCommand, ResponseVote, SynchronizePayload,
};

/// Handle a RequestVote RPC.
///
/// Grants iff the request is for the current term, this replica has not yet
/// voted for someone else, and the candidate's log is at least as up-to-date
/// as ours.
pub fn handle_request_vote(
    state: &mut ReplicaState,
    log: &Log,
    req: &RequestVote,
) -> ResponseVote {
    state.observe_term(req.term);

    let last_log_index = log.last_index();
    let last_log_term = log.term_at(last_log_index);
    let log_up_to_date = req.last_log_term > last_log_term
        || (req.last_log_term == last_log_term && req.last_log_index >= last_log_index);

    let vote_granted =
        state.current_term == req.term && state.can_vote_for(req.candidate_id) && log_up_to_date;
    if vote_granted {
        state.voted_for = Some(req.candidate_id);
    }

    tracing::debug!(
        id = state.id,
        candidate = req.candidate_id,
        term = req.term,
        granted = vote_granted,
        "RequestVote handled"
    );

    ResponseVote {
        from: NodeId::scheduler(state.id),
        to: req.from,
        term: state.current_term,
        vote_granted,
    }
}

/// Handle a Synchronize request (replication and heartbeat).
///
/// When the consistency check passes, the leader's entries replace the
/// follower's tail and everything after the last written index is
/// truncated; this holds for empty heartbeats too, where the last written
/// index is `prev_index` itself.
pub fn handle_synchronize(
    state: &mut ReplicaState,
    log: &mut Log,
    from: NodeId,
    term: u64,
    sync: &SynchronizePayload,
) -> ResponseCommand {
    state.observe_term(term);

    let me = NodeId::scheduler(state.id);
    if state.current_term > term {
        tracing::debug!(
            id = state.id,
            request_term = term,
            current_term = state.current_term,
            "Rejecting synchronize from stale leader"
        );
        return ResponseCommand {
            from: me,
            to: from,
            term: state.current_term,
            kind: CommandKind::Synchronize,
            success: false,
            match_index: 0,
            leader_id: None,
        };
    }

    // Only a leader of the current term sends Synchronize.
    state.leader_id = Some(from.id);
    if state.role != RaftRole::Follower {
        tracing::info!(id = state.id, term = state.current_term, "Stepping down to follower");
        state.role = RaftRole::Follower;
    }

    let consistent = sync.prev_index == 0
        || (sync.prev_index <= log.last_index()
            && log.term_at(sync.prev_index) == sync.prev_term);

    if !consistent {
        tracing::debug!(
            id = state.id,
            prev_index = sync.prev_index,
            prev_term = sync.prev_term,
            last_index = log.last_index(),
            "Log inconsistent with leader, rejecting synchronize"
        );
        return ResponseCommand {
            from: me,
            to: from,
            term: state.current_term,
            kind: CommandKind::Synchronize,
            success: false,
            match_index: 0,
            leader_id: None,
        };
    }

    let mut index = sync.prev_index;
    for entry in &sync.entries {
        index += 1;
        if log.term_at(index) != entry.term {
            log.put(index, entry.clone());
        }
    }
    log.truncate_after(index);
    state.commit_index = sync.commit_index.min(index);

    if !sync.entries.is_empty() {
        tracing::debug!(
            id = state.id,
            appended = sync.entries.len(),
            last_index = log.last_index(),
            commit_index = state.commit_index,
            "Log aligned with leader"
        );
    }

    ResponseCommand {
        from: me,
        to: from,
        term: state.current_term,
        kind: CommandKind::Synchronize,
        success: true,
        match_index: index,
        leader_id: None,
    }
}

/// Handle a Synchronize response on the leader.
pub fn handle_synchronize_response(state: &mut ReplicaState, response: &ResponseCommand) {
    state.observe_term(response.term);

    if state.role != RaftRole::Leader || state.current_term != response.term {
        tracing::debug!(
            id = state.id,
            from = %response.from,
            "Not leader of the response term, ignoring synchronize response"
        );
        return;
    }

    let follower = response.from.id as usize;
    if response.success {
        state.match_index[follower] = response.match_index;
        state.next_index[follower] = response.match_index + 1;
    } else {
        // Linear back-off toward the agreement point.
        state.next_index[follower] = state.next_index[follower].saturating_sub(1).max(1);
    }
}

/// Handle an AppendEntry submission.
///
/// The leader stamps the entry (term, worker assignment, job identity) and
/// appends it; anyone else rejects with its best-known leader as a redirect
/// hint. `pick` is consulted only on the leader path.
pub fn handle_append_entry(
    state: &mut ReplicaState,
    log: &mut Log,
    from: NodeId,
    term: u64,
    mut entry: LogEntry,
    pick: impl FnOnce() -> u64,
) -> ResponseCommand {
    state.observe_term(term);

    let me = NodeId::scheduler(state.id);
    if state.role != RaftRole::Leader {
        tracing::debug!(
            id = state.id,
            leader_hint = ?state.leader_id,
            "Not the leader, redirecting append entry"
        );
        return ResponseCommand {
            from: me,
            to: from,
            term: state.current_term,
            kind: CommandKind::AppendEntry,
            success: false,
            match_index: 0,
            leader_id: state.leader_id,
        };
    }

    entry.term = state.current_term;
    entry.worker_id = pick();
    entry.job.id = state.next_job_id();
    entry.job.term = state.current_term;
    entry.job.status = JobStatus::Waiting;

    tracing::info!(
        id = state.id,
        job = %entry.job.reference(),
        worker_id = entry.worker_id,
        "Accepted job submission"
    );

    let index = log.append(entry);
    state.next_index[state.id as usize] = index + 1;

    ResponseCommand {
        from: me,
        to: from,
        term: state.current_term,
        kind: CommandKind::AppendEntry,
        success: true,
        match_index: index,
        leader_id: Some(state.id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::Job;
    use crate::raft::log::EntryKind;

    fn entry(term: u64, input: &str) -> LogEntry {
        let mut e = LogEntry::open(Job::new(input.to_string()));
        e.term = term;
        e
    }

    fn vote_request(term: u64, candidate: u64, last_index: u64, last_term: u64) -> RequestVote {
        RequestVote {
            from: NodeId::scheduler(candidate),
            to: NodeId::scheduler(1),
            term,
            candidate_id: candidate,
            last_log_index: last_index,
            last_log_term: last_term,
        }
    }

    fn sync(prev_index: u64, prev_term: u64, entries: Vec<LogEntry>, commit: u64) -> SynchronizePayload {
        SynchronizePayload {
            prev_index,
            prev_term,
            entries,
            commit_index: commit,
        }
    }

    #[test]
    fn test_vote_granted_and_term_adopted() {
        let mut state = ReplicaState::new(1, 3);
        let log = Log::new();
        state.current_term = 1;

        let resp = handle_request_vote(&mut state, &log, &vote_request(2, 2, 0, 0));

        assert!(resp.vote_granted);
        assert_eq!(resp.term, 2);
        assert_eq!(state.voted_for, Some(2));
        assert_eq!(state.current_term, 2);
    }

    #[test]
    fn test_vote_rejected_for_stale_term() {
        let mut state = ReplicaState::new(1, 3);
        let log = Log::new();
        state.current_term = 5;

        let resp = handle_request_vote(&mut state, &log, &vote_request(3, 2, 0, 0));

        assert!(!resp.vote_granted);
        assert_eq!(resp.term, 5);
        assert_eq!(state.voted_for, None);
    }

    #[test]
    fn test_vote_rejected_when_already_voted() {
        let mut state = ReplicaState::new(1, 3);
        let log = Log::new();
        state.current_term = 2;
        state.voted_for = Some(0);

        let resp = handle_request_vote(&mut state, &log, &vote_request(2, 2, 0, 0));
        assert!(!resp.vote_granted);

        // Re-voting for the same candidate is fine.
        state.voted_for = Some(2);
        let resp = handle_request_vote(&mut state, &log, &vote_request(2, 2, 0, 0));
        assert!(resp.vote_granted);
    }

    #[test]
    fn test_vote_rejected_for_shorter_log_at_equal_term() {
        let mut state = ReplicaState::new(1, 3);
        let mut log = Log::new();
        log.append(entry(1, "a"));
        log.append(entry(1, "b"));
        state.current_term = 2;

        // Equal last term, strictly smaller last index: must be rejected.
        let resp = handle_request_vote(&mut state, &log, &vote_request(2, 2, 1, 1));
        assert!(!resp.vote_granted);

        // Equal last term, equal index: granted.
        let resp = handle_request_vote(&mut state, &log, &vote_request(2, 2, 2, 1));
        assert!(resp.vote_granted);
    }

    #[test]
    fn test_vote_granted_for_higher_last_term() {
        let mut state = ReplicaState::new(1, 3);
        let mut log = Log::new();
        log.append(entry(1, "a"));
        log.append(entry(1, "b"));
        state.current_term = 3;

        // Shorter log but later last term wins the up-to-date comparison.
        let resp = handle_request_vote(&mut state, &log, &vote_request(3, 2, 1, 2));
        assert!(resp.vote_granted);
    }

    #[test]
    fn test_synchronize_rejects_stale_leader() {
        let mut state = ReplicaState::new(1, 3);
        let mut log = Log::new();
        state.current_term = 4;

        let resp = handle_synchronize(
            &mut state,
            &mut log,
            NodeId::scheduler(0),
            2,
            &sync(0, 0, vec![entry(2, "a")], 1),
        );

        assert!(!resp.success);
        assert_eq!(resp.match_index, 0);
        assert_eq!(resp.term, 4);
        assert!(log.is_empty());
    }

    #[test]
    fn test_synchronize_appends_and_commits() {
        let mut state = ReplicaState::new(1, 3);
        let mut log = Log::new();

        let resp = handle_synchronize(
            &mut state,
            &mut log,
            NodeId::scheduler(0),
            1,
            &sync(0, 0, vec![entry(1, "a"), entry(1, "b")], 1),
        );

        assert!(resp.success);
        assert_eq!(resp.match_index, 2);
        assert_eq!(log.last_index(), 2);
        assert_eq!(state.commit_index, 1);
        assert_eq!(state.leader_id, Some(0));
        assert_eq!(state.current_term, 1);
    }

    #[test]
    fn test_synchronize_demotes_candidate_of_same_term() {
        let mut state = ReplicaState::new(1, 3);
        let mut log = Log::new();
        state.begin_election(); // term 1, candidate

        let resp = handle_synchronize(
            &mut state,
            &mut log,
            NodeId::scheduler(0),
            1,
            &sync(0, 0, Vec::new(), 0),
        );

        assert!(resp.success);
        assert_eq!(state.role, RaftRole::Follower);
        // Same-term step-down keeps the vote.
        assert_eq!(state.voted_for, Some(1));
    }

    #[test]
    fn test_synchronize_rejects_inconsistent_prev() {
        let mut state = ReplicaState::new(1, 3);
        let mut log = Log::new();
        log.append(entry(1, "a"));

        // prev_index beyond our tail.
        let resp = handle_synchronize(
            &mut state,
            &mut log,
            NodeId::scheduler(0),
            2,
            &sync(3, 2, vec![entry(2, "d")], 3),
        );
        assert!(!resp.success);
        assert_eq!(resp.match_index, 0);

        // prev term mismatch.
        let resp = handle_synchronize(
            &mut state,
            &mut log,
            NodeId::scheduler(0),
            2,
            &sync(1, 2, vec![entry(2, "b")], 2),
        );
        assert!(!resp.success);
        assert_eq!(log.last_index(), 1);
    }

    #[test]
    fn test_synchronize_overwrites_divergent_tail() {
        let mut state = ReplicaState::new(1, 3);
        let mut log = Log::new();
        log.append(entry(1, "a"));
        log.append(entry(1, "stale-b"));
        log.append(entry(1, "stale-c"));

        let fresh = vec![entry(2, "b"), entry(2, "c")];
        let resp = handle_synchronize(
            &mut state,
            &mut log,
            NodeId::scheduler(0),
            2,
            &sync(1, 1, fresh.clone(), 3),
        );

        assert!(resp.success);
        assert_eq!(resp.match_index, 3);
        assert_eq!(log.entry(2).unwrap().job.input, "b");
        assert_eq!(log.entry(3).unwrap().job.input, "c");
        assert_eq!(log.term_at(2), 2);
        assert_eq!(state.commit_index, 3);
    }

    #[test]
    fn test_heartbeat_truncates_unauthorized_tail() {
        let mut state = ReplicaState::new(1, 3);
        let mut log = Log::new();
        log.append(entry(1, "a"));
        log.append(entry(1, "b"));
        log.append(entry(1, "orphan"));

        // Empty synchronize consistent through index 2: index 3 goes away.
        let resp = handle_synchronize(
            &mut state,
            &mut log,
            NodeId::scheduler(0),
            2,
            &sync(2, 1, Vec::new(), 2),
        );

        assert!(resp.success);
        assert_eq!(resp.match_index, 2);
        assert_eq!(log.last_index(), 2);
        assert_eq!(state.commit_index, 2);
    }

    #[test]
    fn test_empty_synchronize_at_origin_truncates_all() {
        let mut state = ReplicaState::new(1, 3);
        let mut log = Log::new();
        log.append(entry(1, "a"));
        log.append(entry(1, "b"));

        let resp = handle_synchronize(
            &mut state,
            &mut log,
            NodeId::scheduler(0),
            2,
            &sync(0, 0, Vec::new(), 0),
        );

        assert!(resp.success);
        assert_eq!(resp.match_index, 0);
        assert!(log.is_empty());
    }

    #[test]
    fn test_commit_index_capped_by_written_tail() {
        let mut state = ReplicaState::new(1, 3);
        let mut log = Log::new();

        let resp = handle_synchronize(
            &mut state,
            &mut log,
            NodeId::scheduler(0),
            1,
            &sync(0, 0, vec![entry(1, "a")], 9),
        );

        assert!(resp.success);
        assert_eq!(state.commit_index, 1);
    }

    #[test]
    fn test_synchronize_response_advances_leader_bookkeeping() {
        let mut state = ReplicaState::new(0, 3);
        state.begin_election();
        state.become_leader(4);

        handle_synchronize_response(
            &mut state,
            &ResponseCommand {
                from: NodeId::scheduler(2),
                to: NodeId::scheduler(0),
                term: 1,
                kind: CommandKind::Synchronize,
                success: true,
                match_index: 4,
                leader_id: None,
            },
        );

        assert_eq!(state.match_index[2], 4);
        assert_eq!(state.next_index[2], 5);
    }

    #[test]
    fn test_synchronize_response_backoff_floors_at_one() {
        let mut state = ReplicaState::new(0, 3);
        state.begin_election();
        state.become_leader(1);

        for _ in 0..5 {
            handle_synchronize_response(
                &mut state,
                &ResponseCommand {
                    from: NodeId::scheduler(1),
                    to: NodeId::scheduler(0),
                    term: 1,
                    kind: CommandKind::Synchronize,
                    success: false,
                    match_index: 0,
                    leader_id: None,
                },
            );
        }

        assert_eq!(state.next_index[1], 1);
        assert_eq!(state.match_index[1], 0);
    }

    #[test]
    fn test_synchronize_response_with_higher_term_dethrones() {
        let mut state = ReplicaState::new(0, 3);
        state.begin_election();
        state.become_leader(0);

        handle_synchronize_response(
            &mut state,
            &ResponseCommand {
                from: NodeId::scheduler(1),
                to: NodeId::scheduler(0),
                term: 3,
                kind: CommandKind::Synchronize,
                success: false,
                match_index: 0,
                leader_id: None,
            },
        );

        assert_eq!(state.role, RaftRole::Follower);
        assert_eq!(state.current_term, 3);
        // Stale-term body ignored.
        assert_eq!(state.next_index[1], 1);
    }

    #[test]
    fn test_append_entry_stamps_and_appends_on_leader() {
        let mut state = ReplicaState::new(0, 3);
        let mut log = Log::new();
        state.begin_election();
        state.begin_election();
        state.become_leader(0); // term 2

        let resp = handle_append_entry(
            &mut state,
            &mut log,
            NodeId::client(0),
            0,
            LogEntry::open(Job::new("A".to_string())),
            || 1,
        );

        assert!(resp.success);
        assert_eq!(resp.leader_id, Some(0));
        assert_eq!(log.last_index(), 1);

        let stored = log.entry(1).unwrap();
        assert_eq!(stored.kind, EntryKind::OpenJob);
        assert_eq!(stored.term, 2);
        assert_eq!(stored.worker_id, 1);
        assert_eq!(stored.job.id, 1);
        assert_eq!(stored.job.term, 2);
        assert_eq!(stored.job.status, JobStatus::Waiting);
        assert_eq!(state.next_index[0], 2);
    }

    #[test]
    fn test_append_entry_ids_increase() {
        let mut state = ReplicaState::new(0, 1);
        let mut log = Log::new();
        state.begin_election();
        state.become_leader(0);

        for input in ["a", "b", "c"] {
            handle_append_entry(
                &mut state,
                &mut log,
                NodeId::client(0),
                0,
                LogEntry::open(Job::new(input.to_string())),
                || 0,
            );
        }

        assert_eq!(log.entry(1).unwrap().job.id, 1);
        assert_eq!(log.entry(2).unwrap().job.id, 2);
        assert_eq!(log.entry(3).unwrap().job.id, 3);
    }

    #[test]
    fn test_append_entry_redirects_from_follower() {
        let mut state = ReplicaState::new(1, 3);
        let mut log = Log::new();
        state.leader_id = Some(2);

        let resp = handle_append_entry(
            &mut state,
            &mut log,
            NodeId::client(0),
            0,
            LogEntry::open(Job::new("A".to_string())),
            || unreachable!("follower must not pick a worker"),
        );

        assert!(!resp.success);
        assert_eq!(resp.leader_id, Some(2));
        assert!(log.is_empty());
    }

    #[test]
    fn test_append_entry_redirect_without_known_leader() {
        let mut state = ReplicaState::new(1, 3);
        let mut log = Log::new();

        let resp = handle_append_entry(
            &mut state,
            &mut log,
            NodeId::client(0),
            0,
            LogEntry::open(Job::new("A".to_string())),
            || 0,
        );

        assert!(!resp.success);
        assert_eq!(resp.leader_id, None);
    }
}
