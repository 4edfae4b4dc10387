use serde::Serialize;

/// Role of a scheduler replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

impl std::fmt::Display for RaftRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaftRole::Follower => write!(f, "follower"),
            RaftRole::Candidate => write!(f, "candidate"),
            RaftRole::Leader => write!(f, "leader"),
        }
    }
}

/// Consensus state of one scheduler replica. The log itself lives in
/// [`crate::raft::log::Log`]; everything else a replica tracks is here.
///
/// Safety invariants maintained across this module and `rpc`:
///
/// - **Election safety**: at most one leader per term. Each replica votes
///   for at most one candidate per term (`voted_for`); a candidate needs a
///   strict majority.
/// - **Leader append-only**: leaders only ever append via the ingest path;
///   tail truncation happens on followers during replication.
/// - **Leader completeness**: the vote rule rejects candidates whose log is
///   behind, and leaders only commit entries of their own term by count.
#[derive(Debug)]
pub struct ReplicaState {
    pub id: u64,
    pub cohort_size: u64,

    // Semantically the Raft persistent set (in-memory for this system).
    pub current_term: u64,
    pub voted_for: Option<u64>,

    // Volatile state.
    pub role: RaftRole,
    pub commit_index: u64,
    pub leader_id: Option<u64>,
    pub vote_count: u64,
    pub is_started: bool,
    pub is_crashed: bool,

    // Leader bookkeeping, reinitialized on election.
    pub next_index: Vec<u64>,
    pub match_index: Vec<u64>,
    job_id_counter: u64,
}

impl ReplicaState {
    pub fn new(id: u64, cohort_size: u64) -> Self {
        Self {
            id,
            cohort_size,
            current_term: 0,
            voted_for: None,
            role: RaftRole::Follower,
            commit_index: 0,
            leader_id: None,
            vote_count: 0,
            is_started: false,
            is_crashed: false,
            next_index: vec![1; cohort_size as usize],
            match_index: vec![0; cohort_size as usize],
            job_id_counter: 0,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.role == RaftRole::Leader
    }

    /// Universal term update: any message carrying a higher term demotes the
    /// replica to follower and clears its vote.
    pub fn observe_term(&mut self, term: u64) {
        if term > self.current_term {
            tracing::debug!(
                id = self.id,
                old_term = self.current_term,
                new_term = term,
                old_role = %self.role,
                "Observed higher term, stepping down to follower"
            );
            self.current_term = term;
            self.role = RaftRole::Follower;
            self.voted_for = None;
            self.vote_count = 0;
        }
    }

    /// Enter a new election: bump the term, vote for self.
    pub fn begin_election(&mut self) {
        self.role = RaftRole::Candidate;
        self.current_term += 1;
        self.voted_for = Some(self.id);
        self.vote_count = 1;
    }

    /// Record one granted vote; true once a strict majority is reached.
    pub fn record_vote(&mut self) -> bool {
        self.vote_count += 1;
        self.vote_count > self.cohort_size / 2
    }

    /// Take leadership: reset follower bookkeeping against the current log
    /// tail and restart the job id counter.
    pub fn become_leader(&mut self, last_log_index: u64) {
        self.role = RaftRole::Leader;
        self.leader_id = Some(self.id);
        for next in self.next_index.iter_mut() {
            *next = last_log_index + 1;
        }
        for matched in self.match_index.iter_mut() {
            *matched = 0;
        }
        self.job_id_counter = 0;
    }

    /// Whether a vote can go to `candidate_id` in the current term.
    pub fn can_vote_for(&self, candidate_id: u64) -> bool {
        self.voted_for.is_none() || self.voted_for == Some(candidate_id)
    }

    /// Next job id. Unique within the current term only; `(term, id)` is the
    /// globally unique pair.
    pub fn next_job_id(&mut self) -> u64 {
        self.job_id_counter += 1;
        self.job_id_counter
    }

    /// Largest log index replicated on a strict majority of the cohort,
    /// with this replica's own slot counted at `last_log_index`.
    pub fn majority_match_index(&self, last_log_index: u64) -> u64 {
        let mut matches = self.match_index.clone();
        matches[self.id as usize] = last_log_index;
        matches.sort_unstable();
        matches[(self.cohort_size as usize - 1) / 2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_is_stopped_follower() {
        let state = ReplicaState::new(1, 3);
        assert_eq!(state.role, RaftRole::Follower);
        assert_eq!(state.current_term, 0);
        assert_eq!(state.voted_for, None);
        assert_eq!(state.commit_index, 0);
        assert!(!state.is_started);
        assert!(!state.is_crashed);
        assert_eq!(state.next_index, vec![1, 1, 1]);
        assert_eq!(state.match_index, vec![0, 0, 0]);
    }

    #[test]
    fn test_begin_election_votes_for_self() {
        let mut state = ReplicaState::new(2, 3);
        state.begin_election();
        assert_eq!(state.role, RaftRole::Candidate);
        assert_eq!(state.current_term, 1);
        assert_eq!(state.voted_for, Some(2));
        assert_eq!(state.vote_count, 1);
    }

    #[test]
    fn test_record_vote_majority() {
        let mut state = ReplicaState::new(0, 3);
        state.begin_election();
        // Self vote alone is not a majority of 3; one more is.
        assert!(state.record_vote());

        let mut state = ReplicaState::new(0, 5);
        state.begin_election();
        assert!(!state.record_vote());
        assert!(state.record_vote());
    }

    #[test]
    fn test_single_node_cohort_wins_instantly() {
        let mut state = ReplicaState::new(0, 1);
        state.begin_election();
        // vote_count == 1 > 0 already; the election subsystem checks this
        // via record_vote only for peer responses, so verify the threshold.
        assert!(state.vote_count > state.cohort_size / 2);
    }

    #[test]
    fn test_become_leader_resets_bookkeeping() {
        let mut state = ReplicaState::new(1, 3);
        state.begin_election();
        state.next_job_id();
        state.become_leader(7);
        assert_eq!(state.role, RaftRole::Leader);
        assert_eq!(state.leader_id, Some(1));
        assert_eq!(state.next_index, vec![8, 8, 8]);
        assert_eq!(state.match_index, vec![0, 0, 0]);
        assert_eq!(state.next_job_id(), 1);
    }

    #[test]
    fn test_observe_term_steps_down_and_clears_vote() {
        let mut state = ReplicaState::new(1, 3);
        state.begin_election();
        state.observe_term(5);
        assert_eq!(state.role, RaftRole::Follower);
        assert_eq!(state.current_term, 5);
        assert_eq!(state.voted_for, None);

        // Equal or lower terms change nothing.
        state.voted_for = Some(2);
        state.observe_term(5);
        assert_eq!(state.voted_for, Some(2));
        state.observe_term(3);
        assert_eq!(state.current_term, 5);
    }

    #[test]
    fn test_can_vote_for() {
        let mut state = ReplicaState::new(1, 3);
        assert!(state.can_vote_for(0));
        state.voted_for = Some(0);
        assert!(state.can_vote_for(0));
        assert!(!state.can_vote_for(2));
    }

    #[test]
    fn test_job_ids_increase_within_term() {
        let mut state = ReplicaState::new(0, 3);
        assert_eq!(state.next_job_id(), 1);
        assert_eq!(state.next_job_id(), 2);
        state.become_leader(0);
        assert_eq!(state.next_job_id(), 1);
    }

    #[test]
    fn test_majority_match_index_odd_cohort() {
        let mut state = ReplicaState::new(0, 3);
        state.match_index = vec![0, 5, 0];
        // Self (id 0) counted at its own last index.
        assert_eq!(state.majority_match_index(5), 5);
        state.match_index = vec![0, 0, 0];
        assert_eq!(state.majority_match_index(5), 0);
    }

    #[test]
    fn test_majority_match_index_even_cohort() {
        let mut state = ReplicaState::new(0, 4);
        // Only self and one follower at 5: two of four is not a strict
        // majority, so 5 must not be the median.
        state.match_index = vec![0, 5, 0, 0];
        assert_eq!(state.majority_match_index(5), 0);
        // Three of four at 5 is.
        state.match_index = vec![0, 5, 5, 0];
        assert_eq!(state.majority_match_index(5), 5);
    }

    #[test]
    fn test_majority_match_index_single_node() {
        let state = ReplicaState::new(0, 1);
        assert_eq!(state.majority_match_index(3), 3);
    }
}
