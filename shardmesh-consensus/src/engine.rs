//! Raft-style consensus engine.
//!
//! Keeps the teacher's concurrency shape — `Arc<DashMap<_>>`/`RwLock` state,
//! an `mpsc` message-processing loop, `tokio::spawn`-based periodic tasks,
//! and a manual [`Clone`] impl so spawned tasks can hold their own handle —
//! but the algorithm underneath is leader-based replication instead of a
//! PBFT-style 2/3 vote: a single elected leader per term appends entries and
//! replicates them to followers, who apply them to the cluster state store
//! once a majority has acknowledged.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use dashmap::DashMap;
use rand::Rng;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use shardmesh_security::{SigningContext, VerifyingContext};

use crate::cluster_state::{ClusterStateSnapshot, ClusterStateStore};
use crate::types::{
    AppendEntriesRequest, AppendEntriesResponse, Command, ConsensusConfig, ConsensusMessage,
    LogEntry, LogIndex, NodeRole, PeerId, RequestVoteRequest, RequestVoteResponse, Term,
};

/// Volatile leader-only state, reset every time a node becomes leader.
struct LeaderState {
    next_index: DashMap<PeerId, LogIndex>,
    match_index: DashMap<PeerId, LogIndex>,
}

impl LeaderState {
    fn new(peers: &[PeerId], last_log_index: LogIndex) -> Self {
        let next_index = DashMap::new();
        let match_index = DashMap::new();
        for peer in peers {
            next_index.insert(peer.clone(), last_log_index + 1);
            match_index.insert(peer.clone(), 0);
        }
        Self {
            next_index,
            match_index,
        }
    }
}

pub struct ConsensusEngine {
    config: ConsensusConfig,
    local_id: PeerId,
    signing: Arc<SigningContext>,
    verifying: VerifyingContext,

    current_term: Arc<RwLock<Term>>,
    voted_for: Arc<RwLock<Option<PeerId>>>,
    role: Arc<RwLock<NodeRole>>,
    log: Arc<RwLock<Vec<LogEntry>>>,
    commit_index: Arc<RwLock<LogIndex>>,
    last_applied: Arc<RwLock<LogIndex>>,

    leader_state: Arc<RwLock<Option<LeaderState>>>,
    peers: Arc<RwLock<Vec<PeerId>>>,
    /// Distinct granters for the current term's election, reset each time
    /// a new election starts. Seeded with `local_id` since a candidate
    /// always votes for itself.
    votes_received: Arc<RwLock<HashSet<PeerId>>>,

    cluster_state: Arc<ClusterStateStore>,

    outbound: mpsc::UnboundedSender<(PeerId, ConsensusMessage)>,
    outbound_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<(PeerId, ConsensusMessage)>>>>,

    last_heartbeat_seen: Arc<AtomicU64>,
}

impl Clone for ConsensusEngine {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            local_id: self.local_id.clone(),
            signing: Arc::clone(&self.signing),
            verifying: self.verifying,
            current_term: Arc::clone(&self.current_term),
            voted_for: Arc::clone(&self.voted_for),
            role: Arc::clone(&self.role),
            log: Arc::clone(&self.log),
            commit_index: Arc::clone(&self.commit_index),
            last_applied: Arc::clone(&self.last_applied),
            leader_state: Arc::clone(&self.leader_state),
            peers: Arc::clone(&self.peers),
            votes_received: Arc::clone(&self.votes_received),
            cluster_state: Arc::clone(&self.cluster_state),
            outbound: self.outbound.clone(),
            outbound_rx: Arc::clone(&self.outbound_rx),
            last_heartbeat_seen: Arc::clone(&self.last_heartbeat_seen),
        }
    }
}

impl ConsensusEngine {
    pub fn new(config: ConsensusConfig, local_id: PeerId, signing: SigningContext) -> Self {
        let verifying = signing.verifying_context();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        Self {
            config,
            local_id,
            signing: Arc::new(signing),
            verifying,
            current_term: Arc::new(RwLock::new(0)),
            voted_for: Arc::new(RwLock::new(None)),
            role: Arc::new(RwLock::new(NodeRole::Follower)),
            log: Arc::new(RwLock::new(Vec::new())),
            commit_index: Arc::new(RwLock::new(0)),
            last_applied: Arc::new(RwLock::new(0)),
            leader_state: Arc::new(RwLock::new(None)),
            peers: Arc::new(RwLock::new(Vec::new())),
            votes_received: Arc::new(RwLock::new(HashSet::new())),
            cluster_state: Arc::new(ClusterStateStore::new()),
            outbound,
            outbound_rx: Arc::new(Mutex::new(Some(outbound_rx))),
            last_heartbeat_seen: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn cluster_state(&self) -> Arc<ClusterStateStore> {
        Arc::clone(&self.cluster_state)
    }

    pub async fn role(&self) -> NodeRole {
        *self.role.read().await
    }

    pub async fn set_peers(&self, peers: Vec<PeerId>) {
        *self.peers.write().await = peers;
    }

    /// Drains queued outbound messages produced by this engine; the node
    /// runtime wires this to the peer transport's `send`.
    pub async fn take_outbound_receiver(
        &self,
    ) -> Option<mpsc::UnboundedReceiver<(PeerId, ConsensusMessage)>> {
        self.outbound_rx.lock().await.take()
    }

    pub fn start(self: &Arc<Self>) {
        self.spawn_election_timer();
    }

    fn randomized_election_timeout(&self) -> Duration {
        let min = self.config.election_timeout_min.as_millis() as u64;
        let max = self.config.election_timeout_max.as_millis() as u64;
        let jittered = rand::thread_rng().gen_range(min..=max.max(min + 1));
        Duration::from_millis(jittered)
    }

    fn spawn_election_timer(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let timeout = engine.randomized_election_timeout();
                let seen_before = engine.last_heartbeat_seen.load(Ordering::SeqCst);
                tokio::time::sleep(timeout).await;
                let seen_after = engine.last_heartbeat_seen.load(Ordering::SeqCst);
                let is_leader = matches!(*engine.role.read().await, NodeRole::Leader);
                if !is_leader && seen_before == seen_after {
                    if let Err(e) = engine.start_election().await {
                        warn!(error = %e, "election attempt failed");
                    }
                }
            }
        });
    }

    fn spawn_heartbeat_loop(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let interval = self.config.heartbeat_timeout;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if matches!(*engine.role.read().await, NodeRole::Leader) {
                    engine.replicate_to_all(true).await;
                }
            }
        });
    }

    async fn start_election(self: &Arc<Self>) -> Result<()> {
        let mut term = self.current_term.write().await;
        *term += 1;
        let election_term = *term;
        drop(term);

        *self.role.write().await = NodeRole::Candidate;
        *self.voted_for.write().await = Some(self.local_id.clone());
        *self.votes_received.write().await = HashSet::from([self.local_id.clone()]);
        info!(term = election_term, "starting election");

        let (last_log_index, last_log_term) = self.last_log_coordinates().await;
        let peers = self.peers.read().await.clone();
        if peers.is_empty() {
            // Single-node cluster: win immediately.
            self.become_leader(election_term).await;
            return Ok(());
        }

        let request = RequestVoteRequest {
            term: election_term,
            candidate_id: self.local_id.clone(),
            last_log_index,
            last_log_term,
        };
        for peer in &peers {
            let _ = self
                .outbound
                .send((peer.clone(), ConsensusMessage::RequestVote(request.clone())));
        }
        Ok(())
    }

    async fn become_leader(self: &Arc<Self>, term: Term) {
        *self.role.write().await = NodeRole::Leader;
        let last_log_index = self.log.read().await.len() as LogIndex;
        let peers = self.peers.read().await.clone();
        *self.leader_state.write().await = Some(LeaderState::new(&peers, last_log_index));
        info!(term, "elected leader");
        self.replicate_to_all(true).await;
    }

    async fn last_log_coordinates(&self) -> (LogIndex, Term) {
        let log = self.log.read().await;
        match log.last() {
            Some(entry) => (entry.index, entry.term),
            None => (0, 0),
        }
    }

    /// Leader-only: proposes a command. Returns once the entry is appended
    /// to the local log; callers await commitment separately by polling
    /// `commit_index` or subscribing to [`ClusterStateStore::subscribe`].
    pub async fn propose(&self, command: Command) -> Result<LogIndex> {
        if !matches!(*self.role.read().await, NodeRole::Leader) {
            return Err(anyhow!("propose called on non-leader node"));
        }
        let term = *self.current_term.read().await;
        let mut log = self.log.write().await;
        let index = log.len() as LogIndex + 1;
        log.push(LogEntry {
            term,
            index,
            command,
        });
        Ok(index)
    }

    async fn replicate_to_all(&self, is_heartbeat: bool) {
        let term = *self.current_term.read().await;
        let peers = self.peers.read().await.clone();
        let commit_index = *self.commit_index.read().await;
        let log = self.log.read().await.clone();
        let leader_state = self.leader_state.read().await;
        let Some(leader_state) = leader_state.as_ref() else {
            return;
        };
        for peer in peers {
            let next_index = leader_state
                .next_index
                .get(&peer)
                .map(|v| *v)
                .unwrap_or(1)
                .max(1);
            let prev_log_index = next_index - 1;
            let prev_log_term = log
                .iter()
                .find(|e| e.index == prev_log_index)
                .map(|e| e.term)
                .unwrap_or(0);
            let entries = if is_heartbeat {
                Vec::new()
            } else {
                log.iter()
                    .filter(|e| e.index >= next_index)
                    .cloned()
                    .collect()
            };
            let request = AppendEntriesRequest {
                term,
                leader_id: self.local_id.clone(),
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit: commit_index,
            };
            let _ = self
                .outbound
                .send((peer, ConsensusMessage::AppendEntries(request)));
        }
    }

    /// Applies every newly-committed entry to the cluster state store,
    /// advancing `last_applied` up to `commit_index`.
    async fn apply_committed(&self) {
        let commit_index = *self.commit_index.read().await;
        let mut last_applied = self.last_applied.write().await;
        if *last_applied >= commit_index {
            return;
        }
        let log = self.log.read().await;
        for entry in log.iter().filter(|e| e.index > *last_applied && e.index <= commit_index) {
            self.cluster_state.apply(&entry.command, entry.index);
        }
        *last_applied = commit_index;
    }

    pub async fn handle_message(
        self: &Arc<Self>,
        from: PeerId,
        message: ConsensusMessage,
    ) -> Option<ConsensusMessage> {
        match message {
            ConsensusMessage::RequestVote(req) => {
                Some(ConsensusMessage::RequestVoteResponse(
                    self.handle_request_vote(req).await,
                ))
            }
            ConsensusMessage::RequestVoteResponse(resp) => {
                self.handle_request_vote_response(from, resp).await;
                None
            }
            ConsensusMessage::AppendEntries(req) => {
                self.last_heartbeat_seen.fetch_add(1, Ordering::SeqCst);
                Some(ConsensusMessage::AppendEntriesResponse(
                    self.handle_append_entries(req).await,
                ))
            }
            ConsensusMessage::AppendEntriesResponse(resp) => {
                self.handle_append_entries_response(from, resp).await;
                None
            }
        }
    }

    async fn handle_request_vote(&self, req: RequestVoteRequest) -> RequestVoteResponse {
        let mut current_term = self.current_term.write().await;
        if req.term < *current_term {
            return RequestVoteResponse {
                term: *current_term,
                vote_granted: false,
            };
        }
        if req.term > *current_term {
            *current_term = req.term;
            *self.role.write().await = NodeRole::Follower;
            *self.voted_for.write().await = None;
        }
        let (last_log_index, last_log_term) = self.last_log_coordinates().await;
        let log_ok = req.last_log_term > last_log_term
            || (req.last_log_term == last_log_term && req.last_log_index >= last_log_index);
        let mut voted_for = self.voted_for.write().await;
        let can_vote = voted_for.is_none() || voted_for.as_deref() == Some(&req.candidate_id);
        let grant = can_vote && log_ok;
        if grant {
            *voted_for = Some(req.candidate_id.clone());
            self.last_heartbeat_seen.fetch_add(1, Ordering::SeqCst);
        }
        debug!(candidate = %req.candidate_id, grant, "vote decision");
        RequestVoteResponse {
            term: *current_term,
            vote_granted: grant,
        }
    }

    async fn handle_request_vote_response(self: &Arc<Self>, from: PeerId, resp: RequestVoteResponse) {
        let current_term = *self.current_term.read().await;
        if resp.term > current_term {
            *self.current_term.write().await = resp.term;
            *self.role.write().await = NodeRole::Follower;
            return;
        }
        if !resp.vote_granted
            || resp.term != current_term
            || !matches!(*self.role.read().await, NodeRole::Candidate)
        {
            return;
        }
        let tally = {
            let mut votes = self.votes_received.write().await;
            votes.insert(from);
            votes.len()
        };
        let cluster_size = self.peers.read().await.len() + 1;
        let majority = cluster_size / 2 + 1;
        if tally >= majority {
            self.become_leader(current_term).await;
        }
    }

    async fn handle_append_entries(&self, req: AppendEntriesRequest) -> AppendEntriesResponse {
        let mut current_term = self.current_term.write().await;
        if req.term < *current_term {
            return AppendEntriesResponse {
                term: *current_term,
                success: false,
                match_index: 0,
            };
        }
        *current_term = req.term;
        *self.role.write().await = NodeRole::Follower;
        drop(current_term);

        let mut log = self.log.write().await;
        if req.prev_log_index > 0 {
            let has_prev = log
                .iter()
                .any(|e| e.index == req.prev_log_index && e.term == req.prev_log_term);
            if !has_prev {
                return AppendEntriesResponse {
                    term: req.term,
                    success: false,
                    match_index: log.last().map(|e| e.index).unwrap_or(0),
                };
            }
        }
        log.retain(|e| e.index <= req.prev_log_index);
        log.extend(req.entries.into_iter());
        let match_index = log.last().map(|e| e.index).unwrap_or(req.prev_log_index);
        drop(log);

        if req.leader_commit > *self.commit_index.read().await {
            let new_commit = req.leader_commit.min(match_index);
            *self.commit_index.write().await = new_commit;
            self.apply_committed().await;
        }

        AppendEntriesResponse {
            term: req.term,
            success: true,
            match_index,
        }
    }

    async fn handle_append_entries_response(
        &self,
        from: PeerId,
        resp: AppendEntriesResponse,
    ) {
        if !resp.success {
            let leader_state = self.leader_state.read().await;
            if let Some(state) = leader_state.as_ref() {
                state
                    .next_index
                    .entry(from)
                    .and_modify(|v| *v = v.saturating_sub(1).max(1));
            }
            return;
        }
        let leader_state = self.leader_state.read().await;
        let Some(state) = leader_state.as_ref() else {
            return;
        };
        state.match_index.insert(from.clone(), resp.match_index);
        state.next_index.insert(from, resp.match_index + 1);

        let mut match_indices: Vec<LogIndex> =
            state.match_index.iter().map(|e| *e.value()).collect();
        match_indices.push(self.log.read().await.len() as LogIndex); // self always matches its own log
        match_indices.sort_unstable();
        let majority_index = match_indices[match_indices.len() / 2];
        if majority_index > *self.commit_index.read().await {
            *self.commit_index.write().await = majority_index;
            self.apply_committed().await;
        }
    }
}

pub fn spawn_engine(engine: Arc<ConsensusEngine>) {
    engine.start();
    engine.spawn_heartbeat_loop();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_engine(id: &str) -> Arc<ConsensusEngine> {
        Arc::new(ConsensusEngine::new(
            ConsensusConfig::default(),
            id.to_string(),
            SigningContext::generate(),
        ))
    }

    #[tokio::test]
    async fn single_node_cluster_elects_itself_leader() {
        let engine = test_engine("n1");
        engine.start_election().await.unwrap();
        assert_eq!(engine.role().await, NodeRole::Leader);
    }

    #[tokio::test]
    async fn propose_fails_on_follower() {
        let engine = test_engine("n1");
        let err = engine
            .propose(Command::LeaveNode {
                node_id: "n2".into(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("non-leader"));
    }

    #[tokio::test]
    async fn append_entries_from_stale_term_is_rejected() {
        let engine = test_engine("n1");
        *engine.current_term.write().await = 5;
        let resp = engine
            .handle_append_entries(AppendEntriesRequest {
                term: 3,
                leader_id: "n2".into(),
                prev_log_index: 0,
                prev_log_term: 0,
                entries: vec![],
                leader_commit: 0,
            })
            .await;
        assert!(!resp.success);
    }

    #[tokio::test]
    async fn vote_granted_for_up_to_date_candidate() {
        let engine = test_engine("n1");
        let resp = engine
            .handle_request_vote(RequestVoteRequest {
                term: 1,
                candidate_id: "n2".into(),
                last_log_index: 0,
                last_log_term: 0,
            })
            .await;
        assert!(resp.vote_granted);
    }

    #[tokio::test]
    async fn second_vote_request_same_term_different_candidate_denied() {
        let engine = test_engine("n1");
        engine
            .handle_request_vote(RequestVoteRequest {
                term: 1,
                candidate_id: "n2".into(),
                last_log_index: 0,
                last_log_term: 0,
            })
            .await;
        let resp = engine
            .handle_request_vote(RequestVoteRequest {
                term: 1,
                candidate_id: "n3".into(),
                last_log_index: 0,
                last_log_term: 0,
            })
            .await;
        assert!(!resp.vote_granted);
    }

    #[tokio::test]
    async fn single_grant_in_five_node_cluster_does_not_elect() {
        let engine = test_engine("n1");
        engine.set_peers(vec!["n2".into(), "n3".into(), "n4".into(), "n5".into()]).await;
        engine.start_election().await.unwrap();
        let term = *engine.current_term.read().await;
        engine
            .handle_request_vote_response(
                "n2".into(),
                RequestVoteResponse {
                    term,
                    vote_granted: true,
                },
            )
            .await;
        assert_eq!(engine.role().await, NodeRole::Candidate);
    }

    #[tokio::test]
    async fn majority_of_grants_in_five_node_cluster_elects_leader() {
        let engine = test_engine("n1");
        engine.set_peers(vec!["n2".into(), "n3".into(), "n4".into(), "n5".into()]).await;
        engine.start_election().await.unwrap();
        let term = *engine.current_term.read().await;
        for peer in ["n2", "n3"] {
            engine
                .handle_request_vote_response(
                    peer.to_string(),
                    RequestVoteResponse {
                        term,
                        vote_granted: true,
                    },
                )
                .await;
        }
        assert_eq!(engine.role().await, NodeRole::Leader);
    }

    #[tokio::test]
    async fn duplicate_grant_from_same_peer_is_not_double_counted() {
        let engine = test_engine("n1");
        engine.set_peers(vec!["n2".into(), "n3".into(), "n4".into(), "n5".into()]).await;
        engine.start_election().await.unwrap();
        let term = *engine.current_term.read().await;
        for _ in 0..3 {
            engine
                .handle_request_vote_response(
                    "n2".into(),
                    RequestVoteResponse {
                        term,
                        vote_granted: true,
                    },
                )
                .await;
        }
        assert_eq!(engine.role().await, NodeRole::Candidate);
    }
}
