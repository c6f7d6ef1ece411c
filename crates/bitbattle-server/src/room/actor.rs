//! The per-room single-writer actor.
//!
//! One task owns all mutable room state. Commands arrive on a bounded
//! channel, outbound frames leave through each socket's [`OutboundQueue`],
//! and both happen from this task only, which makes the delivery order
//! across a room's sockets equal to the server-side event order and makes
//! the winner decision race-free: the first passing submission observed
//! while `Playing` ends the game, exactly once.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use uuid::Uuid;

use bitbattle_shared::{
    DifficultyFilter, GameMode, GameOver, Language, Problem, RoomCode, ServerEvent, SpectateInit,
    SubmissionResult,
};
use bitbattle_store::{GameOutcome, ParticipantOutcome};

use super::{
    JoinOutcome, OutboundQueue, Phase, RoomCommand, RoomHandle, RoomRegistry, RoomServices,
    RoomSnapshot,
};

const COMMAND_BUFFER: usize = 256;

/// A never-joined room (matchmaker-created) is released after this many
/// grace periods of idling in `Waiting`.
const IDLE_GRACE_MULTIPLIER: u32 = 10;

pub(crate) fn spawn(
    code: RoomCode,
    difficulty: DifficultyFilter,
    required_players: usize,
    mode: GameMode,
    services: Arc<RoomServices>,
    registry: RoomRegistry,
) -> RoomHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let created_at = Instant::now();
    let initial = RoomSnapshot {
        code: code.as_str().to_string(),
        mode,
        phase: Phase::Waiting,
        players: Vec::new(),
        required_players,
        problem: None,
        winner: None,
        player_codes: HashMap::new(),
        spectator_count: 0,
        created_at,
    };
    let (snapshot_tx, snapshot_rx) = watch::channel(initial);

    let idle_deadline =
        tokio::time::Instant::now() + services.grace * IDLE_GRACE_MULTIPLIER;
    let actor = RoomActor {
        code: code.clone(),
        difficulty,
        required_players,
        mode,
        phase: Phase::Waiting,
        participants: Vec::new(),
        departed: Vec::new(),
        spectators: HashMap::new(),
        player_codes: HashMap::new(),
        last_submissions: HashMap::new(),
        problem: None,
        winner: None,
        started_at: None,
        created_at,
        next_conn_id: 0,
        timer: Some((TimerKind::Idle, idle_deadline)),
        released: false,
        services,
        registry,
        snapshot_tx,
    };
    tokio::spawn(actor.run(cmd_rx));

    RoomHandle {
        code,
        cmd: cmd_tx,
        snapshot: snapshot_rx,
    }
}

struct Participant {
    conn_id: u64,
    username: String,
    user_id: Option<Uuid>,
    queue: OutboundQueue,
}

struct Departed {
    username: String,
    user_id: Option<Uuid>,
}

struct LastSubmission {
    passed_tests: usize,
    total_tests: usize,
    language: Language,
}

#[derive(Clone, Copy)]
enum TimerKind {
    /// Waiting room that nobody ever joined.
    Idle,
    /// Countdown between `game_start` and `Playing`.
    Countdown,
    /// Lifetime of an `Ended` room before release.
    Grace,
}

struct RoomActor {
    code: RoomCode,
    difficulty: DifficultyFilter,
    required_players: usize,
    mode: GameMode,
    phase: Phase,
    participants: Vec<Participant>,
    /// Disconnect log, earliest first; feeds placement order.
    departed: Vec<Departed>,
    spectators: HashMap<u64, OutboundQueue>,
    player_codes: HashMap<String, String>,
    last_submissions: HashMap<String, LastSubmission>,
    problem: Option<Problem>,
    winner: Option<String>,
    started_at: Option<Instant>,
    created_at: Instant,
    next_conn_id: u64,
    timer: Option<(TimerKind, tokio::time::Instant)>,
    released: bool,
    services: Arc<RoomServices>,
    registry: RoomRegistry,
    snapshot_tx: watch::Sender<RoomSnapshot>,
}

impl RoomActor {
    async fn run(mut self, mut commands: mpsc::Receiver<RoomCommand>) {
        loop {
            let timer = self.timer;
            tokio::select! {
                maybe_cmd = commands.recv() => match maybe_cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => break,
                },
                _ = wait_for(timer) => self.fire_timer().await,
            }
            if self.released {
                break;
            }
        }
    }

    async fn handle(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Join {
                username,
                user_id,
                queue,
                reply,
            } => {
                let outcome = self.handle_join(username, user_id, queue).await;
                let _ = reply.send(outcome);
            }
            RoomCommand::Spectate { queue, reply } => {
                let conn_id = self.handle_spectate(queue).await;
                let _ = reply.send(conn_id);
            }
            RoomCommand::Leave { conn_id } => {
                self.evict(vec![conn_id]).await;
                self.publish();
            }
            RoomCommand::CodeChange {
                conn_id,
                code,
                timestamp,
            } => {
                self.handle_code_change(conn_id, code, timestamp).await;
            }
            RoomCommand::SubmissionObserved {
                username,
                language,
                result,
            } => {
                self.observe_language(&username, language, &result);
                self.handle_submission(username, result).await;
                self.publish();
            }
            RoomCommand::GetPhase { reply } => {
                let _ = reply.send(self.phase);
            }
        }
    }

    // -- admission ---------------------------------------------------------

    async fn handle_join(
        &mut self,
        username: String,
        user_id: Option<Uuid>,
        queue: OutboundQueue,
    ) -> JoinOutcome {
        let joinable =
            self.phase == Phase::Waiting && self.participants.len() < self.required_players;
        if !joinable {
            info!(room = %self.code, username = %username, "join rejected, room not joinable");
            return JoinOutcome::Rejected {
                current: self.participants.len(),
                required: self.required_players,
            };
        }

        if self.participants.iter().any(|p| p.username == username) {
            // Usernames are unique per room; the double joins read-only.
            info!(room = %self.code, username = %username, "duplicate username, admitting as spectator");
            let conn_id = self.handle_spectate(queue).await;
            return JoinOutcome::Spectator { conn_id };
        }

        // Clear the never-joined idle timer on first admission.
        if matches!(self.timer, Some((TimerKind::Idle, _))) {
            self.timer = None;
        }

        let conn_id = self.next_conn_id();
        let now_ms = Utc::now().timestamp_millis();

        // Bring the new socket up to date with the current roster before
        // anything else lands in its queue.
        for existing in &self.participants {
            queue
                .push(ServerEvent::UserJoined {
                    username: existing.username.clone(),
                    timestamp: now_ms,
                })
                .await;
        }

        self.participants.push(Participant {
            conn_id,
            username: username.clone(),
            user_id,
            queue,
        });
        info!(
            room = %self.code,
            username = %username,
            players = self.participants.len(),
            required = self.required_players,
            "participant joined"
        );

        self.broadcast(ServerEvent::UserJoined {
            username,
            timestamp: now_ms,
        })
        .await;
        self.broadcast(ServerEvent::PlayerCount {
            current: self.participants.len(),
            required: self.required_players,
        })
        .await;

        if self.participants.len() == self.required_players {
            self.begin_countdown().await;
        }

        self.publish();
        JoinOutcome::Participant { conn_id }
    }

    async fn handle_spectate(&mut self, queue: OutboundQueue) -> u64 {
        let conn_id = self.next_conn_id();
        self.spectators.insert(conn_id, queue);

        let init = ServerEvent::SpectateInit(SpectateInit {
            room_id: self.code.as_str().to_string(),
            players: self.participants.iter().map(|p| p.username.clone()).collect(),
            game_mode: self.mode,
            game_started: self.phase >= Phase::Playing,
            game_ended: self.phase == Phase::Ended,
            winner: self.winner.clone(),
            problem: self.problem.as_ref().map(Problem::public),
            player_codes: self.player_codes.clone(),
            spectator_count: self.spectators.len(),
        });
        if let Some(spectator) = self.spectators.get(&conn_id) {
            spectator.push(init).await;
        }

        self.publish();
        conn_id
    }

    // -- game flow ---------------------------------------------------------

    async fn begin_countdown(&mut self) {
        let players: Vec<String> = self.participants.iter().map(|p| p.username.clone()).collect();
        let seen = self.services.problems.recently_seen(&players).await;

        let Some(problem) = self.services.problems.choose(self.difficulty, &seen) else {
            warn!(room = %self.code, "no problem available for room");
            self.fail_room("no problem available for the requested difficulty")
                .await;
            return;
        };
        self.services.problems.note_seen(&players, &problem.id).await;

        info!(
            room = %self.code,
            problem = %problem.id,
            difficulty = %problem.difficulty,
            "all players present, starting countdown"
        );

        self.phase = Phase::Countdown;
        self.broadcast(ServerEvent::ProblemAssigned {
            problem: problem.public(),
        })
        .await;
        self.problem = Some(problem);
        self.broadcast(ServerEvent::GameStart {}).await;
        self.timer = Some((
            TimerKind::Countdown,
            tokio::time::Instant::now() + self.services.countdown,
        ));
    }

    async fn handle_code_change(&mut self, conn_id: u64, code: String, timestamp: i64) {
        if self.phase == Phase::Ended {
            return;
        }
        let Some(participant) = self.participants.iter().find(|p| p.conn_id == conn_id) else {
            return;
        };
        let username = participant.username.clone();
        self.player_codes.insert(username.clone(), code.clone());

        self.broadcast_except(
            ServerEvent::CodeChange {
                username,
                code,
                timestamp,
            },
            conn_id,
        )
        .await;
        self.publish();
    }

    async fn handle_submission(&mut self, username: String, result: SubmissionResult) {
        if result.passed && self.phase == Phase::Playing {
            self.finish_game(username, result).await;
            return;
        }

        // Failed submissions, and passes that lost the race, go to the
        // submitter only. A submitter who already disconnected gets nothing.
        let target = self
            .participants
            .iter()
            .find(|p| p.username == username)
            .map(|p| p.conn_id);
        if let Some(conn_id) = target {
            self.send_to(conn_id, ServerEvent::SubmissionResult { result })
                .await;
        }
    }

    async fn finish_game(&mut self, winner: String, result: SubmissionResult) {
        self.phase = Phase::Ended;
        self.winner = Some(winner.clone());
        self.timer = Some((
            TimerKind::Grace,
            tokio::time::Instant::now() + self.services.grace,
        ));
        let solve_time_ms = self.started_at.map(|t| t.elapsed().as_millis() as u64);

        info!(
            room = %self.code,
            winner = %winner,
            solve_time_ms,
            "first passing submission observed, game over"
        );

        self.broadcast(ServerEvent::SubmissionResult { result }).await;

        let order = self.placement_order(&winner);
        let outcome = self.build_outcome(solve_time_ms, &order);
        let rating_changes = match outcome {
            Some(outcome) => self.services.scoring.record_game(outcome).await,
            None => HashMap::new(),
        };

        let (problem_id, difficulty) = match &self.problem {
            Some(problem) => (Some(problem.id.clone()), Some(problem.difficulty)),
            None => (None, None),
        };
        self.broadcast(ServerEvent::GameOver(GameOver {
            winner: Some(winner),
            solve_time_ms,
            problem_id,
            difficulty,
            game_mode: self.mode,
            players: order.iter().map(|(name, _)| name.clone()).collect(),
            rating_changes,
        }))
        .await;
    }

    /// Placement order: winner, then connected participants in join order,
    /// then disconnected ones, most recent disconnect first.
    fn placement_order(&self, winner: &str) -> Vec<(String, Option<Uuid>)> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();

        let winner_user_id = self
            .participants
            .iter()
            .find(|p| p.username == winner)
            .map(|p| p.user_id)
            .or_else(|| {
                self.departed
                    .iter()
                    .find(|d| d.username == winner)
                    .map(|d| d.user_id)
            })
            .unwrap_or(None);
        order.push((winner.to_string(), winner_user_id));
        seen.insert(winner.to_string());

        for participant in &self.participants {
            if seen.insert(participant.username.clone()) {
                order.push((participant.username.clone(), participant.user_id));
            }
        }
        for departed in self.departed.iter().rev() {
            if seen.insert(departed.username.clone()) {
                order.push((departed.username.clone(), departed.user_id));
            }
        }
        order
    }

    fn build_outcome(
        &self,
        solve_time_ms: Option<u64>,
        order: &[(String, Option<Uuid>)],
    ) -> Option<GameOutcome> {
        let problem = self.problem.as_ref()?;
        let total_tests = problem.hidden_tests.len() as i32;

        let participants = order
            .iter()
            .map(|(username, user_id)| {
                let last = self.last_submissions.get(username);
                ParticipantOutcome {
                    username: username.clone(),
                    user_id: *user_id,
                    passed_tests: last.map(|s| s.passed_tests as i32).unwrap_or(0),
                    total_tests: last.map(|s| s.total_tests as i32).unwrap_or(total_tests),
                    language: last.map(|s| s.language),
                }
            })
            .collect();

        Some(GameOutcome {
            room_id: self.code.as_str().to_string(),
            problem_id: problem.id.clone(),
            game_mode: self.mode,
            difficulty: problem.difficulty,
            solve_time_ms: solve_time_ms.map(|t| t as i64),
            participants,
        })
    }

    /// Record the language and counts of a player's latest submission.
    fn observe_language(&mut self, username: &str, language: Language, result: &SubmissionResult) {
        self.last_submissions.insert(
            username.to_string(),
            LastSubmission {
                passed_tests: result.passed_tests,
                total_tests: result.total_tests,
                language,
            },
        );
    }

    // -- departure & failure ----------------------------------------------

    /// Remove sockets from the room, broadcasting `user_left` for each
    /// participant. Processes transitively dead sockets iteratively.
    async fn evict(&mut self, mut dead: Vec<u64>) {
        while let Some(conn_id) = dead.pop() {
            if let Some(index) = self.participants.iter().position(|p| p.conn_id == conn_id) {
                let participant = self.participants.remove(index);
                participant.queue.close().await;
                info!(
                    room = %self.code,
                    username = %participant.username,
                    remaining = self.participants.len(),
                    "participant left"
                );
                self.departed.push(Departed {
                    username: participant.username.clone(),
                    user_id: participant.user_id,
                });
                if self.phase == Phase::Waiting {
                    self.player_codes.remove(&participant.username);
                }

                let more = self
                    .push_all(
                        ServerEvent::UserLeft {
                            username: participant.username,
                        },
                        None,
                    )
                    .await;
                dead.extend(more);
                if self.phase == Phase::Waiting {
                    let more = self
                        .push_all(
                            ServerEvent::PlayerCount {
                                current: self.participants.len(),
                                required: self.required_players,
                            },
                            None,
                        )
                        .await;
                    dead.extend(more);
                }
            } else if let Some(queue) = self.spectators.remove(&conn_id) {
                queue.close().await;
            }
        }

        if self.participants.is_empty() && self.phase != Phase::Ended {
            self.end_abandoned().await;
        }
    }

    /// The last participant is gone: terminal state, no winner, no scoring.
    async fn end_abandoned(&mut self) {
        info!(room = %self.code, "room abandoned, no winner");
        self.phase = Phase::Ended;
        self.winner = None;
        self.timer = Some((
            TimerKind::Grace,
            tokio::time::Instant::now() + self.services.grace,
        ));

        let players: Vec<String> = self
            .departed
            .iter()
            .map(|d| d.username.clone())
            .collect();
        self.broadcast(ServerEvent::GameOver(GameOver {
            winner: None,
            solve_time_ms: None,
            problem_id: self.problem.as_ref().map(|p| p.id.clone()),
            difficulty: self.problem.as_ref().map(|p| p.difficulty),
            game_mode: self.mode,
            players,
            rating_changes: HashMap::new(),
        }))
        .await;
    }

    /// Invariant violation or unrecoverable dependency failure: tell the
    /// clients and end the room so they exit deterministically.
    async fn fail_room(&mut self, message: &str) {
        self.broadcast(ServerEvent::Error {
            message: message.to_string(),
            code: "INTERNAL_ERROR".to_string(),
        })
        .await;
        self.phase = Phase::Ended;
        self.winner = None;
        self.timer = Some((
            TimerKind::Grace,
            tokio::time::Instant::now() + self.services.grace,
        ));
        let players: Vec<String> = self
            .participants
            .iter()
            .map(|p| p.username.clone())
            .collect();
        self.broadcast(ServerEvent::GameOver(GameOver {
            winner: None,
            solve_time_ms: None,
            problem_id: None,
            difficulty: None,
            game_mode: self.mode,
            players,
            rating_changes: HashMap::new(),
        }))
        .await;
    }

    async fn fire_timer(&mut self) {
        let Some((kind, _)) = self.timer.take() else {
            return;
        };
        match kind {
            TimerKind::Idle => {
                if self.phase == Phase::Waiting && self.participants.is_empty() {
                    info!(room = %self.code, "idle room never joined, releasing");
                    self.registry.remove(self.code.as_str()).await;
                    self.released = true;
                }
            }
            TimerKind::Countdown => {
                self.phase = Phase::Playing;
                self.started_at = Some(Instant::now());
                info!(room = %self.code, "countdown over, game is live");
                self.publish();
            }
            TimerKind::Grace => {
                self.registry.remove(self.code.as_str()).await;
                self.released = true;
            }
        }
    }

    // -- plumbing ----------------------------------------------------------

    fn next_conn_id(&mut self) -> u64 {
        self.next_conn_id += 1;
        self.next_conn_id
    }

    async fn broadcast(&mut self, event: ServerEvent) {
        let dead = self.push_all(event, None).await;
        if !dead.is_empty() {
            Box::pin(self.evict(dead)).await;
        }
    }

    async fn broadcast_except(&mut self, event: ServerEvent, skip: u64) {
        let dead = self.push_all(event, Some(skip)).await;
        if !dead.is_empty() {
            self.evict(dead).await;
        }
    }

    async fn send_to(&mut self, conn_id: u64, event: ServerEvent) {
        let ok = match self.participants.iter().find(|p| p.conn_id == conn_id) {
            Some(participant) => participant.queue.push(event).await,
            None => return,
        };
        if !ok {
            warn!(room = %self.code, conn_id, "socket too slow, force-closing");
            self.evict(vec![conn_id]).await;
        }
    }

    async fn push_all(&self, event: ServerEvent, skip: Option<u64>) -> Vec<u64> {
        let mut dead = Vec::new();
        for participant in &self.participants {
            if skip == Some(participant.conn_id) {
                continue;
            }
            if !participant.queue.push(event.clone()).await {
                warn!(
                    room = %self.code,
                    username = %participant.username,
                    "participant socket too slow, force-closing"
                );
                dead.push(participant.conn_id);
            }
        }
        for (conn_id, queue) in &self.spectators {
            if !queue.push(event.clone()).await {
                dead.push(*conn_id);
            }
        }
        dead
    }

    fn publish(&self) {
        let snapshot = RoomSnapshot {
            code: self.code.as_str().to_string(),
            mode: self.mode,
            phase: self.phase,
            players: self.participants.iter().map(|p| p.username.clone()).collect(),
            required_players: self.required_players,
            problem: self.problem.as_ref().map(Problem::public),
            winner: self.winner.clone(),
            player_codes: self.player_codes.clone(),
            spectator_count: self.spectators.len(),
            created_at: self.created_at,
        };
        let _ = self.snapshot_tx.send_replace(snapshot);
    }
}

async fn wait_for(timer: Option<(TimerKind, tokio::time::Instant)>) {
    match timer {
        Some((_, deadline)) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use bitbattle_shared::TestResult;
    use bitbattle_store::Database;

    use super::*;
    use crate::problems::ProblemRepository;
    use crate::scoring::Scoring;

    fn registry() -> RoomRegistry {
        let store = Arc::new(tokio::sync::Mutex::new(Database::open_in_memory().unwrap()));
        RoomRegistry::new(Arc::new(RoomServices {
            problems: Arc::new(ProblemRepository::new()),
            scoring: Scoring::new(store),
            countdown: Duration::from_millis(20),
            grace: Duration::from_millis(300),
        }))
    }

    async fn make_room(registry: &RoomRegistry) -> RoomHandle {
        registry
            .get_or_create(
                RoomCode::parse("SWIFT-CODER-1234").unwrap(),
                DifficultyFilter::Easy,
                2,
                GameMode::Casual,
            )
            .await
    }

    async fn recv(queue: &OutboundQueue) -> ServerEvent {
        timeout(Duration::from_secs(2), queue.pop())
            .await
            .expect("no event within deadline")
            .expect("queue closed")
    }

    async fn recv_until(
        queue: &OutboundQueue,
        pred: impl Fn(&ServerEvent) -> bool,
    ) -> ServerEvent {
        for _ in 0..64 {
            let event = recv(queue).await;
            if pred(&event) {
                return event;
            }
        }
        panic!("expected event never arrived");
    }

    async fn assert_silent(queue: &OutboundQueue) {
        assert!(
            timeout(Duration::from_millis(80), queue.pop()).await.is_err(),
            "queue unexpectedly produced an event"
        );
    }

    async fn join(handle: &RoomHandle, name: &str) -> (u64, OutboundQueue) {
        let queue = OutboundQueue::new(64);
        match handle
            .join(name.to_string(), None, queue.clone())
            .await
            .expect("room gone")
        {
            JoinOutcome::Participant { conn_id } => (conn_id, queue),
            other => panic!("expected participant admission, got {other:?}"),
        }
    }

    async fn wait_for_phase(handle: &RoomHandle, wanted: Phase) {
        for _ in 0..200 {
            if handle.phase().await == Some(wanted) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("room never reached {wanted:?}");
    }

    fn result(passed: bool) -> SubmissionResult {
        SubmissionResult {
            passed,
            passed_tests: if passed { 3 } else { 1 },
            total_tests: 3,
            test_results: vec![TestResult {
                input: "1 2".into(),
                expected: "3".into(),
                actual: if passed { "3".into() } else { "4".into() },
                passed,
                time_ms: 12,
                error: None,
            }],
            execution_time_ms: 42,
        }
    }

    #[tokio::test]
    async fn join_flow_reaches_playing() {
        let registry = registry();
        let room = make_room(&registry).await;

        let (_, alice) = join(&room, "alice").await;
        let (_, bob) = join(&room, "bob").await;

        // The second joiner sees the roster, both joins, the head count,
        // the problem and the start signal, in server order.
        recv_until(&bob, |e| {
            matches!(e, ServerEvent::UserJoined { username, .. } if username == "alice")
        })
        .await;
        recv_until(&bob, |e| {
            matches!(e, ServerEvent::UserJoined { username, .. } if username == "bob")
        })
        .await;
        recv_until(
            &bob,
            |e| matches!(e, ServerEvent::PlayerCount { current: 2, required: 2 }),
        )
        .await;
        recv_until(&bob, |e| matches!(e, ServerEvent::ProblemAssigned { .. })).await;
        recv_until(&bob, |e| matches!(e, ServerEvent::GameStart {})).await;
        recv_until(&alice, |e| matches!(e, ServerEvent::GameStart {})).await;

        assert!(room.phase().await >= Some(Phase::Countdown));
        wait_for_phase(&room, Phase::Playing).await;
    }

    #[tokio::test]
    async fn first_pass_wins_exactly_once() {
        let registry = registry();
        let room = make_room(&registry).await;
        let (_, alice) = join(&room, "alice").await;
        let (_, bob) = join(&room, "bob").await;
        wait_for_phase(&room, Phase::Playing).await;

        room.submission_observed("alice".into(), Language::Python, result(true))
            .await;

        // Everyone gets the winning submission_result, then game_over.
        recv_until(&bob, |e| matches!(e, ServerEvent::SubmissionResult { .. })).await;
        let over = recv_until(&bob, |e| matches!(e, ServerEvent::GameOver(_))).await;
        let ServerEvent::GameOver(over) = over else {
            unreachable!()
        };
        assert_eq!(over.winner.as_deref(), Some("alice"));
        assert!(over.solve_time_ms.is_some());
        assert_eq!(over.players.len(), 2);
        assert_eq!(over.rating_changes["alice"].change, 0);
        recv_until(&alice, |e| matches!(e, ServerEvent::GameOver(_))).await;

        // A second pass after the race is lost: submission_result only.
        room.submission_observed("bob".into(), Language::Rust, result(true))
            .await;
        recv_until(&bob, |e| matches!(e, ServerEvent::SubmissionResult { .. })).await;
        assert_silent(&bob).await;
        assert_silent(&alice).await;
    }

    #[tokio::test]
    async fn failed_submission_goes_to_submitter_only() {
        let registry = registry();
        let room = make_room(&registry).await;
        let (_, alice) = join(&room, "alice").await;
        let (_, bob) = join(&room, "bob").await;
        wait_for_phase(&room, Phase::Playing).await;

        // Flush the setup events so the queues start quiet.
        recv_until(&alice, |e| matches!(e, ServerEvent::GameStart {})).await;
        recv_until(&bob, |e| matches!(e, ServerEvent::GameStart {})).await;

        room.submission_observed("alice".into(), Language::Python, result(false))
            .await;
        recv_until(&alice, |e| matches!(e, ServerEvent::SubmissionResult { .. })).await;
        assert_silent(&bob).await;
        assert_eq!(room.phase().await, Some(Phase::Playing));
    }

    #[tokio::test]
    async fn full_room_rejects_then_serves_spectators() {
        let registry = registry();
        let room = make_room(&registry).await;
        let (_, _alice) = join(&room, "alice").await;
        let (_, _bob) = join(&room, "bob").await;
        wait_for_phase(&room, Phase::Playing).await;

        let queue = OutboundQueue::new(64);
        match room
            .join("carol".into(), None, queue.clone())
            .await
            .unwrap()
        {
            JoinOutcome::Rejected { current, required } => {
                assert_eq!((current, required), (2, 2));
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        // The same client may spectate instead.
        let spectator = OutboundQueue::new(64);
        room.spectate(spectator.clone()).await.unwrap();
        let init = recv(&spectator).await;
        let ServerEvent::SpectateInit(init) = init else {
            panic!("expected spectate_init, got {init:?}");
        };
        assert!(init.game_started);
        assert!(!init.game_ended);
        assert_eq!(init.players.len(), 2);
        assert!(init.problem.is_some());
    }

    #[tokio::test]
    async fn duplicate_username_is_admitted_read_only() {
        let registry = registry();
        let room = make_room(&registry).await;
        let (_, _alice) = join(&room, "alice").await;

        let queue = OutboundQueue::new(64);
        match room
            .join("alice".into(), None, queue.clone())
            .await
            .unwrap()
        {
            JoinOutcome::Spectator { .. } => {}
            other => panic!("expected spectator admission, got {other:?}"),
        }
        let init = recv(&queue).await;
        assert!(matches!(init, ServerEvent::SpectateInit(_)));
    }

    #[tokio::test]
    async fn code_change_updates_state_and_skips_sender() {
        let registry = registry();
        let room = make_room(&registry).await;
        let (alice_id, alice) = join(&room, "alice").await;
        let (_, bob) = join(&room, "bob").await;
        wait_for_phase(&room, Phase::Playing).await;
        recv_until(&alice, |e| matches!(e, ServerEvent::GameStart {})).await;
        recv_until(&bob, |e| matches!(e, ServerEvent::GameStart {})).await;

        room.code_change(alice_id, "print(42)".into(), 1).await;

        let relayed = recv_until(&bob, |e| matches!(e, ServerEvent::CodeChange { .. })).await;
        let ServerEvent::CodeChange { username, code, .. } = relayed else {
            unreachable!()
        };
        assert_eq!(username, "alice");
        assert_eq!(code, "print(42)");
        // The sender never hears its own echo.
        assert_silent(&alice).await;

        assert_eq!(
            room.snapshot().player_codes.get("alice").map(String::as_str),
            Some("print(42)")
        );
    }

    #[tokio::test]
    async fn abandoned_room_ends_with_no_winner() {
        let registry = registry();
        let room = make_room(&registry).await;
        let (alice_id, _alice) = join(&room, "alice").await;
        let (bob_id, _bob) = join(&room, "bob").await;
        wait_for_phase(&room, Phase::Playing).await;

        let spectator = OutboundQueue::new(64);
        room.spectate(spectator.clone()).await.unwrap();

        room.leave(alice_id).await;
        room.leave(bob_id).await;

        let over = recv_until(&spectator, |e| matches!(e, ServerEvent::GameOver(_))).await;
        let ServerEvent::GameOver(over) = over else {
            unreachable!()
        };
        assert_eq!(over.winner, None);
        assert!(over.rating_changes.is_empty());

        // After the grace period the registry releases the room.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(registry.get("SWIFT-CODER-1234").await.is_none());
    }

    #[tokio::test]
    async fn phase_only_moves_forward() {
        let registry = registry();
        let room = make_room(&registry).await;
        assert_eq!(room.phase().await, Some(Phase::Waiting));

        let (_, _alice) = join(&room, "alice").await;
        let (_, _bob) = join(&room, "bob").await;
        let after_join = room.phase().await.unwrap();
        assert!(after_join >= Phase::Countdown);

        wait_for_phase(&room, Phase::Playing).await;
        room.submission_observed("alice".into(), Language::Python, result(true))
            .await;
        wait_for_phase(&room, Phase::Ended).await;

        // A late join cannot reopen the room.
        let queue = OutboundQueue::new(8);
        assert!(matches!(
            room.join("dave".into(), None, queue).await.unwrap(),
            JoinOutcome::Rejected { .. }
        ));
    }
}
