//! Per-room state and the room registry.
//!
//! Every room is an actor: one task owns the state machine, consumes a
//! command channel, and is the only writer of the room's outbound frames,
//! which keeps delivery order identical for every socket in the room.
//! Sockets talk to it through a [`RoomHandle`]; read-only consumers
//! (spectator bootstrap, the live-rooms listing) use the actor's published
//! [`RoomSnapshot`].

pub mod actor;
pub mod outbound;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tracing::info;
use uuid::Uuid;

use bitbattle_shared::{
    DifficultyFilter, GameMode, Language, PublicProblem, RoomCode, SubmissionResult,
};

use crate::problems::ProblemRepository;
use crate::scoring::Scoring;

pub use outbound::OutboundQueue;

/// Room lifecycle. Transitions only move forward; `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Waiting,
    Countdown,
    Playing,
    Ended,
}

/// State published by the actor after every mutation.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub code: String,
    pub mode: GameMode,
    pub phase: Phase,
    pub players: Vec<String>,
    pub required_players: usize,
    pub problem: Option<PublicProblem>,
    pub winner: Option<String>,
    pub player_codes: HashMap<String, String>,
    pub spectator_count: usize,
    pub created_at: Instant,
}

/// What happened to a socket that asked to join.
#[derive(Debug)]
pub enum JoinOutcome {
    Participant { conn_id: u64 },
    /// Duplicate username: admitted, but read-only.
    Spectator { conn_id: u64 },
    Rejected { current: usize, required: usize },
}

pub(crate) enum RoomCommand {
    Join {
        username: String,
        user_id: Option<Uuid>,
        queue: OutboundQueue,
        reply: oneshot::Sender<JoinOutcome>,
    },
    Spectate {
        queue: OutboundQueue,
        reply: oneshot::Sender<u64>,
    },
    Leave {
        conn_id: u64,
    },
    CodeChange {
        conn_id: u64,
        code: String,
        timestamp: i64,
    },
    SubmissionObserved {
        username: String,
        language: Language,
        result: SubmissionResult,
    },
    GetPhase {
        reply: oneshot::Sender<Phase>,
    },
}

/// Cheap clonable handle to one room's actor.
#[derive(Clone)]
pub struct RoomHandle {
    code: RoomCode,
    cmd: mpsc::Sender<RoomCommand>,
    snapshot: watch::Receiver<RoomSnapshot>,
}

impl RoomHandle {
    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        self.snapshot.borrow().clone()
    }

    /// `None` means the room actor is gone (released after grace).
    pub async fn join(
        &self,
        username: String,
        user_id: Option<Uuid>,
        queue: OutboundQueue,
    ) -> Option<JoinOutcome> {
        let (reply, rx) = oneshot::channel();
        self.cmd
            .send(RoomCommand::Join {
                username,
                user_id,
                queue,
                reply,
            })
            .await
            .ok()?;
        rx.await.ok()
    }

    pub async fn spectate(&self, queue: OutboundQueue) -> Option<u64> {
        let (reply, rx) = oneshot::channel();
        self.cmd
            .send(RoomCommand::Spectate { queue, reply })
            .await
            .ok()?;
        rx.await.ok()
    }

    pub async fn leave(&self, conn_id: u64) {
        let _ = self.cmd.send(RoomCommand::Leave { conn_id }).await;
    }

    pub async fn code_change(&self, conn_id: u64, code: String, timestamp: i64) {
        let _ = self
            .cmd
            .send(RoomCommand::CodeChange {
                conn_id,
                code,
                timestamp,
            })
            .await;
    }

    /// Post a pipeline result to the room. The actor makes the winner
    /// decision under its single-writer discipline.
    pub async fn submission_observed(
        &self,
        username: String,
        language: Language,
        result: SubmissionResult,
    ) {
        let _ = self
            .cmd
            .send(RoomCommand::SubmissionObserved {
                username,
                language,
                result,
            })
            .await;
    }

    pub async fn phase(&self) -> Option<Phase> {
        let (reply, rx) = oneshot::channel();
        self.cmd.send(RoomCommand::GetPhase { reply }).await.ok()?;
        rx.await.ok()
    }
}

/// Dependencies and tunables handed to every room actor.
pub struct RoomServices {
    pub problems: Arc<ProblemRepository>,
    pub scoring: Scoring,
    pub countdown: Duration,
    pub grace: Duration,
}

/// The map `room code -> handle`. Creation is race-free: the handle is
/// inserted under the write lock, so concurrent accepts of the same code
/// agree on one actor.
#[derive(Clone)]
pub struct RoomRegistry {
    inner: Arc<RwLock<HashMap<String, RoomHandle>>>,
    services: Arc<RoomServices>,
}

impl RoomRegistry {
    pub fn new(services: Arc<RoomServices>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            services,
        }
    }

    pub async fn get_or_create(
        &self,
        code: RoomCode,
        difficulty: DifficultyFilter,
        required_players: usize,
        mode: GameMode,
    ) -> RoomHandle {
        let mut rooms = self.inner.write().await;
        if let Some(handle) = rooms.get(code.as_str()) {
            return handle.clone();
        }

        info!(
            room = %code,
            difficulty = difficulty.as_str(),
            required_players,
            mode = %mode,
            "creating room"
        );
        let handle = actor::spawn(
            code.clone(),
            difficulty,
            required_players,
            mode,
            self.services.clone(),
            self.clone(),
        );
        rooms.insert(code.as_str().to_string(), handle.clone());
        handle
    }

    pub async fn get(&self, code: &str) -> Option<RoomHandle> {
        self.inner.read().await.get(code).cloned()
    }

    pub async fn remove(&self, code: &str) {
        if self.inner.write().await.remove(code).is_some() {
            info!(room = %code, "room released");
        }
    }

    pub async fn snapshots(&self) -> Vec<RoomSnapshot> {
        self.inner
            .read()
            .await
            .values()
            .map(|handle| handle.snapshot())
            .collect()
    }
}
