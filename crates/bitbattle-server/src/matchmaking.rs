//! The matchmaking queue.
//!
//! FIFO per `(difficulty, mode)`; an `Any` entry participates in every
//! difficulty bucket. Matching pairs the two oldest compatible waiters,
//! resolving `Any` to the oldest waiter's concrete choice (Medium when both
//! picked `Any`). Entries of the same username never match each other. Each
//! side of a produced match learns about it exactly once through `status`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use bitbattle_shared::{Difficulty, DifficultyFilter, GameMode, MatchInfo, RoomCode};

#[derive(Debug, Clone)]
pub struct MatchmakingEntry {
    pub connection_id: String,
    pub username: String,
    pub difficulty: DifficultyFilter,
    pub mode: GameMode,
    pub enqueued_at: DateTime<Utc>,
    /// Tie-breaker for entries enqueued within the same instant.
    seq: u64,
}

impl MatchmakingEntry {
    fn fifo_key(&self) -> (DateTime<Utc>, u64) {
        (self.enqueued_at, self.seq)
    }
}

/// A produced pairing; the server turns this into a room.
#[derive(Debug, Clone)]
pub struct NewMatch {
    pub room_code: RoomCode,
    pub difficulty: Difficulty,
    pub mode: GameMode,
    pub players: [String; 2],
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub in_queue: bool,
    pub position: Option<usize>,
    pub queue_size: usize,
    pub match_found: bool,
    pub match_info: Option<MatchInfo>,
}

#[derive(Default)]
struct Inner {
    /// At most one entry per connection_id.
    queue: HashMap<String, MatchmakingEntry>,
    /// Matches produced but not yet observed, per connection_id.
    pending: HashMap<String, MatchInfo>,
    next_seq: u64,
}

pub struct Matchmaker {
    inner: Mutex<Inner>,
}

impl Matchmaker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Enqueue; re-joining with the same connection id replaces the old
    /// entry. Returns the queue size after the join.
    pub async fn join(
        &self,
        connection_id: &str,
        username: &str,
        difficulty: DifficultyFilter,
        mode: GameMode,
    ) -> usize {
        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.queue.insert(
            connection_id.to_string(),
            MatchmakingEntry {
                connection_id: connection_id.to_string(),
                username: username.to_string(),
                difficulty,
                mode,
                enqueued_at: Utc::now(),
                seq,
            },
        );
        inner.queue.len()
    }

    /// Remove an entry if present; idempotent.
    pub async fn leave(&self, connection_id: &str) -> bool {
        self.inner.lock().await.queue.remove(connection_id).is_some()
    }

    /// Queue position / pending-match lookup. A produced match is cleared
    /// after this reports it, so `match_found` is true exactly once.
    pub async fn status(&self, connection_id: &str) -> QueueStatus {
        let mut inner = self.inner.lock().await;

        if let Some(info) = inner.pending.remove(connection_id) {
            return QueueStatus {
                in_queue: false,
                position: None,
                queue_size: inner.queue.len(),
                match_found: true,
                match_info: Some(info),
            };
        }

        let mut ordered: Vec<&MatchmakingEntry> = inner.queue.values().collect();
        ordered.sort_by_key(|e| e.fifo_key());
        let position = ordered
            .iter()
            .position(|e| e.connection_id == connection_id);

        QueueStatus {
            in_queue: position.is_some(),
            position,
            queue_size: inner.queue.len(),
            match_found: false,
            match_info: None,
        }
    }

    /// Pair as many waiting players as possible, oldest first.
    pub async fn try_match(&self) -> Vec<NewMatch> {
        let mut inner = self.inner.lock().await;

        let mut ordered: Vec<MatchmakingEntry> = inner.queue.values().cloned().collect();
        ordered.sort_by_key(|e| e.fifo_key());

        let mut matched: Vec<String> = Vec::new();
        let mut matches = Vec::new();

        for i in 0..ordered.len() {
            if matched.contains(&ordered[i].connection_id) {
                continue;
            }
            for j in (i + 1)..ordered.len() {
                if matched.contains(&ordered[j].connection_id) {
                    continue;
                }
                if !compatible(&ordered[i], &ordered[j]) {
                    continue;
                }

                let first = &ordered[i];
                let second = &ordered[j];
                let difficulty = resolve_difficulty(first.difficulty, second.difficulty);
                let room_code = RoomCode::generate();

                info!(
                    room = %room_code,
                    first = %first.username,
                    second = %second.username,
                    difficulty = %difficulty,
                    mode = %first.mode,
                    "matchmaking pair produced"
                );

                for (entry, opponent) in [(first, second), (second, first)] {
                    inner.pending.insert(
                        entry.connection_id.clone(),
                        MatchInfo {
                            room_code: room_code.to_string(),
                            opponent: opponent.username.clone(),
                            difficulty: difficulty.as_str().to_string(),
                            game_mode: entry.mode,
                        },
                    );
                }
                matches.push(NewMatch {
                    room_code,
                    difficulty,
                    mode: first.mode,
                    players: [first.username.clone(), second.username.clone()],
                });
                matched.push(ordered[i].connection_id.clone());
                matched.push(ordered[j].connection_id.clone());
                break;
            }
        }

        for connection_id in &matched {
            inner.queue.remove(connection_id);
        }

        matches
    }
}

impl Default for Matchmaker {
    fn default() -> Self {
        Self::new()
    }
}

fn compatible(a: &MatchmakingEntry, b: &MatchmakingEntry) -> bool {
    if a.mode != b.mode {
        return false;
    }
    if a.username == b.username {
        return false;
    }
    match (a.difficulty.as_difficulty(), b.difficulty.as_difficulty()) {
        (Some(x), Some(y)) => x == y,
        _ => true,
    }
}

/// The oldest waiter's concrete choice wins; two `Any` entries play Medium.
fn resolve_difficulty(oldest: DifficultyFilter, newer: DifficultyFilter) -> Difficulty {
    oldest
        .as_difficulty()
        .or_else(|| newer.as_difficulty())
        .unwrap_or(Difficulty::Medium)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn join(mm: &Matchmaker, conn: &str, name: &str, d: DifficultyFilter, m: GameMode) {
        mm.join(conn, name, d, m).await;
    }

    #[tokio::test]
    async fn pairs_two_players_fifo() {
        let mm = Matchmaker::new();
        join(&mm, "c1", "alice", DifficultyFilter::Medium, GameMode::Casual).await;
        join(&mm, "c2", "bob", DifficultyFilter::Medium, GameMode::Casual).await;
        join(&mm, "c3", "carol", DifficultyFilter::Medium, GameMode::Casual).await;

        let matches = mm.try_match().await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].players, ["alice".to_string(), "bob".to_string()]);
        assert_eq!(matches[0].difficulty, Difficulty::Medium);

        // carol keeps waiting at the head of the queue.
        let status = mm.status("c3").await;
        assert!(status.in_queue);
        assert_eq!(status.position, Some(0));
    }

    #[tokio::test]
    async fn different_modes_or_difficulties_never_match() {
        let mm = Matchmaker::new();
        join(&mm, "c1", "alice", DifficultyFilter::Easy, GameMode::Casual).await;
        join(&mm, "c2", "bob", DifficultyFilter::Hard, GameMode::Casual).await;
        join(&mm, "c3", "carol", DifficultyFilter::Hard, GameMode::Ranked).await;

        assert!(mm.try_match().await.is_empty());
    }

    #[tokio::test]
    async fn any_resolves_to_oldest_concrete_choice() {
        let mm = Matchmaker::new();
        join(&mm, "c1", "alice", DifficultyFilter::Any, GameMode::Casual).await;
        join(&mm, "c2", "bob", DifficultyFilter::Hard, GameMode::Casual).await;

        let matches = mm.try_match().await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].difficulty, Difficulty::Hard);
    }

    #[tokio::test]
    async fn double_any_plays_medium() {
        let mm = Matchmaker::new();
        join(&mm, "c1", "alice", DifficultyFilter::Any, GameMode::Casual).await;
        join(&mm, "c2", "bob", DifficultyFilter::Any, GameMode::Casual).await;

        let matches = mm.try_match().await;
        assert_eq!(matches[0].difficulty, Difficulty::Medium);
    }

    #[tokio::test]
    async fn same_username_does_not_self_match() {
        let mm = Matchmaker::new();
        join(&mm, "c1", "alice", DifficultyFilter::Easy, GameMode::Casual).await;
        join(&mm, "c2", "alice", DifficultyFilter::Easy, GameMode::Casual).await;

        assert!(mm.try_match().await.is_empty());
    }

    #[tokio::test]
    async fn rejoin_replaces_entry() {
        let mm = Matchmaker::new();
        join(&mm, "c1", "alice", DifficultyFilter::Easy, GameMode::Casual).await;
        let size = mm
            .join("c1", "alice", DifficultyFilter::Hard, GameMode::Casual)
            .await;
        assert_eq!(size, 1);

        join(&mm, "c2", "bob", DifficultyFilter::Hard, GameMode::Casual).await;
        let matches = mm.try_match().await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].difficulty, Difficulty::Hard);
    }

    #[tokio::test]
    async fn match_found_reported_exactly_once_per_side() {
        let mm = Matchmaker::new();
        join(&mm, "c1", "alice", DifficultyFilter::Easy, GameMode::Casual).await;
        join(&mm, "c2", "bob", DifficultyFilter::Easy, GameMode::Casual).await;
        mm.try_match().await;

        let first = mm.status("c1").await;
        assert!(first.match_found);
        let info = first.match_info.unwrap();
        assert_eq!(info.opponent, "bob");
        assert_eq!(info.difficulty, "easy");

        let second = mm.status("c1").await;
        assert!(!second.match_found);
        assert!(!second.in_queue);

        assert!(mm.status("c2").await.match_found);
    }

    #[tokio::test]
    async fn leave_is_idempotent() {
        let mm = Matchmaker::new();
        join(&mm, "c1", "alice", DifficultyFilter::Easy, GameMode::Casual).await;
        assert!(mm.leave("c1").await);
        assert!(!mm.leave("c1").await);
        assert!(!mm.leave("ghost").await);
    }
}
