//! Scoring orchestration.
//!
//! The room actor hands a finished game here; the store writes everything
//! in one transaction on the blocking pool. Persistence failure is logged
//! and degrades to zeroed rating changes -- the in-memory `game_over`
//! broadcast always proceeds, the room is never rolled back.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info};

use bitbattle_shared::RatingChange;
use bitbattle_store::{Database, GameOutcome};

#[derive(Clone)]
pub struct Scoring {
    store: Arc<Mutex<Database>>,
}

impl Scoring {
    pub fn new(store: Arc<Mutex<Database>>) -> Self {
        Self { store }
    }

    /// Persist a finished game; returns the per-username rating movement
    /// for the `game_over` broadcast. Never fails -- on a storage error the
    /// movement is all zeros.
    pub async fn record_game(&self, outcome: GameOutcome) -> HashMap<String, RatingChange> {
        let usernames: Vec<String> = outcome
            .participants
            .iter()
            .map(|p| p.username.clone())
            .collect();
        let room_id = outcome.room_id.clone();

        let store = self.store.clone();
        let written = tokio::task::spawn_blocking(move || {
            let mut db = store.blocking_lock();
            db.record_game(&outcome)
        })
        .await;

        match written {
            Ok(Ok(changes)) => {
                info!(room = %room_id, players = usernames.len(), "game recorded");
                changes
            }
            Ok(Err(e)) => {
                error!(room = %room_id, error = %e, "failed to persist game, ratings unchanged");
                zeroed(&usernames)
            }
            Err(e) => {
                error!(room = %room_id, error = %e, "scoring task panicked, ratings unchanged");
                zeroed(&usernames)
            }
        }
    }
}

fn zeroed(usernames: &[String]) -> HashMap<String, RatingChange> {
    usernames
        .iter()
        .map(|name| (name.clone(), RatingChange::unchanged(1200)))
        .collect()
}
