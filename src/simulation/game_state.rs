//! Score keeping and the end-of-game condition
//!
//! Exits earn points, crashes cost points, and the run ends for good once a
//! vehicle has been stuck at its spawn point for too long.

/// Running totals for one simulation run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameState {
    /// Vehicles that reached an exit
    pub exited: usize,

    pub score: i64,

    /// Collision events, one per pair of vehicles
    pub collisions: usize,

    /// Set while a vehicle is close to the spawn-stuck limit
    pub spawn_stuck_warning: bool,

    /// Why the game ended, if it has
    pub game_over: Option<String>,
}

impl GameState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_over(&self) -> bool {
        self.game_over.is_some()
    }

    /// Record a vehicle leaving the map and award the exit reward
    pub fn record_exit(&mut self, reward: i64) {
        self.exited += 1;
        self.score += reward;
    }

    /// Record a crash between two vehicles
    pub fn record_collision(&mut self, penalty: i64) {
        self.collisions += 1;
        self.score -= penalty;
    }

    /// End the game; the first reason wins
    pub fn end(&mut self, reason: impl Into<String>) {
        if self.game_over.is_none() {
            self.game_over = Some(reason.into());
        }
    }

    /// Get a summary string for display
    pub fn summary(&self) -> String {
        format!(
            "Exited: {} | Collisions: {} | Score: {}",
            self.exited, self.collisions, self.score
        )
    }
}
