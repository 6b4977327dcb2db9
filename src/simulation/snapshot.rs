//! Read-only view of the world for renderers and tests

use std::sync::Arc;

use super::car::LimitReason;
use super::grid::Grid;
use super::intersection::{LightState, Phase, PhasePreset};
use super::types::{CarId, Direction, GridPos, IntersectionId, LightId, Position};

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleView {
    pub id: CarId,
    pub position: Position,
    pub heading: f32,
    pub velocity: f32,
    pub collided: bool,
    pub limit: LimitReason,
    pub rebel: bool,
    pub path: Vec<GridPos>,
    pub waypoint: usize,
    pub destination: GridPos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LightView {
    pub id: LightId,
    pub position: GridPos,
    pub group: Direction,
    pub state: LightState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntersectionView {
    pub id: IntersectionId,
    pub phases: Vec<Phase>,
    pub current_phase: usize,
    pub timer: u32,
    pub preset: PhasePreset,
}

/// Everything an observer may look at after a tick
#[derive(Debug, Clone, PartialEq)]
pub struct WorldSnapshot {
    pub tick: u64,
    pub grid: Arc<Grid>,
    pub vehicles: Vec<VehicleView>,
    pub lights: Vec<LightView>,
    pub intersections: Vec<IntersectionView>,
    pub exited: usize,
    pub score: i64,
    pub collisions: usize,
    pub game_over: bool,
    pub game_over_reason: Option<String>,
    /// Vehicles per second after the congestion penalty
    pub spawn_rate: f32,
    /// Waiting vehicles per entry, ascending by entry position
    pub queues: Vec<(GridPos, u32)>,
    pub blocked_entries: Vec<GridPos>,
    pub spawn_stuck_warning: bool,
}

impl WorldSnapshot {
    pub fn queued_total(&self) -> u32 {
        self.queues.iter().map(|(_, n)| n).sum()
    }

    pub fn vehicle(&self, id: CarId) -> Option<&VehicleView> {
        self.vehicles.iter().find(|v| v.id == id)
    }
}
