//! Lane-grid traffic simulation
//!
//! This module contains all the core traffic simulation logic: level
//! generation, lane-aware pathfinding, signal phases, vehicle kinematics and
//! the world that runs them tick by tick. It has no rendering dependencies.

mod car;
mod car_manager;
mod config;
mod game_state;
mod grid;
mod intersection;
mod level;
mod road_network;
mod snapshot;
mod types;
mod world;

// Re-export public types for external use
pub use car::{
    CarUpdateResult, DriveContext, DriverProfile, LimitReason, SimCar, LATERAL_TOLERANCE,
    LOOKAHEAD_WAYPOINTS, SPAWN_STUCK_RADIUS_SQUARED, STOPPED_VELOCITY,
};
pub use car_manager::{is_clear, lane_occupancy, SpawnController};
pub use config::SimConfig;
pub use game_state::GameState;
pub use grid::{Cell, CellKind, Grid, IntersectionSite, LaneDiscipline};
pub use intersection::{
    LightBoard, LightState, Phase, PhasePreset, PhaseRules, PhaseTiming, SimIntersection,
    TrafficLight,
};
pub use level::{generate_level, GeneratedLevel, LevelId, LevelSpec, LANES_PER_ROAD};
pub use road_network::{Approach, RoadNetwork, Route, SearchState};
pub use snapshot::{IntersectionView, LightView, VehicleView, WorldSnapshot};
pub use types::{
    CarId, Direction, DirectionSet, GridPos, IntersectionId, LightId, Position, RoadGroupId,
    SimId, CAR_LENGTH, COLLISION_RADIUS, SAFETY_RADIUS, SPAWN_CLEARANCE, STANDSTILL_GAP,
    TICKS_PER_SECOND,
};
pub use world::SimWorld;
