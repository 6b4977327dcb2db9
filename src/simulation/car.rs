//! Car movement logic for the traffic simulation
//!
//! Each tick a car picks the binding constraint ahead of it (a stop line or a
//! lead vehicle), derives a velocity from it, checks that the move keeps it
//! clear of every other vehicle and then integrates along its route.

use anyhow::{ensure, Context, Result};
use ordered_float::OrderedFloat;
use std::collections::BTreeMap;

use super::grid::Grid;
use super::intersection::{LightBoard, LightState};
use super::road_network::Route;
use super::types::{
    CarId, Direction, GridPos, LightId, Position, CAR_LENGTH, COLLISION_RADIUS, SAFETY_RADIUS,
    STANDSTILL_GAP,
};

/// Waypoints scanned ahead for lead vehicles and stop lines
pub const LOOKAHEAD_WAYPOINTS: usize = 8;

/// Distance from the route polyline within which a vehicle counts as ahead
pub const LATERAL_TOLERANCE: f32 = 0.9;

/// Distance at which a waypoint counts as reached
const WAYPOINT_TOLERANCE: f32 = 0.05;

/// Velocity below which a car counts as standing still
pub const STOPPED_VELOCITY: f32 = 0.001;

/// Velocity below which an obstacle change triggers the reaction delay
const NEARLY_STOPPED_VELOCITY: f32 = 0.01;

/// Gap treated as closed
const GAP_EPSILON: f32 = 0.001;

/// Ticks of travel kept as a margin on top of the stopping distance
const BUFFER_TICKS: f32 = 5.0;

/// Gap below which a moving lead's speed is matched instead of accelerating
const FOLLOWING_RANGE: f32 = 3.0;

/// Distance from the intersection cell center back to the stop line
const STOP_LINE_OFFSET: f32 = 1.0;

/// Stop lines further behind the car than this are considered passed
const PASSED_LIGHT_SLACK: f32 = 0.05;

/// Squared distance from the spawn point within which a stopped car is spawn-stuck
pub const SPAWN_STUCK_RADIUS_SQUARED: f32 = 4.0;

/// Result of a car update indicating what action should be taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarUpdateResult {
    Continue,          // Car continues moving
    Exited,            // Car passed the end of its route
    Collided(CarId),   // Car made contact with another car
}

/// The constraint that bound a car's velocity on its last update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimitReason {
    #[default]
    Free,
    Light(LightId),
    Vehicle(CarId),
    /// Emergency stop for a vehicle about to be hit
    Yield(CarId),
    Collided,
}

/// What a limit is waiting on, regardless of how the car reacted to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Blocker {
    Car(CarId),
    Light(LightId),
}

impl LimitReason {
    fn blocker(self) -> Option<Blocker> {
        match self {
            LimitReason::Vehicle(id) | LimitReason::Yield(id) => Some(Blocker::Car(id)),
            LimitReason::Light(id) => Some(Blocker::Light(id)),
            LimitReason::Free | LimitReason::Collided => None,
        }
    }
}

/// Per-car driving parameters chosen at spawn
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverProfile {
    pub max_velocity: f32,
    pub acceleration: f32,
    pub deceleration: f32,
    /// Ignores lane rules and never yields at the last moment
    pub rebel: bool,
}

/// Read-only world state a car needs during its update
#[derive(Debug, Clone, Copy)]
pub struct DriveContext<'a> {
    pub grid: &'a Grid,
    pub lights: &'a LightBoard,
    pub reaction_ticks: u32,
}

#[derive(Debug, Clone, Copy)]
struct Obstacle {
    /// Distance left before the standoff is reached
    gap: f32,
    reason: LimitReason,
    /// Velocity of a lead vehicle, `None` for stop lines
    lead_velocity: Option<f32>,
}

/// A car in the traffic simulation
#[derive(Debug, Clone, PartialEq)]
pub struct SimCar {
    pub id: CarId,
    pub position: Position,
    pub velocity: f32,
    pub max_velocity: f32,
    pub acceleration: f32,
    pub deceleration: f32,
    pub route: Route,
    /// Index of the waypoint the car is driving towards
    pub waypoint: usize,
    pub destination: GridPos,
    pub spawn_position: Position,
    pub collided: bool,
    pub collision_timer: u32,
    pub stuck_timer: u32,
    pub spawn_stuck_timer: u32,
    pub rebel: bool,
    pub reaction_timer: u32,
    pub limit: LimitReason,
    /// Heading in radians, 0 = east
    pub heading: f32,
}

impl SimCar {
    /// Place a car on the first waypoint of its route
    pub fn new(id: CarId, route: Route, profile: DriverProfile) -> Result<Self> {
        ensure!(route.len() >= 2, "Route for car {:?} is too short", id);
        let start = route.waypoints.first().copied().context("Route is empty")?;
        let destination = route.destination().context("Route is empty")?;
        let position = start.center();
        let heading = position.angle_to(&route.waypoints[1].center());

        Ok(Self {
            id,
            position,
            velocity: 0.0,
            max_velocity: profile.max_velocity,
            acceleration: profile.acceleration,
            deceleration: profile.deceleration,
            route,
            waypoint: 1,
            destination,
            spawn_position: position,
            collided: false,
            collision_timer: 0,
            stuck_timer: 0,
            spawn_stuck_timer: 0,
            rebel: profile.rebel,
            reaction_timer: 0,
            limit: LimitReason::Free,
            heading,
        })
    }

    pub fn has_exited(&self) -> bool {
        self.waypoint >= self.route.len()
    }

    pub fn target(&self) -> Option<GridPos> {
        self.route.waypoints.get(self.waypoint).copied()
    }

    /// The waypoint the car last passed
    pub fn previous_waypoint(&self) -> Option<GridPos> {
        self.waypoint
            .checked_sub(1)
            .and_then(|i| self.route.waypoints.get(i).copied())
    }

    pub fn is_stopped(&self) -> bool {
        self.velocity < STOPPED_VELOCITY
    }

    /// Heading the car entered (or is entering) an intersection with
    pub fn entry_heading(&self) -> Option<Direction> {
        self.route.entry_heading(self.waypoint).or_else(|| {
            self.route.entry_heading(self.waypoint.checked_sub(1)?)
        })
    }

    /// Whether the car stands on, or has crossed the stop line into, any of `cells`
    pub fn occupies(&self, cells: &[GridPos]) -> bool {
        if cells.contains(&self.position.cell()) {
            return true;
        }
        match (self.previous_waypoint(), self.target()) {
            (Some(prev), Some(next)) => {
                cells.contains(&next)
                    && self.position.distance(&prev.center()) > PASSED_LIGHT_SLACK
            }
            _ => false,
        }
    }

    /// Update car movement logic
    /// Returns CarUpdateResult indicating what action should be taken with the car
    pub fn update(
        &mut self,
        ctx: &DriveContext<'_>,
        peers: &BTreeMap<CarId, SimCar>,
    ) -> CarUpdateResult {
        if self.collided {
            self.velocity = 0.0;
            self.collision_timer += 1;
            self.limit = LimitReason::Collided;
            return CarUpdateResult::Continue;
        }

        self.advance_waypoint();
        let Some(target) = self.target() else {
            return CarUpdateResult::Exited;
        };
        let target_pos = target.center();
        if self.position.distance_squared(&target_pos) > 0.0 {
            self.heading = self.position.angle_to(&target_pos);
        }

        let obstacle = nearest(self.light_obstacle(ctx, peers), self.lead_obstacle(peers));
        let reason = obstacle.map(|o| o.reason).unwrap_or_default();
        if reason.blocker() != self.limit.blocker() && self.velocity < NEARLY_STOPPED_VELOCITY {
            self.reaction_timer = ctx.reaction_ticks;
        }
        self.limit = reason;

        let mut velocity = self.following_velocity(obstacle);
        if self.reaction_timer > 0 {
            self.reaction_timer -= 1;
            velocity = velocity.min(self.velocity);
        }

        let step = velocity.min(self.position.distance(&target_pos));
        let projected = self.position.advance_towards(&target_pos, step);

        if !self.rebel && step > 0.0 {
            if let Some(other) = self.closing_within(projected, SAFETY_RADIUS, peers) {
                velocity = 0.0;
                self.limit = LimitReason::Yield(other);
            }
        }

        let projected = if velocity > 0.0 { projected } else { self.position };
        if let Some(other) = nearest_within(projected, COLLISION_RADIUS, peers) {
            self.collided = true;
            self.velocity = 0.0;
            self.limit = LimitReason::Collided;
            return CarUpdateResult::Collided(other);
        }

        self.position = projected;
        self.velocity = velocity;
        self.update_timers();
        CarUpdateResult::Continue
    }

    /// Move the cursor past every waypoint already reached
    fn advance_waypoint(&mut self) {
        while let Some(target) = self.target() {
            let target_pos = target.center();
            let reached = self.position.distance(&target_pos) <= WAYPOINT_TOLERANCE
                || self
                    .previous_waypoint()
                    .is_some_and(|prev| projection(&prev.center(), &target_pos, &self.position) >= 1.0);
            if !reached {
                break;
            }
            self.waypoint += 1;
        }
    }

    /// Polyline from the car through the next waypoints
    fn lookahead(&self) -> Vec<Position> {
        std::iter::once(self.position)
            .chain(
                self.route
                    .waypoints
                    .iter()
                    .skip(self.waypoint)
                    .take(LOOKAHEAD_WAYPOINTS)
                    .map(|w| w.center()),
            )
            .collect()
    }

    /// Stop line of the next non-green light on the route.
    ///
    /// On green a lawful driver still holds the line while cross traffic is
    /// inside the part of the intersection it is about to drive through.
    fn light_obstacle(
        &self,
        ctx: &DriveContext<'_>,
        peers: &BTreeMap<CarId, SimCar>,
    ) -> Option<Obstacle> {
        if ctx.grid.is_intersection(self.position.cell()) {
            return None;
        }

        let end = (self.waypoint + LOOKAHEAD_WAYPOINTS).min(self.route.len());
        let mut along = 0.0;
        let mut from = self.position;
        for index in self.waypoint..end {
            let cell = self.route.waypoints[index];
            along += from.distance(&cell.center());
            from = cell.center();

            if !ctx.grid.is_intersection(cell) {
                continue;
            }
            let approach = *self.route.waypoints.get(index.checked_sub(1)?)?;
            if ctx.grid.is_intersection(approach) {
                return None;
            }
            let heading = self.route.arrival_direction(index)?;
            let light = ctx.lights.light_at(approach)?;
            if light.group != heading {
                return None;
            }

            let gap = along - STOP_LINE_OFFSET;
            if gap < -PASSED_LIGHT_SLACK {
                return None;
            }
            let gap = gap.max(0.0);
            let can_stop = self.stopping_distance() <= gap;
            let must_stop = match light.state {
                LightState::Green => false,
                LightState::Red => true,
                LightState::Yellow => can_stop,
            };
            if must_stop {
                return Some(Obstacle {
                    gap,
                    reason: LimitReason::Light(light.id),
                    lead_velocity: None,
                });
            }
            if self.rebel || !can_stop {
                return None;
            }
            return self
                .box_occupant(ctx.grid, index, heading, peers)
                .map(|occupant| Obstacle {
                    gap,
                    reason: LimitReason::Vehicle(occupant),
                    lead_velocity: None,
                });
        }
        None
    }

    /// A vehicle that entered with another heading and still occupies the
    /// intersection cells of this route starting at waypoint `entry`
    fn box_occupant(
        &self,
        grid: &Grid,
        entry: usize,
        heading: Direction,
        peers: &BTreeMap<CarId, SimCar>,
    ) -> Option<CarId> {
        let cells: Vec<GridPos> = self.route.waypoints[entry..]
            .iter()
            .copied()
            .take_while(|cell| grid.is_intersection(*cell))
            .collect();
        peers
            .values()
            .filter(|peer| peer.id != self.id)
            .find(|peer| {
                peer.occupies(&cells) && peer.entry_heading().is_some_and(|h| h != heading)
            })
            .map(|peer| peer.id)
    }

    /// Closest vehicle lying on the route ahead
    fn lead_obstacle(&self, peers: &BTreeMap<CarId, SimCar>) -> Option<Obstacle> {
        let polyline = self.lookahead();
        let range = (LOOKAHEAD_WAYPOINTS as f32 + 1.0).powi(2);

        let (along, peer) = peers
            .values()
            .filter(|peer| {
                peer.id != self.id && self.position.distance_squared(&peer.position) <= range
            })
            .filter_map(|peer| Some((distance_along(&polyline, &peer.position)?, peer)))
            .filter(|(_, peer)| !self.goes_first(peer))
            .min_by_key(|(along, _)| OrderedFloat(*along))?;

        Some(Obstacle {
            gap: along - (CAR_LENGTH + STANDSTILL_GAP * CAR_LENGTH),
            reason: LimitReason::Vehicle(peer.id),
            lead_velocity: Some(peer.velocity),
        })
    }

    /// Two vehicles that each lie on the other's path ahead would wait for
    /// each other forever. The one nearer a shared target goes first, then
    /// the lower id.
    fn goes_first(&self, peer: &SimCar) -> bool {
        self.priority(peer) < peer.priority(self)
            && distance_along(&peer.lookahead(), &self.position).is_some()
    }

    fn priority(&self, other: &SimCar) -> (OrderedFloat<f32>, CarId) {
        let shared = self.target().filter(|target| other.target() == Some(*target));
        let distance = shared.map_or(0.0, |target| self.position.distance(&target.center()));
        (OrderedFloat(distance), self.id)
    }

    fn stopping_distance(&self) -> f32 {
        self.velocity * self.velocity / (2.0 * self.deceleration)
    }

    /// Car-following law
    fn following_velocity(&self, obstacle: Option<Obstacle>) -> f32 {
        let v = self.velocity;
        let Some(obstacle) = obstacle else {
            return (v + self.acceleration).min(self.max_velocity);
        };

        let gap = obstacle.gap;
        if gap <= GAP_EPSILON {
            return 0.0;
        }

        let braking_limit = (2.0 * self.deceleration * gap).sqrt();
        let next = if self.stopping_distance() + v * BUFFER_TICKS < gap {
            match obstacle.lead_velocity {
                Some(lead) if lead > STOPPED_VELOCITY && gap < FOLLOWING_RANGE => {
                    if v < lead {
                        (v + self.acceleration).min(lead)
                    } else {
                        (v - self.deceleration).max(lead)
                    }
                }
                _ => v + self.acceleration,
            }
        } else {
            (v - self.deceleration).min(braking_limit)
        };

        next.min(gap).min(braking_limit).min(self.max_velocity).max(0.0)
    }

    /// A vehicle the move to `projected` would close on inside `radius`
    fn closing_within(
        &self,
        projected: Position,
        radius: f32,
        peers: &BTreeMap<CarId, SimCar>,
    ) -> Option<CarId> {
        peers
            .values()
            .filter(|peer| peer.id != self.id)
            .find(|peer| {
                let after = projected.distance(&peer.position);
                after < radius && after < self.position.distance(&peer.position)
            })
            .map(|peer| peer.id)
    }

    fn update_timers(&mut self) {
        if self.is_stopped() {
            self.stuck_timer += 1;
            if self.position.distance_squared(&self.spawn_position) < SPAWN_STUCK_RADIUS_SQUARED {
                self.spawn_stuck_timer += 1;
            } else {
                self.spawn_stuck_timer = 0;
            }
        } else {
            self.stuck_timer = 0;
            self.spawn_stuck_timer = 0;
        }
    }
}

fn nearest(a: Option<Obstacle>, b: Option<Obstacle>) -> Option<Obstacle> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if b.gap < a.gap { b } else { a }),
        (a, b) => a.or(b),
    }
}

/// The closest other vehicle within `radius` of a position
fn nearest_within(
    position: Position,
    radius: f32,
    peers: &BTreeMap<CarId, SimCar>,
) -> Option<CarId> {
    peers
        .values()
        .map(|peer| (position.distance(&peer.position), peer.id))
        .filter(|(distance, _)| *distance < radius)
        .min_by_key(|(distance, _)| OrderedFloat(*distance))
        .map(|(_, id)| id)
}

/// Unclamped projection parameter of `point` on the segment `a -> b`
fn projection(a: &Position, b: &Position, point: &Position) -> f32 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let length_squared = dx * dx + dy * dy;
    if length_squared == 0.0 {
        return 0.0;
    }
    ((point.x - a.x) * dx + (point.y - a.y) * dy) / length_squared
}

/// Distance along a polyline to the point nearest `point`, if it lies within
/// the lateral tolerance of a segment or vertex
fn distance_along(polyline: &[Position], point: &Position) -> Option<f32> {
    let mut travelled = 0.0;
    for pair in polyline.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let length = a.distance(&b);
        if length > 0.0 {
            let t = projection(&a, &b, point);
            if (0.0..=1.0).contains(&t) && a.lerp(&b, t).distance(point) < LATERAL_TOLERANCE {
                return Some(travelled + t * length);
            }
        }
        travelled += length;
        if b.distance(point) < LATERAL_TOLERANCE {
            return Some(travelled);
        }
    }
    None
}
