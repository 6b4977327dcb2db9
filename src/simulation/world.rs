//! Main simulation world that ties everything together
//!
//! This is the entry point for running the traffic simulation. The world owns
//! the grid, the vehicles, the lights and the intersections, and advances them
//! in a fixed order once per tick.

use anyhow::{bail, ensure, Context, Result};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::SeedableRng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::car::{
    CarUpdateResult, DriveContext, DriverProfile, LimitReason, SimCar, LOOKAHEAD_WAYPOINTS,
};
use super::car_manager::{self, SpawnController};
use super::config::SimConfig;
use super::game_state::GameState;
use super::grid::{Cell, CellKind, Grid, IntersectionSite};
use super::intersection::{
    LightBoard, LightState, Phase, PhasePreset, PhaseRules, PhaseTiming, SimIntersection,
    TrafficLight,
};
use super::level::{generate_level, LevelSpec};
use super::road_network::{RoadNetwork, Route, SearchState};
use super::snapshot::{IntersectionView, LightView, VehicleView, WorldSnapshot};
use super::types::{
    CarId, Direction, GridPos, IntersectionId, LightId, SimId, SPAWN_CLEARANCE, TICKS_PER_SECOND,
};

/// The main simulation world
pub struct SimWorld {
    level: LevelSpec,

    /// Shared with snapshots, copied on write
    grid: Arc<Grid>,

    /// Road network for pathfinding
    road_network: RoadNetwork,

    /// All cars, ordered by id
    cars: BTreeMap<CarId, SimCar>,

    lights: LightBoard,

    /// All intersections
    intersections: BTreeMap<IntersectionId, SimIntersection>,

    spawner: SpawnController,

    game_state: GameState,

    config: SimConfig,

    /// Next ID to assign
    next_id: usize,

    tick: u64,

    /// Fractional ticks owed by `advance_frame`
    frame_accumulator: f32,

    rng: StdRng,
}

impl SimWorld {
    /// Create a world for a level with default settings
    pub fn new_with_level(level: LevelSpec) -> Result<Self> {
        Self::new_with_config(level, SimConfig::default())
    }

    pub fn new_with_config(level: LevelSpec, config: SimConfig) -> Result<Self> {
        let generated = generate_level(&level)
            .with_context(|| format!("Failed to generate level {}", level.level))?;

        let mut world = Self {
            level,
            grid: Arc::new(generated.grid),
            road_network: RoadNetwork::default(),
            cars: BTreeMap::new(),
            lights: LightBoard::new(),
            intersections: BTreeMap::new(),
            spawner: SpawnController::new(),
            game_state: GameState::new(),
            config,
            next_id: 0,
            tick: 0,
            frame_accumulator: 0.0,
            rng: StdRng::seed_from_u64(level.seed),
        };
        world.rebuild_network(&generated.intersections, &HashMap::new());

        info!(
            "Loaded level {} ({}x{}): {} entries, {} exits, {} intersections",
            level.level,
            world.grid.width(),
            world.grid.height(),
            world.grid.entries().len(),
            world.grid.exits().len(),
            world.intersections.len()
        );
        Ok(world)
    }

    /// Regenerate the world for a level, optionally keeping intersection rules
    pub fn reset(&mut self, level: LevelSpec, preserve_rules: bool) -> Result<()> {
        let generated = generate_level(&level)
            .with_context(|| format!("Failed to generate level {}", level.level))?;

        let rules = if preserve_rules {
            self.intersection_rules()
        } else {
            HashMap::new()
        };

        self.level = level;
        self.grid = Arc::new(generated.grid);
        self.cars.clear();
        self.spawner = SpawnController::new();
        self.game_state = GameState::new();
        self.next_id = 0;
        self.tick = 0;
        self.frame_accumulator = 0.0;
        self.rng = StdRng::seed_from_u64(level.seed);
        self.rebuild_network(&generated.intersections, &rules);

        info!("Reset to level {} (seed {})", level.level, level.seed);
        Ok(())
    }

    fn intersection_rules(&self) -> HashMap<IntersectionId, PhaseRules> {
        self.intersections
            .iter()
            .map(|(id, intersection)| (*id, intersection.rules()))
            .collect()
    }

    /// Rebuild pathfinding, lights and intersections from the current grid
    fn rebuild_network(
        &mut self,
        sites: &[IntersectionSite],
        rules: &HashMap<IntersectionId, PhaseRules>,
    ) {
        self.road_network = RoadNetwork::new(&self.grid);
        self.lights = LightBoard::new();
        self.intersections.clear();

        let mut next_light = 0;
        for site in sites {
            let mut light_ids = Vec::new();
            for (position, group) in self.grid.approach_cells(site) {
                let id = LightId(SimId(next_light));
                next_light += 1;
                self.lights.insert(TrafficLight {
                    id,
                    state: LightState::Red,
                    position,
                    group,
                    intersection: site.id,
                });
                light_ids.push(id);
            }

            let mut intersection = SimIntersection::new(site.id, site.cells.clone(), light_ids);
            if let Some(saved) = rules.get(&site.id) {
                intersection.restore_rules(saved);
            }
            intersection.apply(&mut self.lights);
            self.intersections.insert(site.id, intersection);
        }
    }

    fn next_car_id(&mut self) -> CarId {
        let id = CarId(SimId(self.next_id));
        self.next_id += 1;
        id
    }

    pub fn level(&self) -> LevelSpec {
        self.level
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn cars(&self) -> &BTreeMap<CarId, SimCar> {
        &self.cars
    }

    pub fn car(&self, id: CarId) -> Option<&SimCar> {
        self.cars.get(&id)
    }

    pub fn lights(&self) -> &LightBoard {
        &self.lights
    }

    pub fn intersection(&self, id: IntersectionId) -> Option<&SimIntersection> {
        self.intersections.get(&id)
    }

    pub fn intersections(&self) -> impl Iterator<Item = &SimIntersection> {
        self.intersections.values()
    }

    pub fn game_state(&self) -> &GameState {
        &self.game_state
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn is_game_over(&self) -> bool {
        self.game_state.is_over()
    }

    /// Main simulation tick
    pub fn tick(&mut self) {
        if self.game_state.is_over() {
            return;
        }

        // Update intersections
        self.update_intersections();

        // Update cars and process results
        self.update_cars();

        if self.tick > 0 && self.tick % self.config.reroute_interval.max(1) == 0 {
            self.reroute_stuck_cars();
        }

        if self.tick > 0 && self.tick % self.config.lane_change_interval.max(1) == 0 {
            self.change_lanes();
        }

        self.spawn_queued();
        self.cleanup();
        self.check_spawn_stuck();

        self.tick += 1;
    }

    /// Run the whole ticks owed at the configured time scale.
    ///
    /// Returns the number of ticks run.
    pub fn advance_frame(&mut self) -> u32 {
        self.frame_accumulator += self.config.time_scale.max(0.0);
        let ticks = self.frame_accumulator.floor();
        self.frame_accumulator -= ticks;
        let ticks = ticks as u32;
        for _ in 0..ticks {
            self.tick();
        }
        ticks
    }

    /// Update all intersections
    fn update_intersections(&mut self) {
        for intersection in self.intersections.values_mut() {
            intersection.tick();
            intersection.apply(&mut self.lights);
        }
    }

    fn update_cars(&mut self) {
        let ctx = DriveContext {
            grid: &self.grid,
            lights: &self.lights,
            reaction_ticks: self.config.reaction_ticks,
        };
        let results = car_manager::update_cars(&mut self.cars, &ctx);

        for (car_id, result) in results {
            if let CarUpdateResult::Collided(other) = result {
                self.game_state.record_collision(self.config.crash_penalty);
                warn!(
                    "Collision between car {:?} and car {:?} at tick {}",
                    car_id.0, other.0, self.tick
                );
            }
        }
    }

    /// Find a new route around whatever holds up cars that have been
    /// standing still for a while, falling back to another exit on the same road
    fn reroute_stuck_cars(&mut self) {
        let candidates: Vec<CarId> = self
            .cars
            .values()
            .filter(|car| {
                !car.collided
                    && car.stuck_timer >= self.config.reroute_threshold
                    && car.spawn_stuck_timer == 0
            })
            .map(|car| car.id)
            .collect();

        for car_id in candidates {
            let Some(car) = self.cars.get(&car_id) else {
                continue;
            };
            let Some(from_index) = car.waypoint.checked_sub(1) else {
                continue;
            };
            let Some(start) = self.resume_state(car, from_index) else {
                continue;
            };
            let (destination, rebel) = (car.destination, car.rebel);
            let avoid: Vec<GridPos> = match car.limit {
                LimitReason::Vehicle(other) | LimitReason::Yield(other) => self
                    .cars
                    .get(&other)
                    .map(|blocker| blocker.position.cell())
                    .into_iter()
                    .collect(),
                _ => Vec::new(),
            };

            let mut goals = vec![destination];
            goals.extend(self.alternate_exits(destination));

            let found = goals.into_iter().find_map(|goal| {
                self.road_network
                    .find_path_avoiding(&self.grid, start, goal, rebel, &avoid)
                    .filter(|route| route.len() >= 2)
                    .map(|route| (goal, route))
            });

            let Some((goal, tail)) = found else {
                debug!("Car {:?} is stuck with no alternative route", car_id.0);
                continue;
            };

            if let Some(car) = self.cars.get_mut(&car_id) {
                let unchanged = car.route.waypoints[from_index..] == tail.waypoints[..];
                if unchanged {
                    continue;
                }
                car.route.splice(from_index, tail);
                car.destination = goal;
                debug!("Rerouted car {:?} towards {}", car_id.0, goal);
            }
        }
    }

    /// Other exits on the same road as `exit`, ascending
    fn alternate_exits(&self, exit: GridPos) -> Vec<GridPos> {
        let group = self.grid.road_group(exit);
        self.grid
            .exits()
            .into_iter()
            .filter(|candidate| *candidate != exit && self.grid.road_group(*candidate) == group)
            .collect()
    }

    /// Move straight-driving cars into a clearer parallel lane
    fn change_lanes(&mut self) {
        let margin = self.config.lane_change_margin;
        let car_ids: Vec<CarId> = self.cars.keys().copied().collect();

        for car_id in car_ids {
            let Some(car) = self.cars.get(&car_id) else {
                continue;
            };
            if car.collided {
                continue;
            }
            let (Some(next), Some(previous)) = (car.target(), car.previous_waypoint()) else {
                continue;
            };
            let Some(next_cell) = self.grid.cell(next) else {
                continue;
            };
            let straight = next_cell.kind == CellKind::Road
                && next_cell.lane_direction().is_some()
                && Direction::between(previous, next) == next_cell.lane_direction();
            if !straight || !self.grid.cell(previous).is_some_and(Cell::is_road_like) {
                continue;
            }

            let here = car_manager::lane_occupancy(&self.grid, &self.cars, next, LOOKAHEAD_WAYPOINTS);
            let Some(side) = self
                .grid
                .parallel_lanes(next)
                .into_iter()
                .filter(|side| {
                    car_manager::is_clear(&self.cars, &side.center(), SPAWN_CLEARANCE, Some(car_id))
                })
                .map(|side| {
                    let load =
                        car_manager::lane_occupancy(&self.grid, &self.cars, side, LOOKAHEAD_WAYPOINTS);
                    (load, side)
                })
                .filter(|(load, _)| load + margin <= here)
                .min()
                .map(|(_, side)| side)
            else {
                continue;
            };

            let lane = self.grid.cell(side).map(|c| c.lane).unwrap_or_default();
            let (destination, rebel, index) = (car.destination, car.rebel, car.waypoint);

            // The new lane usually leads to the parallel exit of the same road
            let mut goals = vec![destination];
            goals.extend(self.alternate_exits(destination));
            let Some((goal, tail)) = goals.into_iter().find_map(|goal| {
                self.road_network
                    .find_path(&self.grid, side, goal, rebel, lane)
                    .map(|route| (goal, route))
            }) else {
                continue;
            };

            if let Some(car) = self.cars.get_mut(&car_id) {
                car.route.splice(index, tail);
                car.destination = goal;
                debug!("Car {:?} changed lane {} -> {}", car_id.0, next, side);
            }
        }
    }

    /// Grow the entry queues and admit one queued vehicle per entry
    fn spawn_queued(&mut self) {
        if !self.config.spawn_enabled {
            return;
        }

        let entries = self.grid.entries();
        self.spawner
            .accumulate(&self.config, self.tick, &entries, &mut self.rng);

        let mut blocked = Vec::new();
        for entry in self.spawner.pending() {
            match self.admit(entry) {
                Ok(_) => self.spawner.dequeue(entry),
                Err(err) => {
                    debug!("Spawn at {} failed: {:#}", entry, err);
                    if car_manager::is_clear(&self.cars, &entry.center(), SPAWN_CLEARANCE, None) {
                        // Nothing can ever be routed from here
                        self.spawner.dequeue(entry);
                    } else {
                        blocked.push(entry);
                    }
                }
            }
        }
        self.spawner.set_blocked(blocked);
    }

    /// Spawn a vehicle right away, at `entry` or at a random entry
    pub fn spawn_manual(&mut self, entry: Option<GridPos>) -> Result<CarId> {
        let entries = self.grid.entries();
        let entry = match entry {
            Some(entry) => {
                ensure!(entries.contains(&entry), "{} is not an entry cell", entry);
                entry
            }
            None => *entries.choose(&mut self.rng).context("Level has no entries")?,
        };
        self.admit(entry)
    }

    /// Place a vehicle with a chosen driver on the shortest route from
    /// `start` to `goal`. Unlike spawning, `start` may be any drivable cell
    /// and is not checked for clearance.
    pub fn place_car(
        &mut self,
        start: GridPos,
        goal: GridPos,
        profile: DriverProfile,
    ) -> Result<CarId> {
        let lane = self.grid.cell(start).map(|c| c.lane).unwrap_or_default();
        let route = self
            .road_network
            .find_path(&self.grid, start, goal, profile.rebel, lane)
            .with_context(|| format!("No route from {} to {}", start, goal))?;

        let id = self.next_car_id();
        let car = SimCar::new(id, route, profile)?;
        debug!("Placed car {:?} at {} heading for {}", id.0, start, goal);
        self.cars.insert(id, car);
        Ok(id)
    }

    /// Place one vehicle at an entry if it is clear and has somewhere to go
    fn admit(&mut self, entry: GridPos) -> Result<CarId> {
        if !car_manager::is_clear(&self.cars, &entry.center(), SPAWN_CLEARANCE, None) {
            bail!("Entry {} is occupied", entry);
        }

        let profile = car_manager::random_profile(&self.config, &mut self.rng);
        let group = self.grid.road_group(entry);
        let lane = self.grid.cell(entry).map(|c| c.lane).unwrap_or_default();

        let mut exits: Vec<GridPos> = self
            .grid
            .exits()
            .into_iter()
            .filter(|exit| self.grid.road_group(*exit) != group)
            .collect();
        exits.shuffle(&mut self.rng);

        let route = exits
            .into_iter()
            .find_map(|exit| {
                self.road_network
                    .find_path(&self.grid, entry, exit, profile.rebel, lane)
            })
            .with_context(|| format!("No reachable exit from {}", entry))?;

        let route = self.prefer_quieter_lane(entry, route, profile.rebel);

        let id = self.next_car_id();
        let car = SimCar::new(id, route, profile)?;
        debug!(
            "Spawned car {:?} at {} heading for {}{}",
            id.0,
            entry,
            car.destination,
            if car.rebel { " (rebel)" } else { "" }
        );
        self.cars.insert(id, car);
        Ok(id)
    }

    /// For a straight trip, start from a clear parallel entry with less traffic
    fn prefer_quieter_lane(&mut self, entry: GridPos, route: Route, rebel: bool) -> Route {
        if !is_straight(&route) {
            return route;
        }
        let Some(exit) = route.destination() else {
            return route;
        };
        let exit_group = self.grid.road_group(exit);
        let load = car_manager::lane_occupancy(&self.grid, &self.cars, entry, LOOKAHEAD_WAYPOINTS);

        let alternatives: Vec<(usize, GridPos)> = self
            .grid
            .parallel_lanes(entry)
            .into_iter()
            .filter(|side| car_manager::is_clear(&self.cars, &side.center(), SPAWN_CLEARANCE, None))
            .map(|side| {
                let side_load =
                    car_manager::lane_occupancy(&self.grid, &self.cars, side, LOOKAHEAD_WAYPOINTS);
                (side_load, side)
            })
            .filter(|(side_load, _)| *side_load < load)
            .collect();

        let exits: Vec<GridPos> = self
            .grid
            .exits()
            .into_iter()
            .filter(|e| self.grid.road_group(*e) == exit_group)
            .collect();

        let mut best: Option<(usize, Route)> = None;
        for (side_load, side) in alternatives {
            let lane = self.grid.cell(side).map(|c| c.lane).unwrap_or_default();
            for &exit in &exits {
                let Some(candidate) = self.road_network.find_path(&self.grid, side, exit, rebel, lane)
                else {
                    continue;
                };
                if is_straight(&candidate) && best.as_ref().map_or(true, |(l, _)| side_load < *l) {
                    best = Some((side_load, candidate));
                }
            }
        }

        best.map(|(_, r)| r).unwrap_or(route)
    }

    /// Remove crashed, hopelessly stuck and exited cars
    fn cleanup(&mut self) {
        let mut removed = Vec::new();
        for car in self.cars.values() {
            if car.collided {
                if car.collision_timer >= self.config.collision_timeout {
                    removed.push((car.id, Removal::Crashed));
                }
            } else if car.has_exited() {
                removed.push((car.id, Removal::Exited));
            } else if car.stuck_timer >= self.config.stuck_timeout {
                removed.push((car.id, Removal::Stuck));
            }
        }

        for (car_id, reason) in removed {
            self.cars.remove(&car_id);
            match reason {
                Removal::Exited => self.game_state.record_exit(self.config.exit_reward),
                Removal::Crashed => debug!("Cleared wreck of car {:?}", car_id.0),
                Removal::Stuck => warn!("Removed car {:?} after being stuck too long", car_id.0),
            }
        }
    }

    /// Raise the spawn-stuck warning, or end the game once a car is stuck for good
    fn check_spawn_stuck(&mut self) {
        let worst = self
            .cars
            .values()
            .filter(|car| !car.collided)
            .map(|car| (car.spawn_stuck_timer, car.id))
            .max();

        let warning = worst.is_some_and(|(ticks, _)| ticks > self.config.spawn_stuck_warning);
        if warning && !self.game_state.spawn_stuck_warning {
            warn!("Traffic is backing up onto the entries");
        }
        self.game_state.spawn_stuck_warning = warning;

        if let Some((ticks, car_id)) = worst {
            if ticks > self.config.game_over_timeout {
                let reason = format!(
                    "Car {:?} was stuck at its spawn point for {} ticks",
                    car_id.0, ticks
                );
                warn!("GAME OVER: {}", reason);
                self.game_state.end(reason);
            }
        }
    }

    /// Remove every vehicle and queued spawn, keeping scores
    pub fn clear_vehicles(&mut self) {
        self.cars.clear();
        self.spawner.clear();
        self.game_state.spawn_stuck_warning = false;
    }

    fn intersection_mut(&mut self, id: IntersectionId) -> Result<&mut SimIntersection> {
        self.intersections
            .get_mut(&id)
            .with_context(|| format!("Unknown intersection {:?}", id.0))
    }

    pub fn set_intersection_preset(&mut self, id: IntersectionId, preset: PhasePreset) -> Result<()> {
        self.intersection_mut(id)?.set_preset(preset);
        self.apply_lights(id);
        Ok(())
    }

    pub fn set_intersection_timing(&mut self, id: IntersectionId, timing: PhaseTiming) -> Result<()> {
        self.intersection_mut(id)?.set_timing(timing);
        self.apply_lights(id);
        Ok(())
    }

    pub fn set_intersection_phases(&mut self, id: IntersectionId, phases: Vec<Phase>) -> Result<()> {
        self.intersection_mut(id)?
            .set_phases(phases)
            .with_context(|| format!("Rejected phases for intersection {:?}", id.0))?;
        self.apply_lights(id);
        Ok(())
    }

    fn apply_lights(&mut self, id: IntersectionId) {
        if let Some(intersection) = self.intersections.get(&id) {
            intersection.apply(&mut self.lights);
        }
    }

    /// Apply one preset to every intersection
    pub fn set_all_presets(&mut self, preset: PhasePreset) {
        for intersection in self.intersections.values_mut() {
            intersection.set_preset(preset);
            intersection.apply(&mut self.lights);
        }
    }

    /// Edit the runtime configuration; car dynamics follow immediately
    pub fn configure(&mut self, edit: impl FnOnce(&mut SimConfig)) {
        edit(&mut self.config);
        for car in self.cars.values_mut() {
            car.acceleration = self.config.acceleration;
            car.deceleration = self.config.deceleration;
        }
    }

    /// Replace one grid cell and rebuild everything derived from the grid.
    ///
    /// Cars that can no longer reach their destination are removed.
    pub fn set_cell(&mut self, pos: GridPos, cell: Cell) -> Result<()> {
        let rules = self.intersection_rules();
        let grid = Arc::make_mut(&mut self.grid);
        grid.set(pos, cell)?;
        grid.classify_boundary();
        let sites = grid.assign_groups();
        self.rebuild_network(&sites, &rules);
        self.spawner.retain_entries(&self.grid.entries());
        self.recalculate_car_paths();
        Ok(())
    }

    /// Where a search for a new tail of `car`'s route starts. A state the
    /// current grid no longer has (the cell changed kind) restarts fresh.
    fn resume_state(&self, car: &SimCar, index: usize) -> Option<SearchState> {
        let state = car.route.state(index)?;
        if self.road_network.contains(&state) {
            return Some(state);
        }
        let lane = car.route.lanes.get(index).copied().unwrap_or_default();
        Some(self.road_network.start_state(&self.grid, state.pos, lane))
    }

    /// Recalculate paths for all cars after the grid changed
    fn recalculate_car_paths(&mut self) {
        let car_ids: Vec<CarId> = self.cars.keys().copied().collect();

        for car_id in car_ids {
            let Some(car) = self.cars.get(&car_id) else {
                continue;
            };
            let Some(from_index) = car.waypoint.checked_sub(1) else {
                continue;
            };
            let (destination, rebel) = (car.destination, car.rebel);
            let tail = self.resume_state(car, from_index).and_then(|start| {
                self.road_network
                    .find_path_from(&self.grid, start, destination, rebel)
            });

            match tail {
                Some(tail) if tail.len() >= 2 => {
                    if let Some(car) = self.cars.get_mut(&car_id) {
                        car.route.splice(from_index, tail);
                    }
                }
                _ => {
                    // No valid path exists - despawn the car
                    info!("Removed car {:?}: its route no longer exists", car_id.0);
                    self.cars.remove(&car_id);
                }
            }
        }
    }

    /// Read-only view of the current state
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            tick: self.tick,
            grid: Arc::clone(&self.grid),
            vehicles: self
                .cars
                .values()
                .map(|car| VehicleView {
                    id: car.id,
                    position: car.position,
                    heading: car.heading,
                    velocity: car.velocity,
                    collided: car.collided,
                    limit: car.limit,
                    rebel: car.rebel,
                    path: car.route.waypoints.clone(),
                    waypoint: car.waypoint,
                    destination: car.destination,
                })
                .collect(),
            lights: self
                .lights
                .iter()
                .map(|light| LightView {
                    id: light.id,
                    position: light.position,
                    group: light.group,
                    state: light.state,
                })
                .collect(),
            intersections: self
                .intersections
                .values()
                .map(|intersection| IntersectionView {
                    id: intersection.id,
                    phases: intersection.phases().to_vec(),
                    current_phase: intersection.current_phase(),
                    timer: intersection.timer(),
                    preset: intersection.preset(),
                })
                .collect(),
            exited: self.game_state.exited,
            score: self.game_state.score,
            collisions: self.game_state.collisions,
            game_over: self.game_state.is_over(),
            game_over_reason: self.game_state.game_over.clone(),
            spawn_rate: self.spawner.current_rate(),
            queues: self.spawner.queue_depths(),
            blocked_entries: self.spawner.blocked(),
            spawn_stuck_warning: self.game_state.spawn_stuck_warning,
        }
    }

    /// Print a summary of the world state
    pub fn print_summary(&self) {
        info!("=== Traffic Simulation Summary ===");
        info!(
            "Level: {} ({}x{}), tick {} ({:.1}s simulated)",
            self.level.level,
            self.grid.width(),
            self.grid.height(),
            self.tick,
            self.tick as f32 / TICKS_PER_SECOND
        );
        info!(
            "Intersections: {}, Lights: {}, Search states: {}",
            self.intersections.len(),
            self.lights.len(),
            self.road_network.state_count()
        );
        info!(
            "Active cars: {} ({} rebels, {} crashed)",
            self.cars.len(),
            self.cars.values().filter(|c| c.rebel).count(),
            self.cars.values().filter(|c| c.collided).count()
        );
        info!("Vehicles exited: {}", self.game_state.exited);
        info!("Collisions: {}", self.game_state.collisions);
        info!("Score: {}", self.game_state.score);
        info!(
            "Spawn rate: {:.2}/s, queued: {}, blocked entries: {}",
            self.spawner.current_rate(),
            self.spawner.queued_total(),
            self.spawner.blocked().len()
        );
        if let Some(reason) = &self.game_state.game_over {
            info!("Game over: {}", reason);
        }
    }

    /// Render the grid with cars on top, one line per row
    pub fn render_map(&self) -> Vec<String> {
        let mut rows: Vec<Vec<char>> = self
            .grid
            .render()
            .into_iter()
            .map(|row| row.chars().collect())
            .collect();

        for light in self.lights.iter() {
            let glyph = match light.state {
                LightState::Red => 'R',
                LightState::Yellow => 'Y',
                LightState::Green => 'G',
            };
            put(&mut rows, light.position, glyph);
        }

        for car in self.cars.values() {
            put(&mut rows, car.position.cell(), if car.collided { 'X' } else { 'C' });
        }

        rows.into_iter().map(|row| row.into_iter().collect()).collect()
    }

    /// Draw a visual map of the world in the terminal
    pub fn draw_map(&self) {
        println!("\n=== World Map ===");
        println!("Legend: +=Intersection, i=Entry, o=Exit, ^>v<=Lane, R/Y/G=Light, C=Car, X=Crash");
        println!();
        for line in self.render_map() {
            println!("{}", line);
        }
        println!();
    }
}

enum Removal {
    Exited,
    Crashed,
    Stuck,
}

fn put(rows: &mut [Vec<char>], pos: GridPos, glyph: char) {
    if pos.x < 0 || pos.y < 0 {
        return;
    }
    if let Some(slot) = rows
        .get_mut(pos.y as usize)
        .and_then(|row| row.get_mut(pos.x as usize))
    {
        *slot = glyph;
    }
}

/// Whether every move of a route keeps the same heading
fn is_straight(route: &Route) -> bool {
    let mut headings = (1..route.len()).filter_map(|i| route.arrival_direction(i));
    match headings.next() {
        Some(first) => headings.all(|h| h == first),
        None => false,
    }
}
