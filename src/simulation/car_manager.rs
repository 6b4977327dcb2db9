//! Car spawning and management for the traffic simulation
//!
//! This module holds the spawn queue bookkeeping and the per-tick car update
//! loop. It separates car management logic from the main world coordination.

use log::debug;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::Rng;
use sorted_vec::SortedSet;
use std::collections::BTreeMap;

use super::car::{CarUpdateResult, DriveContext, DriverProfile, SimCar};
use super::config::SimConfig;
use super::grid::Grid;
use super::types::{CarId, GridPos, Position, TICKS_PER_SECOND};

/// Spawn demand, queues and blocked entries
#[derive(Debug, Clone)]
pub struct SpawnController {
    /// Fractional vehicles owed to the queues
    credit: f32,
    queues: BTreeMap<GridPos, u32>,
    blocked: SortedSet<GridPos>,
    rate: f32,
}

impl Default for SpawnController {
    fn default() -> Self {
        Self::new()
    }
}

impl SpawnController {
    pub fn new() -> Self {
        Self {
            credit: 0.0,
            queues: BTreeMap::new(),
            blocked: SortedSet::from_unsorted(Vec::new()),
            rate: 0.0,
        }
    }

    /// Demand before congestion, in vehicles per second
    pub fn target_rate(config: &SimConfig, tick: u64) -> f32 {
        let minutes = tick as f32 / (TICKS_PER_SECOND * 60.0);
        ((config.base_spawn_rate + config.spawn_rate_growth * minutes)
            * config.spawn_rate_multiplier)
            .max(0.0)
    }

    /// Fraction of demand suppressed by queued vehicles and blocked entries
    pub fn congestion_penalty(config: &SimConfig, queued: u32, blocked_fraction: f32) -> f32 {
        (config.queue_weight * queued as f32 + config.blocked_weight * blocked_fraction)
            .clamp(0.0, config.max_spawn_penalty)
    }

    pub fn rate_for(config: &SimConfig, tick: u64, queued: u32, blocked_fraction: f32) -> f32 {
        Self::target_rate(config, tick)
            * (1.0 - Self::congestion_penalty(config, queued, blocked_fraction))
    }

    /// Effective rate used on the last accumulation
    pub fn current_rate(&self) -> f32 {
        self.rate
    }

    /// Accrue one tick of demand and push whole vehicles onto random entries.
    ///
    /// Returns the number of vehicles enqueued.
    pub fn accumulate(
        &mut self,
        config: &SimConfig,
        tick: u64,
        entries: &[GridPos],
        rng: &mut StdRng,
    ) -> usize {
        if entries.is_empty() {
            self.rate = 0.0;
            return 0;
        }

        let blocked_fraction = self.blocked.len() as f32 / entries.len() as f32;
        self.rate = Self::rate_for(config, tick, self.queued_total(), blocked_fraction);
        self.credit += self.rate / TICKS_PER_SECOND;

        let mut enqueued = 0;
        while self.credit >= 1.0 {
            self.credit -= 1.0;
            let Some(&entry) = entries.choose(rng) else {
                break;
            };
            if self.enqueue(entry, config.max_queue_per_entry) {
                enqueued += 1;
            }
        }
        enqueued
    }

    /// Add one vehicle to an entry queue unless it is full
    pub fn enqueue(&mut self, entry: GridPos, cap: u32) -> bool {
        let depth = self.queues.entry(entry).or_insert(0);
        if *depth >= cap {
            return false;
        }
        *depth += 1;
        true
    }

    pub fn dequeue(&mut self, entry: GridPos) {
        if let Some(depth) = self.queues.get_mut(&entry) {
            *depth = depth.saturating_sub(1);
            if *depth == 0 {
                self.queues.remove(&entry);
            }
        }
    }

    /// Entries with waiting vehicles, ascending
    pub fn pending(&self) -> Vec<GridPos> {
        self.queues
            .iter()
            .filter(|(_, depth)| **depth > 0)
            .map(|(entry, _)| *entry)
            .collect()
    }

    pub fn queued_total(&self) -> u32 {
        self.queues.values().sum()
    }

    pub fn queue_depths(&self) -> Vec<(GridPos, u32)> {
        self.queues.iter().map(|(e, d)| (*e, *d)).collect()
    }

    pub fn set_blocked(&mut self, blocked: Vec<GridPos>) {
        self.blocked = SortedSet::from_unsorted(blocked);
    }

    pub fn blocked(&self) -> Vec<GridPos> {
        self.blocked.iter().copied().collect()
    }

    /// Drop queues for cells that are no longer entries
    pub fn retain_entries(&mut self, entries: &[GridPos]) {
        self.queues.retain(|entry, _| entries.contains(entry));
        let blocked = self
            .blocked
            .iter()
            .copied()
            .filter(|entry| entries.contains(entry))
            .collect();
        self.set_blocked(blocked);
    }

    pub fn clear(&mut self) {
        self.queues.clear();
        self.set_blocked(Vec::new());
        self.credit = 0.0;
    }
}

/// Random driving parameters for a new car
pub fn random_profile(config: &SimConfig, rng: &mut StdRng) -> DriverProfile {
    let low = config.min_max_velocity.min(config.max_max_velocity);
    let high = config.min_max_velocity.max(config.max_max_velocity);
    let max_velocity = if high > low {
        rng.random_range(low..high)
    } else {
        low
    };
    DriverProfile {
        max_velocity,
        acceleration: config.acceleration,
        deceleration: config.deceleration,
        rebel: rng.random_bool(config.rebel_probability.clamp(0.0, 1.0)),
    }
}

/// Whether no car (other than `except`) is within `radius` of a position
pub fn is_clear(
    cars: &BTreeMap<CarId, SimCar>,
    position: &Position,
    radius: f32,
    except: Option<CarId>,
) -> bool {
    let radius_squared = radius * radius;
    cars.values()
        .filter(|car| Some(car.id) != except)
        .all(|car| car.position.distance_squared(position) >= radius_squared)
}

/// Cars on the `length` cells of the lane starting at `start`
pub fn lane_occupancy(
    grid: &Grid,
    cars: &BTreeMap<CarId, SimCar>,
    start: GridPos,
    length: usize,
) -> usize {
    let Some(direction) = grid.cell(start).and_then(|c| c.lane_direction()) else {
        return 0;
    };

    let mut lane = Vec::with_capacity(length);
    let mut pos = start;
    while lane.len() < length {
        match grid.cell(pos).and_then(|c| c.lane_direction()) {
            Some(d) if d == direction => lane.push(pos),
            _ => break,
        }
        pos = pos.step(direction);
    }

    cars.values()
        .filter(|car| lane.contains(&car.position.cell()))
        .count()
}

/// Update all cars in ascending id order
///
/// Returns a list of (car_id, result) tuples for cars that need special handling
pub fn update_cars(
    cars: &mut BTreeMap<CarId, SimCar>,
    ctx: &DriveContext<'_>,
) -> Vec<(CarId, CarUpdateResult)> {
    let mut results = Vec::new();

    // Collect car IDs to avoid borrow issues
    let car_ids: Vec<CarId> = cars.keys().copied().collect();

    for car_id in car_ids {
        // Take the car out so it only sees its peers, then put it back
        if let Some(mut car) = cars.remove(&car_id) {
            let result = car.update(ctx, cars);
            cars.insert(car_id, car);

            match result {
                CarUpdateResult::Continue => {}
                CarUpdateResult::Exited => results.push((car_id, result)),
                CarUpdateResult::Collided(other) => {
                    if let Some(other_car) = cars.get_mut(&other) {
                        other_car.collided = true;
                        other_car.velocity = 0.0;
                    }
                    debug!("Car {:?} collided with car {:?}", car_id.0, other.0);
                    results.push((car_id, result));
                }
            }
        }
    }

    results
}
