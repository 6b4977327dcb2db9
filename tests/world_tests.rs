//! World-level simulation tests
//!
//! These run whole levels tick by tick and check the invariants that must
//! hold no matter how the traffic develops.

use lane_traffic_sim::simulation::{
    CarId, Cell, CellKind, DriverProfile, GridPos, IntersectionId, LevelId, LevelSpec, PhasePreset,
    PhaseTiming, SimConfig, SimId, SimWorld, SpawnController, COLLISION_RADIUS,
};

fn world(level: LevelId, edit: impl FnOnce(&mut SimConfig)) -> SimWorld {
    let mut config = SimConfig::default();
    edit(&mut config);
    SimWorld::new_with_config(LevelSpec::new(level), config).unwrap()
}

/// No spawning and no timeouts, so placed cars are all there is
fn quiet(config: &mut SimConfig) {
    config.spawn_enabled = false;
    config.stuck_timeout = u32::MAX;
    config.spawn_stuck_warning = u32::MAX;
    config.game_over_timeout = u32::MAX;
}

fn driver(rebel: bool) -> DriverProfile {
    DriverProfile {
        max_velocity: 0.1,
        acceleration: 0.002,
        deceleration: 0.004,
        rebel,
    }
}

/// A car that never moves
fn stalled(rebel: bool) -> DriverProfile {
    DriverProfile {
        max_velocity: 0.0,
        acceleration: 0.0,
        deceleration: 0.004,
        rebel,
    }
}

fn run_until_gone(world: &mut SimWorld, id: CarId) {
    for _ in 0..10_000 {
        if world.car(id).is_none() {
            return;
        }
        world.tick();
    }
}

fn min_pair_distance(world: &SimWorld) -> Option<f32> {
    let cars: Vec<_> = world.cars().values().collect();
    let mut min: Option<f32> = None;
    for (i, a) in cars.iter().enumerate() {
        for b in &cars[i + 1..] {
            let d = a.position.distance(&b.position);
            min = Some(min.map_or(d, |m: f32| m.min(d)));
        }
    }
    min
}

#[test]
fn test_law_abiding_traffic_never_collides() {
    let mut world = world(LevelId::Tutorial, |config| {
        config.base_spawn_rate = 2.5;
        config.rebel_probability = 0.0;
    });

    for _ in 0..20_000 {
        world.tick();
    }
    assert!(!world.is_game_over(), "{:?}", world.game_state().game_over);
    assert_eq!(world.current_tick(), 20_000);
    assert_eq!(world.game_state().collisions, 0);
    assert!(world.game_state().exited > 0, "no vehicle ever left the map");
}

#[test]
fn test_vehicles_never_overlap() {
    for rate in [0.5, 2.0, 6.0] {
        let mut world = world(LevelId::Downtown, |config| {
            config.base_spawn_rate = rate;
            config.rebel_probability = 0.0;
        });

        for _ in 0..2000 {
            world.tick();
            if let Some(min) = min_pair_distance(&world) {
                assert!(
                    min >= COLLISION_RADIUS - 1e-4,
                    "vehicles {} apart at tick {} (rate {})",
                    min,
                    world.current_tick(),
                    rate
                );
            }
        }
        assert_eq!(world.game_state().collisions, 0);
    }
}

#[test]
fn test_reset_is_repeatable() {
    let spec = LevelSpec::new(LevelId::Downtown).with_seed(7);
    let mut world = SimWorld::new_with_level(spec).unwrap();
    let initial = world.snapshot();

    for _ in 0..500 {
        world.tick();
    }
    world.reset(spec, false).unwrap();
    assert_eq!(world.snapshot(), initial);

    // The same run replays exactly
    for _ in 0..500 {
        world.tick();
    }
    let first = world.snapshot();
    world.reset(spec, false).unwrap();
    for _ in 0..500 {
        world.tick();
    }
    assert_eq!(world.snapshot(), first);

    let mut fresh = SimWorld::new_with_level(spec).unwrap();
    for _ in 0..500 {
        fresh.tick();
    }
    assert_eq!(fresh.snapshot(), first);
}

#[test]
fn test_reset_preserves_rules_on_request() {
    let spec = LevelSpec::new(LevelId::Tutorial);
    let mut world = SimWorld::new_with_level(spec).unwrap();
    let id = IntersectionId(SimId(0));
    world
        .set_intersection_preset(id, PhasePreset::OppositePhasing)
        .unwrap();

    world.reset(spec, true).unwrap();
    assert_eq!(world.intersection(id).unwrap().preset(), PhasePreset::OppositePhasing);

    world.reset(spec, false).unwrap();
    assert_eq!(world.intersection(id).unwrap().preset(), PhasePreset::RoundRobin);
}

#[test]
fn test_unknown_intersection_is_rejected() {
    let mut world = world(LevelId::Tutorial, |_| {});
    let missing = IntersectionId(SimId(99));
    assert!(world.set_intersection_preset(missing, PhasePreset::AllWayStop).is_err());
    assert!(world
        .set_intersection_timing(missing, PhaseTiming::default())
        .is_err());
    assert!(world.set_intersection_phases(missing, Vec::new()).is_err());
}

#[test]
fn test_intersection_changes_reach_the_lights() {
    let mut world = world(LevelId::Tutorial, |_| {});
    let id = IntersectionId(SimId(0));
    world.set_intersection_preset(id, PhasePreset::AllWayStop).unwrap();
    for _ in 0..100 {
        world.tick();
        assert!(world
            .lights()
            .iter()
            .all(|l| l.state == lane_traffic_sim::simulation::LightState::Red));
    }
}

#[test]
fn test_congestion_lowers_spawn_rate() {
    let config = SimConfig::default();
    let free = SpawnController::rate_for(&config, 0, 0, 0.0);
    assert_eq!(free, config.base_spawn_rate);

    let mut previous = free;
    for queued in [1, 5, 10, 30, 100] {
        let rate = SpawnController::rate_for(&config, 0, queued, 0.0);
        assert!(rate <= previous);
        previous = rate;
    }
    assert!(SpawnController::rate_for(&config, 0, 0, 1.0) < free);
    assert!(
        SpawnController::rate_for(&config, 0, 10, 1.0) <= SpawnController::rate_for(&config, 0, 10, 0.5)
    );

    // Never throttled below the floor
    let floor = SpawnController::rate_for(&config, 0, 10_000, 1.0);
    assert!(floor > 0.0);
    assert!((floor - free * (1.0 - config.max_spawn_penalty)).abs() < 1e-6);

    // Demand grows over time
    assert!(SpawnController::rate_for(&config, 60 * 60 * 5, 0, 0.0) > free);
}

#[test]
fn test_manual_spawn() {
    let mut world = world(LevelId::Tutorial, |_| {});
    let entry = GridPos::new(0, 10);

    let id = world.spawn_manual(Some(entry)).unwrap();
    let car = world.car(id).unwrap();
    assert_eq!(car.position, entry.center());

    let err = world.spawn_manual(Some(entry)).unwrap_err();
    assert!(err.to_string().contains("occupied"), "unexpected error: {}", err);
    assert!(world.spawn_manual(Some(GridPos::new(5, 5))).is_err());

    world.clear_vehicles();
    assert!(world.cars().is_empty());
    assert!(world.spawn_manual(None).is_ok());
}

#[test]
fn test_clear_vehicles_keeps_score() {
    let mut world = world(LevelId::Tutorial, |config| config.base_spawn_rate = 3.0);
    for _ in 0..1500 {
        world.tick();
    }
    let before = world.game_state().clone();
    world.clear_vehicles();

    let snapshot = world.snapshot();
    assert!(snapshot.vehicles.is_empty());
    assert_eq!(snapshot.queued_total(), 0);
    assert!(snapshot.blocked_entries.is_empty());
    assert_eq!(snapshot.exited, before.exited);
    assert_eq!(snapshot.score, before.score);
}

#[test]
fn test_advance_frame_follows_time_scale() {
    let mut world = world(LevelId::Tutorial, |config| config.time_scale = 2.5);
    let ran: Vec<u32> = (0..4).map(|_| world.advance_frame()).collect();
    assert_eq!(ran, vec![2, 3, 2, 3]);
    assert_eq!(world.current_tick(), 10);

    world.configure(|config| config.time_scale = 0.0);
    assert_eq!(world.advance_frame(), 0);
    assert_eq!(world.current_tick(), 10);
}

#[test]
fn test_editing_a_cell_reroutes_traffic() {
    let mut world = world(LevelId::Tutorial, |config| config.base_spawn_rate = 3.0);
    for _ in 0..300 {
        world.tick();
    }

    let removed = GridPos::new(5, 10);
    world.set_cell(removed, Cell::default()).unwrap();
    assert_eq!(world.grid().cell(removed).unwrap().kind, CellKind::Empty);
    for car in world.cars().values() {
        let ahead = &car.route.waypoints[car.waypoint - 1..];
        assert!(!ahead.contains(&removed), "car {:?} still drives through {}", car.id, removed);
    }

    for _ in 0..600 {
        world.tick();
    }
    for car in world.cars().values() {
        assert!(!car.route.waypoints[car.waypoint - 1..].contains(&removed));
    }

    assert!(world.set_cell(GridPos::new(24, 0), Cell::default()).is_err());
}

#[test]
fn test_gridlock_ends_the_game() {
    let mut world = world(LevelId::Tutorial, |config| {
        config.base_spawn_rate = 10.0;
        config.rebel_probability = 0.0;
        config.spawn_stuck_warning = 100;
        config.game_over_timeout = 300;
    });
    world.set_all_presets(PhasePreset::AllWayStop);

    let mut warned = false;
    for _ in 0..5000 {
        world.tick();
        warned |= world.snapshot().spawn_stuck_warning;
        if world.is_game_over() {
            break;
        }
    }
    assert!(warned);
    assert!(world.is_game_over());
    assert_eq!(world.game_state().exited, 0);

    let reason = world.game_state().game_over.clone().unwrap();
    assert!(reason.contains("stuck"), "unexpected reason: {}", reason);

    // The clock stops once the game is over
    let tick = world.current_tick();
    world.tick();
    assert_eq!(world.current_tick(), tick);
    assert!(world.snapshot().game_over);
}

#[test]
fn test_score_tracks_exits_and_collisions() {
    let mut world = world(LevelId::Downtown, |config| config.rebel_probability = 0.2);
    for _ in 0..3000 {
        world.tick();
    }
    let state = world.game_state();
    assert!(state.exited > 0);
    assert_eq!(
        state.score,
        state.exited as i64 * world.config().exit_reward
            - state.collisions as i64 * world.config().crash_penalty
    );
    assert!(state.summary().contains(&format!("Score: {}", state.score)));
}

#[test]
fn test_map_rendering() {
    let mut world = world(LevelId::Tutorial, |_| {});
    world.spawn_manual(Some(GridPos::new(0, 10))).unwrap();

    let map = world.render_map();
    assert_eq!(map.len(), world.grid().height());
    assert!(map.iter().all(|row| row.chars().count() == world.grid().width()));
    assert_eq!(map[10].chars().next(), Some('C'));
    let lights = map.iter().flat_map(|row| row.chars()).filter(|c| "RYG".contains(*c)).count();
    assert_eq!(lights, world.lights().len());
}

#[test]
fn test_stuck_vehicle_is_rerouted_around_its_blocker() {
    let mut world = world(LevelId::Tutorial, quiet);
    let blocked = GridPos::new(6, 10);
    let exit = GridPos::new(23, 10);
    world.place_car(blocked, exit, stalled(false)).unwrap();
    let id = world.place_car(GridPos::new(2, 10), exit, driver(true)).unwrap();
    assert!(world.car(id).unwrap().route.waypoints.contains(&blocked));

    let mut rerouted = false;
    for _ in 0..1000 {
        world.tick();
        let car = world.car(id).unwrap();
        if !car.route.waypoints[car.waypoint - 1..].contains(&blocked) {
            rerouted = true;
            break;
        }
    }
    assert!(rerouted, "car never left the blocked lane");
    assert_eq!(world.car(id).unwrap().destination, exit);

    run_until_gone(&mut world, id);
    assert!(world.car(id).is_none());
    assert_eq!(world.game_state().exited, 1);
    assert_eq!(world.game_state().collisions, 0);
}

#[test]
fn test_stuck_vehicle_falls_back_to_a_parallel_exit() {
    let mut world = world(LevelId::Tutorial, quiet);
    let exit = GridPos::new(23, 10);
    let parallel = GridPos::new(23, 11);
    world.place_car(exit, parallel, stalled(true)).unwrap();
    let id = world.place_car(GridPos::new(15, 10), exit, driver(true)).unwrap();

    for _ in 0..1000 {
        world.tick();
        if world.car(id).unwrap().destination != exit {
            break;
        }
    }
    assert_eq!(world.car(id).unwrap().destination, parallel);

    run_until_gone(&mut world, id);
    assert_eq!(world.game_state().exited, 1);
    assert_eq!(world.game_state().collisions, 0);
}

#[test]
fn test_vehicles_change_into_a_quieter_lane() {
    let mut world = world(LevelId::Tutorial, quiet);
    for x in [6, 7, 8] {
        world.place_car(GridPos::new(x, 10), GridPos::new(23, 10), stalled(false)).unwrap();
    }
    let id = world
        .place_car(GridPos::new(2, 10), GridPos::new(23, 10), driver(false))
        .unwrap();

    for _ in 0..200 {
        world.tick();
        if world.car(id).unwrap().destination != GridPos::new(23, 10) {
            break;
        }
    }
    let car = world.car(id).unwrap();
    assert_eq!(car.destination, GridPos::new(23, 11));
    assert!(car.route.waypoints[car.waypoint..].iter().all(|w| w.y == 11));

    run_until_gone(&mut world, id);
    assert_eq!(world.game_state().exited, 1);
    assert_eq!(world.game_state().collisions, 0);
}

#[test]
fn test_straight_trips_start_in_the_quieter_lane() {
    let mut world = world(LevelId::Tutorial, |config| {
        quiet(config);
        config.rebel_probability = 0.0;
    });
    let entry = GridPos::new(0, 10);

    let mut straight = 0;
    for _ in 0..40 {
        world.clear_vehicles();
        for x in [2, 3] {
            world.place_car(GridPos::new(x, 10), GridPos::new(23, 10), stalled(false)).unwrap();
        }
        let id = world.spawn_manual(Some(entry)).unwrap();
        let car = world.car(id).unwrap();
        if car.destination.x == 23 {
            straight += 1;
            assert_eq!(car.route.waypoints[0], GridPos::new(0, 11));
            assert_eq!(car.destination, GridPos::new(23, 11));
        } else {
            assert_eq!(car.route.waypoints[0], entry);
        }
    }
    assert!(straight > 0, "no straight trip was ever drawn");
}

#[test]
fn test_stuck_vehicles_are_removed() {
    let mut world = world(LevelId::Tutorial, |config| {
        quiet(config);
        config.stuck_timeout = 50;
    });
    let id = world
        .place_car(GridPos::new(3, 10), GridPos::new(23, 10), stalled(false))
        .unwrap();

    for _ in 0..49 {
        world.tick();
    }
    assert_eq!(world.car(id).unwrap().stuck_timer, 49);
    for _ in 0..5 {
        world.tick();
    }
    assert!(world.car(id).is_none());
    assert_eq!(world.game_state().exited, 0);
    assert_eq!(world.game_state().score, 0);
}

#[test]
fn test_wrecks_are_cleared_after_the_collision_timeout() {
    let mut world = world(LevelId::Tutorial, |config| {
        quiet(config);
        config.collision_timeout = 20;
    });
    let start = GridPos::new(5, 10);
    let a = world.place_car(start, GridPos::new(23, 10), driver(false)).unwrap();
    let b = world.place_car(start, GridPos::new(23, 10), driver(false)).unwrap();

    world.tick();
    assert!(world.car(a).unwrap().collided);
    assert!(world.car(b).unwrap().collided);
    let state = world.game_state();
    assert!(state.collisions > 0);
    assert_eq!(state.score, -(state.collisions as i64) * world.config().crash_penalty);

    for _ in 0..25 {
        world.tick();
    }
    assert!(world.cars().is_empty());
    assert_eq!(world.game_state().exited, 0);
}
