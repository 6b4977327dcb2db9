//! Pathfinding tests
//!
//! Routes must be deterministic and must respect lane discipline: curb lanes
//! go straight or left, median lanes go straight or right.

use lane_traffic_sim::simulation::{
    generate_level, Approach, Direction, Grid, GridPos, LaneDiscipline, LevelId, LevelSpec,
    RoadNetwork,
};

fn tutorial() -> Grid {
    generate_level(&LevelSpec::new(LevelId::Tutorial)).unwrap().grid
}

fn lane_of(grid: &Grid, pos: GridPos) -> LaneDiscipline {
    grid.cell(pos).unwrap().lane
}

/// How the exit direction relates to the entry direction
#[derive(Debug, PartialEq)]
enum Turn {
    Straight,
    Left,
    Right,
    UTurn,
}

fn turn(entry: Direction, exit: Direction) -> Turn {
    if exit == entry {
        Turn::Straight
    } else if exit == entry.left() {
        Turn::Left
    } else if exit == entry.right() {
        Turn::Right
    } else {
        Turn::UTurn
    }
}

#[test]
fn test_curb_lane_turns() {
    let grid = tutorial();
    let mut network = RoadNetwork::new(&grid);
    let east_outer = GridPos::new(0, 10);
    assert_eq!(lane_of(&grid, east_outer), LaneDiscipline::Outer);

    // Straight and left are fine
    assert!(network
        .find_path(&grid, east_outer, GridPos::new(23, 10), false, LaneDiscipline::None)
        .is_some());
    assert!(network
        .find_path(&grid, east_outer, GridPos::new(10, 0), false, LaneDiscipline::None)
        .is_some());
    assert!(network
        .find_path(&grid, east_outer, GridPos::new(11, 0), false, LaneDiscipline::None)
        .is_some());

    // Right is not
    assert!(network
        .find_path(&grid, east_outer, GridPos::new(12, 23), false, LaneDiscipline::None)
        .is_none());
    assert!(network
        .find_path(&grid, east_outer, GridPos::new(13, 23), false, LaneDiscipline::None)
        .is_none());
}

#[test]
fn test_median_lane_turns() {
    let grid = tutorial();
    let mut network = RoadNetwork::new(&grid);
    let east_inner = GridPos::new(0, 11);
    assert_eq!(lane_of(&grid, east_inner), LaneDiscipline::Inner);

    assert!(network
        .find_path(&grid, east_inner, GridPos::new(23, 11), false, LaneDiscipline::None)
        .is_some());
    assert!(network
        .find_path(&grid, east_inner, GridPos::new(12, 23), false, LaneDiscipline::None)
        .is_some());
    assert!(network
        .find_path(&grid, east_inner, GridPos::new(10, 0), false, LaneDiscipline::None)
        .is_none());
}

#[test]
fn test_ignoring_rules_restores_forbidden_turns() {
    let grid = tutorial();
    let mut network = RoadNetwork::new(&grid);

    let right_from_curb = network.find_path(
        &grid,
        GridPos::new(0, 10),
        GridPos::new(12, 23),
        true,
        LaneDiscipline::None,
    );
    assert!(right_from_curb.is_some());

    let left_from_median = network.find_path(
        &grid,
        GridPos::new(0, 11),
        GridPos::new(10, 0),
        true,
        LaneDiscipline::None,
    );
    assert!(left_from_median.is_some());
}

#[test]
fn test_lane_discipline_for_every_entry_and_exit() {
    let grid = tutorial();
    let mut network = RoadNetwork::new(&grid);

    for entry in grid.entries() {
        let entry_cell = *grid.cell(entry).unwrap();
        let entry_direction = entry_cell.lane_direction().unwrap();

        let mut reachable = Vec::new();
        for exit in grid.exits() {
            if grid.road_group(exit) == grid.road_group(entry) {
                continue;
            }
            let exit_direction = grid.cell(exit).unwrap().lane_direction().unwrap();
            let kind = turn(entry_direction, exit_direction);
            let route = network.find_path(&grid, entry, exit, false, LaneDiscipline::None);

            let forbidden = kind == Turn::UTurn
                || (entry_cell.lane == LaneDiscipline::Outer && kind == Turn::Right)
                || (entry_cell.lane == LaneDiscipline::Inner && kind == Turn::Left);
            if forbidden {
                assert!(route.is_none(), "{:?} from {} to {} should be impossible", kind, entry, exit);
            }
            if route.is_some() {
                reachable.push(kind);
            }

            // Unrestricted search always finds something between different roads
            assert!(network
                .find_path(&grid, entry, exit, true, LaneDiscipline::None)
                .is_some());
        }

        let allowed = match entry_cell.lane {
            LaneDiscipline::Outer => [Turn::Straight, Turn::Left],
            LaneDiscipline::Inner => [Turn::Straight, Turn::Right],
            LaneDiscipline::None => unreachable!("entries are lane cells"),
        };
        for kind in allowed {
            assert!(
                reachable.contains(&kind),
                "no {:?} route from entry {}",
                kind,
                entry
            );
        }
    }
}

#[test]
fn test_paths_are_deterministic() {
    let level = generate_level(&LevelSpec::new(LevelId::Downtown)).unwrap();
    let grid = level.grid;
    let mut first = RoadNetwork::new(&grid);
    let mut second = RoadNetwork::new(&grid);

    for entry in grid.entries() {
        for exit in grid.exits() {
            for ignore_rules in [false, true] {
                let a = first.find_path(&grid, entry, exit, ignore_rules, LaneDiscipline::None);
                let again = first.find_path(&grid, entry, exit, ignore_rules, LaneDiscipline::None);
                let b = second.find_path(&grid, entry, exit, ignore_rules, LaneDiscipline::None);
                assert_eq!(a, again);
                assert_eq!(a, b);
            }
        }
    }
}

#[test]
fn test_route_shape() {
    let grid = tutorial();
    let mut network = RoadNetwork::new(&grid);
    let start = GridPos::new(0, 11);
    let goal = GridPos::new(13, 23);

    let route = network
        .find_path(&grid, start, goal, false, LaneDiscipline::None)
        .unwrap();
    assert_eq!(route.waypoints.first(), Some(&start));
    assert_eq!(route.destination(), Some(goal));
    assert_eq!(route.lanes.len(), route.waypoints.len());
    assert_eq!(route.lanes[0], LaneDiscipline::Inner);

    // Every step moves to a neighbouring cell
    for pair in route.waypoints.windows(2) {
        assert_eq!(pair[0].manhattan(pair[1]), 1);
    }

    // Inside the intersection the entry lane keeps governing the moves
    for (pos, lane) in route.waypoints.iter().zip(&route.lanes) {
        if grid.is_intersection(*pos) {
            assert_eq!(*lane, LaneDiscipline::Inner);
        }
    }
    assert_eq!(route.len() as u32 - 1, start.manhattan(goal));
}

#[test]
fn test_search_from_inside_an_intersection_uses_preferred_lane() {
    let grid = tutorial();
    let mut network = RoadNetwork::new(&grid);
    let inside = GridPos::new(11, 11);
    assert!(grid.is_intersection(inside));

    // The first move fixes the heading the lane rules are judged against
    let route = network.find_path(&grid, inside, GridPos::new(11, 0), false, LaneDiscipline::Outer);
    assert!(route.is_some());

    let route = network
        .find_path(&grid, inside, GridPos::new(0, 12), false, LaneDiscipline::Inner)
        .unwrap();
    assert_eq!(route.waypoints[0], inside);
    assert_eq!(route.destination(), Some(GridPos::new(0, 12)));
}

#[test]
fn test_resumed_search_keeps_the_entry_heading() {
    let grid = tutorial();
    let mut network = RoadNetwork::new(&grid);
    let route = network
        .find_path(&grid, GridPos::new(0, 10), GridPos::new(23, 10), false, LaneDiscipline::None)
        .unwrap();
    assert_eq!(route.approaches.len(), route.waypoints.len());

    // Halfway through the intersection, driving east in the curb lane
    let index = route.waypoints.iter().position(|w| *w == GridPos::new(11, 10)).unwrap();
    let state = route.state(index).unwrap();
    assert_eq!(
        state.approach,
        Approach::Entered {
            heading: Direction::East,
            lane: LaneDiscipline::Outer,
        }
    );
    assert_eq!(route.entry_heading(index), Some(Direction::East));
    assert_eq!(route.state(0).unwrap().approach, Approach::Lane);

    // Straight on and left stay lawful
    let ahead = network.find_path_from(&grid, state, GridPos::new(23, 10), false).unwrap();
    assert_eq!(ahead.waypoints[0], GridPos::new(11, 10));
    assert!(network.find_path_from(&grid, state, GridPos::new(11, 0), false).is_some());

    // A right turn or a U-turn from the curb lane is not
    assert!(network.find_path_from(&grid, state, GridPos::new(12, 23), false).is_none());
    assert!(network.find_path_from(&grid, state, GridPos::new(0, 12), false).is_none());

    // A fresh search from the same cell may pick any heading
    assert!(network
        .find_path(&grid, GridPos::new(11, 10), GridPos::new(12, 23), false, LaneDiscipline::Outer)
        .is_some());
}

#[test]
fn test_search_around_avoided_cells() {
    let grid = tutorial();
    let network = RoadNetwork::new(&grid);
    let start = network.start_state(&grid, GridPos::new(2, 10), LaneDiscipline::Outer);
    let goal = GridPos::new(23, 10);
    let blocked = GridPos::new(6, 10);

    let around = network
        .find_path_avoiding(&grid, start, goal, true, &[blocked])
        .unwrap();
    assert!(!around.waypoints.contains(&blocked));
    assert_eq!(around.destination(), Some(goal));
    assert_eq!(around.len() as u32 - 1, GridPos::new(2, 10).manhattan(goal) + 2);

    // Lane rules leave no way around
    assert!(network
        .find_path_avoiding(&grid, start, goal, false, &[blocked])
        .is_none());
    assert!(network.find_path_avoiding(&grid, start, goal, false, &[]).is_some());
}

#[test]
fn test_wrong_way_needs_rules_ignored() {
    let grid = tutorial();
    let mut network = RoadNetwork::new(&grid);

    // Driving west along an eastbound lane
    let from = GridPos::new(8, 10);
    let to = GridPos::new(2, 10);
    assert!(network
        .find_path(&grid, from, to, false, LaneDiscipline::None)
        .is_none());
    assert!(network
        .find_path(&grid, from, to, true, LaneDiscipline::None)
        .is_some());
}

#[test]
fn test_cache_is_filled_and_cleared() {
    let grid = tutorial();
    let mut network = RoadNetwork::new(&grid);
    assert_eq!(network.cached_paths(), 0);

    network.find_path(&grid, GridPos::new(0, 10), GridPos::new(23, 10), false, LaneDiscipline::None);
    network.find_path(&grid, GridPos::new(0, 10), GridPos::new(23, 10), false, LaneDiscipline::None);
    assert_eq!(network.cached_paths(), 1);

    // Failed searches are cached too
    network.find_path(&grid, GridPos::new(0, 10), GridPos::new(12, 23), false, LaneDiscipline::None);
    assert_eq!(network.cached_paths(), 2);

    network.clear_cache();
    assert_eq!(network.cached_paths(), 0);
}

#[test]
fn test_empty_cells_are_not_routable() {
    let grid = tutorial();
    let mut network = RoadNetwork::new(&grid);
    assert!(network
        .find_path(&grid, GridPos::new(0, 0), GridPos::new(23, 10), true, LaneDiscipline::None)
        .is_none());
    assert!(network
        .find_path(&grid, GridPos::new(-3, 10), GridPos::new(23, 10), true, LaneDiscipline::None)
        .is_none());
}
