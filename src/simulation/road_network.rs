//! Lane-aware road network graph for pathfinding
//!
//! The grid is lifted into a petgraph directed graph whose nodes are search
//! states: a cell plus how the vehicle came to be there. Inside an intersection
//! the state remembers the heading and lane discipline it was entered with, so
//! turn restrictions are plain edges instead of a backwards walk over parents.

use petgraph::algo::astar;
use petgraph::graph::{DiGraph, EdgeReference, NodeIndex};
use petgraph::visit::{EdgeFiltered, EdgeRef};
use std::collections::HashMap;

use super::grid::{Grid, LaneDiscipline};
use super::types::{Direction, GridPos};

/// How a search state arrived at its cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Approach {
    /// On a road, entry or exit cell
    Lane,
    /// Search started inside an intersection; the first move fixes the heading
    Pending(LaneDiscipline),
    /// Inside an intersection entered with this heading from this lane
    Entered {
        heading: Direction,
        lane: LaneDiscipline,
    },
}

/// Node weight of the search graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SearchState {
    pub pos: GridPos,
    pub approach: Approach,
}

impl SearchState {
    /// Lane discipline governing the moves out of this state
    pub fn governing_lane(&self, grid: &Grid) -> LaneDiscipline {
        match self.approach {
            Approach::Lane => grid.cell(self.pos).map(|c| c.lane).unwrap_or_default(),
            Approach::Pending(lane) | Approach::Entered { lane, .. } => lane,
        }
    }
}

/// A computed path with its lane metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// Cells from start to goal, both inclusive
    pub waypoints: Vec<GridPos>,
    /// Lane discipline that governs the move out of each waypoint
    pub lanes: Vec<LaneDiscipline>,
    /// How each waypoint was reached, so a search can resume mid-route
    pub approaches: Vec<Approach>,
}

impl Route {
    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn destination(&self) -> Option<GridPos> {
        self.waypoints.last().copied()
    }

    /// Direction of the move arriving at waypoint `index`
    pub fn arrival_direction(&self, index: usize) -> Option<Direction> {
        if index == 0 {
            return None;
        }
        Direction::between(*self.waypoints.get(index - 1)?, *self.waypoints.get(index)?)
    }

    /// Search state at waypoint `index`, for resuming a search from there
    pub fn state(&self, index: usize) -> Option<SearchState> {
        Some(SearchState {
            pos: *self.waypoints.get(index)?,
            approach: *self.approaches.get(index)?,
        })
    }

    /// Heading the route entered the intersection at waypoint `index` with
    pub fn entry_heading(&self, index: usize) -> Option<Direction> {
        match self.approaches.get(index)? {
            Approach::Entered { heading, .. } => Some(*heading),
            _ => None,
        }
    }

    /// Keep the first `len` waypoints and continue along `tail`.
    ///
    /// `tail` must start at the cell it is spliced onto (or right after it).
    pub fn splice(&mut self, len: usize, tail: Route) {
        self.waypoints.truncate(len);
        self.lanes.truncate(len);
        self.approaches.truncate(len);
        self.waypoints.extend(tail.waypoints);
        self.lanes.extend(tail.lanes);
        self.approaches.extend(tail.approaches);
    }

    /// Length of the route in cells from waypoint `from` onwards
    pub fn remaining_length(&self, from: usize) -> f32 {
        self.waypoints
            .iter()
            .skip(from)
            .zip(self.waypoints.iter().skip(from + 1))
            .map(|(a, b)| a.center().distance(&b.center()))
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PathKey {
    start: SearchState,
    goal: GridPos,
    ignore_rules: bool,
}

/// Road network graph for pathfinding over a grid
#[derive(Debug, Default)]
pub struct RoadNetwork {
    /// Only moves that respect lane directions and turn restrictions
    lawful: DiGraph<SearchState, ()>,

    /// Every move between drivable neighbours, same node indices as `lawful`
    unrestricted: DiGraph<SearchState, ()>,

    /// Maps search states to their node indices (shared by both graphs)
    state_to_node: HashMap<SearchState, NodeIndex>,

    /// Cached path results
    path_cache: HashMap<PathKey, Option<Route>>,

    /// Lane discipline per node, for route metadata
    node_lanes: Vec<LaneDiscipline>,
}

impl RoadNetwork {
    /// Build the search graphs for a grid
    pub fn new(grid: &Grid) -> Self {
        let mut network = Self::default();

        for pos in grid.positions() {
            let Some(cell) = grid.cell(pos) else {
                continue;
            };
            if !cell.is_drivable() {
                continue;
            }
            for approach in approaches_for(cell.is_intersection()) {
                network.add_state(grid, SearchState { pos, approach });
            }
        }

        let states: Vec<(SearchState, NodeIndex)> = {
            let mut states: Vec<_> = network
                .state_to_node
                .iter()
                .map(|(state, node)| (*state, *node))
                .collect();
            states.sort_by_key(|(_, node)| node.index());
            states
        };

        for (state, from) in states {
            for direction in Direction::ALL {
                let Some((next, lawful)) = transition(grid, state, direction) else {
                    continue;
                };
                let Some(&to) = network.state_to_node.get(&next) else {
                    continue;
                };
                if lawful {
                    network.lawful.add_edge(from, to, ());
                }
                network.unrestricted.add_edge(from, to, ());
            }
        }

        network
    }

    fn add_state(&mut self, grid: &Grid, state: SearchState) {
        if self.state_to_node.contains_key(&state) {
            return;
        }
        let node = self.lawful.add_node(state);
        let mirrored = self.unrestricted.add_node(state);
        debug_assert_eq!(node, mirrored);
        self.state_to_node.insert(state, node);
        self.node_lanes.push(state.governing_lane(grid));
    }

    /// Number of search states in the graph
    pub fn state_count(&self) -> usize {
        self.lawful.node_count()
    }

    /// Finds the shortest lane-respecting path between two cells using A*
    /// with a Manhattan-distance heuristic.
    ///
    /// A search starting inside an intersection takes `preferred_lane` as its
    /// entry discipline and lets the first move fix the entry heading.
    pub fn find_path(
        &mut self,
        grid: &Grid,
        start: GridPos,
        goal: GridPos,
        ignore_rules: bool,
        preferred_lane: LaneDiscipline,
    ) -> Option<Route> {
        let start = self.start_state(grid, start, preferred_lane);
        self.find_path_from(grid, start, goal, ignore_rules)
    }

    /// Search state for a fresh search from `pos`
    pub fn start_state(
        &self,
        grid: &Grid,
        pos: GridPos,
        preferred_lane: LaneDiscipline,
    ) -> SearchState {
        let approach = if grid.is_intersection(pos) {
            Approach::Pending(preferred_lane)
        } else {
            Approach::Lane
        };
        SearchState { pos, approach }
    }

    pub fn contains(&self, state: &SearchState) -> bool {
        self.state_to_node.contains_key(state)
    }

    /// Like [`find_path`](Self::find_path), resuming from a known search
    /// state such as [`Route::state`]
    pub fn find_path_from(
        &mut self,
        grid: &Grid,
        start: SearchState,
        goal: GridPos,
        ignore_rules: bool,
    ) -> Option<Route> {
        let key = PathKey {
            start,
            goal,
            ignore_rules,
        };

        // Check cache first
        if let Some(cached) = self.path_cache.get(&key) {
            return cached.clone();
        }

        let route = self.search(grid, key, &[]);
        self.path_cache.insert(key, route.clone());
        route
    }

    /// Shortest path that never enters any of the `avoid` cells. Not cached.
    pub fn find_path_avoiding(
        &self,
        grid: &Grid,
        start: SearchState,
        goal: GridPos,
        ignore_rules: bool,
        avoid: &[GridPos],
    ) -> Option<Route> {
        let key = PathKey {
            start,
            goal,
            ignore_rules,
        };
        self.search(grid, key, avoid)
    }

    fn search(&self, grid: &Grid, key: PathKey, avoid: &[GridPos]) -> Option<Route> {
        if !grid.cell(key.start.pos)?.is_drivable() || !grid.cell(key.goal)?.is_drivable() {
            return None;
        }
        let start_node = *self.state_to_node.get(&key.start)?;

        let graph = if key.ignore_rules {
            &self.unrestricted
        } else {
            &self.lawful
        };
        let passable = EdgeFiltered::from_fn(graph, |edge: EdgeReference<'_, ()>| {
            !avoid.contains(&graph[edge.target()].pos)
        });

        let (_, nodes) = astar(
            &passable,
            start_node,
            |node| graph[node].pos == key.goal,
            |_| 1u32,
            |node| graph[node].pos.manhattan(key.goal),
        )?;

        let waypoints = nodes.iter().map(|node| graph[*node].pos).collect();
        let approaches = nodes.iter().map(|node| graph[*node].approach).collect();
        let lanes = nodes
            .iter()
            .map(|node| self.node_lanes.get(node.index()).copied().unwrap_or_default())
            .collect();

        Some(Route {
            waypoints,
            lanes,
            approaches,
        })
    }

    /// Clears cached path results
    pub fn clear_cache(&mut self) {
        self.path_cache.clear();
    }

    pub fn cached_paths(&self) -> usize {
        self.path_cache.len()
    }
}

fn approaches_for(intersection: bool) -> Vec<Approach> {
    if !intersection {
        return vec![Approach::Lane];
    }
    let lanes = [
        LaneDiscipline::Inner,
        LaneDiscipline::Outer,
        LaneDiscipline::None,
    ];
    let mut approaches: Vec<Approach> = lanes.iter().map(|l| Approach::Pending(*l)).collect();
    for heading in Direction::ALL {
        for lane in lanes {
            approaches.push(Approach::Entered { heading, lane });
        }
    }
    approaches
}

/// The state reached by moving one cell in `direction`, and whether the move
/// is lawful
fn transition(grid: &Grid, from: SearchState, direction: Direction) -> Option<(SearchState, bool)> {
    let from_cell = grid.cell(from.pos)?;
    let to_pos = from.pos.step(direction);
    let to_cell = grid.cell(to_pos)?;
    if !to_cell.is_drivable() {
        return None;
    }

    let lawful = match from.approach {
        Approach::Lane => from_cell.allows(direction),
        Approach::Pending(_) => to_cell.is_intersection() || to_cell.allows(direction),
        Approach::Entered { heading, lane } => {
            lane.permits(heading, direction)
                && (to_cell.is_intersection() || to_cell.allows(direction))
        }
    };

    let approach = if to_cell.is_intersection() {
        match from.approach {
            Approach::Lane => Approach::Entered {
                heading: direction,
                lane: from_cell.lane,
            },
            Approach::Pending(lane) => Approach::Entered {
                heading: direction,
                lane,
            },
            entered @ Approach::Entered { .. } => entered,
        }
    } else {
        Approach::Lane
    };

    Some((
        SearchState {
            pos: to_pos,
            approach,
        },
        lawful,
    ))
}
