//! Cell grid for the road network
//!
//! Every cell knows its kind, which directions of travel are legal on it, the
//! lane discipline that governs turns, and which road / intersection group it
//! belongs to. Lookups take signed coordinates and return `None` outside the map.

use std::collections::VecDeque;

use anyhow::{bail, Result};

use super::types::{Direction, DirectionSet, GridPos, IntersectionId, RoadGroupId, SimId};

/// What occupies a grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CellKind {
    #[default]
    Empty,
    Road,
    Intersection,
    /// Boundary road cell whose direction points into the map
    Entry,
    /// Boundary road cell whose direction points out of the map
    Exit,
}

/// Lane classification governing which turns are legal from a lane.
///
/// Traffic keeps left: the outer (curb) lane may go straight or turn left,
/// the inner (median) lane may go straight or turn right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum LaneDiscipline {
    Inner,
    Outer,
    #[default]
    None,
}

impl LaneDiscipline {
    /// Whether a vehicle that entered an intersection heading `entry` may leave
    /// a cell of it heading `exit`
    pub fn permits(self, entry: Direction, exit: Direction) -> bool {
        if exit == entry {
            return true;
        }
        match self {
            LaneDiscipline::Outer => exit == entry.left(),
            LaneDiscipline::Inner => exit == entry.right(),
            LaneDiscipline::None => exit != entry.reverse(),
        }
    }
}

/// One grid unit of the road network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cell {
    pub kind: CellKind,
    pub directions: DirectionSet,
    pub lane: LaneDiscipline,
    pub road_group: Option<RoadGroupId>,
    pub intersection: Option<IntersectionId>,
}

impl Cell {
    pub fn road(direction: Direction, lane: LaneDiscipline) -> Self {
        Self {
            kind: CellKind::Road,
            directions: DirectionSet::single(direction),
            lane,
            road_group: None,
            intersection: None,
        }
    }

    pub fn intersection() -> Self {
        Self {
            kind: CellKind::Intersection,
            directions: DirectionSet::ALL,
            lane: LaneDiscipline::None,
            road_group: None,
            intersection: None,
        }
    }

    pub fn is_drivable(&self) -> bool {
        self.kind != CellKind::Empty
    }

    pub fn is_intersection(&self) -> bool {
        self.kind == CellKind::Intersection
    }

    /// Road, entry and exit cells carry a single lane direction
    pub fn is_road_like(&self) -> bool {
        matches!(self.kind, CellKind::Road | CellKind::Entry | CellKind::Exit)
    }

    pub fn allows(&self, direction: Direction) -> bool {
        self.directions.contains(direction)
    }

    /// The lane direction of a road-like cell
    pub fn lane_direction(&self) -> Option<Direction> {
        if self.is_road_like() {
            self.directions.sole()
        } else {
            None
        }
    }
}

/// A connected block of intersection cells
#[derive(Debug, Clone, PartialEq)]
pub struct IntersectionSite {
    pub id: IntersectionId,
    pub cells: Vec<GridPos>,
    pub min: GridPos,
    pub max: GridPos,
}

impl IntersectionSite {
    pub fn center(&self) -> (f32, f32) {
        (
            (self.min.x + self.max.x) as f32 / 2.0,
            (self.min.y + self.max.y) as f32 / 2.0,
        )
    }

    pub fn contains(&self, pos: GridPos) -> bool {
        pos.x >= self.min.x && pos.x <= self.max.x && pos.y >= self.min.y && pos.y <= self.max.y
    }
}

/// The road grid
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    width: usize,
    height: usize,
    cells: Vec<Cell>,
}

impl Grid {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![Cell::default(); width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    fn index(&self, pos: GridPos) -> Option<usize> {
        if pos.x < 0 || pos.y < 0 {
            return None;
        }
        let (x, y) = (pos.x as usize, pos.y as usize);
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(y * self.width + x)
    }

    pub fn in_bounds(&self, pos: GridPos) -> bool {
        self.index(pos).is_some()
    }

    pub fn cell(&self, pos: GridPos) -> Option<&Cell> {
        self.index(pos).map(|i| &self.cells[i])
    }

    pub fn cell_mut(&mut self, pos: GridPos) -> Option<&mut Cell> {
        self.index(pos).map(move |i| &mut self.cells[i])
    }

    /// Replace a cell, failing for positions outside the map
    pub fn set(&mut self, pos: GridPos, cell: Cell) -> Result<()> {
        match self.cell_mut(pos) {
            Some(slot) => {
                *slot = cell;
                Ok(())
            }
            None => bail!("Cell {} is outside the {}x{} grid", pos, self.width, self.height),
        }
    }

    pub fn is_intersection(&self, pos: GridPos) -> bool {
        self.cell(pos).is_some_and(Cell::is_intersection)
    }

    /// All positions in row-major order
    pub fn positions(&self) -> impl Iterator<Item = GridPos> + '_ {
        (0..self.height as i32)
            .flat_map(move |y| (0..self.width as i32).map(move |x| GridPos::new(x, y)))
    }

    pub fn positions_of(&self, kind: CellKind) -> Vec<GridPos> {
        self.positions()
            .filter(|p| self.cell(*p).is_some_and(|c| c.kind == kind))
            .collect()
    }

    pub fn entries(&self) -> Vec<GridPos> {
        self.positions_of(CellKind::Entry)
    }

    pub fn exits(&self) -> Vec<GridPos> {
        self.positions_of(CellKind::Exit)
    }

    pub fn road_group(&self, pos: GridPos) -> Option<RoadGroupId> {
        self.cell(pos).and_then(|c| c.road_group)
    }

    /// Reclassify boundary road cells as entries or exits by their direction
    pub fn classify_boundary(&mut self) {
        let positions: Vec<GridPos> = self.positions().collect();
        for pos in positions {
            let Some(cell) = self.cell(pos).copied() else {
                continue;
            };
            let Some(direction) = cell.lane_direction() else {
                continue;
            };
            let outward = !self.in_bounds(pos.step(direction));
            let inward = !self.in_bounds(pos.step(direction.reverse()));
            let kind = match (inward, outward) {
                (true, false) => CellKind::Entry,
                (false, true) => CellKind::Exit,
                _ => CellKind::Road,
            };
            if let Some(slot) = self.cell_mut(pos) {
                slot.kind = kind;
            }
        }
    }

    /// Flood fill road groups and intersection groups.
    ///
    /// Returns the intersection sites in discovery (row-major) order.
    pub fn assign_groups(&mut self) -> Vec<IntersectionSite> {
        for pos in self.positions().collect::<Vec<_>>() {
            if let Some(cell) = self.cell_mut(pos) {
                cell.road_group = None;
                cell.intersection = None;
            }
        }

        let mut next_group = 0;
        let mut sites = Vec::new();

        for pos in self.positions().collect::<Vec<_>>() {
            let Some(cell) = self.cell(pos).copied() else {
                continue;
            };
            if cell.is_road_like() && cell.road_group.is_none() {
                let id = RoadGroupId(SimId(next_group));
                next_group += 1;
                self.flood(pos, Cell::is_road_like, |c| c.road_group = Some(id));
            } else if cell.is_intersection() && cell.intersection.is_none() {
                let id = IntersectionId(SimId(sites.len()));
                let cells = self.flood(pos, Cell::is_intersection, |c| c.intersection = Some(id));
                let min = GridPos::new(
                    cells.iter().map(|p| p.x).min().unwrap_or(pos.x),
                    cells.iter().map(|p| p.y).min().unwrap_or(pos.y),
                );
                let max = GridPos::new(
                    cells.iter().map(|p| p.x).max().unwrap_or(pos.x),
                    cells.iter().map(|p| p.y).max().unwrap_or(pos.y),
                );
                sites.push(IntersectionSite { id, cells, min, max });
            }
        }

        sites
    }

    fn flood(
        &mut self,
        start: GridPos,
        member: impl Fn(&Cell) -> bool,
        mut mark: impl FnMut(&mut Cell),
    ) -> Vec<GridPos> {
        let mut visited = vec![false; self.cells.len()];
        let mut queue = VecDeque::from([start]);
        let mut members = Vec::new();

        while let Some(pos) = queue.pop_front() {
            let Some(index) = self.index(pos) else {
                continue;
            };
            if visited[index] || !member(&self.cells[index]) {
                continue;
            }
            visited[index] = true;
            mark(&mut self.cells[index]);
            members.push(pos);
            for direction in Direction::ALL {
                queue.push_back(pos.step(direction));
            }
        }

        members.sort();
        members
    }

    /// Road cells that feed into an intersection site, with their lane direction
    pub fn approach_cells(&self, site: &IntersectionSite) -> Vec<(GridPos, Direction)> {
        let mut approaches = Vec::new();
        for &inside in &site.cells {
            for direction in Direction::ALL {
                let outside = inside.step(direction.reverse());
                let Some(cell) = self.cell(outside) else {
                    continue;
                };
                if cell.lane_direction() == Some(direction) {
                    approaches.push((outside, direction));
                }
            }
        }
        approaches.sort();
        approaches.dedup();
        approaches
    }

    /// Same-direction lanes beside `pos` (one step to either side)
    pub fn parallel_lanes(&self, pos: GridPos) -> Vec<GridPos> {
        let Some(cell) = self.cell(pos) else {
            return Vec::new();
        };
        let Some(direction) = cell.lane_direction() else {
            return Vec::new();
        };
        [direction.left(), direction.right()]
            .into_iter()
            .map(|side| pos.step(side))
            .filter(|side_pos| {
                self.cell(*side_pos).is_some_and(|c| {
                    c.kind == cell.kind
                        && c.lane_direction() == Some(direction)
                        && c.road_group == cell.road_group
                })
            })
            .collect()
    }

    /// Render the grid as text, one line per row
    pub fn render(&self) -> Vec<String> {
        (0..self.height as i32)
            .map(|y| {
                (0..self.width as i32)
                    .map(|x| match self.cell(GridPos::new(x, y)) {
                        Some(cell) => cell_glyph(cell),
                        None => ' ',
                    })
                    .collect()
            })
            .collect()
    }
}

fn cell_glyph(cell: &Cell) -> char {
    match cell.kind {
        CellKind::Empty => ' ',
        CellKind::Intersection => '+',
        CellKind::Entry => 'i',
        CellKind::Exit => 'o',
        CellKind::Road => match cell.lane_direction() {
            Some(Direction::North) => '^',
            Some(Direction::East) => '>',
            Some(Direction::South) => 'v',
            Some(Direction::West) => '<',
            None => '#',
        },
    }
}
