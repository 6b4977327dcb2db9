//! Level layouts
//!
//! A level is a set of four-lane road bands laid across the whole map. Where a
//! horizontal band overlaps a vertical one the cells become an intersection.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, ensure, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::grid::{Cell, Grid, IntersectionSite, LaneDiscipline};
use super::types::{Direction, GridPos};

/// Number of lanes in one road band (two per direction)
pub const LANES_PER_ROAD: i32 = 4;

/// Minimum empty cells between a road band and the map edge or another band
const ROAD_MARGIN: i32 = 2;

/// Named level layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LevelId {
    /// A single crossroads
    Tutorial,
    /// One horizontal road crossed by three vertical roads
    Corridor,
    /// Two by two grid of intersections
    Downtown,
    /// Grid of intersections sized by complexity with jittered road positions
    Random,
}

impl LevelId {
    pub fn name(self) -> &'static str {
        match self {
            LevelId::Tutorial => "tutorial",
            LevelId::Corridor => "corridor",
            LevelId::Downtown => "downtown",
            LevelId::Random => "random",
        }
    }

    /// Default map size (width, height) for the level
    pub fn default_size(self, complexity: u8) -> (usize, usize) {
        match self {
            LevelId::Tutorial => (24, 24),
            LevelId::Corridor => (40, 24),
            LevelId::Downtown => (36, 36),
            LevelId::Random => {
                let (rows, cols) = complexity_layout(complexity);
                (12 + 10 * cols, 12 + 10 * rows)
            }
        }
    }
}

impl fmt::Display for LevelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LevelId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tutorial" => Ok(LevelId::Tutorial),
            "corridor" => Ok(LevelId::Corridor),
            "downtown" => Ok(LevelId::Downtown),
            "random" => Ok(LevelId::Random),
            other => bail!("Unknown level '{}'", other),
        }
    }
}

/// Everything the generator needs to build a level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelSpec {
    pub level: LevelId,
    pub width: usize,
    pub height: usize,
    /// 1-5, only used by randomized layouts
    pub complexity: u8,
    pub seed: u64,
}

impl LevelSpec {
    /// A level at its default size
    pub fn new(level: LevelId) -> Self {
        let complexity = 3;
        let (width, height) = level.default_size(complexity);
        Self {
            level,
            width,
            height,
            complexity,
            seed: 0,
        }
    }

    pub fn with_size(mut self, width: usize, height: usize) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_complexity(mut self, complexity: u8) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Output of the level generator
#[derive(Debug, Clone)]
pub struct GeneratedLevel {
    pub grid: Grid,
    pub intersections: Vec<IntersectionSite>,
}

/// Intersection rows and columns for a complexity value
fn complexity_layout(complexity: u8) -> (usize, usize) {
    match complexity.clamp(1, 5) {
        1 => (1, 2),
        2 => (2, 2),
        3 => (2, 3),
        4 => (3, 3),
        _ => (3, 4),
    }
}

/// Build the grid for a level
pub fn generate_level(spec: &LevelSpec) -> Result<GeneratedLevel> {
    ensure!(
        (1..=5).contains(&spec.complexity),
        "Complexity must be between 1 and 5, got {}",
        spec.complexity
    );
    let width = i32::try_from(spec.width).context("Level width too large")?;
    let height = i32::try_from(spec.height).context("Level height too large")?;

    let (horizontal, vertical) = match spec.level {
        LevelId::Tutorial => (spread(height, 1, None)?, spread(width, 1, None)?),
        LevelId::Corridor => (spread(height, 1, None)?, spread(width, 3, None)?),
        LevelId::Downtown => (spread(height, 2, None)?, spread(width, 2, None)?),
        LevelId::Random => {
            let mut rng = StdRng::seed_from_u64(spec.seed);
            let (rows, cols) = complexity_layout(spec.complexity);
            let horizontal = spread(height, rows, Some(&mut rng))?;
            let vertical = spread(width, cols, Some(&mut rng))?;
            (horizontal, vertical)
        }
    };

    let mut grid = Grid::new(spec.width, spec.height);
    lay_roads(&mut grid, width, height, &horizontal, &vertical);
    grid.classify_boundary();
    let intersections = grid.assign_groups();

    ensure!(
        !grid.entries().is_empty() && !grid.exits().is_empty(),
        "Level {} has no entry or no exit",
        spec.level
    );

    Ok(GeneratedLevel {
        grid,
        intersections,
    })
}

/// Top-left offsets of `count` road bands spread evenly across `length` cells.
///
/// With an RNG each band is jittered inside its share of the map while keeping
/// the margin to neighbours and the edges.
fn spread(length: i32, count: usize, mut rng: Option<&mut StdRng>) -> Result<Vec<i32>> {
    let count_i = i32::try_from(count).context("Too many roads")?;
    let needed = count_i * LANES_PER_ROAD + (count_i + 1) * ROAD_MARGIN;
    ensure!(
        length >= needed,
        "Map length {} cannot hold {} roads (needs {})",
        length,
        count,
        needed
    );

    let share = length / (count_i + 1);
    let mut offsets = Vec::with_capacity(count);
    let mut previous_end = 0;

    for i in 1..=count_i {
        let ideal = share * i - LANES_PER_ROAD / 2;
        let low = previous_end + ROAD_MARGIN;
        let high = length - ROAD_MARGIN - LANES_PER_ROAD * (count_i - i + 1) - ROAD_MARGIN * (count_i - i);
        let mut offset = ideal.clamp(low, high.max(low));
        if let Some(rng) = rng.as_deref_mut() {
            let slack = ((share - LANES_PER_ROAD - ROAD_MARGIN) / 2).max(0);
            if slack > 0 {
                let jitter = rng.random_range(-slack..=slack);
                offset = (offset + jitter).clamp(low, high.max(low));
            }
        }
        offsets.push(offset);
        previous_end = offset + LANES_PER_ROAD;
    }

    Ok(offsets)
}

/// Lane direction and discipline for lane `index` of a band
fn band_lane(horizontal: bool, index: i32) -> (Direction, LaneDiscipline) {
    match (horizontal, index) {
        (true, 0) => (Direction::East, LaneDiscipline::Outer),
        (true, 1) => (Direction::East, LaneDiscipline::Inner),
        (true, 2) => (Direction::West, LaneDiscipline::Inner),
        (true, _) => (Direction::West, LaneDiscipline::Outer),
        (false, 0) => (Direction::North, LaneDiscipline::Outer),
        (false, 1) => (Direction::North, LaneDiscipline::Inner),
        (false, 2) => (Direction::South, LaneDiscipline::Inner),
        (false, _) => (Direction::South, LaneDiscipline::Outer),
    }
}

fn lay_roads(grid: &mut Grid, width: i32, height: i32, horizontal: &[i32], vertical: &[i32]) {
    for &top in horizontal {
        for lane in 0..LANES_PER_ROAD {
            let (direction, discipline) = band_lane(true, lane);
            for x in 0..width {
                let _ = grid.set(GridPos::new(x, top + lane), Cell::road(direction, discipline));
            }
        }
    }

    for &left in vertical {
        for lane in 0..LANES_PER_ROAD {
            let (direction, discipline) = band_lane(false, lane);
            for y in 0..height {
                let pos = GridPos::new(left + lane, y);
                let cell = if grid.cell(pos).is_some_and(Cell::is_drivable) {
                    Cell::intersection()
                } else {
                    Cell::road(direction, discipline)
                };
                let _ = grid.set(pos, cell);
            }
        }
    }
}
