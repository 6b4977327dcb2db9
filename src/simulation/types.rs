//! Core types for the traffic simulation
//!
//! Ids, grid coordinates, compass directions and the continuous position type
//! shared by every other module.

use std::fmt;

/// A unique identifier for simulation entities
/// This is a simple wrapper around a usize for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SimId(pub usize);

/// A wrapper type for intersection IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntersectionId(pub SimId);

/// A wrapper type for road group IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoadGroupId(pub SimId);

/// A wrapper type for car IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CarId(pub SimId);

/// A wrapper type for traffic light IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LightId(pub SimId);

/// Compass direction of travel. North points towards row 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    /// Grid step (dx, dy) for one move in this direction
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::East => (1, 0),
            Direction::South => (0, 1),
            Direction::West => (-1, 0),
        }
    }

    pub fn reverse(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
        }
    }

    /// Direction after a left turn
    pub fn left(self) -> Direction {
        match self {
            Direction::North => Direction::West,
            Direction::West => Direction::South,
            Direction::South => Direction::East,
            Direction::East => Direction::North,
        }
    }

    /// Direction after a right turn
    pub fn right(self) -> Direction {
        self.left().reverse()
    }

    /// Direction of a single grid step between two neighbouring cells
    pub fn between(from: GridPos, to: GridPos) -> Option<Direction> {
        let delta = (to.x - from.x, to.y - from.y);
        Direction::ALL.into_iter().find(|d| d.delta() == delta)
    }

    fn bit(self) -> u8 {
        match self {
            Direction::North => 1,
            Direction::East => 2,
            Direction::South => 4,
            Direction::West => 8,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::North => "N",
            Direction::East => "E",
            Direction::South => "S",
            Direction::West => "W",
        };
        f.write_str(name)
    }
}

/// Small set of directions stored as a bit mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DirectionSet(u8);

impl DirectionSet {
    pub const ALL: DirectionSet = DirectionSet(0b1111);

    pub fn single(direction: Direction) -> Self {
        DirectionSet(direction.bit())
    }

    pub fn contains(self, direction: Direction) -> bool {
        self.0 & direction.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = Direction> {
        Direction::ALL.into_iter().filter(move |d| self.contains(*d))
    }

    /// The only direction in the set, if there is exactly one
    pub fn sole(self) -> Option<Direction> {
        if self.len() == 1 {
            self.iter().next()
        } else {
            None
        }
    }
}

/// Integer cell coordinate on the road grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridPos {
    pub x: i32,
    pub y: i32,
}

impl GridPos {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn step(self, direction: Direction) -> GridPos {
        let (dx, dy) = direction.delta();
        GridPos::new(self.x + dx, self.y + dy)
    }

    pub fn manhattan(self, other: GridPos) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }

    /// Continuous position of the cell center
    pub fn center(self) -> Position {
        Position::new(self.x as f32, self.y as f32)
    }
}

impl fmt::Display for GridPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A continuous 2D position in cell units
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f32 {
        self.distance_squared(other).sqrt()
    }

    pub fn distance_squared(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn lerp(&self, other: &Position, t: f32) -> Position {
        Position {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }

    /// Move `step` units towards `other`, never past it
    pub fn advance_towards(&self, other: &Position, step: f32) -> Position {
        let length = self.distance(other);
        if length <= step || length == 0.0 {
            *other
        } else {
            self.lerp(other, step / length)
        }
    }

    /// Calculate the heading angle from this position to another (radians, 0 = east)
    pub fn angle_to(&self, other: &Position) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        if dx == 0.0 && dy == 0.0 {
            0.0
        } else {
            dy.atan2(dx)
        }
    }

    /// The grid cell containing this position
    pub fn cell(&self) -> GridPos {
        GridPos::new(self.x.round() as i32, self.y.round() as i32)
    }
}

/// Simulation ticks per simulated second
pub const TICKS_PER_SECOND: f32 = 60.0;

/// Length of a car in cell units
pub const CAR_LENGTH: f32 = 1.0;

/// Center distance below which two cars are in contact
pub const COLLISION_RADIUS: f32 = 0.8;

/// Center distance law-abiding drivers refuse to close below
pub const SAFETY_RADIUS: f32 = 0.85;

/// Edge-to-edge distance kept to a stopped lead vehicle, in car lengths
pub const STANDSTILL_GAP: f32 = 0.4;

/// Free radius required around a spawn point or lane-change target
pub const SPAWN_CLEARANCE: f32 = 1.5;
