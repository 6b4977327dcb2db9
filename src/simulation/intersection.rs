//! Signal-controlled intersections
//!
//! Each intersection cycles through an ordered list of timed phases. A phase
//! maps direction groups to a light state; groups it does not mention are red.

use anyhow::{ensure, Result};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use super::types::{Direction, GridPos, IntersectionId, LightId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightState {
    Red,
    Yellow,
    Green,
}

/// A traffic light guarding one approach lane
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficLight {
    pub id: LightId,
    pub state: LightState,
    /// The approach cell the light stands on
    pub position: GridPos,
    /// Travel direction of the traffic it controls
    pub group: Direction,
    pub intersection: IntersectionId,
}

/// All lights of the world, indexed by id and by approach cell
#[derive(Debug, Clone, Default)]
pub struct LightBoard {
    lights: BTreeMap<LightId, TrafficLight>,
    by_position: HashMap<GridPos, LightId>,
}

impl LightBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, light: TrafficLight) {
        self.by_position.insert(light.position, light.id);
        self.lights.insert(light.id, light);
    }

    pub fn get(&self, id: LightId) -> Option<&TrafficLight> {
        self.lights.get(&id)
    }

    /// The light standing on an approach cell, if any
    pub fn light_at(&self, pos: GridPos) -> Option<&TrafficLight> {
        self.by_position.get(&pos).and_then(|id| self.lights.get(id))
    }

    pub fn set_state(&mut self, id: LightId, state: LightState) {
        if let Some(light) = self.lights.get_mut(&id) {
            light.state = state;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrafficLight> {
        self.lights.values()
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }
}

/// One timed light configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Phase {
    /// Duration in ticks
    pub duration: u32,
    pub lights: BTreeMap<Direction, LightState>,
}

impl Phase {
    pub fn new(duration: u32, lights: impl IntoIterator<Item = (Direction, LightState)>) -> Self {
        Self {
            duration,
            lights: lights.into_iter().collect(),
        }
    }

    pub fn all_red(duration: u32) -> Self {
        Self::new(duration, std::iter::empty())
    }

    /// State for a direction group; unmapped groups are red
    pub fn state_for(&self, group: Direction) -> LightState {
        self.lights.get(&group).copied().unwrap_or(LightState::Red)
    }
}

/// Phase durations used when building presets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTiming {
    pub green: u32,
    pub yellow: u32,
    pub all_red: u32,
}

impl Default for PhaseTiming {
    fn default() -> Self {
        Self {
            green: 180,
            yellow: 30,
            all_red: 30,
        }
    }
}

/// How an intersection's phases are generated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhasePreset {
    /// One direction at a time, with all-red clearance between
    #[default]
    RoundRobin,
    /// Opposing directions together
    OppositePhasing,
    /// A single repeating all-red phase
    AllWayStop,
    /// Phases are edited externally
    Manual,
}

impl PhasePreset {
    /// Build the phases for this preset, `None` for manual control
    pub fn phases(self, timing: PhaseTiming) -> Option<Vec<Phase>> {
        let green_yellow = |groups: &[Direction]| {
            [
                Phase::new(
                    timing.green,
                    groups.iter().map(|g| (*g, LightState::Green)),
                ),
                Phase::new(
                    timing.yellow,
                    groups.iter().map(|g| (*g, LightState::Yellow)),
                ),
                Phase::all_red(timing.all_red),
            ]
        };

        match self {
            PhasePreset::RoundRobin => Some(
                Direction::ALL
                    .iter()
                    .flat_map(|d| green_yellow(std::slice::from_ref(d)))
                    .collect(),
            ),
            PhasePreset::OppositePhasing => Some(
                [
                    [Direction::North, Direction::South],
                    [Direction::East, Direction::West],
                ]
                .iter()
                .flat_map(|pair| green_yellow(pair))
                .collect(),
            ),
            PhasePreset::AllWayStop => Some(vec![Phase::all_red(
                timing.green + timing.yellow + timing.all_red,
            )]),
            PhasePreset::Manual => None,
        }
    }
}

impl fmt::Display for PhasePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhasePreset::RoundRobin => "round-robin",
            PhasePreset::OppositePhasing => "opposite",
            PhasePreset::AllWayStop => "all-way-stop",
            PhasePreset::Manual => "manual",
        };
        f.write_str(name)
    }
}

impl FromStr for PhasePreset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round-robin" | "roundrobin" => Ok(PhasePreset::RoundRobin),
            "opposite" | "opposite-phasing" => Ok(PhasePreset::OppositePhasing),
            "all-way-stop" | "stop" => Ok(PhasePreset::AllWayStop),
            "manual" => Ok(PhasePreset::Manual),
            other => anyhow::bail!("Unknown phase preset '{}'", other),
        }
    }
}

/// Phase configuration that survives a level reset
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseRules {
    pub preset: PhasePreset,
    pub timing: PhaseTiming,
    pub phases: Vec<Phase>,
}

/// An intersection in the traffic simulation
#[derive(Debug, Clone)]
pub struct SimIntersection {
    pub id: IntersectionId,
    pub cells: Vec<GridPos>,
    /// Lights owned by this intersection
    pub lights: Vec<LightId>,
    phases: Vec<Phase>,
    current_phase: usize,
    /// Ticks spent in the current phase
    timer: u32,
    preset: PhasePreset,
    timing: PhaseTiming,
}

impl SimIntersection {
    pub fn new(id: IntersectionId, cells: Vec<GridPos>, lights: Vec<LightId>) -> Self {
        let timing = PhaseTiming::default();
        let preset = PhasePreset::default();
        Self {
            id,
            cells,
            lights,
            phases: preset.phases(timing).unwrap_or_else(|| vec![Phase::all_red(1)]),
            current_phase: 0,
            timer: 0,
            preset,
            timing,
        }
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn current_phase(&self) -> usize {
        self.current_phase
    }

    pub fn timer(&self) -> u32 {
        self.timer
    }

    pub fn preset(&self) -> PhasePreset {
        self.preset
    }

    pub fn timing(&self) -> PhaseTiming {
        self.timing
    }

    pub fn active_phase(&self) -> &Phase {
        &self.phases[self.current_phase]
    }

    /// Advance the phase timer by one tick
    pub fn tick(&mut self) {
        self.timer += 1;
        if self.timer >= self.active_phase().duration.max(1) {
            self.timer = 0;
            self.current_phase = (self.current_phase + 1) % self.phases.len();
        }
    }

    /// Write the active phase's states onto the owned lights
    pub fn apply(&self, board: &mut LightBoard) {
        let phase = self.active_phase();
        for &light_id in &self.lights {
            let Some(group) = board.get(light_id).map(|l| l.group) else {
                continue;
            };
            board.set_state(light_id, phase.state_for(group));
        }
    }

    fn restart(&mut self) {
        self.current_phase = 0;
        self.timer = 0;
    }

    /// Switch preset, regenerating phases unless the preset is manual
    pub fn set_preset(&mut self, preset: PhasePreset) {
        self.preset = preset;
        if let Some(phases) = preset.phases(self.timing) {
            self.phases = phases;
        }
        self.restart();
    }

    /// Change preset durations and regenerate phases
    pub fn set_timing(&mut self, timing: PhaseTiming) {
        self.timing = timing;
        if let Some(phases) = self.preset.phases(timing) {
            self.phases = phases;
        }
        self.restart();
    }

    /// Replace the phase list, switching to manual control
    pub fn set_phases(&mut self, phases: Vec<Phase>) -> Result<()> {
        ensure!(
            !phases.is_empty(),
            "Intersection {:?} needs at least one phase",
            self.id
        );
        self.phases = phases;
        self.preset = PhasePreset::Manual;
        self.restart();
        Ok(())
    }

    pub fn rules(&self) -> PhaseRules {
        PhaseRules {
            preset: self.preset,
            timing: self.timing,
            phases: self.phases.clone(),
        }
    }

    /// Restore rules captured from a previous world
    pub fn restore_rules(&mut self, rules: &PhaseRules) {
        self.timing = rules.timing;
        self.preset = rules.preset;
        self.phases = match rules.preset.phases(rules.timing) {
            Some(phases) => phases,
            None if !rules.phases.is_empty() => rules.phases.clone(),
            None => self.phases.clone(),
        };
        self.restart();
    }
}
