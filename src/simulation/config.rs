//! Tunable simulation parameters
//!
//! Rates are per simulated second, durations are in ticks.

/// Runtime controls for a [`SimWorld`](super::SimWorld)
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    pub spawn_enabled: bool,
    /// Vehicles per second at the start of a run
    pub base_spawn_rate: f32,
    /// Added to the base rate per simulated minute
    pub spawn_rate_growth: f32,
    pub spawn_rate_multiplier: f32,
    /// Penalty per queued vehicle
    pub queue_weight: f32,
    /// Penalty for every entry being blocked
    pub blocked_weight: f32,
    pub max_spawn_penalty: f32,
    pub max_queue_per_entry: u32,

    pub rebel_probability: f64,
    pub min_max_velocity: f32,
    pub max_max_velocity: f32,
    /// Cells per tick squared
    pub acceleration: f32,
    pub deceleration: f32,
    pub reaction_ticks: u32,

    pub collision_timeout: u32,
    pub stuck_timeout: u32,
    pub spawn_stuck_warning: u32,
    pub game_over_timeout: u32,

    pub reroute_interval: u64,
    pub reroute_threshold: u32,
    pub lane_change_interval: u64,
    pub lane_change_margin: usize,

    pub crash_penalty: i64,
    pub exit_reward: i64,

    /// Ticks per rendered frame, 0 pauses
    pub time_scale: f32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            spawn_enabled: true,
            base_spawn_rate: 1.0,
            spawn_rate_growth: 0.1,
            spawn_rate_multiplier: 1.0,
            queue_weight: 0.02,
            blocked_weight: 0.5,
            max_spawn_penalty: 0.95,
            max_queue_per_entry: 20,

            rebel_probability: 0.02,
            min_max_velocity: 0.06,
            max_max_velocity: 0.10,
            acceleration: 0.002,
            deceleration: 0.004,
            reaction_ticks: 10,

            collision_timeout: 180,
            stuck_timeout: 2400,
            spawn_stuck_warning: 600,
            game_over_timeout: 3600,

            reroute_interval: 60,
            reroute_threshold: 180,
            lane_change_interval: 30,
            lane_change_margin: 2,

            crash_penalty: 50,
            exit_reward: 10,

            time_scale: 1.0,
        }
    }
}
