use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use lane_traffic_sim::simulation::{LevelId, LevelSpec, PhasePreset, SimWorld, TICKS_PER_SECOND};

#[derive(Parser)]
#[command(name = "lane_traffic_sim")]
#[command(about = "Headless lane-grid traffic simulation")]
struct Cli {
    /// Level layout: tutorial, corridor, downtown or random
    #[arg(long, default_value = "tutorial")]
    level: LevelId,

    /// Map width in cells (defaults to the level's size)
    #[arg(long)]
    width: Option<usize>,

    /// Map height in cells (defaults to the level's size)
    #[arg(long)]
    height: Option<usize>,

    /// Intersection density for random levels (1-5)
    #[arg(long, default_value = "3")]
    complexity: u8,

    /// Seed for level generation and traffic
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Number of simulation ticks to run
    #[arg(long, default_value = "3600")]
    ticks: u64,

    /// Base spawn rate in vehicles per second
    #[arg(long)]
    spawn_rate: Option<f32>,

    /// Probability that a new vehicle ignores lane rules
    #[arg(long)]
    rebel_probability: Option<f64>,

    /// Signal preset for every intersection
    #[arg(long)]
    preset: Option<PhasePreset>,

    /// Log a progress line every N ticks (0 disables)
    #[arg(long, default_value = "600")]
    report_every: u64,

    /// Print the map at the start and the end of the run
    #[arg(long)]
    map: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    run_headless(&cli)
}

/// Run the simulation in headless mode (no graphics)
fn run_headless(cli: &Cli) -> Result<()> {
    let (default_width, default_height) = cli.level.default_size(cli.complexity);
    let spec = LevelSpec::new(cli.level)
        .with_complexity(cli.complexity)
        .with_seed(cli.seed)
        .with_size(
            cli.width.unwrap_or(default_width),
            cli.height.unwrap_or(default_height),
        );

    let mut world = SimWorld::new_with_level(spec).context("Failed to build the world")?;
    world.configure(|config| {
        if let Some(rate) = cli.spawn_rate {
            config.base_spawn_rate = rate;
        }
        if let Some(probability) = cli.rebel_probability {
            config.rebel_probability = probability;
        }
    });
    if let Some(preset) = cli.preset {
        world.set_all_presets(preset);
    }

    info!(
        "Running {} ticks ({:.1}s simulated) on level {}",
        cli.ticks,
        cli.ticks as f32 / TICKS_PER_SECOND,
        cli.level
    );
    if cli.map {
        world.draw_map();
    }

    for _ in 0..cli.ticks {
        world.tick();

        let tick = world.current_tick();
        if cli.report_every > 0 && tick % cli.report_every == 0 {
            let snapshot = world.snapshot();
            info!(
                "tick {}: {} cars, {} exited, {} collisions, {} queued, rate {:.2}/s",
                tick,
                snapshot.vehicles.len(),
                snapshot.exited,
                snapshot.collisions,
                snapshot.queued_total(),
                snapshot.spawn_rate
            );
        }

        if world.is_game_over() {
            break;
        }
    }

    info!("=== SIMULATION COMPLETE ===");
    world.print_summary();
    if cli.map {
        world.draw_map();
    }
    Ok(())
}
