use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::info;
use veldt_core::{AgentKind, EvasionController, PursuitController, World, WorldConfig};

/// Headless runner for the Veldt predator-prey simulation.
#[derive(Debug, Parser)]
#[command(name = "veldt", version, about)]
struct Args {
    /// Number of hunters to seed.
    #[arg(long, default_value_t = 6)]
    hunters: usize,

    /// Number of prey to seed.
    #[arg(long, default_value_t = 40)]
    prey: usize,

    /// Ticks to simulate.
    #[arg(long, default_value_t = 3_600)]
    ticks: u64,

    /// RNG seed; omit for an entropy-seeded run.
    #[arg(long)]
    seed: Option<u64>,

    /// Path to a JSON world configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write per-interval snapshots as JSON lines to this file.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Ticks between snapshot/log emissions.
    #[arg(long, default_value_t = 60)]
    interval: u64,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if args.seed.is_some() {
        config.rng_seed = args.seed;
    }

    let mut world = World::initialize(args.hunters, args.prey, config)?;
    let pursuit_seed = world.config().rng_seed.unwrap_or(0xFACA_DEAF);
    let pursuit = world.register_controller(Box::new(PursuitController::new(pursuit_seed)));
    let evasion = world.register_controller(Box::new(EvasionController::new(pursuit_seed ^ 1)));
    world.bind_kind(AgentKind::Hunter, pursuit);
    world.bind_kind(AgentKind::Prey, evasion);

    let mut sink = match &args.output {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => None,
    };

    info!(
        hunters = args.hunters,
        prey = args.prey,
        ticks = args.ticks,
        seed = ?world.config().rng_seed,
        "Starting Veldt simulation",
    );

    let interval = args.interval.max(1);
    for _ in 0..args.ticks {
        let summary = world.step();
        if summary.tick.0 % interval != 0 {
            continue;
        }
        if let Some(writer) = sink.as_mut() {
            serde_json::to_writer(&mut *writer, &world.snapshot())?;
            writer.write_all(b"\n")?;
        }
        info!(
            tick = summary.tick.0,
            hunters = summary.hunters,
            prey = summary.prey,
            captures = summary.captures,
            spawns = summary.spawns,
            deaths = summary.deaths,
            mean_energy = summary.mean_energy,
            "tick summary",
        );
        if world.agent_count() == 0 {
            info!(tick = summary.tick.0, "Population extinct, stopping early");
            break;
        }
    }

    if let Some(writer) = sink.as_mut() {
        writer.flush()?;
    }

    let counters = world.counters();
    info!(
        final_tick = world.tick().0,
        agents = world.agent_count(),
        captures = counters.captures,
        spawns = counters.spawns,
        starvations = counters.starvations,
        rejected_spawns = counters.rejected_spawns,
        "Simulation complete",
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn load_config(path: Option<&std::path::Path>) -> Result<WorldConfig> {
    match path {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
            let config = serde_json::from_reader(file)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        }
        None => Ok(WorldConfig::default()),
    }
}
