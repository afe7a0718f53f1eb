use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::time::Duration;
use veldt_core::{AgentKind, EvasionController, PursuitController, World, WorldConfig};

fn bench_world_steps(c: &mut Criterion) {
    let mut group = c.benchmark_group("world_step");
    group.sample_size(30);
    group.warm_up_time(Duration::from_secs(2));
    group.measurement_time(Duration::from_secs(8));

    let steps = 32;
    for &(hunters, prey) in &[(4_usize, 46_usize), (10, 90), (24, 216)] {
        let agents = hunters + prey;
        group.bench_function(format!("steps{steps}_agents{agents}"), |b| {
            b.iter_batched(
                || {
                    let config = WorldConfig {
                        max_agents: agents.max(240),
                        rng_seed: Some(0xBEEF),
                        ..WorldConfig::default()
                    };
                    let mut world = World::initialize(hunters, prey, config).expect("world");
                    let pursuit = world.register_controller(Box::new(PursuitController::new(1)));
                    let evasion = world.register_controller(Box::new(EvasionController::new(2)));
                    world.bind_kind(AgentKind::Hunter, pursuit);
                    world.bind_kind(AgentKind::Prey, evasion);
                    world
                },
                |mut world| {
                    for _ in 0..steps {
                        world.step();
                    }
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_world_steps);
criterion_main!(benches);
