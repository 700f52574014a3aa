//! # Simulation Benchmark
//!
//! Steady-state ticks: a fixed population updated by player inputs, no
//! spawns. A client replays several of these per frame after a rollback.
//!
//! Run with: `cargo bench --package tickstep_core --bench simulation_benchmark`

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tickstep_core::{
    Component, CoreResult, EntityWorld, Prefab, PrefabTable, Scene, Simulation, Snapshot, TickContext,
};

/// `[player, x]`, moved by its player's input.
struct Drift;
impl Component<u32> for Drift {
    fn state_size(&self) -> usize {
        8
    }
    fn tick_update(&self, ctx: &mut TickContext<'_, u32>) -> CoreResult<()> {
        let [player, x]: [u32; 2] = ctx.read()?;
        let input = ctx.input(usize::try_from(player).unwrap_or_default());
        ctx.write(&[player, x.wrapping_add(input)])
    }
}

/// Populates `entities` movers spread over four players.
struct Field {
    entities: u32,
}

impl Scene<u32> for Field {
    fn prefabs(&self) -> PrefabTable<u32> {
        PrefabTable::new()
    }

    fn populate(&self, _scene_index: i32, world: &mut EntityWorld<u32>, snapshot: &mut Snapshot) -> CoreResult<()> {
        for index in 0..self.entities {
            let entity = world.register_persistent(snapshot, Prefab::new("mover").with(Drift))?;
            snapshot.record_state_mut(entity)?[..4].copy_from_slice(&(index % 4).to_le_bytes());
        }
        Ok(())
    }
}

fn bench_steady_state(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulation_integrate");
    for entities in [16_u32, 256, 1024] {
        let mut simulation = Simulation::load_scene(&Field { entities }, 0, 64 * 1024, 1.0 / 60.0, 0).unwrap();
        simulation.integrate(&[0; 4], 4).unwrap();
        let inputs = [1, 2, 3, 4];
        group.bench_with_input(BenchmarkId::from_parameter(entities), &inputs, |b, inputs| {
            b.iter(|| black_box(simulation.integrate(black_box(inputs), 0).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_steady_state);
criterion_main!(benches);
