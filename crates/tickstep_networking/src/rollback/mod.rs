//! # Rollback
//!
//! Confirmed-state bookkeeping for client-side prediction.
//!
//! ## Timeline
//!
//! ```text
//!  confirmed            live (forward_tick)
//!      │                      │
//!  ────┼──────────────────────┼──── ticks
//!      │◀── predicted inputs ─▶│
//! ```
//!
//! Each frame the client pops the confirmed state into the live snapshot,
//! integrates the newly confirmed ticks with official inputs, pushes the
//! result back as confirmed, then replays its own predicted inputs up to the
//! forward tick.
//!
//! The live snapshot belongs to the client's [`tickstep_core::Simulation`];
//! this engine only keeps the confirmed copy and the predicted-input map.

use std::collections::BTreeMap;

use tickstep_core::{neutral_input, CoreResult, InputRecord, Snapshot};

/// Confirmed snapshot plus the local inputs predicted past it.
#[derive(Clone, Debug)]
pub struct Rollback<I: InputRecord> {
    confirmed: Snapshot,
    predicted_inputs: BTreeMap<i32, I>,
    forward_tick: i32,
}

impl<I: InputRecord> Rollback<I> {
    /// Starts with `live` as the confirmed state.
    #[must_use]
    pub fn new(live: &Snapshot) -> Self {
        Self {
            confirmed: live.clone(),
            predicted_inputs: BTreeMap::new(),
            forward_tick: live.tick(),
        }
    }

    /// Copies the live state into the confirmed snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`tickstep_core::CoreError::CapacityMismatch`] if the arenas
    /// differ in size.
    pub fn push_confirmed(&mut self, live: &Snapshot) -> CoreResult<()> {
        self.confirmed.copy_from(live)
    }

    /// Restores the confirmed state into the live snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`tickstep_core::CoreError::CapacityMismatch`] if the arenas
    /// differ in size.
    pub fn pop_confirmed(&self, live: &mut Snapshot) -> CoreResult<()> {
        live.copy_from(&self.confirmed)
    }

    /// Last confirmed state.
    #[inline]
    #[must_use]
    pub const fn confirmed(&self) -> &Snapshot {
        &self.confirmed
    }

    /// Remembers the input predicted for `tick`.
    pub fn record_predicted_input(&mut self, tick: i32, input: I) {
        self.predicted_inputs.insert(tick, input);
    }

    /// Input predicted for `tick`, or the neutral input if none was recorded.
    #[must_use]
    pub fn predicted_input(&self, tick: i32) -> I {
        self.predicted_inputs
            .get(&tick)
            .copied()
            .unwrap_or_else(neutral_input)
    }

    /// Forgets the prediction for a tick that is now confirmed.
    pub fn consume_predicted_input(&mut self, tick: i32) {
        self.predicted_inputs.remove(&tick);
    }

    /// Predictions still waiting for confirmation.
    #[inline]
    #[must_use]
    pub fn pending_predictions(&self) -> usize {
        self.predicted_inputs.len()
    }

    /// First tick not yet predicted.
    #[inline]
    #[must_use]
    pub const fn forward_tick(&self) -> i32 {
        self.forward_tick
    }

    /// Moves the prediction frontier.
    #[inline]
    pub fn set_forward_tick(&mut self, tick: i32) {
        self.forward_tick = tick;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickstep_core::{Component, EntityWorld, Prefab, PrefabTable, Scene, Simulation, TickContext};

    /// Sums every player's input.
    struct Accumulator;
    impl Component<i32> for Accumulator {
        fn state_size(&self) -> usize {
            4
        }
        fn tick_update(&self, ctx: &mut TickContext<'_, i32>) -> CoreResult<()> {
            let mut total: i32 = ctx.read()?;
            for player in 0..ctx.player_count() {
                total = total.wrapping_mul(31).wrapping_add(ctx.input(player));
            }
            ctx.write(&total)
        }
    }

    struct Ledger;
    impl Scene<i32> for Ledger {
        fn prefabs(&self) -> PrefabTable<i32> {
            PrefabTable::new()
        }
        fn populate(
            &self,
            _scene_index: i32,
            world: &mut EntityWorld<i32>,
            snapshot: &mut Snapshot,
        ) -> CoreResult<()> {
            world.register_persistent(snapshot, Prefab::new("ledger").with(Accumulator))?;
            Ok(())
        }
    }

    fn simulation() -> Simulation<i32> {
        Simulation::load_scene(&Ledger, 0, 64, 1.0 / 60.0, 1).unwrap()
    }

    #[test]
    fn test_push_then_pop_leaves_live_unchanged() {
        let mut sim = simulation();
        sim.integrate(&[1, 2], 0).unwrap();
        let mut rollback = Rollback::<i32>::new(sim.snapshot());
        rollback.push_confirmed(sim.snapshot()).unwrap();

        let before = sim.snapshot().clone();
        rollback.pop_confirmed(sim.snapshot_mut()).unwrap();
        assert_eq!(sim.snapshot(), &before);
    }

    #[test]
    fn test_replay_reproduces_prediction() {
        let mut sim = simulation();
        let mut rollback = Rollback::new(sim.snapshot());

        for value in [3, 5, 7] {
            let tick = sim.tick();
            rollback.record_predicted_input(tick, value);
            sim.integrate(&[0, value], 0).unwrap();
        }
        rollback.set_forward_tick(sim.tick());
        let predicted = sim.snapshot().checksum();

        rollback.pop_confirmed(sim.snapshot_mut()).unwrap();
        assert_eq!(sim.tick(), 0);
        while sim.tick() < rollback.forward_tick() {
            let input = rollback.predicted_input(sim.tick());
            sim.integrate(&[0, input], 0).unwrap();
        }
        assert_eq!(sim.snapshot().checksum(), predicted);
    }

    #[test]
    fn test_missing_prediction_is_neutral() {
        let sim = simulation();
        let mut rollback = Rollback::<i32>::new(sim.snapshot());
        rollback.record_predicted_input(4, 9);
        assert_eq!(rollback.predicted_input(4), 9);
        assert_eq!(rollback.predicted_input(5), 0);

        rollback.consume_predicted_input(4);
        assert_eq!(rollback.predicted_input(4), 0);
        assert_eq!(rollback.pending_predictions(), 0);
    }
}
