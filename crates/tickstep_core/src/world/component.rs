//! # Components and Prefabs
//!
//! A component is behavior plus a fixed-size slice of state. A prefab is an
//! ordered list of components; an entity record's state is the concatenation
//! of its components' states, in prefab order.
//!
//! Components own no data themselves. Everything that must survive a rollback
//! lives in the record, so anything cached on a component breaks determinism.

use std::ops::Range;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::input::InputRecord;
use crate::simulation::TickContext;

/// Behavior attached to an entity.
///
/// Every callback has a no-op default.
pub trait Component<I: InputRecord>: Send + Sync {
    /// Bytes of record state this component owns.
    fn state_size(&self) -> usize;

    /// Writes the initial state when a record is allocated.
    ///
    /// `state` is zeroed on entry.
    fn init(&self, _state: &mut [u8]) {}

    /// Called once when the entity starts simulating.
    ///
    /// # Errors
    ///
    /// Propagates allocation failures from spawning.
    fn tick_start(&self, _ctx: &mut TickContext<'_, I>) -> CoreResult<()> {
        Ok(())
    }

    /// Called every tick.
    ///
    /// # Errors
    ///
    /// Propagates allocation failures from spawning.
    fn tick_update(&self, _ctx: &mut TickContext<'_, I>) -> CoreResult<()> {
        Ok(())
    }

    /// Called right before the record is released.
    ///
    /// # Errors
    ///
    /// Propagates allocation failures from spawning.
    fn tick_destroy(&self, _ctx: &mut TickContext<'_, I>) -> CoreResult<()> {
        Ok(())
    }

    /// Called once per player that joined since the previous tick.
    ///
    /// # Errors
    ///
    /// Propagates allocation failures from spawning.
    fn player_joined(&self, _ctx: &mut TickContext<'_, I>) -> CoreResult<()> {
        Ok(())
    }
}

/// An ordered list of components that entities are built from.
pub struct Prefab<I: InputRecord> {
    /// Name for logs.
    name: String,
    /// Components in dispatch order.
    components: Vec<Arc<dyn Component<I>>>,
    /// Start offset of each component's state inside the record state.
    offsets: Vec<usize>,
    /// Sum of all component state sizes.
    state_size: usize,
}

impl<I: InputRecord> Prefab<I> {
    /// Creates an empty prefab.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: Vec::new(),
            offsets: Vec::new(),
            state_size: 0,
        }
    }

    /// Appends a component.
    #[must_use]
    pub fn with(self, component: impl Component<I> + 'static) -> Self {
        self.with_shared(Arc::new(component))
    }

    /// Appends a component shared with other prefabs.
    #[must_use]
    pub fn with_shared(mut self, component: Arc<dyn Component<I>>) -> Self {
        self.offsets.push(self.state_size);
        self.state_size += component.state_size();
        self.components.push(component);
        self
    }

    /// Name for logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes of record state needed by all components together.
    #[inline]
    #[must_use]
    pub const fn state_size(&self) -> usize {
        self.state_size
    }

    /// Components in dispatch order.
    #[inline]
    #[must_use]
    pub fn components(&self) -> &[Arc<dyn Component<I>>] {
        &self.components
    }

    /// Byte range of a component's state inside the record state.
    #[must_use]
    pub fn component_range(&self, index: usize) -> Option<Range<usize>> {
        let start = *self.offsets.get(index)?;
        let size = self.components[index].state_size();
        Some(start..start + size)
    }

    /// Runs every component's `init` over a zeroed record state.
    pub fn init_state(&self, state: &mut [u8]) {
        for (index, component) in self.components.iter().enumerate() {
            if let Some(range) = self.component_range(index) {
                component.init(&mut state[range]);
            }
        }
    }
}

impl<I: InputRecord> std::fmt::Debug for Prefab<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prefab")
            .field("name", &self.name)
            .field("components", &self.components.len())
            .field("state_size", &self.state_size)
            .finish()
    }
}

/// Prefabs that can be spawned at runtime, indexed by prefab id.
///
/// The table must be identical on every participant: the id is what travels
/// inside snapshots.
pub struct PrefabTable<I: InputRecord> {
    /// Registered prefabs; the index is the prefab id.
    prefabs: Vec<Arc<Prefab<I>>>,
}

impl<I: InputRecord> PrefabTable<I> {
    /// Creates an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            prefabs: Vec::new(),
        }
    }

    /// Adds a prefab and returns its id.
    ///
    /// # Panics
    ///
    /// Panics if more than `i32::MAX` prefabs are registered.
    pub fn register(&mut self, prefab: Prefab<I>) -> i32 {
        let id = i32::try_from(self.prefabs.len()).expect("prefab table overflow");
        self.prefabs.push(Arc::new(prefab));
        id
    }

    /// Looks up a prefab by id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownPrefab`] for ids not in the table.
    pub fn get(&self, prefab_id: i32) -> CoreResult<&Arc<Prefab<I>>> {
        usize::try_from(prefab_id)
            .ok()
            .and_then(|index| self.prefabs.get(index))
            .ok_or(CoreError::UnknownPrefab(prefab_id))
    }

    /// Number of prefabs.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.prefabs.len()
    }

    /// Returns true if no prefab is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prefabs.is_empty()
    }
}

impl<I: InputRecord> Default for PrefabTable<I> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sized4;
    impl Component<u32> for Sized4 {
        fn state_size(&self) -> usize {
            4
        }
        fn init(&self, state: &mut [u8]) {
            state.copy_from_slice(&7u32.to_le_bytes());
        }
    }

    struct Sized8;
    impl Component<u32> for Sized8 {
        fn state_size(&self) -> usize {
            8
        }
    }

    #[test]
    fn test_prefab_layout() {
        let prefab = Prefab::<u32>::new("pair").with(Sized8).with(Sized4);
        assert_eq!(prefab.state_size(), 12);
        assert_eq!(prefab.component_range(0), Some(0..8));
        assert_eq!(prefab.component_range(1), Some(8..12));
        assert_eq!(prefab.component_range(2), None);
    }

    #[test]
    fn test_init_state_writes_component_slices() {
        let prefab = Prefab::<u32>::new("pair").with(Sized8).with(Sized4);
        let mut state = vec![0u8; prefab.state_size()];
        prefab.init_state(&mut state);
        assert_eq!(&state[8..], &7u32.to_le_bytes());
        assert!(state[..8].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_prefab_table_ids() {
        let mut table = PrefabTable::<u32>::new();
        assert_eq!(table.register(Prefab::new("a")), 0);
        assert_eq!(table.register(Prefab::new("b")), 1);
        assert_eq!(table.get(1).unwrap().name(), "b");
        assert_eq!(table.get(2).unwrap_err(), CoreError::UnknownPrefab(2));
        assert_eq!(table.get(-1).unwrap_err(), CoreError::UnknownPrefab(-1));
    }
}
