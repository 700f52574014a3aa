//! # Entity World
//!
//! Maps the records inside a [`Snapshot`] to the prefabs that give them
//! behavior.
//!
//! ## Design
//!
//! - The snapshot is the source of truth; the world only holds handles.
//! - Handles are kept in arena order (ascending id), which is also the
//!   dispatch order.
//! - Installing a different snapshot drops every handle and rebuilds them
//!   from the records: dynamic ones from the prefab table, persistent ones
//!   by looking up their id.

use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::input::InputRecord;
use crate::snapshot::{EntityId, Snapshot, PERSISTENT_PREFAB};

use super::component::{Prefab, PrefabTable};

/// Receives a notification whenever the world is rebuilt from a snapshot.
///
/// Rendering lives outside the simulation; this is the hook it attaches to.
pub trait Presenter {
    /// Called after every snapshot replacement.
    fn rebuild(&mut self, snapshot: &Snapshot);
}

/// A live entity: its id and the prefab that drives it.
pub struct EntityHandle<I: InputRecord> {
    /// Record id.
    pub id: EntityId,
    /// Prefab id stored in the record.
    pub prefab_id: i32,
    /// Components driving the entity.
    pub prefab: Arc<Prefab<I>>,
}

impl<I: InputRecord> Clone for EntityHandle<I> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            prefab_id: self.prefab_id,
            prefab: Arc::clone(&self.prefab),
        }
    }
}

impl<I: InputRecord> std::fmt::Debug for EntityHandle<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityHandle")
            .field("id", &self.id)
            .field("prefab_id", &self.prefab_id)
            .field("prefab", &self.prefab.name())
            .finish()
    }
}

/// Handles for every live record of one snapshot.
pub struct EntityWorld<I: InputRecord> {
    /// Spawnable prefabs.
    prefabs: PrefabTable<I>,
    /// Entities registered at scene load; rebound by id on rebuild.
    persistent: Vec<(EntityId, Arc<Prefab<I>>)>,
    /// Live handles in arena order.
    live: Vec<EntityHandle<I>>,
    /// Optional rebuild hook.
    presenter: Option<Box<dyn Presenter>>,
}

impl<I: InputRecord> EntityWorld<I> {
    /// Creates an empty world over a prefab table.
    #[must_use]
    pub fn new(prefabs: PrefabTable<I>) -> Self {
        Self {
            prefabs,
            persistent: Vec::new(),
            live: Vec::new(),
            presenter: None,
        }
    }

    /// The spawnable prefabs.
    #[inline]
    #[must_use]
    pub const fn prefabs(&self) -> &PrefabTable<I> {
        &self.prefabs
    }

    /// Attaches a presenter.
    pub fn set_presenter(&mut self, presenter: Box<dyn Presenter>) {
        self.presenter = Some(presenter);
    }

    /// Registers a scene entity. It is never destroyed by a rebuild.
    ///
    /// Every participant must register the same prefabs in the same order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfMemory`] if the snapshot is full.
    pub fn register_persistent(
        &mut self,
        snapshot: &mut Snapshot,
        prefab: Prefab<I>,
    ) -> CoreResult<EntityId> {
        let prefab = Arc::new(prefab);
        let id = Self::allocate(snapshot, &prefab, PERSISTENT_PREFAB)?;
        self.persistent.push((id, Arc::clone(&prefab)));
        self.insert_handle(EntityHandle {
            id,
            prefab_id: PERSISTENT_PREFAB,
            prefab,
        });
        Ok(id)
    }

    /// Allocates a record for a prefab from the table.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownPrefab`] or [`CoreError::OutOfMemory`].
    pub fn spawn(&mut self, snapshot: &mut Snapshot, prefab_id: i32) -> CoreResult<EntityId> {
        let prefab = Arc::clone(self.prefabs.get(prefab_id)?);
        let id = Self::allocate(snapshot, &prefab, prefab_id)?;
        self.insert_handle(EntityHandle {
            id,
            prefab_id,
            prefab,
        });
        Ok(id)
    }

    /// Releases a record and drops its handle.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotAnEntity`] if the entity is not live.
    pub fn despawn(&mut self, snapshot: &mut Snapshot, entity: EntityId) -> CoreResult<()> {
        let index = self.index_of(entity).ok_or(CoreError::NotAnEntity(entity.0))?;
        snapshot.release_record(entity)?;
        self.live.remove(index);
        Ok(())
    }

    /// Drops all handles and recreates them from the records in `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownPrefab`] if a record names a prefab that
    /// is not in the table.
    pub fn rebuild_from_snapshot(&mut self, snapshot: &Snapshot) -> CoreResult<()> {
        self.live.clear();
        for cursor in snapshot.entities() {
            let prefab = if cursor.is_persistent() {
                let Some((_, prefab)) = self.persistent.iter().find(|(id, _)| *id == cursor.entity)
                else {
                    tracing::warn!("Persistent record {} has no registration", cursor.entity);
                    continue;
                };
                Arc::clone(prefab)
            } else {
                Arc::clone(self.prefabs.get(cursor.prefab_id)?)
            };
            self.live.push(EntityHandle {
                id: cursor.entity,
                prefab_id: cursor.prefab_id,
                prefab,
            });
        }

        if let Some(presenter) = self.presenter.as_mut() {
            presenter.rebuild(snapshot);
        }
        Ok(())
    }

    /// Handle of a live entity.
    #[must_use]
    pub fn get(&self, entity: EntityId) -> Option<&EntityHandle<I>> {
        self.index_of(entity).map(|index| &self.live[index])
    }

    /// Returns true if `entity` has a live handle.
    #[inline]
    #[must_use]
    pub fn contains(&self, entity: EntityId) -> bool {
        self.index_of(entity).is_some()
    }

    /// Live handles in arena order.
    #[inline]
    #[must_use]
    pub fn handles(&self) -> &[EntityHandle<I>] {
        &self.live
    }

    /// Ids of live entities in arena order.
    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.live.iter().map(|handle| handle.id)
    }

    /// Number of live entities.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Returns true if no entity is live.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn allocate(snapshot: &mut Snapshot, prefab: &Prefab<I>, prefab_id: i32) -> CoreResult<EntityId> {
        let id = snapshot.allocate_record(prefab.state_size(), prefab_id)?;
        prefab.init_state(snapshot.record_state_mut(id)?);
        Ok(id)
    }

    fn index_of(&self, entity: EntityId) -> Option<usize> {
        self.live.binary_search_by_key(&entity, |handle| handle.id).ok()
    }

    fn insert_handle(&mut self, handle: EntityHandle<I>) {
        let index = self.live.partition_point(|live| live.id < handle.id);
        self.live.insert(index, handle);
    }
}

impl<I: InputRecord> std::fmt::Debug for EntityWorld<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityWorld")
            .field("prefabs", &self.prefabs.len())
            .field("persistent", &self.persistent.len())
            .field("live", &self.live)
            .finish_non_exhaustive()
    }
}
