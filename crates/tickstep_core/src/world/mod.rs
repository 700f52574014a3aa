//! # Entity World
//!
//! The collaborator that turns snapshot records into behavior.
//!
//! ## Structure
//!
//! ```text
//! Scene ──populate──▶ EntityWorld ──handles──▶ Prefab ──▶ [Component, ...]
//!                          │
//!                          └── records live in the Snapshot
//! ```

mod component;
mod entity;

pub use component::{Component, Prefab, PrefabTable};
pub use entity::{EntityHandle, EntityWorld, Presenter};

use crate::error::CoreResult;
use crate::input::InputRecord;
use crate::snapshot::Snapshot;

/// Builds the content of a scene.
///
/// Host and clients load the same scene index through the same `Scene`, so
/// persistent records land at identical offsets everywhere.
pub trait Scene<I: InputRecord> {
    /// Prefabs that may be spawned at runtime.
    fn prefabs(&self) -> PrefabTable<I>;

    /// Registers the scene's persistent entities.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot hold the scene.
    fn populate(
        &self,
        scene_index: i32,
        world: &mut EntityWorld<I>,
        snapshot: &mut Snapshot,
    ) -> CoreResult<()>;
}
