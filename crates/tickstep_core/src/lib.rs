//! # TICKSTEP Core Engine
//!
//! Deterministic state for lockstep simulations:
//! - One fixed-size arena holds every simulated byte
//! - Snapshots copy, hash and ship as plain byte images
//! - Entities are records in the arena, driven by prefab components
//!
//! ## Architecture Rules
//!
//! 1. **State lives in the arena** - Components carry no data of their own
//! 2. **Arena order is dispatch order** - Every participant walks the same records
//! 3. **Same inputs, same checksum** - Integration is a pure function of bytes and inputs
//!
//! ## Example
//!
//! ```rust
//! use tickstep_core::Snapshot;
//!
//! let mut snapshot = Snapshot::new(1024).unwrap();
//! let entity = snapshot.allocate_record(16, 0).unwrap();
//! snapshot.record_state_mut(entity).unwrap()[0] = 1;
//!
//! let confirmed = snapshot.clone();
//! assert_eq!(confirmed.checksum(), snapshot.checksum());
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod input;
pub mod memory;
pub mod simulation;
pub mod snapshot;
pub mod world;

pub use error::{CoreError, CoreResult};
pub use input::{neutral_input, InputRecord};
pub use memory::{Arena, BlockHeader, BlockRef};
pub use simulation::{Simulation, TickContext};
pub use snapshot::{EntityCursor, EntityId, Snapshot, PERSISTENT_PREFAB};
pub use world::{Component, EntityHandle, EntityWorld, Prefab, PrefabTable, Presenter, Scene};

/// Arena size, in 8-byte blocks, used when nothing else is configured.
pub const DEFAULT_ARENA_BLOCKS: usize = 1024;
