//! # Snapshot
//!
//! One arena holding a complete simulation state.
//!
//! ```text
//! ┌────────────┬──────────────────────────┬──────────────────────────┬───
//! │ tick block │ record: id|prefab|state  │ record: id|prefab|state  │ ...
//! └────────────┴──────────────────────────┴──────────────────────────┴───
//! ```
//!
//! The first block always holds the tick counter. Every other block is an
//! entity record. An entity's id is the payload offset of its record, so two
//! participants that allocate in the same order agree on every id.

use crate::error::{CoreError, CoreResult};
use crate::memory::{Arena, BlockRef};

/// Bytes reserved for the tick counter.
pub const TICK_SIZE: usize = 4;

/// Bytes of the `{entity_id, prefab_id}` record header.
pub const RECORD_HEADER_SIZE: usize = 8;

/// Prefab id stored for entities registered with the world, not spawned.
pub const PERSISTENT_PREFAB: i32 = -1;

/// Block holding the tick counter.
const TICK_BLOCK: BlockRef = BlockRef::FIRST;

/// Identifier of an entity record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub i32);

impl EntityId {
    /// Block holding this entity's record.
    #[must_use]
    pub fn block(self) -> Option<BlockRef> {
        usize::try_from(self.0)
            .ok()
            .and_then(BlockRef::from_payload_offset)
    }

    fn from_block(block: BlockRef) -> CoreResult<Self> {
        i32::try_from(block.payload_offset())
            .map(Self)
            .map_err(|_| CoreError::NotAnEntity(-1))
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Position of an entity record during a walk over a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityCursor {
    /// Block holding the record.
    pub block: BlockRef,
    /// Entity id stored in the record.
    pub entity: EntityId,
    /// Prefab id stored in the record.
    pub prefab_id: i32,
}

impl EntityCursor {
    /// Returns true for entities registered with the world.
    #[inline]
    #[must_use]
    pub const fn is_persistent(&self) -> bool {
        self.prefab_id == PERSISTENT_PREFAB
    }
}

/// A complete simulation state: tick counter plus entity records.
///
/// `Clone` is a deep copy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    /// Backing arena.
    arena: Arena,
}

impl Snapshot {
    /// Creates an empty snapshot at tick 0.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfMemory`] if the arena cannot hold the tick.
    pub fn new(blocks: usize) -> CoreResult<Self> {
        let mut arena = Arena::new(blocks);
        arena.allocate(TICK_SIZE)?;
        Ok(Self { arena })
    }

    /// Wraps an arena whose first block is the tick counter.
    #[must_use]
    pub fn from_arena(arena: Arena) -> Self {
        debug_assert_eq!(arena.header(TICK_BLOCK).payload_len(), TICK_SIZE);
        Self { arena }
    }

    /// The backing arena.
    #[inline]
    #[must_use]
    pub const fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Current tick.
    #[inline]
    #[must_use]
    pub fn tick(&self) -> i32 {
        self.arena.read_i32(TICK_BLOCK.payload_offset())
    }

    /// Overwrites the tick counter.
    #[inline]
    pub fn set_tick(&mut self, tick: i32) {
        self.arena.write_i32(TICK_BLOCK.payload_offset(), tick);
    }

    /// Checksum of the whole image.
    #[inline]
    #[must_use]
    pub fn checksum(&self) -> i64 {
        self.arena.checksum()
    }

    /// Byte-exact copy of another snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CapacityMismatch`] if capacities differ.
    pub fn copy_from(&mut self, other: &Self) -> CoreResult<()> {
        self.arena.copy_from(&other.arena)
    }

    /// Copies the image out; see [`Arena::to_bytes`].
    #[must_use]
    pub fn to_bytes(&self, trimmed: bool) -> Vec<u8> {
        self.arena.to_bytes(trimmed)
    }

    /// Replaces the state with a byte image received from another participant.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ImageTooLarge`] if the image does not fit.
    pub fn load_bytes(&mut self, data: &[u8]) -> CoreResult<()> {
        self.arena.load_bytes(data)
    }

    /// Allocates an entity record with `state_size` bytes of component state.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfMemory`] if the arena is full.
    pub fn allocate_record(&mut self, state_size: usize, prefab_id: i32) -> CoreResult<EntityId> {
        let block = self.arena.allocate(RECORD_HEADER_SIZE + state_size)?;
        let entity = EntityId::from_block(block)?;
        let offset = block.payload_offset();
        self.arena.write_i32(offset, entity.0);
        self.arena.write_i32(offset + 4, prefab_id);
        Ok(entity)
    }

    /// Frees an entity record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotAnEntity`] if `entity` is not a live record.
    pub fn release_record(&mut self, entity: EntityId) -> CoreResult<()> {
        let block = self.live_block(entity)?;
        self.arena.release(block);
        Ok(())
    }

    /// Returns true if `entity` names a live record.
    #[must_use]
    pub fn contains(&self, entity: EntityId) -> bool {
        self.live_block(entity).is_ok()
    }

    /// Prefab id stored in a live record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotAnEntity`] if `entity` is not a live record.
    pub fn prefab_of(&self, entity: EntityId) -> CoreResult<i32> {
        let block = self.live_block(entity)?;
        Ok(self.arena.read_i32(block.payload_offset() + 4))
    }

    /// Next live record after `current`, or the first record for `None`.
    #[must_use]
    pub fn next_entity(&self, current: Option<BlockRef>) -> Option<EntityCursor> {
        let block = self.arena.next_in_use(current.unwrap_or(TICK_BLOCK))?;
        let offset = block.payload_offset();
        Some(EntityCursor {
            block,
            entity: EntityId(self.arena.read_i32(offset)),
            prefab_id: self.arena.read_i32(offset + 4),
        })
    }

    /// Walks all live records in arena order.
    pub fn entities(&self) -> impl Iterator<Item = EntityCursor> + '_ {
        std::iter::successors(self.next_entity(None), |cursor| {
            self.next_entity(Some(cursor.block))
        })
    }

    /// Component state of a live record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotAnEntity`] if `entity` is not a live record.
    pub fn record_state(&self, entity: EntityId) -> CoreResult<&[u8]> {
        let block = self.live_block(entity)?;
        Ok(&self.arena.payload(block)[RECORD_HEADER_SIZE..])
    }

    /// Mutable component state of a live record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotAnEntity`] if `entity` is not a live record.
    pub fn record_state_mut(&mut self, entity: EntityId) -> CoreResult<&mut [u8]> {
        let block = self.live_block(entity)?;
        Ok(&mut self.arena.payload_mut(block)[RECORD_HEADER_SIZE..])
    }

    fn live_block(&self, entity: EntityId) -> CoreResult<BlockRef> {
        let not_an_entity = CoreError::NotAnEntity(entity.0);
        let block = entity.block().ok_or(not_an_entity.clone())?;
        if block == TICK_BLOCK || block.payload_offset() + RECORD_HEADER_SIZE > self.arena.capacity() {
            return Err(not_an_entity);
        }
        let header = self.arena.header(block);
        if !header.in_use
            || header.payload_len() < RECORD_HEADER_SIZE
            || block.payload_offset().saturating_add(header.payload_len()) > self.arena.capacity()
            || self.arena.read_i32(block.payload_offset()) != entity.0
        {
            return Err(not_an_entity);
        }
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_snapshot_reserves_tick() {
        let snapshot = Snapshot::new(64).unwrap();
        assert_eq!(snapshot.tick(), 0);
        assert_eq!(snapshot.arena().allocated_memory(), 12);
        assert!(snapshot.next_entity(None).is_none());
    }

    #[test]
    fn test_tick_round_trip() {
        let mut snapshot = Snapshot::new(64).unwrap();
        snapshot.set_tick(42);
        assert_eq!(snapshot.tick(), 42);
    }

    #[test]
    fn test_entity_id_is_payload_offset() {
        let mut snapshot = Snapshot::new(64).unwrap();
        let a = snapshot.allocate_record(4, PERSISTENT_PREFAB).unwrap();
        let b = snapshot.allocate_record(8, 3).unwrap();
        assert_eq!(a, EntityId(20));
        assert_eq!(b, EntityId(40));

        let cursors: Vec<_> = snapshot.entities().collect();
        assert_eq!(cursors.len(), 2);
        assert!(cursors[0].is_persistent());
        assert_eq!(cursors[1].entity, b);
        assert_eq!(cursors[1].prefab_id, 3);
    }

    #[test]
    fn test_release_skips_record_in_walk() {
        let mut snapshot = Snapshot::new(64).unwrap();
        let a = snapshot.allocate_record(4, 0).unwrap();
        let b = snapshot.allocate_record(4, 0).unwrap();
        snapshot.release_record(a).unwrap();

        let ids: Vec<_> = snapshot.entities().map(|cursor| cursor.entity).collect();
        assert_eq!(ids, vec![b]);
        assert!(!snapshot.contains(a));
        assert_eq!(snapshot.release_record(a), Err(CoreError::NotAnEntity(a.0)));
    }

    #[test]
    fn test_record_state_is_zeroed_and_writable() {
        let mut snapshot = Snapshot::new(64).unwrap();
        let entity = snapshot.allocate_record(4, 1).unwrap();
        assert_eq!(snapshot.record_state(entity).unwrap(), &[0, 0, 0, 0]);

        snapshot.record_state_mut(entity).unwrap()[0] = 9;
        assert_eq!(snapshot.record_state(entity).unwrap()[0], 9);
        assert_eq!(snapshot.prefab_of(entity).unwrap(), 1);
    }

    #[test]
    fn test_bogus_ids_are_rejected() {
        let snapshot = Snapshot::new(64).unwrap();
        assert!(!snapshot.contains(EntityId(-4)));
        assert!(!snapshot.contains(EntityId(8)));
        assert!(!snapshot.contains(EntityId(100_000)));
    }

    #[test]
    fn test_header_forged_inside_state_is_rejected() {
        let mut snapshot = Snapshot::new(64).unwrap();
        let entity = snapshot.allocate_record(16, 1).unwrap();
        let forged_id = entity.0 + 16;

        // In-use header claiming a payload far past the arena, then the id.
        let state = snapshot.record_state_mut(entity).unwrap();
        state[..4].copy_from_slice(&10_000i32.to_le_bytes());
        state[4] = 1;
        state[8..12].copy_from_slice(&forged_id.to_le_bytes());

        let forged = EntityId(forged_id);
        assert!(!snapshot.contains(forged));
        assert_eq!(snapshot.record_state(forged), Err(CoreError::NotAnEntity(forged_id)));
    }

    #[test]
    fn test_trimmed_transfer_preserves_checksum() {
        let mut host = Snapshot::new(128).unwrap();
        host.allocate_record(12, PERSISTENT_PREFAB).unwrap();
        let spawned = host.allocate_record(16, 2).unwrap();
        host.record_state_mut(spawned).unwrap().fill(0xAB);
        host.set_tick(77);

        let mut client = Snapshot::new(128).unwrap();
        client.allocate_record(12, PERSISTENT_PREFAB).unwrap();
        client.load_bytes(&host.to_bytes(true)).unwrap();

        assert_eq!(client.tick(), 77);
        assert_eq!(client.checksum(), host.checksum());
        assert_eq!(client, host);
    }
}
