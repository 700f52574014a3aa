//! # Arena Allocator
//!
//! A fixed-size block allocator whose whole state lives in one byte buffer.
//!
//! ## Layout
//!
//! ```text
//! offset 0                                                    capacity
//! ├──────┬─────────┬──────┬───────────┬──────┬────────────────────┤
//! │ hdr  │ payload │ hdr  │ payload   │ 0000 │ virgin (all zero)  │
//! └──────┴─────────┴──────┴───────────┴──────┴────────────────────┘
//!  hdr = { size: i32 LE, in_use: u8, pad: [u8; 3] }
//! ```
//!
//! Blocks are gapless from offset 0. A header with `size == 0` marks the start
//! of virgin space. Because the buffer *is* the state, copying, hashing and
//! shipping it over the network are plain byte operations.
//!
//! Released blocks are only flagged; they are never merged, split or moved.

use crate::error::{CoreError, CoreResult};

/// Size in bytes of one block header.
pub const BLOCK_HEADER_SIZE: usize = 8;

/// Arena capacity is expressed in words of this many bytes.
pub const WORD_SIZE: usize = 8;

/// Offset of a block header inside its arena.
///
/// A `BlockRef` is only meaningful for the arena (or a byte-identical copy of
/// it) that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockRef(usize);

impl BlockRef {
    /// Block at the very start of the arena.
    pub const FIRST: Self = Self(0);

    /// Creates a reference from a header offset.
    #[inline]
    #[must_use]
    pub const fn from_offset(offset: usize) -> Self {
        Self(offset)
    }

    /// Creates a reference from the offset of the block's payload.
    #[inline]
    #[must_use]
    pub const fn from_payload_offset(offset: usize) -> Option<Self> {
        match offset.checked_sub(BLOCK_HEADER_SIZE) {
            Some(header) => Some(Self(header)),
            None => None,
        }
    }

    /// Offset of the header.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> usize {
        self.0
    }

    /// Offset of the first payload byte.
    #[inline]
    #[must_use]
    pub const fn payload_offset(self) -> usize {
        self.0 + BLOCK_HEADER_SIZE
    }
}

/// Decoded block header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockHeader {
    /// Payload size in bytes; 0 marks virgin space.
    pub size: i32,
    /// Whether the block is currently allocated.
    pub in_use: bool,
}

impl BlockHeader {
    /// Returns true if this header marks the start of never-used space.
    #[inline]
    #[must_use]
    pub const fn is_virgin(self) -> bool {
        self.size == 0
    }

    /// Payload length in bytes.
    #[inline]
    #[must_use]
    pub fn payload_len(self) -> usize {
        usize::try_from(self.size).unwrap_or(0)
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut size = [0u8; 4];
        size.copy_from_slice(&bytes[..4]);
        Self {
            size: i32::from_le_bytes(size),
            in_use: bytes[4] != 0,
        }
    }

    fn encode(self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.size.to_le_bytes());
        out[4] = u8::from(self.in_use);
        out[5..BLOCK_HEADER_SIZE].fill(0);
    }
}

/// Block allocator over a fixed, zero-initialized byte buffer.
///
/// `Clone` is a deep copy of the buffer.
///
/// # Example
///
/// ```rust
/// use tickstep_core::memory::Arena;
///
/// let mut arena = Arena::new(1024);
/// let block = arena.allocate(100).unwrap();
/// assert_eq!(arena.allocated_memory(), 108);
///
/// arena.release(block);
/// assert_eq!(arena.allocate(64).unwrap(), block);
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Arena {
    /// The whole state; headers and payloads inline.
    storage: Box<[u8]>,
}

impl Arena {
    /// Creates a zeroed arena of `blocks × 8` bytes.
    #[must_use]
    pub fn new(blocks: usize) -> Self {
        Self {
            storage: vec![0u8; blocks * WORD_SIZE].into_boxed_slice(),
        }
    }

    /// Creates an arena of `blocks × 8` bytes and loads a byte image into it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ImageTooLarge`] if the image does not fit.
    pub fn from_bytes(blocks: usize, data: &[u8]) -> CoreResult<Self> {
        let mut arena = Self::new(blocks);
        arena.load_bytes(data)?;
        Ok(arena)
    }

    /// Total capacity in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// The raw image, headers included.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.storage
    }

    /// Allocates a zeroed payload of at least `size` bytes.
    ///
    /// Scans first-fit from offset 0. A released block is reused when its
    /// payload is large enough; it keeps its original size.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfMemory`] if no block fits and
    /// [`CoreError::ZeroSizedAllocation`] for `size == 0`.
    pub fn allocate(&mut self, size: usize) -> CoreResult<BlockRef> {
        debug_assert!(size > 0, "zero-sized allocation");
        if size == 0 {
            return Err(CoreError::ZeroSizedAllocation);
        }

        let block = self.find_first_fit(size)?;
        let mut header = self.header(block);
        if header.is_virgin() {
            header.size = i32::try_from(size).map_err(|_| self.out_of_memory(size))?;
        }
        header.in_use = true;
        self.write_header(block, header);
        self.payload_mut(block).fill(0);
        Ok(block)
    }

    /// Allocates a block and copies `data` into its payload.
    ///
    /// # Errors
    ///
    /// Same as [`Arena::allocate`].
    pub fn allocate_bytes(&mut self, data: &[u8]) -> CoreResult<BlockRef> {
        let block = self.allocate(data.len())?;
        self.payload_mut(block)[..data.len()].copy_from_slice(data);
        Ok(block)
    }

    /// Marks a block as free. The payload is left as is.
    pub fn release(&mut self, block: BlockRef) {
        let mut header = self.header(block);
        debug_assert!(header.in_use, "double release of block at {}", block.0);
        header.in_use = false;
        self.write_header(block, header);
    }

    /// XOR fold of the full image as little-endian 64-bit words.
    ///
    /// Free and virgin space is included. Two equal bit flips at the same bit
    /// position of different words cancel out.
    #[must_use]
    pub fn checksum(&self) -> i64 {
        self.storage.chunks_exact(WORD_SIZE).fold(0i64, |acc, chunk| {
            let mut word = [0u8; WORD_SIZE];
            word.copy_from_slice(chunk);
            acc ^ i64::from_le_bytes(word)
        })
    }

    /// Byte-exact copy of another arena of the same capacity.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CapacityMismatch`] if capacities differ.
    pub fn copy_from(&mut self, other: &Self) -> CoreResult<()> {
        if other.capacity() != self.capacity() {
            return Err(CoreError::CapacityMismatch {
                expected: self.capacity(),
                actual: other.capacity(),
            });
        }
        self.storage.copy_from_slice(&other.storage);
        Ok(())
    }

    /// Overwrites the arena with a (possibly trimmed) image; the rest is zeroed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ImageTooLarge`] if the image does not fit.
    pub fn load_bytes(&mut self, data: &[u8]) -> CoreResult<()> {
        if data.len() > self.capacity() {
            return Err(CoreError::ImageTooLarge {
                len: data.len(),
                capacity: self.capacity(),
            });
        }
        self.storage[..data.len()].copy_from_slice(data);
        self.storage[data.len()..].fill(0);
        Ok(())
    }

    /// Copies the image out. A trimmed image stops after the last block.
    #[must_use]
    pub fn to_bytes(&self, trimmed: bool) -> Vec<u8> {
        let len = if trimmed {
            self.allocated_memory()
        } else {
            self.capacity()
        };
        self.storage[..len].to_vec()
    }

    /// High-water mark: offset of the first virgin header.
    ///
    /// Releasing blocks never lowers it.
    #[must_use]
    pub fn allocated_memory(&self) -> usize {
        let mut block = BlockRef::FIRST;
        while self.has_header(block) {
            let header = self.header(block);
            if header.is_virgin() {
                return block.0;
            }
            block = self.next(block);
        }
        self.capacity().min(block.0)
    }

    /// First block of the arena.
    #[inline]
    #[must_use]
    pub const fn first(&self) -> BlockRef {
        BlockRef::FIRST
    }

    /// Block directly after `block`, trusting its size field.
    ///
    /// The result may point at virgin space or at the end of the arena.
    #[inline]
    #[must_use]
    pub fn next(&self, block: BlockRef) -> BlockRef {
        BlockRef(block.payload_offset() + self.header(block).payload_len())
    }

    /// Next allocated block after `block`, or `None` at the end of the
    /// allocated region.
    #[must_use]
    pub fn next_in_use(&self, block: BlockRef) -> Option<BlockRef> {
        let mut current = block;
        loop {
            if self.header(current).is_virgin() {
                return None;
            }
            current = self.next(current);
            if !self.has_header(current) {
                return None;
            }
            let header = self.header(current);
            if header.is_virgin() {
                return None;
            }
            if header.in_use {
                return Some(current);
            }
        }
    }

    /// Decodes the header of `block`.
    #[inline]
    #[must_use]
    pub fn header(&self, block: BlockRef) -> BlockHeader {
        debug_assert!(self.has_header(block), "header out of bounds: {}", block.0);
        BlockHeader::decode(&self.storage[block.0..block.payload_offset()])
    }

    /// Payload bytes of `block`.
    #[inline]
    #[must_use]
    pub fn payload(&self, block: BlockRef) -> &[u8] {
        let start = block.payload_offset();
        &self.storage[start..start + self.header(block).payload_len()]
    }

    /// Mutable payload bytes of `block`.
    #[inline]
    pub fn payload_mut(&mut self, block: BlockRef) -> &mut [u8] {
        let start = block.payload_offset();
        let len = self.header(block).payload_len();
        &mut self.storage[start..start + len]
    }

    /// Reads a little-endian `i32` at an absolute offset.
    #[inline]
    #[must_use]
    pub fn read_i32(&self, offset: usize) -> i32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.storage[offset..offset + 4]);
        i32::from_le_bytes(bytes)
    }

    /// Writes a little-endian `i32` at an absolute offset.
    #[inline]
    pub fn write_i32(&mut self, offset: usize, value: i32) {
        self.storage[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    #[inline]
    fn has_header(&self, block: BlockRef) -> bool {
        block.payload_offset() <= self.capacity()
    }

    fn write_header(&mut self, block: BlockRef, header: BlockHeader) {
        header.encode(&mut self.storage[block.0..block.payload_offset()]);
    }

    fn find_first_fit(&self, size: usize) -> CoreResult<BlockRef> {
        let mut block = BlockRef::FIRST;
        while self.has_header(block) {
            let header = self.header(block);
            if header.is_virgin() {
                if block.payload_offset() + size <= self.capacity() {
                    return Ok(block);
                }
                break;
            }
            if !header.in_use && header.payload_len() >= size {
                return Ok(block);
            }
            block = self.next(block);
        }
        Err(self.out_of_memory(size))
    }

    fn out_of_memory(&self, requested: usize) -> CoreError {
        CoreError::OutOfMemory {
            requested,
            capacity: self.capacity(),
        }
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.capacity())
            .field("allocated", &self.allocated_memory())
            .field("checksum", &self.checksum())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_new_arena_is_zeroed() {
        let arena = Arena::new(1024);
        assert_eq!(arena.capacity(), 8192);
        assert_eq!(arena.allocated_memory(), 0);
        assert_eq!(arena.checksum(), 0);
    }

    #[test]
    fn test_allocation_high_water_mark() {
        let mut arena = Arena::new(1024);
        let block = arena.allocate(100).unwrap();
        assert_eq!(block, BlockRef::FIRST);
        assert_eq!(arena.allocated_memory(), 108);

        arena.release(block);
        assert_eq!(arena.allocated_memory(), 108);

        let reused = arena.allocate(100).unwrap();
        assert_eq!(reused, block);
        assert_eq!(arena.allocated_memory(), 108);
    }

    #[test]
    fn test_reuse_keeps_block_size() {
        let mut arena = Arena::new(64);
        let a = arena.allocate(40).unwrap();
        let b = arena.allocate(16).unwrap();
        arena.release(a);

        let reused = arena.allocate(8).unwrap();
        assert_eq!(reused, a);
        assert_eq!(arena.header(reused).size, 40);
        assert_eq!(arena.next(reused), b);
        assert_eq!(arena.next_in_use(reused), Some(b));
    }

    #[test]
    fn test_too_small_free_block_is_skipped() {
        let mut arena = Arena::new(64);
        let a = arena.allocate(8).unwrap();
        let _b = arena.allocate(8).unwrap();
        arena.release(a);

        let c = arena.allocate(24).unwrap();
        assert_ne!(c, a);
        assert_eq!(c.offset(), 32);
    }

    #[test]
    fn test_allocation_zeroes_reused_payload() {
        let mut arena = Arena::new(16);
        let block = arena.allocate_bytes(&[7, 7, 7, 7]).unwrap();
        arena.release(block);
        let block = arena.allocate(4).unwrap();
        assert_eq!(arena.payload(block), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_out_of_memory() {
        let mut arena = Arena::new(4);
        assert!(arena.allocate(24).is_ok());
        assert_eq!(
            arena.allocate(1),
            Err(CoreError::OutOfMemory {
                requested: 1,
                capacity: 32
            })
        );
    }

    #[test]
    fn test_exact_fill() {
        let mut arena = Arena::new(4);
        let block = arena.allocate(24).unwrap();
        assert_eq!(arena.allocated_memory(), 32);
        assert_eq!(arena.next_in_use(block), None);
    }

    #[test]
    fn test_next_in_use_skips_free_blocks() {
        let mut arena = Arena::new(64);
        let a = arena.allocate(4).unwrap();
        let b = arena.allocate(4).unwrap();
        let c = arena.allocate(4).unwrap();
        arena.release(b);

        assert_eq!(arena.next_in_use(a), Some(c));
        assert_eq!(arena.next_in_use(c), None);
    }

    #[test]
    fn test_checksum_is_xor_of_words() {
        let mut arena = Arena::new(4);
        let block = arena.allocate(8).unwrap();
        arena.payload_mut(block).copy_from_slice(&5i64.to_le_bytes());
        // Header word: size 8, in_use 1.
        let header = 8i64 | (1i64 << 32);
        assert_eq!(arena.checksum(), header ^ 5);
    }

    #[test]
    fn test_checksum_blind_spot() {
        let mut arena = Arena::new(4);
        let before = arena.checksum();
        arena.write_i32(0, 1);
        arena.write_i32(8, 1);
        assert_eq!(arena.checksum(), before);
    }

    #[test]
    fn test_copy_from_requires_same_capacity() {
        let mut a = Arena::new(8);
        let b = Arena::new(16);
        assert_eq!(
            a.copy_from(&b),
            Err(CoreError::CapacityMismatch {
                expected: 64,
                actual: 128
            })
        );
    }

    #[test]
    fn test_trimmed_image_round_trip() {
        let mut arena = Arena::new(32);
        arena.allocate_bytes(&[1, 2, 3]).unwrap();
        arena.allocate_bytes(&[4, 5, 6, 7, 8]).unwrap();

        let trimmed = arena.to_bytes(true);
        assert_eq!(trimmed.len(), 24);
        assert_eq!(arena.to_bytes(false).len(), 256);

        let restored = Arena::from_bytes(32, &trimmed).unwrap();
        assert_eq!(restored, arena);
    }

    #[test]
    fn test_load_bytes_zeroes_tail() {
        let mut arena = Arena::new(8);
        arena.allocate_bytes(&[9; 40]).unwrap();
        arena.load_bytes(&[]).unwrap();
        assert_eq!(arena.checksum(), 0);
        assert_eq!(arena.allocated_memory(), 0);
    }

    #[test]
    fn test_load_bytes_too_large() {
        let mut arena = Arena::new(1);
        assert_eq!(
            arena.load_bytes(&[0; 9]),
            Err(CoreError::ImageTooLarge {
                len: 9,
                capacity: 8
            })
        );
    }

    #[derive(Clone, Debug)]
    enum Op {
        Allocate(usize),
        Release(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1usize..64).prop_map(Op::Allocate),
            (0usize..16).prop_map(Op::Release),
        ]
    }

    proptest! {
        #[test]
        fn prop_image_round_trip(ops in prop::collection::vec(op(), 0..64)) {
            let mut arena = Arena::new(256);
            let mut live = Vec::new();
            for op in ops {
                match op {
                    Op::Allocate(size) => {
                        if let Ok(block) = arena.allocate(size) {
                            let fill = u8::try_from(size).unwrap();
                            arena.payload_mut(block)[..size].fill(fill);
                            live.push(block);
                        }
                    }
                    Op::Release(index) if !live.is_empty() => {
                        let block = live.remove(index % live.len());
                        arena.release(block);
                    }
                    Op::Release(_) => {}
                }
            }

            let full = Arena::from_bytes(256, &arena.to_bytes(false)).unwrap();
            prop_assert_eq!(full.checksum(), arena.checksum());
            let trimmed = Arena::from_bytes(256, &arena.to_bytes(true)).unwrap();
            prop_assert_eq!(trimmed.checksum(), arena.checksum());
        }

        #[test]
        fn prop_first_fit_reuse(first in 1usize..128, second in 1usize..128) {
            let (large, small) = if first >= second { (first, second) } else { (second, first) };
            let mut arena = Arena::new(128);
            let block = arena.allocate(large).unwrap();
            let mark = arena.allocated_memory();
            arena.release(block);

            prop_assert_eq!(arena.allocate(small).unwrap(), block);
            prop_assert_eq!(arena.allocated_memory(), mark);
        }
    }
}
