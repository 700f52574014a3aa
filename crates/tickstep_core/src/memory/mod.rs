//! # Memory Management
//!
//! The block arena that holds all simulated state.
//!
//! ## Design Philosophy
//!
//! All state memory is allocated once at session start. During gameplay:
//! - No heap allocations for entity data
//! - The state is one flat byte image
//! - Copy, hash and transfer are `memcpy`-class operations

mod arena;

pub use arena::{Arena, BlockHeader, BlockRef, BLOCK_HEADER_SIZE, WORD_SIZE};
