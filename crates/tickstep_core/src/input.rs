//! # Input Records
//!
//! The per-player, per-tick input a game feeds into the simulation.
//!
//! Inputs travel over the wire as raw bytes, so they must be plain old data
//! with no padding surprises: `#[repr(C)]` and `bytemuck::Pod`.

use std::fmt::Debug;

use bytemuck::Pod;

/// A game-defined input record.
///
/// Implemented for every `Pod` type that is also comparable and printable.
///
/// # Example
///
/// ```rust
/// use bytemuck::{Pod, Zeroable};
///
/// #[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
/// #[repr(C)]
/// struct PadInput {
///     move_x: f32,
///     move_y: f32,
///     buttons: u32,
/// }
///
/// fn assert_input<I: tickstep_core::InputRecord>() {}
/// assert_input::<PadInput>();
/// ```
pub trait InputRecord: Pod + PartialEq + Debug + Send + Sync {}

impl<T> InputRecord for T where T: Pod + PartialEq + Debug + Send + Sync {}

/// The neutral input used for a player before their first message arrives.
#[inline]
#[must_use]
pub fn neutral_input<I: InputRecord>() -> I {
    <I as bytemuck::Zeroable>::zeroed()
}

/// Wire size of one input record.
#[inline]
#[must_use]
pub const fn input_size<I: InputRecord>() -> usize {
    std::mem::size_of::<I>()
}
