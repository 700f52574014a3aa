//! # Byte Cursors
//!
//! Little-endian writer and reader for wire messages.
//!
//! ## Design
//!
//! - Fixed-width fields, no padding, no varints
//! - Pod records are copied as raw bytes
//! - Reads never run past the end: a short payload is an error, not garbage

use bytemuck::{bytes_of, Pod};

use crate::error::{NetError, NetResult};

/// Appends fields to a growable buffer.
///
/// Reuse one writer across messages with [`ByteWriter::reset`] to keep the
/// allocation.
#[derive(Clone, Debug, Default)]
pub struct ByteWriter {
    buffer: Vec<u8>,
}

impl ByteWriter {
    /// Creates an empty writer.
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Creates a writer with room for `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Clears the written bytes, keeping the allocation.
    #[inline]
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Returns the number of bytes written.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if no bytes have been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns a slice of the written data.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Takes the written data.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Writes a single byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Writes a bool as one byte.
    #[inline]
    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    /// Writes an i32 in little-endian format.
    #[inline]
    pub fn write_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes an i64 in little-endian format.
    #[inline]
    pub fn write_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes an f32 in little-endian format.
    #[inline]
    pub fn write_f32(&mut self, value: f32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes raw bytes.
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Writes a Pod type directly.
    #[inline]
    pub fn write_pod<T: Pod>(&mut self, value: &T) {
        self.buffer.extend_from_slice(bytes_of(value));
    }
}

/// Reads fields from a received payload.
pub struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    /// Creates a reader over `data`.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Returns the number of unread bytes.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Returns the next byte without consuming it.
    #[inline]
    #[must_use]
    pub fn peek_u8(&self) -> Option<u8> {
        self.data.get(self.position).copied()
    }

    /// Reads a single byte.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Malformed`] at the end of the payload.
    #[inline]
    pub fn read_u8(&mut self) -> NetResult<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a bool written by [`ByteWriter::write_bool`].
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Malformed`] at the end of the payload.
    #[inline]
    pub fn read_bool(&mut self) -> NetResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a little-endian i32.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Malformed`] if fewer than 4 bytes remain.
    #[inline]
    pub fn read_i32(&mut self) -> NetResult<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    /// Reads a little-endian i64.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Malformed`] if fewer than 8 bytes remain.
    #[inline]
    pub fn read_i64(&mut self) -> NetResult<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    /// Reads a little-endian f32.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Malformed`] if fewer than 4 bytes remain.
    #[inline]
    pub fn read_f32(&mut self) -> NetResult<f32> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    /// Reads `len` raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Malformed`] if fewer than `len` bytes remain.
    #[inline]
    pub fn read_bytes(&mut self, len: usize) -> NetResult<&'a [u8]> {
        self.take(len)
    }

    /// Reads a Pod type directly.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Malformed`] if the payload is too short.
    #[inline]
    pub fn read_pod<T: Pod>(&mut self) -> NetResult<T> {
        let bytes = self.take(std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    fn read_array<const N: usize>(&mut self) -> NetResult<[u8; N]> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    fn take(&mut self, len: usize) -> NetResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(NetError::Malformed {
                expected: len,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(bytes)
    }
}
