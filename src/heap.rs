use std::ops::Range;

#[cfg(unix)]
use libc::{c_void, intptr_t, sbrk};

use crate::{
  block::{WSIZE, Word},
  error::HeapError,
};

/// Capacity of a [`MemHeap`] created with [`MemHeap::new`]: 20 MiB.
pub const MAX_HEAP: usize = 20 * (1 << 20);

/// A contiguous, only-growable byte region backing the allocator.
///
/// Offsets are relative to [`heap_low`](HeapRegion::heap_low), and the byte at
/// offset `0` must sit on a 16-byte boundary. Every accessor is bounds-checked
/// against the current top, so a corrupted header produces an
/// [`HeapError::OutOfBounds`] instead of a stray memory access.
pub trait HeapRegion {
  /// Extends the region by `extra` bytes and returns the previous top offset.
  ///
  /// On failure the region is left exactly as it was.
  fn grow(
    &mut self,
    extra: usize,
  ) -> Result<usize, HeapError>;

  /// Bytes currently inside the region.
  fn bytes(&self) -> &[u8];

  fn bytes_mut(&mut self) -> &mut [u8];

  fn len(&self) -> usize {
    self.bytes().len()
  }

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Offset of the first byte of the region.
  fn heap_low(&self) -> usize {
    0
  }

  /// Offset of the last byte of the region.
  fn heap_high(&self) -> usize {
    self.len().saturating_sub(1)
  }

  /// Validates `len` bytes starting at `offset`.
  fn range(
    &self,
    offset: usize,
    len: usize,
  ) -> Result<Range<usize>, HeapError> {
    match offset.checked_add(len) {
      Some(end) if end <= self.len() => Ok(offset..end),
      _ => Err(HeapError::OutOfBounds {
        offset,
        len,
        low: self.heap_low(),
        high: self.heap_high(),
      }),
    }
  }

  fn read_word(
    &self,
    offset: usize,
  ) -> Result<Word, HeapError> {
    let range = self.range(offset, WSIZE)?;
    let mut raw = [0u8; WSIZE];
    raw.copy_from_slice(&self.bytes()[range]);
    Ok(Word::from_ne_bytes(raw))
  }

  fn write_word(
    &mut self,
    offset: usize,
    word: Word,
  ) -> Result<(), HeapError> {
    let range = self.range(offset, WSIZE)?;
    self.bytes_mut()[range].copy_from_slice(&word.to_ne_bytes());
    Ok(())
  }

  /// Copies `len` bytes from `src` to `dst`; the ranges may overlap.
  fn copy_within(
    &mut self,
    src: usize,
    dst: usize,
    len: usize,
  ) -> Result<(), HeapError> {
    let from = self.range(src, len)?;
    self.range(dst, len)?;
    self.bytes_mut().copy_within(from, dst);
    Ok(())
  }

  fn fill(
    &mut self,
    offset: usize,
    len: usize,
    byte: u8,
  ) -> Result<(), HeapError> {
    let range = self.range(offset, len)?;
    self.bytes_mut()[range].fill(byte);
    Ok(())
  }
}

/// A simulated heap: one fixed buffer reserved up front with a movable break.
///
/// This is the region the allocator is tested against. Exhaustion is
/// deterministic, so failure paths can be driven on purpose.
pub struct MemHeap {
  buf: Box<[u8]>,
  brk: usize,
}

impl MemHeap {
  pub fn new() -> Self {
    Self::with_capacity(MAX_HEAP)
  }

  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      buf: vec![0u8; capacity].into_boxed_slice(),
      brk: 0,
    }
  }

  pub fn capacity(&self) -> usize {
    self.buf.len()
  }

  /// Bytes that can still be handed out by [`grow`](HeapRegion::grow).
  pub fn remaining(&self) -> usize {
    self.buf.len() - self.brk
  }
}

impl Default for MemHeap {
  fn default() -> Self {
    Self::new()
  }
}

impl HeapRegion for MemHeap {
  fn grow(
    &mut self,
    extra: usize,
  ) -> Result<usize, HeapError> {
    if extra > self.remaining() {
      return Err(HeapError::Exhausted {
        requested: extra,
        available: self.remaining(),
      });
    }

    let old_top = self.brk;
    self.brk += extra;
    Ok(old_top)
  }

  fn bytes(&self) -> &[u8] {
    &self.buf[..self.brk]
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    &mut self.buf[..self.brk]
  }
}

/// The process heap, grown with `sbrk(2)`.
///
/// The base is the program break at construction, padded up to a 16-byte
/// boundary. Growth fails with [`HeapError::NonContiguous`] if anything else
/// moved the break in the meantime, since the region must stay contiguous.
#[cfg(unix)]
pub struct SbrkHeap {
  base: *mut u8,
  len: usize,
}

#[cfg(unix)]
fn last_os_error() -> HeapError {
  HeapError::Os(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
}

#[cfg(unix)]
impl SbrkHeap {
  pub fn new() -> Result<Self, HeapError> {
    unsafe {
      let brk = sbrk(0);

      if brk == usize::MAX as *mut c_void {
        return Err(last_os_error());
      }

      let start = brk as usize;
      let pad = crate::align!(start) - start;

      if pad > 0 && sbrk(pad as intptr_t) == usize::MAX as *mut c_void {
        return Err(last_os_error());
      }

      Ok(Self {
        base: (start + pad) as *mut u8,
        len: 0,
      })
    }
  }

  /// Absolute address of offset `0`.
  pub fn base_address(&self) -> usize {
    self.base as usize
  }

  fn top(&self) -> usize {
    self.base as usize + self.len
  }
}

#[cfg(unix)]
impl HeapRegion for SbrkHeap {
  fn grow(
    &mut self,
    extra: usize,
  ) -> Result<usize, HeapError> {
    let increment = intptr_t::try_from(extra).map_err(|_| HeapError::Exhausted {
      requested: extra,
      available: 0,
    })?;

    unsafe {
      let current = sbrk(0) as usize;

      if current != self.top() {
        return Err(HeapError::NonContiguous {
          expected: self.top(),
          found: current,
        });
      }

      if sbrk(increment) == usize::MAX as *mut c_void {
        return Err(HeapError::Exhausted {
          requested: extra,
          available: 0,
        });
      }
    }

    let old_top = self.len;
    self.len += extra;
    Ok(old_top)
  }

  fn bytes(&self) -> &[u8] {
    if self.len == 0 {
      return &[];
    }
    // [base, base + len) was handed to this heap by sbrk and is never released.
    unsafe { std::slice::from_raw_parts(self.base, self.len) }
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    if self.len == 0 {
      return &mut [];
    }
    unsafe { std::slice::from_raw_parts_mut(self.base, self.len) }
  }
}
