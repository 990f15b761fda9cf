use std::mem;

use crate::{error::HeapError, heap::HeapRegion};

/// A header, footer or free-list link word.
pub type Word = u64;

/// Word and header size in bytes.
pub const WSIZE: usize = mem::size_of::<Word>();
/// Double word size; also the payload alignment.
pub const DSIZE: usize = 2 * WSIZE;
pub const ALIGNMENT: usize = DSIZE;
/// Header, two free-list links and a footer.
pub const MIN_BLOCK_SIZE: usize = 2 * DSIZE;

const ALLOC_BIT: Word = 0b01;
const PREV_ALLOC_BIT: Word = 0b10;
const SIZE_MASK: Word = !0xF;

/// A packed header or footer word.
///
/// ```text
///   63                                 4   3   2   1   0
///   ┌────────────────────────────────────┬───┬───┬───┬───┐
///   │          block size (x16)          │ 0 │ 0 │ p │ a │
///   └────────────────────────────────────┴───┴───┴───┴───┘
///                        a = allocated, p = previous block allocated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tag(pub(crate) Word);

impl Tag {
  pub(crate) fn pack(
    size: usize,
    allocated: bool,
    prev_allocated: bool,
  ) -> Self {
    let mut word = size as Word & SIZE_MASK;
    if allocated {
      word |= ALLOC_BIT;
    }
    if prev_allocated {
      word |= PREV_ALLOC_BIT;
    }
    Self(word)
  }

  pub(crate) fn size(self) -> usize {
    (self.0 & SIZE_MASK) as usize
  }

  pub(crate) fn is_allocated(self) -> bool {
    self.0 & ALLOC_BIT != 0
  }

  pub(crate) fn prev_allocated(self) -> bool {
    self.0 & PREV_ALLOC_BIT != 0
  }

  /// Whether two tags agree on size and allocated state, the fields a footer
  /// duplicates.
  pub(crate) fn matches(
    self,
    other: Tag,
  ) -> bool {
    (self.0 | PREV_ALLOC_BIT) == (other.0 | PREV_ALLOC_BIT)
  }
}

/// A payload handle returned to callers: the heap offset of the first payload byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Payload(pub(crate) usize);

impl Payload {
  pub fn offset(self) -> usize {
    self.0
  }
}

/// A block, named by the heap offset of its header.
///
/// ```text
///   Allocated:  ┌────────┬──────────────────────────────────┐
///               │ header │ payload                          │
///               └────────┴──────────────────────────────────┘
///
///   Free:       ┌────────┬───────────┬───────────┬─────┬────────┐
///               │ header │ prev_free │ next_free │ ... │ footer │
///               └────────┴───────────┴───────────┴─────┴────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block(pub(crate) usize);

impl Block {
  pub(crate) fn from_payload(payload: Payload) -> Option<Self> {
    payload.0.checked_sub(WSIZE).map(Block)
  }

  pub(crate) fn offset(self) -> usize {
    self.0
  }

  pub(crate) fn payload(self) -> Payload {
    Payload(self.0 + WSIZE)
  }

  pub(crate) fn header<H: HeapRegion>(
    self,
    heap: &H,
  ) -> Result<Tag, HeapError> {
    heap.read_word(self.0).map(Tag)
  }

  pub(crate) fn size<H: HeapRegion>(
    self,
    heap: &H,
  ) -> Result<usize, HeapError> {
    self.header(heap).map(Tag::size)
  }

  /// Footer of a free block of `size` bytes.
  pub(crate) fn footer<H: HeapRegion>(
    self,
    heap: &H,
    size: usize,
  ) -> Result<Tag, HeapError> {
    heap.read_word(self.footer_offset(size)).map(Tag)
  }

  fn footer_offset(
    self,
    size: usize,
  ) -> usize {
    (self.0 + size).saturating_sub(WSIZE)
  }

  /// The block physically after this one.
  pub(crate) fn next(
    self,
    size: usize,
  ) -> Block {
    Block(self.0 + size)
  }

  /// Footer of the physically previous block: the word in front of the header.
  ///
  /// Only meaningful when the previous block is free.
  pub(crate) fn prev_footer<H: HeapRegion>(
    self,
    heap: &H,
  ) -> Result<Tag, HeapError> {
    let offset = self.0.checked_sub(WSIZE).ok_or(HeapError::OutOfBounds {
      offset: self.0,
      len: WSIZE,
      low: heap.heap_low(),
      high: heap.heap_high(),
    })?;
    heap.read_word(offset).map(Tag)
  }

  pub(crate) fn write_allocated<H: HeapRegion>(
    self,
    heap: &mut H,
    size: usize,
    prev_allocated: bool,
  ) -> Result<(), HeapError> {
    heap.write_word(self.0, Tag::pack(size, true, prev_allocated).0)
  }

  /// Writes matching header and footer for a free block.
  pub(crate) fn write_free<H: HeapRegion>(
    self,
    heap: &mut H,
    size: usize,
    prev_allocated: bool,
  ) -> Result<(), HeapError> {
    let tag = Tag::pack(size, false, prev_allocated);
    heap.range(self.0, size)?;
    heap.write_word(self.0, tag.0)?;
    heap.write_word(self.footer_offset(size), tag.0)
  }

  /// Rewrites the previous-allocated bit, keeping the footer in step for free
  /// blocks.
  pub(crate) fn set_prev_allocated<H: HeapRegion>(
    self,
    heap: &mut H,
    prev_allocated: bool,
  ) -> Result<(), HeapError> {
    let tag = self.header(heap)?;
    let updated = Tag::pack(tag.size(), tag.is_allocated(), prev_allocated);
    heap.write_word(self.0, updated.0)?;
    if !tag.is_allocated() && tag.size() > 0 {
      heap.write_word(self.footer_offset(tag.size()), updated.0)?;
    }
    Ok(())
  }
}
