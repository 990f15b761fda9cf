use crate::{
  align::checked_align,
  block::{ALIGNMENT, Block, MIN_BLOCK_SIZE, Payload, Tag, WSIZE},
  config::AllocatorConfig,
  error::AllocError,
  free_list::FreeList,
  heap::HeapRegion,
};

/// Offsets of the fixed heap prefix.
///
/// ```text
///   0        8        16         24         32       40
///   ┌────────┬────────┬──────────┬──────────┬────────┬──────────┬─────┬──────────┐
///   │prologue│  root  │root.prev │root.next │  root  │ block 0  │ ... │ epilogue │
///   │  0/a   │  0/a   │          │          │ footer │  header  │     │   0/a    │
///   └────────┴────────┴──────────┴──────────┴────────┴──────────┴─────┴──────────┘
/// ```
const PROLOGUE: usize = 0;
pub(crate) const ROOT: Block = Block(WSIZE);
const ROOT_FOOTER: usize = 4 * WSIZE;
pub(crate) const FIRST_BLOCK: Block = Block(5 * WSIZE);
const INIT_SIZE: usize = 6 * WSIZE;

/// Explicit free-list allocator over a [`HeapRegion`].
///
/// The allocator owns its region; [`into_heap`](Allocator::into_heap) hands it
/// back. It is single-threaded: callers sharing one across threads must wrap
/// every operation in their own lock.
pub struct Allocator<H: HeapRegion> {
  pub(crate) heap: H,
  pub(crate) free_list: FreeList,
  config: AllocatorConfig,
}

/// Block size needed for a `size`-byte payload: header plus payload, rounded
/// up to the alignment, never below the minimum block size.
pub(crate) fn adjusted_size(size: usize) -> Result<usize, AllocError> {
  size
    .checked_add(WSIZE)
    .and_then(checked_align)
    .map(|asize| asize.max(MIN_BLOCK_SIZE))
    .ok_or(AllocError::RequestTooLarge { size })
}

impl<H: HeapRegion> Allocator<H> {
  pub fn new(heap: H) -> Result<Self, AllocError> {
    Self::with_config(heap, AllocatorConfig::default())
  }

  /// Lays out the prologue, the free-list root and the epilogue in an empty
  /// region, then extends it by one chunk.
  pub fn with_config(
    mut heap: H,
    config: AllocatorConfig,
  ) -> Result<Self, AllocError> {
    config.validate()?;

    if !heap.is_empty() {
      return Err(AllocError::HeapNotEmpty { len: heap.len() });
    }

    heap
      .grow(INIT_SIZE)
      .map_err(|source| AllocError::OutOfMemory {
        requested: INIT_SIZE,
        source,
      })?;

    let sentinel = Tag::pack(0, true, true).0;
    heap.write_word(PROLOGUE, sentinel)?;
    heap.write_word(ROOT.offset(), sentinel)?;
    heap.write_word(ROOT_FOOTER, sentinel)?;
    heap.write_word(FIRST_BLOCK.offset(), sentinel)?;

    let mut free_list = FreeList::new(ROOT);
    free_list.init(&mut heap)?;

    let mut allocator = Self {
      heap,
      free_list,
      config,
    };
    allocator.extend_heap(config.chunk_size)?;

    log::debug!(
      "allocator ready: {} bytes, chunk size {}",
      allocator.heap.len(),
      config.chunk_size
    );
    allocator.after_op("init");
    Ok(allocator)
  }

  /// Allocates a block whose payload holds at least `size` bytes.
  ///
  /// A zero-sized request is not an error and returns `Ok(None)`. If the heap
  /// cannot grow, the error is returned and nothing has changed.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<Option<Payload>, AllocError> {
    let result = self.allocate_block(size);
    self.after_op("allocate");
    result
  }

  /// Frees a payload returned by this allocator.
  ///
  /// Handles that cannot name an allocated block are rejected. The check is
  /// not exhaustive: a handle into the middle of a live payload is still a
  /// caller bug.
  pub fn free(
    &mut self,
    payload: Payload,
  ) -> Result<(), AllocError> {
    let result = self.free_block(payload);
    self.after_op("free");
    result
  }

  /// Moves a payload into a fresh block of `new_size` bytes.
  ///
  /// `None` behaves as [`allocate`](Allocator::allocate); a `new_size` of zero
  /// frees and returns `Ok(None)`. If the new block cannot be obtained the
  /// original is left as it was.
  pub fn reallocate(
    &mut self,
    payload: Option<Payload>,
    new_size: usize,
  ) -> Result<Option<Payload>, AllocError> {
    let result = self.reallocate_block(payload, new_size);
    self.after_op("reallocate");
    result
  }

  /// Allocates `count * elem_size` zeroed bytes.
  pub fn zero_allocate(
    &mut self,
    count: usize,
    elem_size: usize,
  ) -> Result<Option<Payload>, AllocError> {
    let result = self.zero_allocate_block(count, elem_size);
    self.after_op("zero_allocate");
    result
  }

  /// Usable bytes of an allocated payload; at least the requested size.
  pub fn payload_size(
    &self,
    payload: Payload,
  ) -> Result<usize, AllocError> {
    let block = self.allocated_block(payload)?;
    Ok(block.size(&self.heap)? - WSIZE)
  }

  pub fn payload(
    &self,
    payload: Payload,
  ) -> Result<&[u8], AllocError> {
    let len = self.payload_size(payload)?;
    let range = self.heap.range(payload.offset(), len)?;
    Ok(&self.heap.bytes()[range])
  }

  pub fn payload_mut(
    &mut self,
    payload: Payload,
  ) -> Result<&mut [u8], AllocError> {
    let len = self.payload_size(payload)?;
    let range = self.heap.range(payload.offset(), len)?;
    Ok(&mut self.heap.bytes_mut()[range])
  }

  pub fn heap(&self) -> &H {
    &self.heap
  }

  pub fn config(&self) -> &AllocatorConfig {
    &self.config
  }

  /// Running count of blocks on the free list.
  pub fn free_list_len(&self) -> usize {
    self.free_list.len()
  }

  /// Tears the allocator down and returns its region.
  pub fn into_heap(self) -> H {
    self.heap
  }

  pub(crate) fn epilogue(&self) -> Block {
    Block(self.heap.len().saturating_sub(WSIZE))
  }

  fn allocate_block(
    &mut self,
    size: usize,
  ) -> Result<Option<Payload>, AllocError> {
    if size == 0 {
      return Ok(None);
    }

    let asize = adjusted_size(size)?;

    let block = match self.free_list.find_fit(&self.heap, asize)? {
      Some(block) => block,
      None => self.extend_heap(asize.max(self.config.chunk_size))?,
    };

    self.place(block, asize)?;

    log::debug!(
      "allocate {} bytes: block {:#x}, {} bytes",
      size,
      block.offset(),
      asize
    );
    Ok(Some(block.payload()))
  }

  fn free_block(
    &mut self,
    payload: Payload,
  ) -> Result<(), AllocError> {
    let block = self.allocated_block(payload)?;
    let tag = block.header(&self.heap)?;

    block.write_free(&mut self.heap, tag.size(), tag.prev_allocated())?;
    block
      .next(tag.size())
      .set_prev_allocated(&mut self.heap, false)?;

    log::debug!("free block {:#x}, {} bytes", block.offset(), tag.size());
    self.coalesce(block)?;
    Ok(())
  }

  fn reallocate_block(
    &mut self,
    payload: Option<Payload>,
    new_size: usize,
  ) -> Result<Option<Payload>, AllocError> {
    let Some(old) = payload else {
      return self.allocate_block(new_size);
    };

    if new_size == 0 {
      self.free_block(old)?;
      return Ok(None);
    }

    self.allocated_block(old)?;

    let Some(new) = self.allocate_block(new_size)? else {
      return Ok(None);
    };

    let old_size = self.payload_size(old)?;
    let copy_size = new_size.min(old_size);
    self.heap.copy_within(old.offset(), new.offset(), copy_size)?;
    self.free_block(old)?;

    log::debug!(
      "reallocate {:#x} -> {:#x}, copied {} bytes",
      old.offset(),
      new.offset(),
      copy_size
    );
    Ok(Some(new))
  }

  fn zero_allocate_block(
    &mut self,
    count: usize,
    elem_size: usize,
  ) -> Result<Option<Payload>, AllocError> {
    let Some(size) = count.checked_mul(elem_size) else {
      log::warn!("zero_allocate: {count} x {elem_size} bytes overflows");
      return Err(AllocError::SizeOverflow { count, elem_size });
    };

    let Some(payload) = self.allocate_block(size)? else {
      return Ok(None);
    };

    let len = self.payload_size(payload)?;
    self.heap.fill(payload.offset(), len, 0)?;
    Ok(Some(payload))
  }

  /// Grows the region by `size` bytes (rounded to the alignment) and returns
  /// the new free block, already merged with a free predecessor.
  ///
  /// The new block starts on the old epilogue; a fresh epilogue is written at
  /// the new top.
  fn extend_heap(
    &mut self,
    size: usize,
  ) -> Result<Block, AllocError> {
    let size = checked_align(size).ok_or(AllocError::RequestTooLarge { size })?;

    let old_top = self.heap.grow(size).map_err(|source| {
      log::warn!("heap extension by {size} bytes failed: {source}");
      AllocError::OutOfMemory {
        requested: size,
        source,
      }
    })?;

    let block = Block(old_top - WSIZE);
    let prev_allocated = block.header(&self.heap)?.prev_allocated();

    block.write_free(&mut self.heap, size, prev_allocated)?;
    self
      .heap
      .write_word(block.next(size).offset(), Tag::pack(0, true, false).0)?;

    log::debug!(
      "extend heap by {} bytes at {:#x}, top now {:#x}",
      size,
      block.offset(),
      self.heap.len()
    );
    Ok(self.coalesce(block)?)
  }

  /// Resolves a payload handle to the allocated block it names.
  fn allocated_block(
    &self,
    payload: Payload,
  ) -> Result<Block, AllocError> {
    let epilogue = self.epilogue().offset();

    let block = Block::from_payload(payload)
      .filter(|block| {
        payload.offset() % ALIGNMENT == 0
          && block.offset() >= FIRST_BLOCK.offset()
          && block.offset() < epilogue
      })
      .ok_or(AllocError::InvalidPayload {
        offset: payload.offset(),
      })?;

    let tag = block.header(&self.heap)?;

    if !tag.is_allocated() || tag.size() < MIN_BLOCK_SIZE {
      log::warn!("rejecting payload {:#x}: block is not allocated", payload.offset());
      return Err(AllocError::NotAllocated {
        offset: block.offset(),
      });
    }

    if block.offset().checked_add(tag.size()).is_none_or(|end| end > epilogue) {
      return Err(AllocError::InvalidPayload {
        offset: payload.offset(),
      });
    }

    Ok(block)
  }

  fn after_op(
    &self,
    op: &str,
  ) {
    if self.config.check_after_ops {
      self.check_heap(op);
    }
  }
}
