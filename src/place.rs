use crate::{
  allocator::Allocator,
  block::{Block, MIN_BLOCK_SIZE},
  error::HeapError,
  heap::HeapRegion,
};

impl<H: HeapRegion> Allocator<H> {
  /// Turns the free block `block` into an allocated block of `asize` bytes.
  ///
  /// A remainder of at least [`MIN_BLOCK_SIZE`] bytes is split off and goes to
  /// the tail of the free list; anything smaller stays inside the allocation.
  pub(crate) fn place(
    &mut self,
    block: Block,
    asize: usize,
  ) -> Result<(), HeapError> {
    let tag = block.header(&self.heap)?;
    let size = tag.size();
    debug_assert!(!tag.is_allocated() && size >= asize);

    self.free_list.remove(&mut self.heap, block)?;

    let remainder_size = size.saturating_sub(asize);

    if remainder_size >= MIN_BLOCK_SIZE {
      block.write_allocated(&mut self.heap, asize, tag.prev_allocated())?;

      let remainder = block.next(asize);
      remainder.write_free(&mut self.heap, remainder_size, true)?;
      self.free_list.push_back(&mut self.heap, remainder)?;

      log::trace!(
        "split {:#x}: {} allocated, {} free at {:#x}",
        block.offset(),
        asize,
        remainder_size,
        remainder.offset()
      );
    } else {
      block.write_allocated(&mut self.heap, size, tag.prev_allocated())?;
      block.next(size).set_prev_allocated(&mut self.heap, true)?;

      log::trace!("place {:#x}: whole block of {} bytes", block.offset(), size);
    }

    Ok(())
  }
}
