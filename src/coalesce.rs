use crate::{
  allocator::{Allocator, FIRST_BLOCK},
  block::Block,
  error::HeapError,
  heap::HeapRegion,
};

impl<H: HeapRegion> Allocator<H> {
  /// Merges the free block `block` with its free physical neighbours and puts
  /// the result on the free list.
  ///
  /// ```text
  ///   prev   block  next          result
  ///   alloc  free   alloc   ──►   block
  ///   alloc  free   free    ──►   block + next
  ///   free   free   alloc   ──►   prev + block
  ///   free   free   free    ──►   prev + block + next
  /// ```
  ///
  /// The previous block is located through its footer, which only exists when
  /// it is free; the header's previous-allocated bit says whether to look.
  pub(crate) fn coalesce(
    &mut self,
    block: Block,
  ) -> Result<Block, HeapError> {
    let tag = block.header(&self.heap)?;
    let size = tag.size();

    let next = block.next(size);
    let next_tag = next.header(&self.heap)?;

    let prev = if tag.prev_allocated() {
      None
    } else {
      self.free_predecessor(block)?
    };

    let merged = match (prev, next_tag.is_allocated()) {
      (None, true) => block,
      (None, false) => {
        self.free_list.remove(&mut self.heap, next)?;
        block.write_free(&mut self.heap, size + next_tag.size(), tag.prev_allocated())?;
        block
      }
      (Some(prev), true) => {
        let prev_tag = prev.header(&self.heap)?;
        self.free_list.remove(&mut self.heap, prev)?;
        prev.write_free(&mut self.heap, prev_tag.size() + size, prev_tag.prev_allocated())?;
        prev
      }
      (Some(prev), false) => {
        let prev_tag = prev.header(&self.heap)?;
        self.free_list.remove(&mut self.heap, prev)?;
        self.free_list.remove(&mut self.heap, next)?;
        prev.write_free(
          &mut self.heap,
          prev_tag.size() + size + next_tag.size(),
          prev_tag.prev_allocated(),
        )?;
        prev
      }
    };

    self.free_list.push_back(&mut self.heap, merged)?;

    log::trace!(
      "coalesce {:#x}: prev {}, next {} -> {:#x}",
      block.offset(),
      if prev.is_some() { "free" } else { "allocated" },
      if next_tag.is_allocated() { "allocated" } else { "free" },
      merged.offset()
    );
    Ok(merged)
  }

  /// The free block in front of `block`, found through its footer.
  ///
  /// A footer that reads as allocated (the root sentinel in front of the first
  /// block) means there is none.
  fn free_predecessor(
    &self,
    block: Block,
  ) -> Result<Option<Block>, HeapError> {
    let footer = block.prev_footer(&self.heap)?;

    if footer.is_allocated() {
      return Ok(None);
    }

    match block.offset().checked_sub(footer.size()) {
      Some(offset) if offset >= FIRST_BLOCK.offset() && footer.size() > 0 => {
        Ok(Some(Block(offset)))
      }
      _ => Err(HeapError::OutOfBounds {
        offset: block.offset().wrapping_sub(footer.size()),
        len: footer.size(),
        low: FIRST_BLOCK.offset(),
        high: self.heap.heap_high(),
      }),
    }
  }
}

#[cfg(test)]
mod tests {
  use test_log::test;

  use crate::{allocator::Allocator, block::Payload, heap::MemHeap};

  /// Three 48-byte blocks followed by the allocated rest of the first chunk.
  fn three_blocks() -> (Allocator<MemHeap>, [Payload; 3]) {
    let mut allocator = Allocator::new(MemHeap::new()).unwrap();
    let a = allocator.allocate(40).unwrap().unwrap();
    let b = allocator.allocate(40).unwrap().unwrap();
    let c = allocator.allocate(40).unwrap().unwrap();
    allocator.allocate(4096 - 3 * 48 - 8).unwrap().unwrap();
    assert_eq!(allocator.free_list_len(), 0);
    (allocator, [a, b, c])
  }

  fn free_blocks(allocator: &Allocator<MemHeap>) -> Vec<(usize, usize)> {
    allocator
      .blocks()
      .filter(|block| !block.allocated)
      .map(|block| (block.offset, block.size))
      .collect()
  }

  #[test]
  fn test_both_neighbours_allocated() {
    let (mut allocator, [_, b, _]) = three_blocks();

    allocator.free(b).unwrap();
    assert_eq!(free_blocks(&allocator), vec![(b.offset() - 8, 48)]);
    assert!(allocator.check_heap("case 1"));
  }

  #[test]
  fn test_next_neighbour_free() {
    let (mut allocator, [a, b, c]) = three_blocks();

    allocator.free(c).unwrap();
    allocator.free(b).unwrap();
    assert_eq!(free_blocks(&allocator), vec![(b.offset() - 8, 96)]);
    assert_eq!(allocator.free_list_len(), 1);
    assert!(allocator.check_heap("case 2"));

    allocator.free(a).unwrap();
    assert_eq!(free_blocks(&allocator), vec![(a.offset() - 8, 144)]);
  }

  #[test]
  fn test_prev_neighbour_free() {
    let (mut allocator, [a, b, _]) = three_blocks();

    allocator.free(a).unwrap();
    allocator.free(b).unwrap();
    assert_eq!(free_blocks(&allocator), vec![(a.offset() - 8, 96)]);
    assert_eq!(allocator.free_list_len(), 1);
    assert!(allocator.check_heap("case 3"));
  }

  #[test]
  fn test_both_neighbours_free() {
    let (mut allocator, [a, b, c]) = three_blocks();

    allocator.free(a).unwrap();
    allocator.free(c).unwrap();
    assert_eq!(allocator.free_list_len(), 2);

    allocator.free(b).unwrap();
    assert_eq!(free_blocks(&allocator), vec![(a.offset() - 8, 144)]);
    assert_eq!(allocator.free_list_len(), 1);
    assert!(allocator.check_heap("case 4"));
  }

  #[test]
  fn test_extension_merges_with_free_wilderness() {
    let mut allocator = Allocator::new(MemHeap::new()).unwrap();
    let a = allocator.allocate(16).unwrap().unwrap();

    // The 4064-byte wilderness cannot hold this, so the heap grows and the
    // new chunk is merged into it before placement.
    let big = allocator.allocate(6000).unwrap().unwrap();

    assert_eq!(big.offset(), a.offset() + 32);
    assert_eq!(allocator.free_list_len(), 1);
    assert!(allocator.check_heap("extend"));
  }
}
