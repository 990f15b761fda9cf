use crate::{
  block::{Block, MIN_BLOCK_SIZE, WSIZE, Word},
  error::HeapError,
  heap::HeapRegion,
};

/// Offsets of the link words inside a free block.
const PREV_FREE: usize = WSIZE;
const NEXT_FREE: usize = 2 * WSIZE;

/// Explicit free list: a circular doubly linked list threaded through the
/// payloads of free blocks, anchored at a sentinel root block.
///
/// ```text
///        ┌──────────────────────────────────────────────────┐
///        ▼                                                  │
///   ┌────────┐ next ┌────────┐ next ┌────────┐ next         │
///   │  root  │ ───► │ free A │ ───► │ free B │ ─────────────┘
///   │ size 0 │ ◄─── │        │ ◄─── │        │ ◄──┐
///   └────────┘ prev └────────┘ prev └────────┘    │
///        │                                    prev│
///        └────────────────────────────────────────┘
/// ```
///
/// The root is never split, coalesced or matched, so insert and remove need no
/// empty-list special case. The list only stores offsets; `len` is a running
/// count kept for cross-checking by the heap checker.
pub(crate) struct FreeList {
  root: Block,
  len: usize,
}

fn next_free<H: HeapRegion>(
  heap: &H,
  block: Block,
) -> Result<Block, HeapError> {
  Ok(Block(heap.read_word(block.offset() + NEXT_FREE)? as usize))
}

fn prev_free<H: HeapRegion>(
  heap: &H,
  block: Block,
) -> Result<Block, HeapError> {
  Ok(Block(heap.read_word(block.offset() + PREV_FREE)? as usize))
}

fn set_next_free<H: HeapRegion>(
  heap: &mut H,
  block: Block,
  next: Block,
) -> Result<(), HeapError> {
  heap.write_word(block.offset() + NEXT_FREE, next.offset() as Word)
}

fn set_prev_free<H: HeapRegion>(
  heap: &mut H,
  block: Block,
  prev: Block,
) -> Result<(), HeapError> {
  heap.write_word(block.offset() + PREV_FREE, prev.offset() as Word)
}

impl FreeList {
  pub(crate) fn new(root: Block) -> Self {
    Self { root, len: 0 }
  }

  /// Links the root to itself.
  pub(crate) fn init<H: HeapRegion>(
    &mut self,
    heap: &mut H,
  ) -> Result<(), HeapError> {
    set_prev_free(heap, self.root, self.root)?;
    set_next_free(heap, self.root, self.root)?;
    self.len = 0;
    Ok(())
  }

  pub(crate) fn root(&self) -> Block {
    self.root
  }

  pub(crate) fn len(&self) -> usize {
    self.len
  }

  pub(crate) fn next<H: HeapRegion>(
    &self,
    heap: &H,
    block: Block,
  ) -> Result<Block, HeapError> {
    next_free(heap, block)
  }

  pub(crate) fn prev<H: HeapRegion>(
    &self,
    heap: &H,
    block: Block,
  ) -> Result<Block, HeapError> {
    prev_free(heap, block)
  }

  /// Inserts `block` just before the root, i.e. at the tail.
  pub(crate) fn push_back<H: HeapRegion>(
    &mut self,
    heap: &mut H,
    block: Block,
  ) -> Result<(), HeapError> {
    let old_tail = prev_free(heap, self.root)?;

    set_next_free(heap, old_tail, block)?;
    set_prev_free(heap, block, old_tail)?;
    set_next_free(heap, block, self.root)?;
    set_prev_free(heap, self.root, block)?;

    self.len += 1;
    log::trace!("free list: push {:#x} (len {})", block.offset(), self.len);
    Ok(())
  }

  pub(crate) fn remove<H: HeapRegion>(
    &mut self,
    heap: &mut H,
    block: Block,
  ) -> Result<(), HeapError> {
    let prev = prev_free(heap, block)?;
    let next = next_free(heap, block)?;

    set_next_free(heap, prev, next)?;
    set_prev_free(heap, next, prev)?;

    debug_assert!(self.len > 0, "free list counter underflow");
    self.len -= 1;
    log::trace!("free list: remove {:#x} (len {})", block.offset(), self.len);
    Ok(())
  }

  /// First-fit search in list order.
  ///
  /// The wilderness block, the free block bordering the epilogue, is only
  /// returned when nothing else fits, so the top of the heap stays in one piece
  /// for as long as possible. Freeing a hole between live blocks and then
  /// asking for something that fits it reuses the hole, even though the
  /// wilderness sits ahead of it in list order.
  pub(crate) fn find_fit<H: HeapRegion>(
    &self,
    heap: &H,
    asize: usize,
  ) -> Result<Option<Block>, HeapError> {
    let epilogue = heap.len().saturating_sub(WSIZE);
    let mut wilderness = None;

    for block in self.iter(heap) {
      let block = block?;
      let size = block.size(heap)?;

      if size < asize {
        continue;
      }

      if block.offset().checked_add(size) == Some(epilogue) {
        wilderness = Some(block);
        continue;
      }

      return Ok(Some(block));
    }

    Ok(wilderness)
  }

  /// Walks the list from the root's first successor back to the root.
  pub(crate) fn iter<'a, H: HeapRegion>(
    &self,
    heap: &'a H,
  ) -> Iter<'a, H> {
    Iter {
      heap,
      root: self.root,
      current: Ok(self.root),
      steps_left: heap.len() / MIN_BLOCK_SIZE + 1,
    }
  }
}

/// Iterator over free blocks in list order.
///
/// Fused after at most one step per possible block, so a corrupted cycle that
/// never returns to the root still terminates.
pub(crate) struct Iter<'a, H> {
  heap: &'a H,
  root: Block,
  current: Result<Block, HeapError>,
  steps_left: usize,
}

impl<H: HeapRegion> Iterator for Iter<'_, H> {
  type Item = Result<Block, HeapError>;

  fn next(&mut self) -> Option<Self::Item> {
    let current = self.current.clone().ok()?;

    if self.steps_left == 0 {
      return None;
    }
    self.steps_left -= 1;

    match next_free(self.heap, current) {
      Ok(next) if next == self.root => {
        self.steps_left = 0;
        None
      }
      Ok(next) => {
        self.current = Ok(next);
        Some(Ok(next))
      }
      Err(err) => {
        self.current = Err(err.clone());
        Some(Err(err))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::heap::MemHeap;

  const ROOT: Block = Block(8);

  /// Root pseudo-block at 8 followed by free blocks of 32 bytes at 40, 72, 104.
  fn setup() -> (MemHeap, FreeList) {
    let mut heap = MemHeap::with_capacity(4096);
    heap.grow(144).unwrap();

    for offset in [40, 72, 104] {
      Block(offset).write_free(&mut heap, 32, true).unwrap();
    }

    let mut list = FreeList::new(ROOT);
    list.init(&mut heap).unwrap();
    (heap, list)
  }

  fn collect(
    list: &FreeList,
    heap: &MemHeap,
  ) -> Vec<usize> {
    list
      .iter(heap)
      .map(|block| block.unwrap().offset())
      .collect()
  }

  #[test]
  fn test_empty_list_points_at_root() {
    let (heap, list) = setup();

    assert_eq!(list.len(), 0);
    assert_eq!(list.next(&heap, ROOT).unwrap(), ROOT);
    assert_eq!(list.prev(&heap, ROOT).unwrap(), ROOT);
    assert!(collect(&list, &heap).is_empty());
  }

  #[test]
  fn test_push_back_keeps_insertion_order() {
    let (mut heap, mut list) = setup();

    list.push_back(&mut heap, Block(72)).unwrap();
    list.push_back(&mut heap, Block(40)).unwrap();
    list.push_back(&mut heap, Block(104)).unwrap();

    assert_eq!(list.len(), 3);
    assert_eq!(collect(&list, &heap), vec![72, 40, 104]);
    assert_eq!(list.prev(&heap, ROOT).unwrap(), Block(104));
    assert_eq!(list.prev(&heap, Block(72)).unwrap(), ROOT);
  }

  #[test]
  fn test_remove_relinks_neighbours() {
    let (mut heap, mut list) = setup();
    for offset in [40, 72, 104] {
      list.push_back(&mut heap, Block(offset)).unwrap();
    }

    list.remove(&mut heap, Block(72)).unwrap();
    assert_eq!(collect(&list, &heap), vec![40, 104]);
    assert_eq!(list.prev(&heap, Block(104)).unwrap(), Block(40));

    list.remove(&mut heap, Block(40)).unwrap();
    list.remove(&mut heap, Block(104)).unwrap();
    assert_eq!(list.len(), 0);
    assert_eq!(list.next(&heap, ROOT).unwrap(), ROOT);
  }

  #[test]
  #[cfg(debug_assertions)]
  #[should_panic(expected = "free list counter underflow")]
  fn test_remove_past_empty_is_caught() {
    let (mut heap, mut list) = setup();
    list.remove(&mut heap, Block(40)).unwrap();
  }

  #[test]
  fn test_find_fit_is_first_fit_in_list_order() {
    let mut heap = MemHeap::with_capacity(4096);
    heap.grow(304).unwrap();
    Block(40).write_free(&mut heap, 32, true).unwrap();
    Block(72).write_free(&mut heap, 64, true).unwrap();
    Block(136).write_free(&mut heap, 32, true).unwrap();

    let mut list = FreeList::new(ROOT);
    list.init(&mut heap).unwrap();
    for offset in [136, 72, 40] {
      list.push_back(&mut heap, Block(offset)).unwrap();
    }

    assert_eq!(list.find_fit(&heap, 32).unwrap(), Some(Block(136)));
    assert_eq!(list.find_fit(&heap, 48).unwrap(), Some(Block(72)));
    assert_eq!(list.find_fit(&heap, 80).unwrap(), None);
  }

  #[test]
  fn test_find_fit_defers_wilderness() {
    let (mut heap, mut list) = setup();
    // 104 + 32 == 136, the epilogue slot of a 144-byte heap.
    list.push_back(&mut heap, Block(104)).unwrap();
    list.push_back(&mut heap, Block(40)).unwrap();

    assert_eq!(list.find_fit(&heap, 32).unwrap(), Some(Block(40)));

    list.remove(&mut heap, Block(40)).unwrap();
    assert_eq!(list.find_fit(&heap, 32).unwrap(), Some(Block(104)));
  }
}
