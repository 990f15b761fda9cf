use thiserror::Error;

use crate::{
  allocator::{Allocator, FIRST_BLOCK},
  block::{ALIGNMENT, Block, DSIZE, MIN_BLOCK_SIZE, Payload, Tag, WSIZE, Word},
  error::HeapError,
  heap::HeapRegion,
};

/// A block as seen by a physical heap walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  pub offset: usize,
  pub size: usize,
  pub allocated: bool,
}

impl BlockInfo {
  pub fn payload(&self) -> Payload {
    Payload(self.offset + WSIZE)
  }
}

/// Totals gathered by [`Allocator::validate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  pub heap_bytes: usize,
  pub allocated_blocks: usize,
  pub allocated_bytes: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub largest_free: usize,
}

/// The first violation found by the heap checker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeapCheckError {
  #[error("sentinel at {offset:#x} is not a zero-size allocated tag: {word:#018x}")]
  BadSentinel { offset: usize, word: Word },

  #[error("block {offset:#x}: header {header:#018x} != footer {footer:#018x}")]
  TagMismatch {
    offset: usize,
    header: Word,
    footer: Word,
  },

  #[error("block {offset:#x}: header {header:#018x}: size below the 32-byte minimum")]
  TooSmall { offset: usize, header: Word },

  #[error("block {offset:#x}: header {header:#018x}: size not a multiple of 16")]
  SizeNotAligned { offset: usize, header: Word },

  #[error("block {offset:#x}: payload {payload:#x} not aligned")]
  PayloadNotAligned { offset: usize, payload: usize },

  #[error("block {offset:#x}: header {header:#018x} runs past the epilogue at {epilogue:#x}")]
  PastEpilogue {
    offset: usize,
    header: Word,
    epilogue: usize,
  },

  #[error("block {offset:#x}: header {header:#018x}: previous-allocated bit disagrees with the heap")]
  PrevAllocMismatch { offset: usize, header: Word },

  #[error("block {offset:#x} and next block {next:#x}: two adjacent free blocks")]
  AdjacentFree { offset: usize, next: usize },

  #[error("epilogue found at {found:#x}, heap top expects {expected:#x}")]
  MisplacedEpilogue { found: usize, expected: usize },

  #[error("free list entry {offset:#x} outside heap [{low:#x}, {high:#x}]")]
  FreeListOutOfBounds {
    offset: usize,
    low: usize,
    high: usize,
  },

  #[error("free list entry {offset:#x} is not a free block of the heap")]
  ListedNotFree { offset: usize },

  #[error("free list entry {offset:#x}: back link {prev:#x}, expected {expected:#x}")]
  BrokenBackLink {
    offset: usize,
    prev: usize,
    expected: usize,
  },

  #[error("free list holds {listed} blocks, heap scan found {scanned}, counter says {counted}")]
  CountMismatch {
    listed: usize,
    scanned: usize,
    counted: usize,
  },

  #[error("heap walk failed: {0}")]
  Heap(#[from] HeapError),
}

impl<H: HeapRegion> Allocator<H> {
  /// Blocks in address order, from the first real block up to the epilogue.
  pub fn blocks(&self) -> Blocks<'_, H> {
    Blocks {
      heap: &self.heap,
      current: Some(FIRST_BLOCK),
      epilogue: self.epilogue().offset(),
    }
  }

  pub fn stats(&self) -> HeapStats {
    self.blocks().fold(
      HeapStats {
        heap_bytes: self.heap.len(),
        ..HeapStats::default()
      },
      |mut stats, block| {
        if block.allocated {
          stats.allocated_blocks += 1;
          stats.allocated_bytes += block.size;
        } else {
          stats.free_blocks += 1;
          stats.free_bytes += block.size;
          stats.largest_free = stats.largest_free.max(block.size);
        }
        stats
      },
    )
  }

  /// Logs the outcome of [`validate`](Allocator::validate) under `label` and
  /// reports whether the heap is consistent.
  pub fn check_heap(
    &self,
    label: &str,
  ) -> bool {
    match self.validate() {
      Ok(stats) => {
        log::trace!("[{label}] heap ok: {stats:?}");
        true
      }
      Err(err) => {
        log::error!("[{label}] {err}");
        false
      }
    }
  }

  /// Walks the physical block chain and then the free list, independently,
  /// and returns the first inconsistency found.
  pub fn validate(&self) -> Result<HeapStats, HeapCheckError> {
    self.check_sentinels()?;
    let (stats, free_offsets) = self.check_blocks()?;
    self.check_free_list(&free_offsets)?;
    Ok(stats)
  }

  fn check_sentinels(&self) -> Result<(), HeapCheckError> {
    let root = self.free_list.root().offset();

    for offset in [0, root, root + 3 * WSIZE] {
      let tag = Tag(self.heap.read_word(offset)?);
      if tag.size() != 0 || !tag.is_allocated() {
        return Err(HeapCheckError::BadSentinel {
          offset,
          word: tag.0,
        });
      }
    }
    Ok(())
  }

  /// Physical walk. Returns the stats and the offsets of every free block in
  /// address order.
  fn check_blocks(&self) -> Result<(HeapStats, Vec<usize>), HeapCheckError> {
    let heap = &self.heap;
    let epilogue = self.epilogue().offset();

    let mut stats = HeapStats {
      heap_bytes: heap.len(),
      ..HeapStats::default()
    };
    let mut free_offsets = Vec::new();
    let mut block = FIRST_BLOCK;
    let mut prev: Option<BlockInfo> = None;

    loop {
      let header = block.header(heap)?;
      let offset = block.offset();
      let prev_allocated = prev.is_none_or(|prev| prev.allocated);

      if header.prev_allocated() != prev_allocated {
        return Err(HeapCheckError::PrevAllocMismatch {
          offset,
          header: header.0,
        });
      }

      let size = header.size();

      if size == 0 {
        if offset != epilogue {
          return Err(HeapCheckError::MisplacedEpilogue {
            found: offset,
            expected: epilogue,
          });
        }
        if !header.is_allocated() {
          return Err(HeapCheckError::BadSentinel {
            offset,
            word: header.0,
          });
        }
        break;
      }

      if size % DSIZE != 0 {
        return Err(HeapCheckError::SizeNotAligned {
          offset,
          header: header.0,
        });
      }
      if size < MIN_BLOCK_SIZE {
        return Err(HeapCheckError::TooSmall {
          offset,
          header: header.0,
        });
      }
      if offset.checked_add(size).is_none_or(|end| end > epilogue) {
        return Err(HeapCheckError::PastEpilogue {
          offset,
          header: header.0,
          epilogue,
        });
      }

      if header.is_allocated() {
        let payload = block.payload().offset();
        if payload % ALIGNMENT != 0 {
          return Err(HeapCheckError::PayloadNotAligned { offset, payload });
        }
        stats.allocated_blocks += 1;
        stats.allocated_bytes += size;
      } else {
        let footer = block.footer(heap, size)?;
        if !header.matches(footer) {
          return Err(HeapCheckError::TagMismatch {
            offset,
            header: header.0,
            footer: footer.0,
          });
        }
        if let Some(prev) = prev.filter(|prev| !prev.allocated) {
          return Err(HeapCheckError::AdjacentFree {
            offset: prev.offset,
            next: offset,
          });
        }
        stats.free_blocks += 1;
        stats.free_bytes += size;
        stats.largest_free = stats.largest_free.max(size);
        free_offsets.push(offset);
      }

      prev = Some(BlockInfo {
        offset,
        size,
        allocated: header.is_allocated(),
      });
      block = block.next(size);
    }

    Ok((stats, free_offsets))
  }

  /// List walk, bounded by the number of free blocks the physical walk saw.
  fn check_free_list(
    &self,
    free_offsets: &[usize],
  ) -> Result<(), HeapCheckError> {
    let heap = &self.heap;
    let root = self.free_list.root();
    let epilogue = self.epilogue().offset();

    let mut listed = 0;
    let mut current = root;

    loop {
      let next = self.free_list.next(heap, current)?;
      if next == root {
        break;
      }

      if next.offset() < FIRST_BLOCK.offset() || next.offset() >= epilogue {
        return Err(HeapCheckError::FreeListOutOfBounds {
          offset: next.offset(),
          low: heap.heap_low(),
          high: heap.heap_high(),
        });
      }

      if free_offsets.binary_search(&next.offset()).is_err() {
        return Err(HeapCheckError::ListedNotFree {
          offset: next.offset(),
        });
      }

      let back = self.free_list.prev(heap, next)?;
      if back != current {
        return Err(HeapCheckError::BrokenBackLink {
          offset: next.offset(),
          prev: back.offset(),
          expected: current.offset(),
        });
      }

      listed += 1;
      if listed > free_offsets.len() {
        break;
      }
      current = next;
    }

    if listed != free_offsets.len() || listed != self.free_list.len() {
      return Err(HeapCheckError::CountMismatch {
        listed,
        scanned: free_offsets.len(),
        counted: self.free_list.len(),
      });
    }
    Ok(())
  }
}

/// Iterator returned by [`Allocator::blocks`].
///
/// Stops at the epilogue, or early at a header that cannot be a block.
pub struct Blocks<'a, H> {
  heap: &'a H,
  current: Option<Block>,
  epilogue: usize,
}

impl<H: HeapRegion> Iterator for Blocks<'_, H> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<BlockInfo> {
    let block = self.current.take()?;
    let header = block.header(self.heap).ok()?;
    let size = header.size();

    let end = block.offset().checked_add(size)?;
    if size == 0 || end > self.epilogue {
      return None;
    }

    self.current = Some(Block(end));
    Some(BlockInfo {
      offset: block.offset(),
      size,
      allocated: header.is_allocated(),
    })
  }
}

#[cfg(test)]
mod tests {
  use test_log::test;

  use super::*;
  use crate::heap::MemHeap;

  fn allocator() -> Allocator<MemHeap> {
    Allocator::new(MemHeap::new()).unwrap()
  }

  #[test]
  fn test_fresh_heap_passes() {
    let allocator = allocator();
    let stats = allocator.validate().unwrap();

    assert_eq!(stats.free_blocks, 1);
    assert_eq!(stats.free_bytes, 4096);
    assert_eq!(stats.allocated_blocks, 0);
    assert_eq!(stats, allocator.stats());
    assert!(allocator.check_heap("fresh"));
  }

  #[test]
  fn test_detects_footer_mismatch() {
    let mut allocator = allocator();
    let footer = FIRST_BLOCK.offset() + 4096 - WSIZE;
    allocator.heap.write_word(footer, Tag::pack(4080, false, true).0).unwrap();

    assert!(matches!(
      allocator.validate(),
      Err(HeapCheckError::TagMismatch { offset: 40, .. })
    ));
    assert!(!allocator.check_heap("corrupt footer"));
  }

  #[test]
  fn test_detects_adjacent_free_blocks() {
    let mut allocator = allocator();
    let a = allocator.allocate(40).unwrap().unwrap();
    allocator.allocate(40).unwrap().unwrap();

    // Mark `a` free behind the allocator's back, without coalescing.
    let block = Block::from_payload(a).unwrap();
    block.write_free(&mut allocator.heap, 48, true).unwrap();
    block.next(48).set_prev_allocated(&mut allocator.heap, false).unwrap();
    let b = block.next(48);
    b.write_free(&mut allocator.heap, 48, false).unwrap();
    b.next(48).set_prev_allocated(&mut allocator.heap, false).unwrap();

    assert_eq!(
      allocator.validate(),
      Err(HeapCheckError::AdjacentFree {
        offset: 40,
        next: 88
      })
    );
  }

  #[test]
  fn test_detects_unlisted_free_block() {
    let mut allocator = allocator();
    allocator.allocate(40).unwrap().unwrap();
    let remainder = allocator.free_list.iter(&allocator.heap).next().unwrap().unwrap();
    allocator.free_list.remove(&mut allocator.heap, remainder).unwrap();

    assert_eq!(
      allocator.validate(),
      Err(HeapCheckError::CountMismatch {
        listed: 0,
        scanned: 1,
        counted: 0
      })
    );
  }

  #[test]
  fn test_detects_bad_size() {
    let mut allocator = allocator();
    let a = allocator.allocate(40).unwrap().unwrap();
    let block = Block::from_payload(a).unwrap();
    allocator.heap.write_word(block.offset(), Tag::pack(16, true, true).0).unwrap();

    assert_eq!(
      allocator.validate(),
      Err(HeapCheckError::TooSmall {
        offset: 40,
        header: Tag::pack(16, true, true).0
      })
    );
  }

  #[test]
  fn test_huge_size_reports_instead_of_overflowing() {
    let mut allocator = allocator();
    allocator.allocate(40).unwrap().unwrap();
    let header = (u64::MAX & !0xF) | 0b11;
    allocator.heap.write_word(FIRST_BLOCK.offset(), header).unwrap();

    assert!(matches!(
      allocator.validate(),
      Err(HeapCheckError::PastEpilogue { offset: 40, .. })
    ));
    assert!(!allocator.check_heap("huge size"));
    assert_eq!(allocator.blocks().count(), 0);
  }

  #[test]
  fn test_detects_prev_alloc_mismatch() {
    let mut allocator = allocator();
    allocator.allocate(40).unwrap().unwrap();
    let header = Tag::pack(4048, false, false).0;
    allocator.heap.write_word(88, header).unwrap();

    assert_eq!(
      allocator.validate(),
      Err(HeapCheckError::PrevAllocMismatch { offset: 88, header })
    );
  }

  #[test]
  fn test_detects_misplaced_epilogue() {
    let mut allocator = allocator();
    allocator.allocate(40).unwrap().unwrap();
    allocator.allocate(40).unwrap().unwrap();
    allocator.heap.write_word(88, Tag::pack(0, true, true).0).unwrap();

    assert_eq!(
      allocator.validate(),
      Err(HeapCheckError::MisplacedEpilogue {
        found: 88,
        expected: allocator.epilogue().offset()
      })
    );
  }

  #[test]
  fn test_detects_allocated_block_on_list() {
    let mut allocator = allocator();
    allocator.allocate(40).unwrap().unwrap();
    let root = allocator.free_list.root();
    allocator.heap.write_word(root.offset() + 2 * WSIZE, 40).unwrap();

    assert_eq!(
      allocator.validate(),
      Err(HeapCheckError::ListedNotFree { offset: 40 })
    );
  }

  #[test]
  fn test_detects_broken_back_link() {
    let mut allocator = allocator();
    allocator.allocate(40).unwrap().unwrap();
    let b = allocator.allocate(40).unwrap().unwrap();
    allocator.allocate(40).unwrap().unwrap();
    allocator.free(b).unwrap();

    // List order is now the wilderness at 184, then b's block at 88.
    let root = allocator.free_list.root();
    allocator.heap.write_word(88 + WSIZE, root.offset() as Word).unwrap();

    assert_eq!(
      allocator.validate(),
      Err(HeapCheckError::BrokenBackLink {
        offset: 88,
        prev: root.offset(),
        expected: 184
      })
    );
  }

  #[test]
  fn test_detects_stray_list_entry() {
    let mut allocator = allocator();
    let root = allocator.free_list.root();
    allocator.heap.write_word(root.offset() + 2 * WSIZE, 1 << 40).unwrap();

    assert_eq!(
      allocator.validate(),
      Err(HeapCheckError::FreeListOutOfBounds {
        offset: 1 << 40,
        low: 0,
        high: allocator.heap.heap_high()
      })
    );
  }

  #[test]
  fn test_blocks_walks_in_address_order() {
    let mut allocator = allocator();
    let a = allocator.allocate(100).unwrap().unwrap();
    let b = allocator.allocate(200).unwrap().unwrap();

    let blocks: Vec<_> = allocator.blocks().collect();
    assert_eq!(blocks.len(), 3);
    assert_eq!(blocks[0].payload(), a);
    assert_eq!(blocks[1].payload(), b);
    assert!(blocks.windows(2).all(|w| w[0].offset + w[0].size == w[1].offset));
    assert_eq!(blocks.iter().map(|b| b.size).sum::<usize>(), 4096);
  }
}
