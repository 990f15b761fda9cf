use thiserror::Error;

/// Failures reported by a [`HeapRegion`](crate::HeapRegion).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeapError {
  #[error("heap exhausted: requested {requested} bytes, {available} available")]
  Exhausted { requested: usize, available: usize },

  #[error("access of {len} bytes at {offset:#x} outside heap [{low:#x}, {high:#x}]")]
  OutOfBounds {
    offset: usize,
    len: usize,
    low: usize,
    high: usize,
  },

  #[error("program break moved underneath the heap: expected {expected:#x}, found {found:#x}")]
  NonContiguous { expected: usize, found: usize },

  #[error("sbrk failed with errno {0}")]
  Os(i32),
}

/// Failures of the public allocator operations.
///
/// Every case the C-style interface reports as a null pointer maps to one of
/// these; a zero-sized request is not an error and yields `Ok(None)` instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocError {
  #[error("out of memory extending heap by {requested} bytes: {source}")]
  OutOfMemory {
    requested: usize,
    #[source]
    source: HeapError,
  },

  #[error("{count} elements of {elem_size} bytes overflow usize")]
  SizeOverflow { count: usize, elem_size: usize },

  #[error("request of {size} bytes cannot be represented as a block")]
  RequestTooLarge { size: usize },

  #[error("{offset:#x} is not a payload address of this heap")]
  InvalidPayload { offset: usize },

  #[error("block at {offset:#x} is not allocated")]
  NotAllocated { offset: usize },

  #[error("heap region must be empty at init, found {len} bytes")]
  HeapNotEmpty { len: usize },

  #[error("chunk size {size} must be a multiple of 16 and at least 32")]
  InvalidChunkSize { size: usize },

  #[error("heap access failed: {0}")]
  Heap(#[from] HeapError),
}
