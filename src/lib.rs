//! # explalloc - An Explicit Free-List Memory Allocator
//!
//! This crate provides a general-purpose dynamic memory allocator that manages a
//! raw, contiguous, only-growable heap region, the way `malloc` sits on top of
//! `sbrk`.
//!
//! ## Overview
//!
//! The heap is a sequence of physically adjacent blocks. Free blocks are also
//! threaded on a circular doubly linked list that lives inside their own
//! payload bytes:
//!
//! ```text
//!   Explicit Free List:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                              HEAP                                    │
//!   │                                                                      │
//!   │  ┌────┬────┬──────┬──────┬────────┬──────┬─────────────────────┬───┐ │
//!   │  │pro │root│  A1  │  F1  │   A2   │  F2  │     wilderness      │epi│ │
//!   │  └────┴──┬─┴──────┴──▲───┴────────┴──▲───┴──────────▲──────────┴───┘ │
//!   │          │           │               │              │                │
//!   │          └─── next ──┘──── next ─────┘───── next ───┘                │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Allocation: first fit along the list, split off the remainder.
//!   Free: merge with free neighbours at once, append to the list tail.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   explalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── allocator  - Allocator: init, allocate, free, reallocate, zero_allocate
//!   ├── block      - Boundary-tag encoding and block accessors (internal)
//!   ├── check      - Heap checker, block iterator and statistics
//!   ├── coalesce   - Merging of adjacent free blocks (internal)
//!   ├── config     - AllocatorConfig
//!   ├── error      - HeapError, AllocError
//!   ├── free_list  - Intrusive circular free list (internal)
//!   ├── heap       - HeapRegion trait, MemHeap, SbrkHeap
//!   └── place      - Placement and splitting (internal)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use explalloc::{Allocator, MemHeap};
//!
//! let mut allocator = Allocator::new(MemHeap::new()).unwrap();
//!
//! let payload = allocator.allocate(100).unwrap().unwrap();
//! allocator.payload_mut(payload).unwrap()[..5].copy_from_slice(b"hello");
//!
//! let grown = allocator.reallocate(Some(payload), 400).unwrap().unwrap();
//! assert_eq!(&allocator.payload(grown).unwrap()[..5], b"hello");
//!
//! allocator.free(grown).unwrap();
//! assert!(allocator.check_heap("quick start"));
//! ```
//!
//! ## How It Works
//!
//! Every block starts with a one-word header packing the block size with two
//! flag bits. Free blocks repeat the header in a footer so the block after
//! them can find their start in O(1):
//!
//! ```text
//!   Allocated Block:
//!   ┌──────────────┬─────────────────────────────────────────────┐
//!   │ size | p | 1 │                 payload                     │
//!   └──────────────┴─────────────────────────────────────────────┘
//!     8 bytes      ▲
//!                  └── Payload returned to the caller (16-byte aligned)
//!
//!   Free Block:
//!   ┌──────────────┬───────────┬───────────┬─────────┬──────────────┐
//!   │ size | p | 0 │ prev_free │ next_free │   ...   │ size | p | 0 │
//!   └──────────────┴───────────┴───────────┴─────────┴──────────────┘
//!       header         free-list links                  footer
//! ```
//!
//! `p` records whether the physically previous block is allocated, which is
//! what lets allocated blocks go without a footer.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **Grow only**: Memory is never handed back to the region
//! - **No size classes**: One list, first fit
//!
//! ## Safety
//!
//! Blocks are addressed by offset and every heap access is bounds-checked, so
//! the allocator itself contains no unsafe code. The only `unsafe` lives in
//! [`SbrkHeap`], which turns the memory obtained from `sbrk(2)` into a slice.

pub mod align;
mod allocator;
mod block;
mod check;
mod coalesce;
mod config;
mod error;
mod free_list;
mod heap;
mod place;

pub use allocator::Allocator;
pub use block::{ALIGNMENT, DSIZE, MIN_BLOCK_SIZE, Payload, WSIZE, Word};
pub use check::{BlockInfo, Blocks, HeapCheckError, HeapStats};
pub use config::{AllocatorConfig, CHUNK_SIZE};
pub use error::{AllocError, HeapError};
#[cfg(unix)]
pub use heap::SbrkHeap;
pub use heap::{HeapRegion, MAX_HEAP, MemHeap};
