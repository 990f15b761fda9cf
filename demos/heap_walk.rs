use std::io::Read;

use explalloc::{Allocator, HeapRegion, MemHeap, Payload};

/// Waits until the user presses ENTER when the demo runs with `--step`.
fn block_until_enter_pressed(step: bool) {
  if !step {
    return;
  }
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints every block of the heap in address order.
fn print_heap<H: HeapRegion>(
  label: &str,
  allocator: &Allocator<H>,
) {
  let stats = allocator.stats();
  println!(
    "\n[{}] heap = {} bytes, {} allocated / {} free blocks, free list len = {}",
    label,
    stats.heap_bytes,
    stats.allocated_blocks,
    stats.free_blocks,
    allocator.free_list_len()
  );

  for block in allocator.blocks() {
    println!(
      "    {:#07x}  {:>6} bytes  {}",
      block.offset,
      block.size,
      if block.allocated { "allocated" } else { "free" }
    );
  }
}

fn print_alloc(
  label: &str,
  size: usize,
  payload: Payload,
) {
  println!(
    "\n{}: allocated {} bytes, payload = {:#x}, payload % 16 = {}",
    label,
    size,
    payload.offset(),
    payload.offset() % 16
  );
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  env_logger::init();
  let step = std::env::args().any(|arg| arg == "--step");

  let mut allocator = Allocator::new(MemHeap::new())?;
  print_heap("start", &allocator);
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 1) Three allocations split the first chunk from the front.
  // --------------------------------------------------------------------
  let a = allocator.allocate(32)?.ok_or("zero-sized")?;
  print_alloc("[1] A", 32, a);
  let b = allocator.allocate(48)?.ok_or("zero-sized")?;
  print_alloc("[1] B", 48, b);
  let c = allocator.allocate(16)?.ok_or("zero-sized")?;
  print_alloc("[1] C", 16, c);
  print_heap("after A, B, C", &allocator);
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 2) Free B: its neighbours are allocated, so it stays a block of its own.
  // --------------------------------------------------------------------
  allocator.free(b)?;
  print_heap("after free(B)", &allocator);
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 3) A 40-byte request fits in B's old block and reuses it.
  // --------------------------------------------------------------------
  let d = allocator.allocate(40)?.ok_or("zero-sized")?;
  print_alloc("[3] D", 40, d);
  println!("[3] D == B? {}", if d == b { "yes, first fit reused it" } else { "no" });
  print_heap("after D", &allocator);
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 4) Grow C past the first chunk: the heap is extended and C moves.
  // --------------------------------------------------------------------
  allocator.payload_mut(c)?[..16].copy_from_slice(b"sixteen bytes!!\0");
  let c = allocator.reallocate(Some(c), 6000)?.ok_or("zero-sized")?;
  println!(
    "\n[4] C moved to {:#x}, first bytes = {:?}",
    c.offset(),
    std::str::from_utf8(&allocator.payload(c)?[..15])?
  );
  print_heap("after realloc(C, 6000)", &allocator);
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 5) Free everything: coalescing folds the heap back into one block.
  // --------------------------------------------------------------------
  for payload in [a, d, c] {
    allocator.free(payload)?;
  }
  print_heap("after freeing everything", &allocator);

  println!(
    "\n[5] heap check: {}",
    if allocator.check_heap("demo") { "ok" } else { "FAILED" }
  );
  Ok(())
}
