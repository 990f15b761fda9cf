/// Rounds `value` up to the allocator's double-word alignment.
///
/// # Examples
///
/// ```rust
/// use explalloc::align;
///
/// assert_eq!(align!(1), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(40), 48);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, $crate::ALIGNMENT)
  };
}

/// Rounds `value` up to the next multiple of `n`, which must be a power of two.
///
/// # Examples
///
/// ```rust
/// use explalloc::align_to;
///
/// assert_eq!(align_to!(13, 8), 16);
/// assert_eq!(align_to!(4096, 4096), 4096);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $n:expr) => {
    ($value + $n - 1) & !($n - 1)
  };
}

/// Overflow-checked [`align!`]: `None` when rounding would wrap.
pub(crate) fn checked_align(value: usize) -> Option<usize> {
  value
    .checked_add(crate::ALIGNMENT - 1)
    .map(|v| v & !(crate::ALIGNMENT - 1))
}
