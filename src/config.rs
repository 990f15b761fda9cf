use crate::{
  block::{DSIZE, MIN_BLOCK_SIZE},
  error::AllocError,
};

/// Default heap extension: one 4 KiB page.
pub const CHUNK_SIZE: usize = 1 << 12;

/// Tunables of an [`Allocator`](crate::Allocator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
  /// Minimum number of bytes requested from the heap region per extension.
  pub chunk_size: usize,
  /// Run the heap checker after every public operation and log any violation.
  pub check_after_ops: bool,
}

impl Default for AllocatorConfig {
  fn default() -> Self {
    Self {
      chunk_size: CHUNK_SIZE,
      check_after_ops: false,
    }
  }
}

impl AllocatorConfig {
  pub fn with_chunk_size(
    mut self,
    chunk_size: usize,
  ) -> Self {
    self.chunk_size = chunk_size;
    self
  }

  pub fn with_heap_checks(
    mut self,
    enabled: bool,
  ) -> Self {
    self.check_after_ops = enabled;
    self
  }

  pub(crate) fn validate(&self) -> Result<(), AllocError> {
    if self.chunk_size < MIN_BLOCK_SIZE || self.chunk_size % DSIZE != 0 {
      return Err(AllocError::InvalidChunkSize {
        size: self.chunk_size,
      });
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_config_is_valid() {
    let config = AllocatorConfig::default();
    assert_eq!(config.chunk_size, 4096);
    assert!(!config.check_after_ops);
    assert_eq!(config.validate(), Ok(()));
  }

  #[test]
  fn test_rejects_bad_chunk_sizes() {
    for size in [0, 16, 40, 4095] {
      assert_eq!(
        AllocatorConfig::default().with_chunk_size(size).validate(),
        Err(AllocError::InvalidChunkSize { size })
      );
    }
    assert!(AllocatorConfig::default().with_chunk_size(32).validate().is_ok());
  }
}
