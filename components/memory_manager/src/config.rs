//! Heap configuration.

/// Default total heap reservation in bytes, both semi-spaces together.
pub const DEFAULT_HEAP_SIZE: usize = 512 * 1000 * 1000;

/// Size of the managed heap.
///
/// Each semi-space gets half of `heap_size`, and a collection runs when an
/// allocation would push the active space past that half.
///
/// # Examples
///
/// ```
/// use memory_manager::HeapConfig;
///
/// let config = HeapConfig::default().with_heap_size(1 << 20);
/// assert_eq!(config.threshold(), 1 << 19);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Total bytes of both semi-spaces
    pub heap_size: usize,
}

impl HeapConfig {
    /// Sets the total heap size.
    pub fn with_heap_size(mut self, heap_size: usize) -> Self {
        self.heap_size = heap_size;
        self
    }

    /// Bytes available in one semi-space, rounded down to whole words.
    pub fn threshold(&self) -> usize {
        (self.heap_size / 2) & !7
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            heap_size: DEFAULT_HEAP_SIZE,
        }
    }
}
