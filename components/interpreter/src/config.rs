//! Engine configuration.

use memory_manager::HeapConfig;

/// Default interpreter stack size in words: one million six-word frames.
pub const DEFAULT_STACK_WORDS: usize = 6_000_000;

/// Default native stack of spawned interpreter threads.
pub const DEFAULT_NATIVE_STACK_BYTES: usize = 256 << 20;

/// Environment variable overriding [`HeapConfig::heap_size`].
pub const HEAP_SIZE_VARIABLE: &str = "EMOJI_ENGINE_HEAP_SIZE";

/// Environment variable overriding [`EngineConfig::stack_words`].
pub const STACK_WORDS_VARIABLE: &str = "EMOJI_ENGINE_STACK_WORDS";

/// Sizes of the heap and of every interpreter thread's stacks.
///
/// # Examples
///
/// ```
/// use interpreter::EngineConfig;
///
/// let config = EngineConfig::default()
///     .with_heap_size(1 << 20)
///     .with_stack_words(4096);
/// assert_eq!(config.heap.threshold(), 1 << 19);
/// assert_eq!(config.stack_words, 4096);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Managed heap size
    pub heap: HeapConfig,
    /// Words in each thread's interpreter stack
    pub stack_words: usize,
    /// Bytes of native stack for threads the engine starts
    pub native_stack_bytes: usize,
}

impl EngineConfig {
    /// The defaults, with overrides read from the environment.
    ///
    /// Unparsable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(heap_size) = read_variable(HEAP_SIZE_VARIABLE) {
            config = config.with_heap_size(heap_size);
        }
        if let Some(stack_words) = read_variable(STACK_WORDS_VARIABLE) {
            config = config.with_stack_words(stack_words);
        }
        config
    }

    /// Sets the total heap size in bytes.
    pub fn with_heap_size(mut self, heap_size: usize) -> Self {
        self.heap = self.heap.with_heap_size(heap_size);
        self
    }

    /// Sets the interpreter stack size in words.
    pub fn with_stack_words(mut self, stack_words: usize) -> Self {
        self.stack_words = stack_words;
        self
    }

    /// Sets the native stack size of engine-started threads.
    pub fn with_native_stack_bytes(mut self, bytes: usize) -> Self {
        self.native_stack_bytes = bytes;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heap: HeapConfig::default(),
            stack_words: DEFAULT_STACK_WORDS,
            native_stack_bytes: DEFAULT_NATIVE_STACK_BYTES,
        }
    }
}

fn read_variable(name: &str) -> Option<usize> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "ignoring malformed override");
            None
        }
    }
}
