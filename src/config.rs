use std::time::Duration;

/// Batching parameters of a `Loader`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    /// How long a batch collects keys after its first key arrives.
    pub wait: Duration,
    /// Closes a batch as soon as it holds this many keys. `0` disables the limit, leaving the wait
    /// timer as the only close trigger.
    pub max_batch: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self { wait: Duration::from_millis(1), max_batch: 0 }
    }
}

impl LoaderConfig {
    /// Specify the batch window, the default is `1ms`.
    #[must_use]
    pub fn wait(self, wait: Duration) -> Self {
        Self { wait, ..self }
    }

    /// Specify the max batch size, the default is `0` (unlimited).
    #[must_use]
    pub fn max_batch(self, max_batch: usize) -> Self {
        Self { max_batch, ..self }
    }

    /// Whether a batch that just assigned `position` is full.
    pub(crate) fn is_full(&self, position: usize) -> bool {
        self.max_batch != 0 && position + 1 >= self.max_batch
    }
}
