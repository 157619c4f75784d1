/// Counters describing how well a loader batched and cached its loads.
///
/// Only collected with the `stats` feature. They are reported as a `tracing` debug event when the
/// loader is dropped and can be read at any time through `Loader::stats`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoaderStats {
    /// Human readable name used to identify these stats when they are reported.
    pub tag: &'static str,
    /// Number of `load`, `load_thunk` and `load_many` calls. A `load_many` counts once.
    pub load_requests: u64,
    /// The total number of keys that were requested for loading (not necessarily unique).
    pub items_requested: u64,
    /// The number of keys that were immediately found in the loader cache.
    pub cache_hits: u64,
    /// Number of batches whose fetch completed.
    pub batches: u64,
    /// Number of completed batches that failed as a whole (shared error, or a malformed error or
    /// value list).
    pub failed_batches: u64,
    /// The average number of unique keys per batch.
    pub average_batch_size: f64,
    /// The max number of unique keys fetched by a single batch.
    pub max_batch_size: usize,
    /// The min number of unique keys fetched by a single batch.
    pub min_batch_size: usize,
    /// The total number of keys a batch function actually found a value for.
    pub items_loaded: u64,
    /// The total number of keys whose result was written to the cache.
    pub items_cached: u64,
}

impl LoaderStats {
    pub fn new(tag: &'static str) -> Self {
        Self { tag, min_batch_size: usize::MAX, ..Default::default() }
    }

    pub fn record_load_request(&mut self) {
        self.load_requests += 1;
    }

    pub fn record_item_request(&mut self, cache_hit: bool) {
        self.items_requested += 1;
        if cache_hit {
            self.cache_hits += 1;
        }
    }

    pub fn record_batch(&mut self, batch_size: usize, failed: bool, loaded: usize, cached: usize) {
        let new_total = self.batches + 1;
        self.average_batch_size =
            (self.average_batch_size * self.batches as f64 + batch_size as f64) / new_total as f64;
        self.batches = new_total;
        self.max_batch_size = self.max_batch_size.max(batch_size);
        self.min_batch_size = self.min_batch_size.min(batch_size);
        if failed {
            self.failed_batches += 1;
        }
        self.items_loaded += loaded as u64;
        self.items_cached += cached as u64;
    }
}
