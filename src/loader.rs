use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{self, BoxFuture, FutureExt, JoinAll};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing_futures::Instrument;

#[cfg(feature = "stats")]
use crate::loader_stats::LoaderStats;
use crate::{
    batch::{BatchFuture, ClosingBatch, OpenBatch, Resolution},
    batch_function::BatchFunction,
    cache::Cache,
    config::LoaderConfig,
    error::LoadError,
};

type DynCache<K, V> = Box<dyn Cache<K = K, V = Option<V>>>;

/// Batch loads values from some expensive resource, primarily intended for mitigating GraphQL's
/// N+1 problem.
///
/// Every [`Loader::load`] that misses the cache enrolls its key into the currently open batch. A
/// batch closes when its wait window (started by its first key) expires, or as soon as it holds
/// [`LoaderConfig::max_batch`] keys, whichever comes first. A closed batch calls its
/// [`BatchFunction`] exactly once with all of its keys in arrival order; the results are handed
/// back to every caller by position and the successful ones are cached.
///
/// A loader is meant to live for one unit of work, typically one inbound request: its cache is
/// never evicted and must not leak between unrelated requests. Build a fresh set of loaders per
/// request (see [`LoaderFactory`](crate::LoaderFactory)).
///
/// Clones are cheap and share the same cache and batches.
///
/// # Panics
///
/// Loads that miss the cache spawn Tokio tasks (the batch timer, the fetch of a full batch) and
/// therefore panic outside of a Tokio runtime.
pub struct Loader<K, V, E> {
    inner: Arc<Inner<K, V, E>>,
}

impl<K, V, E> Clone for Loader<K, V, E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct Inner<K, V, E> {
    fetch: Arc<dyn BatchFunction<K, V, Error = E>>,
    config: LoaderConfig,
    // Guards bookkeeping only. Never held across a fetch or while a caller waits on a batch.
    state: Mutex<State<K, V, E>>,
    debug_name: &'static str,
}

struct State<K, V, E> {
    cache: DynCache<K, V>,
    batch: Option<OpenBatch<K, V, E>>,
    next_batch_id: u64,
    #[cfg(feature = "stats")]
    stats: LoaderStats,
}

#[cfg(feature = "stats")]
impl<K, V, E> Drop for State<K, V, E> {
    fn drop(&mut self) {
        if self.stats.load_requests > 0 {
            tracing::debug!(loader_stats = ?self.stats);
        }
    }
}

impl<K, V, E> Loader<K, V, E>
where
    K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
    V: 'static + Clone + Send + Sync,
    E: 'static + Clone + Send + Sync,
{
    /// Creates a new Loader backed by `fetch`, caching into a `HashMap`.
    pub fn new<F>(fetch: F, config: LoaderConfig) -> Self
    where
        F: BatchFunction<K, V, Error = E>,
    {
        Self::with_cache(fetch, config, HashMap::<K, Option<V>>::new())
    }

    /// Creates a new Loader backed by `fetch`, caching into `cache`.
    pub fn with_cache<F, C>(fetch: F, config: LoaderConfig, cache: C) -> Self
    where
        F: BatchFunction<K, V, Error = E>,
        C: Cache<K = K, V = Option<V>> + 'static,
    {
        let debug_name = std::any::type_name::<(K, V)>();
        Self {
            inner: Arc::new(Inner {
                fetch: Arc::new(fetch),
                config,
                state: Mutex::new(State {
                    cache: Box::new(cache),
                    batch: None,
                    next_batch_id: 0,
                    #[cfg(feature = "stats")]
                    stats: LoaderStats::new(debug_name),
                }),
                debug_name,
            }),
        }
    }

    pub fn config(&self) -> LoaderConfig {
        self.inner.config
    }

    /// Loads a value from the underlying resource.
    ///
    /// Returns `Ok(None)` if the batch function reported the key as not found. A cache hit
    /// resolves without touching any batch.
    pub async fn load(&self, key: K) -> Result<Option<V>, LoadError<E>> {
        self.load_thunk(key).await
    }

    /// Enrolls `key` right away and returns a [`Thunk`] that resolves once its batch does.
    ///
    /// Enrolling many keys, possibly across several loaders, before awaiting any of the thunks is
    /// what lets them share batches.
    ///
    /// If `key` fills the open batch up to [`LoaderConfig::max_batch`], this call closes the batch
    /// and starts its fetch before returning; every member of the batch, this one included, waits
    /// on that same fetch.
    pub fn load_thunk(&self, key: K) -> Thunk<V, E> {
        #[cfg(feature = "stats")]
        self.inner.state.lock().stats.record_load_request();
        self.enroll(key)
    }

    /// Loads many values at once. Results are in the order of `keys`.
    pub async fn load_many<I>(&self, keys: I) -> Vec<Result<Option<V>, LoadError<E>>>
    where
        I: IntoIterator<Item = K>,
    {
        self.load_many_thunk(keys).await
    }

    /// Enrolls every key right away; the returned future resolves once all of them have.
    pub fn load_many_thunk<I>(&self, keys: I) -> JoinAll<Thunk<V, E>>
    where
        I: IntoIterator<Item = K>,
    {
        #[cfg(feature = "stats")]
        self.inner.state.lock().stats.record_load_request();
        future::join_all(keys.into_iter().map(|key| self.enroll(key)))
    }

    #[tracing::instrument(level = "trace", skip(self), fields(loader = self.inner.debug_name))]
    fn enroll(&self, key: K) -> Thunk<V, E> {
        let mut state = self.inner.state.lock();
        if let Some(value) = state.cache.lookup(&key) {
            let value = value.clone();
            #[cfg(feature = "stats")]
            state.stats.record_item_request(true);
            return Thunk::ready(Ok(value));
        }
        #[cfg(feature = "stats")]
        state.stats.record_item_request(false);

        let mut batch = match state.batch.take() {
            Some(batch) => batch,
            None => {
                let id = state.next_batch_id;
                state.next_batch_id += 1;
                open_batch(&self.inner, id)
            }
        };
        let batch_id = batch.id();
        let slot = batch.key_index(key);
        let resolved = batch.resolved();
        let full = if slot.inserted && self.inner.config.is_full(slot.position) {
            tracing::debug!(batch = batch_id, keys = batch.len(), "batch full, closing early");
            Some(batch.close())
        } else {
            state.batch = Some(batch);
            None
        };
        drop(state);

        if slot.inserted && slot.position == 0 {
            start_timer(&self.inner, batch_id);
        }
        if let Some(closing) = full {
            flush(self.inner.debug_name, closing);
        }
        Thunk::pending(resolved, slot.position)
    }

    /// Adds a value to the cache unless the key is already cached.
    ///
    /// Returns `false`, leaving the cached value untouched, if the key was present.
    pub fn prime(&self, key: K, value: V) -> bool {
        self.inner.state.lock().cache.insert_if_absent(key, Some(value))
    }

    /// Adds many values to the cache at once. Returns how many were inserted.
    pub fn prime_many<I>(&self, key_vals: I) -> usize
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut state = self.inner.state.lock();
        key_vals
            .into_iter()
            .map(|(key, value)| state.cache.insert_if_absent(key, Some(value)))
            .filter(|inserted| *inserted)
            .count()
    }

    /// Removes a value from the cache.
    ///
    /// This key will be reloaded when it is next requested.
    pub fn clear(&self, key: &K) {
        self.inner.state.lock().cache.remove(key);
    }

    /// Removes multiple values from the cache at once.
    pub fn clear_many(&self, keys: &[K]) {
        let mut state = self.inner.state.lock();
        for key in keys {
            state.cache.remove(key);
        }
    }

    /// Empties the cache.
    pub fn clear_all(&self) {
        self.inner.state.lock().cache.flush();
    }

    pub fn is_cached(&self, key: &K) -> bool {
        self.inner.state.lock().cache.lookup(key).is_some()
    }

    #[cfg(feature = "stats")]
    pub fn stats(&self) -> LoaderStats {
        self.inner.state.lock().stats.clone()
    }
}

impl<K, V, E> Inner<K, V, E>
where
    K: Eq + Hash + Clone,
{
    /// Takes the open batch out of the loader if it is still batch `id`.
    fn close_if_open(&self, id: u64) -> Option<ClosingBatch<V, E>> {
        let mut state = self.state.lock();
        match state.batch.take() {
            Some(batch) if batch.id() == id => Some(batch.close()),
            other => {
                state.batch = other;
                None
            }
        }
    }

    /// Caches every successful key of a finished batch.
    fn store(&self, keys: &[K], resolution: &Resolution<V, E>)
    where
        V: Clone,
    {
        let mut state = self.state.lock();
        let (mut loaded, mut cached) = (0, 0);
        if !resolution.is_failed() {
            for (position, key) in keys.iter().enumerate() {
                if !resolution.is_ok_at(position) {
                    continue;
                }
                let value = resolution.value_at(position).cloned();
                if value.is_some() {
                    loaded += 1;
                }
                if state.cache.insert_if_absent(key.clone(), value) {
                    cached += 1;
                }
            }
        }
        #[cfg(feature = "stats")]
        state.stats.record_batch(keys.len(), resolution.is_failed(), loaded, cached);
        tracing::debug!(loader = self.debug_name, keys = keys.len(), loaded, cached, "batch stored");
    }
}

fn open_batch<K, V, E>(inner: &Arc<Inner<K, V, E>>, id: u64) -> OpenBatch<K, V, E>
where
    K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
    V: 'static + Clone + Send + Sync,
    E: 'static + Clone + Send + Sync,
{
    let (close_tx, close_rx) = oneshot::channel::<Vec<K>>();
    let fetch = Arc::clone(&inner.fetch);
    let owner = Arc::downgrade(inner);
    let debug_name = inner.debug_name;

    let resolved: BatchFuture<V, E> = async move {
        let keys = close_rx.await.map_err(|_| LoadError::Dropped)?;
        let resolution = execute(fetch.as_ref(), &keys, debug_name, id).await;
        // A loader dropped mid-fetch still answers its waiters; there is just no cache to fill.
        if let Some(owner) = owner.upgrade() {
            owner.store(&keys, &resolution);
        }
        Ok::<_, LoadError<E>>(Arc::new(resolution))
    }
    .boxed()
    .shared();

    OpenBatch::new(id, close_tx, resolved)
}

#[tracing::instrument(skip_all, fields(loader = debug_name, batch = id, keys = keys.len()))]
async fn execute<K, V, E>(
    fetch: &dyn BatchFunction<K, V, Error = E>,
    keys: &[K],
    debug_name: &'static str,
    id: u64,
) -> Resolution<V, E>
where
    K: 'static + Debug + Send + Sync,
    V: 'static + Send + Sync,
    E: 'static + Clone + Send + Sync,
{
    tracing::debug!(?keys, "executing batch");
    let fetched = fetch.load(keys).await;
    Resolution::new(keys.len(), fetched)
}

/// Sleeps for the batch window, then closes batch `id` and runs its fetch unless the size limit
/// already closed it.
fn start_timer<K, V, E>(inner: &Arc<Inner<K, V, E>>, id: u64)
where
    K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
    V: 'static + Clone + Send + Sync,
    E: 'static + Clone + Send + Sync,
{
    let inner = Arc::clone(inner);
    let span = tracing::debug_span!("batch_timer", loader = inner.debug_name, batch = id);
    tokio::spawn(
        async move {
            tokio::time::sleep(inner.config.wait).await;
            let closing = inner.close_if_open(id);
            drop(inner);
            match closing {
                Some(closing) => closing.end().await,
                None => tracing::trace!("batch already closed"),
            }
        }
        .instrument(span),
    );
}

/// Runs the fetch of a batch closed by its size limit without waiting for any thunk to be awaited.
fn flush<V, E>(debug_name: &'static str, closing: ClosingBatch<V, E>)
where
    V: 'static + Clone + Send + Sync,
    E: 'static + Clone + Send + Sync,
{
    let span = tracing::debug_span!("batch_flush", loader = debug_name, batch = closing.id());
    tokio::spawn(closing.end().instrument(span));
}

/// A deferred load: resolves to the value (or error) of one key once its batch has resolved.
///
/// The key is already enrolled when the thunk is created; awaiting it only waits.
#[must_use = "a thunk only hands over its result when awaited"]
pub struct Thunk<V, E> {
    inner: BoxFuture<'static, Result<Option<V>, LoadError<E>>>,
}

impl<V, E> Thunk<V, E>
where
    V: 'static + Clone + Send + Sync,
    E: 'static + Clone + Send + Sync,
{
    fn ready(result: Result<Option<V>, LoadError<E>>) -> Self {
        Self { inner: future::ready(result).boxed() }
    }

    fn pending(resolved: BatchFuture<V, E>, position: usize) -> Self {
        Self { inner: async move { resolved.await?.get(position) }.boxed() }
    }
}

impl<V, E> Future for Thunk<V, E> {
    type Output = Result<Option<V>, LoadError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}
