use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

/// A `BatchFunction` defines the method through which some `Loader` fetches batched data from
/// some resource. It receives every key collected during one batch window, in arrival order, and
/// answers them all in one round trip.
///
/// The answer is positional: `values[i]` and `errors[i]` belong to `keys[i]`. See [`Fetched`] for
/// the accepted shapes.
///
/// Implementors carry whatever context they need (a connection pool, a client). Multiple
/// `BatchFunction`s, and therefore loaders, can share the same context through an `Arc`.
#[async_trait]
pub trait BatchFunction<K, V>: Send + Sync + 'static {
    type Error: Clone + Send + Sync + 'static;

    async fn load(&self, keys: &[K]) -> Fetched<V, Self::Error>;
}

/// The positional result of one batch fetch.
///
/// * `values` holds exactly one entry per key; `None` means the key was not found, which is a
///   successful result. The only exception is a batch that failed as a whole (see
///   [`Fetched::failed`]), whose values are ignored. Any other length fails every load of that
///   batch with [`LoadError::ValueShape`](crate::LoadError::ValueShape).
/// * `errors` is either empty (no errors), a single error shared by every key of the batch, or
///   exactly one entry per key. Any other length is a bug in the batch function and fails every
///   load of that batch with [`LoadError::ErrorShape`](crate::LoadError::ErrorShape).
#[derive(Debug, Clone)]
pub struct Fetched<V, E> {
    pub values: Vec<Option<V>>,
    pub errors: Vec<Option<E>>,
}

impl<V, E> Fetched<V, E> {
    pub fn new(values: Vec<Option<V>>, errors: Vec<Option<E>>) -> Self {
        Self { values, errors }
    }

    /// Every key succeeded.
    pub fn ok(values: Vec<Option<V>>) -> Self {
        Self { values, errors: Vec::new() }
    }

    /// The whole batch failed with `error`.
    pub fn failed(error: E) -> Self {
        Self { values: Vec::new(), errors: vec![Some(error)] }
    }

    /// One outcome per key.
    pub fn per_key<I>(results: I) -> Self
    where
        I: IntoIterator<Item = Result<Option<V>, E>>,
    {
        let (values, errors) = results
            .into_iter()
            .map(|result| match result {
                Ok(value) => (value, None),
                Err(e) => (None, Some(e)),
            })
            .unzip();
        Self { values, errors }
    }
}

/// Adapts a closure into a [`BatchFunction`].
///
/// ```ignore
/// let fetch = BatchFn::new(|keys: Vec<i64>| async move {
///     Fetched::<String, MyError>::ok(keys.iter().map(|k| Some(k.to_string())).collect())
/// });
/// ```
pub struct BatchFn<F, K, V, E> {
    f: F,
    _marker: PhantomData<fn(K) -> (V, E)>,
}

impl<F, K, V, E> BatchFn<F, K, V, E> {
    pub fn new(f: F) -> Self {
        Self { f, _marker: PhantomData }
    }
}

#[async_trait]
impl<F, Fut, K, V, E> BatchFunction<K, V> for BatchFn<F, K, V, E>
where
    F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Fetched<V, E>> + Send + 'static,
    K: Clone + Send + Sync + 'static,
    V: Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    type Error = E;

    async fn load(&self, keys: &[K]) -> Fetched<V, E> {
        (self.f)(keys.to_vec()).await
    }
}
