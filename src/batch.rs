use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use tokio::sync::oneshot;

use crate::{batch_function::Fetched, error::LoadError};

/// Completion signal of one batch. Every enrolled caller holds a clone and reads its own position
/// out of the resolution once it is ready. Whichever holder polls first drives the fetch.
pub(crate) type BatchFuture<V, E> =
    Shared<BoxFuture<'static, Result<Arc<Resolution<V, E>>, LoadError<E>>>>;

/// A batch that still accepts keys. Lives in the loader state behind its mutex; at most one exists
/// per loader.
pub(crate) struct OpenBatch<K, V, E> {
    id: u64,
    keys: Vec<K>,
    positions: HashMap<K, usize>,
    close_tx: oneshot::Sender<Vec<K>>,
    resolved: BatchFuture<V, E>,
}

/// Where a key landed in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slot {
    pub position: usize,
    /// The key was not already part of the batch.
    pub inserted: bool,
}

impl<K, V, E> OpenBatch<K, V, E>
where
    K: Eq + Hash + Clone,
{
    /// `close_tx` releases the key list to the future behind `resolved`.
    pub fn new(id: u64, close_tx: oneshot::Sender<Vec<K>>, resolved: BatchFuture<V, E>) -> Self {
        Self { id, keys: Vec::new(), positions: HashMap::new(), close_tx, resolved }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn resolved(&self) -> BatchFuture<V, E> {
        self.resolved.clone()
    }

    /// Appends `key` unless it is already enrolled and returns its position. Positions never
    /// change once assigned.
    pub fn key_index(&mut self, key: K) -> Slot {
        if let Some(&position) = self.positions.get(&key) {
            return Slot { position, inserted: false };
        }
        let position = self.keys.len();
        self.positions.insert(key.clone(), position);
        self.keys.push(key);
        Slot { position, inserted: true }
    }

    /// Stops key intake and hands the key list to the fetch.
    pub fn close(self) -> ClosingBatch<V, E> {
        let len = self.keys.len();
        if self.close_tx.send(self.keys).is_err() {
            tracing::debug!(batch = self.id, "every waiter of the batch is gone");
        }
        ClosingBatch { id: self.id, len, resolved: self.resolved }
    }
}

/// A batch that no longer accepts keys and whose fetch has not completed yet.
pub(crate) struct ClosingBatch<V, E> {
    id: u64,
    len: usize,
    resolved: BatchFuture<V, E>,
}

impl<V, E> ClosingBatch<V, E>
where
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Runs the fetch to completion unless another waiter is already driving it.
    pub async fn end(self) {
        tracing::debug!(batch = self.id, keys = self.len, "flushing batch");
        match self.resolved.await {
            Ok(resolution) => {
                tracing::debug!(batch = self.id, failed = resolution.is_failed(), "batch resolved")
            }
            Err(_) => tracing::debug!(batch = self.id, "batch dropped before it resolved"),
        }
    }
}

/// The error list returned by a batch function, decoded once per batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ErrorShape<E> {
    None,
    Shared(E),
    PerKey(Vec<Option<E>>),
    Invalid { keys: usize, errors: usize },
    /// The error list was fine but the value list does not line up with the keys.
    InvalidValues { keys: usize, values: usize },
}

impl<E> ErrorShape<E> {
    pub fn decode(keys: usize, mut errors: Vec<Option<E>>) -> Self {
        match errors.len() {
            0 => ErrorShape::None,
            1 => match errors.pop().flatten() {
                Some(e) => ErrorShape::Shared(e),
                None => ErrorShape::None,
            },
            n if n == keys => ErrorShape::PerKey(errors),
            n => ErrorShape::Invalid { keys, errors: n },
        }
    }
}

/// The outcome of one fetch, indexed by key position.
#[derive(Debug)]
pub(crate) struct Resolution<V, E> {
    values: Vec<Option<V>>,
    errors: ErrorShape<E>,
}

impl<V, E> Resolution<V, E> {
    /// A shared error needs no values; every other shape needs exactly one value per key.
    pub fn new(keys: usize, fetched: Fetched<V, E>) -> Self {
        let errors = match ErrorShape::decode(keys, fetched.errors) {
            ErrorShape::Invalid { keys, errors } => {
                tracing::error!(keys, errors, "batch function returned an invalid number of errors");
                ErrorShape::Invalid { keys, errors }
            }
            ErrorShape::None | ErrorShape::PerKey(_) if fetched.values.len() != keys => {
                let values = fetched.values.len();
                tracing::error!(keys, values, "batch function returned an invalid number of values");
                ErrorShape::InvalidValues { keys, values }
            }
            errors => errors,
        };
        Self { values: fetched.values, errors }
    }

    /// Nothing from this batch may be cached.
    pub fn is_failed(&self) -> bool {
        matches!(
            self.errors,
            ErrorShape::Shared(_) | ErrorShape::Invalid { .. } | ErrorShape::InvalidValues { .. }
        )
    }

    pub fn is_ok_at(&self, position: usize) -> bool {
        match &self.errors {
            ErrorShape::None => true,
            ErrorShape::PerKey(errors) => errors.get(position).map_or(true, Option::is_none),
            ErrorShape::Shared(_)
            | ErrorShape::Invalid { .. }
            | ErrorShape::InvalidValues { .. } => false,
        }
    }

    pub fn value_at(&self, position: usize) -> Option<&V> {
        self.values.get(position).and_then(Option::as_ref)
    }
}

impl<V: Clone, E: Clone> Resolution<V, E> {
    pub fn get(&self, position: usize) -> Result<Option<V>, LoadError<E>> {
        match &self.errors {
            ErrorShape::Shared(e) => Err(LoadError::Fetch(e.clone())),
            ErrorShape::Invalid { keys, errors } => {
                Err(LoadError::ErrorShape { keys: *keys, errors: *errors })
            }
            ErrorShape::InvalidValues { keys, values } => {
                Err(LoadError::ValueShape { keys: *keys, values: *values })
            }
            ErrorShape::PerKey(errors) => match errors.get(position) {
                Some(Some(e)) => Err(LoadError::Fetch(e.clone())),
                _ => Ok(self.value_at(position).cloned()),
            },
            ErrorShape::None => Ok(self.value_at(position).cloned()),
        }
    }
}
