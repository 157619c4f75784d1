use thiserror::Error;

/// Error returned to the caller of a load for one particular key.
///
/// `E` is the error type of the [`BatchFunction`](crate::BatchFunction) backing the loader. It has
/// to be `Clone` because a single failure may be handed to every key of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError<E> {
    /// The batch function reported an error for this key, either one of its own or one shared by
    /// the whole batch.
    #[error(transparent)]
    Fetch(E),

    /// The batch function returned an error list that is neither empty, a single shared error, nor
    /// one entry per key.
    #[error("batch function returned {errors} errors for {keys} keys")]
    ErrorShape { keys: usize, errors: usize },

    /// The batch function returned a value list that does not hold exactly one entry per key.
    #[error("batch function returned {values} values for {keys} keys")]
    ValueShape { keys: usize, values: usize },

    /// The batch owning this key went away before it produced a result.
    #[error("batch was dropped before it resolved")]
    Dropped,
}

impl<E> LoadError<E> {
    /// Returns the batch function's error, if this is one.
    pub fn fetch_error(&self) -> Option<&E> {
        match self {
            LoadError::Fetch(e) => Some(e),
            _ => None,
        }
    }
}
