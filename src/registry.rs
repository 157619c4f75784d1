use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use crate::loader::Loader;

/// The live loaders of one unit of work (typically one inbound request), one per entity kind.
///
/// A request handler builds a `LoaderSet` through its [`LoaderFactory`], attaches it to the
/// request (extensions, resolver context, ...) and resolvers look up the loader for their entity
/// with [`LoaderSet::get`]. Loaders are keyed by their `(K, V, E)` types, so two entity kinds
/// sharing the same key and value types need distinct newtypes.
#[derive(Default)]
pub struct LoaderSet {
    loaders: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl LoaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `loader`, returning the loader it replaced for the same `(K, V, E)` types, if any.
    pub fn insert<K, V, E>(&mut self, loader: Loader<K, V, E>) -> Option<Loader<K, V, E>>
    where
        K: 'static,
        V: 'static,
        E: 'static,
        Loader<K, V, E>: Send + Sync,
    {
        self.loaders
            .insert(TypeId::of::<Loader<K, V, E>>(), Box::new(loader))
            .and_then(|previous| previous.downcast::<Loader<K, V, E>>().ok())
            .map(|previous| *previous)
    }

    /// Builder form of [`LoaderSet::insert`].
    #[must_use]
    pub fn with<K, V, E>(mut self, loader: Loader<K, V, E>) -> Self
    where
        K: 'static,
        V: 'static,
        E: 'static,
        Loader<K, V, E>: Send + Sync,
    {
        self.insert(loader);
        self
    }

    pub fn get<K, V, E>(&self) -> Option<&Loader<K, V, E>>
    where
        K: 'static,
        V: 'static,
        E: 'static,
    {
        self.loaders
            .get(&TypeId::of::<Loader<K, V, E>>())
            .and_then(|loader| loader.downcast_ref::<Loader<K, V, E>>())
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

impl fmt::Debug for LoaderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderSet").field("loaders", &self.loaders.len()).finish()
    }
}

/// Builds the loaders for one unit of work.
///
/// Call [`LoaderFactory::build`] once per request and drop the set with it; never keep a set in a
/// global, or cached values would be shared across unrelated requests.
pub trait LoaderFactory: Send + Sync {
    fn build(&self) -> LoaderSet;
}

impl<F> LoaderFactory for F
where
    F: Fn() -> LoaderSet + Send + Sync,
{
    fn build(&self) -> LoaderSet {
        self()
    }
}
