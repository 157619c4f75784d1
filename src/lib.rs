mod batch;
mod batch_function;
mod cache;
mod config;
mod error;
mod loader;
#[cfg(feature = "stats")]
mod loader_stats;
mod registry;

pub use batch_function::{BatchFn, BatchFunction, Fetched};
pub use cache::Cache;
pub use config::LoaderConfig;
pub use error::LoadError;
pub use loader::{Loader, Thunk};
#[cfg(feature = "stats")]
pub use loader_stats::LoaderStats;
pub use registry::{LoaderFactory, LoaderSet};
