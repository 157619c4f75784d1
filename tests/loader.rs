use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use batchload::{BatchFunction, Fetched, LoadError, Loader, LoaderConfig};
use futures::future;
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
struct FetchError(String);

type Calls<K> = Arc<Mutex<Vec<Vec<K>>>>;

/// Answers with `respond` and remembers every key list it was called with.
struct Recording<K, F> {
    calls: Calls<K>,
    respond: F,
}

#[async_trait]
impl<K, V, E, F> BatchFunction<K, V> for Recording<K, F>
where
    K: Clone + Send + Sync + 'static,
    V: Send + 'static,
    E: Clone + Send + Sync + 'static,
    F: Fn(&[K]) -> Fetched<V, E> + Send + Sync + 'static,
{
    type Error = E;

    async fn load(&self, keys: &[K]) -> Fetched<V, E> {
        self.calls.lock().push(keys.to_vec());
        (self.respond)(keys)
    }
}

fn loader<K, V, F>(config: LoaderConfig, respond: F) -> (Loader<K, V, FetchError>, Calls<K>)
where
    K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
    V: 'static + Clone + Send + Sync,
    F: Fn(&[K]) -> Fetched<V, FetchError> + Send + Sync + 'static,
{
    let calls: Calls<K> = Arc::default();
    let loader = Loader::new(Recording { calls: calls.clone(), respond }, config);
    (loader, calls)
}

fn fish() -> HashMap<i64, String> {
    [(42, "one fish"), (12, "two fish"), (5, "red fish"), (8, "blue fish")]
        .into_iter()
        .map(|(k, v)| (k, v.to_owned()))
        .collect()
}

fn fish_loader(config: LoaderConfig) -> (Loader<i64, String, FetchError>, Calls<i64>) {
    let data = fish();
    loader(config, move |keys: &[i64]| {
        Fetched::ok(keys.iter().map(|k| data.get(k).cloned()).collect())
    })
}

fn window() -> LoaderConfig {
    LoaderConfig::default().wait(Duration::from_millis(10))
}

#[tokio::test(start_paused = true)]
async fn basic_load() {
    let (loader, _) = fish_loader(window());
    assert_eq!(loader.load(42).await, Ok(Some("one fish".to_owned())));
}

#[tokio::test(start_paused = true)]
async fn repeated_load_fetches_once() {
    let (loader, calls) = fish_loader(window());
    assert_eq!(loader.load(42).await, Ok(Some("one fish".to_owned())));
    assert_eq!(loader.load(42).await, Ok(Some("one fish".to_owned())));
    assert_eq!(*calls.lock(), vec![vec![42]]);
}

#[tokio::test(start_paused = true)]
async fn not_found_is_cached() {
    let (loader, calls) = fish_loader(window());
    assert_eq!(loader.load(99).await, Ok(None));
    assert!(loader.is_cached(&99));
    assert_eq!(loader.load(99).await, Ok(None));
    assert_eq!(calls.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn basic_load_many() {
    let (loader, calls) = fish_loader(window());
    assert_eq!(
        loader.load_many(vec![5, 12, 8]).await,
        vec![
            Ok(Some("red fish".to_owned())),
            Ok(Some("two fish".to_owned())),
            Ok(Some("blue fish".to_owned()))
        ]
    );
    assert_eq!(*calls.lock(), vec![vec![5, 12, 8]]);
}

#[tokio::test(start_paused = true)]
async fn load_async() {
    let (loader, calls) = fish_loader(window());

    let tuple = future::join4(
        loader.load(5),
        loader.load_many(vec![5, 42]),
        loader.load(99),
        loader.load(12),
    );

    assert_eq!(
        tuple.await,
        (
            Ok(Some("red fish".to_owned())),
            vec![Ok(Some("red fish".to_owned())), Ok(Some("one fish".to_owned()))],
            Ok(None),
            Ok(Some("two fish".to_owned()))
        )
    );
    assert_eq!(*calls.lock(), vec![vec![5, 42, 99, 12]]);
}

#[tokio::test(start_paused = true)]
async fn primed_keys_skip_the_fetch() {
    let (loader, calls) = fish_loader(window());
    assert!(loader.prime(42, "primed fish".to_owned()));
    assert!(!loader.prime(42, "other fish".to_owned()));
    assert_eq!(loader.prime_many(vec![(42, "again".to_owned()), (7, "seven".to_owned())]), 1);

    assert_eq!(loader.load(42).await, Ok(Some("primed fish".to_owned())));
    assert_eq!(loader.load(7).await, Ok(Some("seven".to_owned())));
    assert!(calls.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrent_loads_share_one_batch() {
    let (loader, calls) = fish_loader(window().max_batch(10));

    let handles = (0..10)
        .map(|key| {
            let loader = loader.clone();
            tokio::spawn(async move { loader.load(key).await })
        })
        .collect::<Vec<_>>();
    for handle in future::join_all(handles).await {
        assert!(handle.expect("load task panicked").is_ok());
    }

    let calls = calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], (0..10).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn duplicate_keys_in_a_batch_are_fetched_once() {
    let (loader, calls) = fish_loader(window());
    let results = loader.load_many(vec![8, 8, 5, 8]).await;
    assert_eq!(results[0], Ok(Some("blue fish".to_owned())));
    assert_eq!(results[3], Ok(Some("blue fish".to_owned())));
    assert_eq!(*calls.lock(), vec![vec![8, 5]]);
}

#[tokio::test(start_paused = true)]
async fn max_batch_splits_batches() {
    let (loader, calls) = fish_loader(window().max_batch(3));
    let results = loader.load_many(vec![1, 2, 3, 4]).await;
    assert_eq!(results.len(), 4);

    let calls = calls.lock();
    assert!(calls.len() >= 2);
    assert!(calls.iter().all(|keys| keys.len() <= 3));
    assert_eq!(calls.concat(), vec![1, 2, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn full_batch_closes_early_and_remainder_waits_for_timer() {
    let (loader, calls) = loader(
        LoaderConfig::default().wait(Duration::from_millis(10)).max_batch(2),
        |keys: &[&'static str]| Fetched::ok(keys.iter().map(|k| Some(k.to_uppercase())).collect()),
    );

    let start = tokio::time::Instant::now();
    let (a, b, c) = (loader.load_thunk("a"), loader.load_thunk("b"), loader.load_thunk("c"));

    // "b" filled the first batch, which is fetched before anyone awaits it; "c" is still waiting.
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(*calls.lock(), vec![vec!["a", "b"]]);
    assert!(loader.is_cached(&"a"));
    assert!(!loader.is_cached(&"c"));

    let (a, b, c) = future::join3(a, b, c).await;
    assert_eq!(a, Ok(Some("A".to_owned())));
    assert_eq!(b, Ok(Some("B".to_owned())));
    assert_eq!(c, Ok(Some("C".to_owned())));
    assert!(start.elapsed() >= Duration::from_millis(10));

    assert_eq!(*calls.lock(), vec![vec!["a", "b"], vec!["c"]]);
}

#[tokio::test(start_paused = true)]
async fn full_batch_does_not_wait_for_timer() {
    let (loader, calls) =
        fish_loader(LoaderConfig::default().wait(Duration::from_secs(60)).max_batch(2));

    let start = tokio::time::Instant::now();
    let results = loader.load_many(vec![5, 8]).await;
    assert_eq!(results, vec![Ok(Some("red fish".to_owned())), Ok(Some("blue fish".to_owned()))]);
    assert!(start.elapsed() < Duration::from_secs(60));
    assert_eq!(calls.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn full_batch_is_fetched_even_if_its_thunks_are_dropped() {
    let (loader, calls) =
        fish_loader(LoaderConfig::default().wait(Duration::from_secs(60)).max_batch(2));

    drop(loader.load_thunk(5));
    drop(loader.load_thunk(8));
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(*calls.lock(), vec![vec![5, 8]]);
    assert!(loader.is_cached(&5));
    assert!(loader.is_cached(&8));
    assert_eq!(loader.load(8).await, Ok(Some("blue fish".to_owned())));
    assert_eq!(calls.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn per_key_errors_are_positional() {
    let (loader, _) = loader(window(), |keys: &[i64]| {
        Fetched::per_key(keys.iter().map(|k| {
            if k % 2 == 0 {
                Ok(Some(k * 10))
            } else {
                Err(FetchError(format!("odd key {k}")))
            }
        }))
    });

    let results = loader.load_many(vec![1, 2, 3, 4]).await;
    assert_eq!(
        results,
        vec![
            Err(LoadError::Fetch(FetchError("odd key 1".to_owned()))),
            Ok(Some(20)),
            Err(LoadError::Fetch(FetchError("odd key 3".to_owned()))),
            Ok(Some(40)),
        ]
    );
    assert!(loader.is_cached(&2));
    assert!(!loader.is_cached(&1));
}

#[tokio::test(start_paused = true)]
async fn shared_error_is_broadcast_and_not_cached() {
    let (loader, calls) =
        loader(window(), |_: &[i64]| Fetched::<i64, _>::failed(FetchError("db down".to_owned())));

    let error = Err(LoadError::Fetch(FetchError("db down".to_owned())));
    assert_eq!(
        loader.load_many(vec![1, 2, 3]).await,
        vec![error.clone(), error.clone(), error.clone()]
    );
    assert!(!loader.is_cached(&1));

    // A failed batch leaves nothing behind, so the next load opens a new batch.
    assert_eq!(loader.load(1).await, error);
    assert_eq!(*calls.lock(), vec![vec![1, 2, 3], vec![1]]);
}

#[tokio::test(start_paused = true)]
async fn invalid_error_count_fails_the_batch() {
    let (loader, _) = loader(window(), |keys: &[i64]| {
        Fetched::new(keys.iter().map(|k| Some(*k)).collect(), vec![None, None])
    });

    let error = Err(LoadError::ErrorShape { keys: 3, errors: 2 });
    assert_eq!(loader.load_many(vec![1, 2, 3]).await, vec![error.clone(), error.clone(), error]);
    assert!(!loader.is_cached(&1));
}

#[tokio::test(start_paused = true)]
async fn mismatched_value_count_fails_the_batch() {
    let (loader, calls) = loader(window(), |keys: &[i64]| Fetched::ok(vec![Some(keys[0])]));

    let error = Err(LoadError::ValueShape { keys: 3, values: 1 });
    assert_eq!(loader.load_many(vec![1, 2, 3]).await, vec![error.clone(), error.clone(), error]);
    assert!(!loader.is_cached(&1));
    assert!(!loader.is_cached(&2));

    // Nothing was cached as "not found"; a single key lines up and is fetched again.
    assert_eq!(loader.load(2).await, Ok(Some(2)));
    assert_eq!(*calls.lock(), vec![vec![1, 2, 3], vec![2]]);
}

#[tokio::test(start_paused = true)]
async fn clear_forces_a_new_fetch() {
    let (loader, calls) = fish_loader(window());
    loader.load(42).await.expect("load failed");
    loader.clear(&42);
    assert!(!loader.is_cached(&42));
    loader.load(42).await.expect("load failed");

    loader.load_many(vec![5, 8]).await;
    loader.clear_many(&[5]);
    loader.load_many(vec![5, 8]).await;

    loader.clear_all();
    loader.load(8).await.expect("load failed");

    assert_eq!(*calls.lock(), vec![vec![42], vec![42], vec![5, 8], vec![5], vec![8]]);
}

#[tokio::test(start_paused = true)]
async fn thunks_enroll_before_they_are_awaited() {
    let (listings, listing_calls) = fish_loader(window());
    let (events, event_calls) = loader(window(), |keys: &[u32]| {
        Fetched::ok(keys.iter().map(|k| Some(u64::from(*k) * 2)).collect())
    });

    let thunks = vec![listings.load_thunk(5), listings.load_thunk(8)];
    let event = events.load_thunk(21);

    // The timer closes and fetches both batches even though nothing awaits them yet.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*listing_calls.lock(), vec![vec![5, 8]]);
    assert_eq!(*event_calls.lock(), vec![vec![21]]);

    assert_eq!(event.await, Ok(Some(42)));
    assert_eq!(
        future::join_all(thunks).await,
        vec![Ok(Some("red fish".to_owned())), Ok(Some("blue fish".to_owned()))]
    );
}

#[tokio::test(start_paused = true)]
async fn custom_cache() {
    let data = fish();
    let loader = Loader::with_cache(
        Recording {
            calls: Arc::default(),
            respond: move |keys: &[i64]| {
                Fetched::<_, FetchError>::ok(keys.iter().map(|k| data.get(k).cloned()).collect())
            },
        },
        window(),
        BTreeMap::<i64, Option<String>>::new(),
    );
    assert_eq!(loader.load(12).await, Ok(Some("two fish".to_owned())));
    assert!(loader.is_cached(&12));
}

#[tokio::test(start_paused = true)]
async fn dropped_loader_still_answers_waiters() {
    let (loader, calls) = fish_loader(window());
    let thunk = loader.load_thunk(42);
    drop(loader);
    assert_eq!(thunk.await, Ok(Some("one fish".to_owned())));
    assert_eq!(calls.lock().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_threads_resolve_every_key_once() {
    let config = LoaderConfig::default().wait(Duration::from_millis(5)).max_batch(16);
    let (loader, calls) = loader(config, |keys: &[u32]| {
        Fetched::ok(keys.iter().map(|k| Some(k + 1000)).collect())
    });

    let handles = (0..200u32)
        .map(|key| {
            let loader = loader.clone();
            tokio::spawn(async move { (key, loader.load(key % 50).await) })
        })
        .collect::<Vec<_>>();
    for handle in future::join_all(handles).await {
        let (key, result) = handle.expect("load task panicked");
        assert_eq!(result, Ok(Some(key % 50 + 1000)));
    }

    let calls = calls.lock();
    assert!(calls.iter().all(|keys| keys.len() <= 16));
    let mut fetched = calls.concat();
    fetched.sort_unstable();
    fetched.dedup();
    assert_eq!(fetched, (0..50).collect::<Vec<_>>());
}

#[cfg(feature = "stats")]
#[tokio::test(start_paused = true)]
async fn stats_track_batches_and_hits() {
    let (loader, _) = fish_loader(window());
    // 99 is not found; the second 8 rides along with the first.
    loader.load_many(vec![5, 8, 99, 8]).await;
    loader.load(5).await.expect("load failed");

    let stats = loader.stats();
    assert_eq!(stats.load_requests, 2);
    assert_eq!(stats.items_requested, 5);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.batches, 1);
    assert_eq!(stats.max_batch_size, 3);
    assert_eq!(stats.items_loaded, 2);
    assert_eq!(stats.items_cached, 3);
}
