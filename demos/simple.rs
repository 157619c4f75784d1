use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use batchload::{BatchFunction, Fetched, Loader, LoaderConfig, LoaderFactory, LoaderSet};

#[derive(Debug, Clone, thiserror::Error)]
#[error("database unavailable")]
struct DbError;

#[derive(Debug, Clone)]
struct Listing {
    title: String,
    event_id: u64,
}

#[derive(Debug, Clone)]
struct Event {
    name: String,
}

// Stand-in for a connection pool shared by every loader of every request.
struct Db {
    listings: HashMap<i64, Listing>,
    events: HashMap<u64, Event>,
}

struct ListingsById(Arc<Db>);

#[async_trait]
impl BatchFunction<i64, Listing> for ListingsById {
    type Error = DbError;

    async fn load(&self, keys: &[i64]) -> Fetched<Listing, DbError> {
        println!("SELECT * FROM listings WHERE id IN {keys:?}");
        Fetched::ok(keys.iter().map(|k| self.0.listings.get(k).cloned()).collect())
    }
}

struct EventsById(Arc<Db>);

#[async_trait]
impl BatchFunction<u64, Event> for EventsById {
    type Error = DbError;

    async fn load(&self, keys: &[u64]) -> Fetched<Event, DbError> {
        println!("SELECT * FROM events WHERE id IN {keys:?}");
        Fetched::ok(keys.iter().map(|k| self.0.events.get(k).cloned()).collect())
    }
}

struct RequestLoaders {
    db: Arc<Db>,
    config: LoaderConfig,
}

impl LoaderFactory for RequestLoaders {
    fn build(&self) -> LoaderSet {
        LoaderSet::new()
            .with(Loader::new(ListingsById(self.db.clone()), self.config))
            .with(Loader::new(EventsById(self.db.clone()), self.config))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let db = Arc::new(Db {
        listings: [
            (1, Listing { title: "2001".to_owned(), event_id: 10 }),
            (2, Listing { title: "samurai".to_owned(), event_id: 10 }),
            (3, Listing { title: "angry men".to_owned(), event_id: 12 }),
        ]
        .into_iter()
        .collect(),
        events: [(10, Event { name: "film night".to_owned() })].into_iter().collect(),
    });
    let factory =
        RequestLoaders { db, config: LoaderConfig::default().wait(Duration::from_millis(2)) };

    // One set per request.
    let loaders = factory.build();
    let (Some(listings), Some(events)) =
        (loaders.get::<i64, Listing, DbError>(), loaders.get::<u64, Event, DbError>())
    else {
        return;
    };

    // Three listings, one query.
    let found = listings.load_many(vec![1, 2, 3, 4]).await;
    let event_ids = found
        .iter()
        .filter_map(|listing| listing.as_ref().ok().and_then(Option::as_ref))
        .map(|listing| listing.event_id)
        .collect::<Vec<_>>();

    // Two distinct events, one query; event 12 does not exist.
    for (event_id, event) in event_ids.iter().zip(events.load_many(event_ids.clone()).await) {
        match event {
            Ok(Some(event)) => println!("event {event_id}: {}", event.name),
            Ok(None) => println!("event {event_id}: not found"),
            Err(e) => println!("event {event_id}: {e}"),
        }
    }

    // Served from the request cache.
    if let Ok(Some(listing)) = listings.load(1).await {
        println!("listing 1: {}", listing.title);
    }
}
