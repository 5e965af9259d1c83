use chronofs::{MetaStore, RequestContext, RetryPolicy, StoreOptions};
use std::time::Duration;

/// Options with a generous retry budget so contended tests converge.
pub fn test_options() -> StoreOptions {
    StoreOptions {
        sync_on_commit: false,
        sequence_bandwidth: 8,
        retry: RetryPolicy {
            max_attempts: 256,
            base_delay: Duration::from_micros(20),
            max_delay: Duration::from_millis(2),
        },
    }
}

pub fn memory_store() -> MetaStore {
    MetaStore::in_memory(&test_options()).unwrap()
}

pub fn ctx() -> RequestContext {
    RequestContext::background()
}

/// Entry names of a directory listing, in listing order.
pub fn names(store: &MetaStore, dir: u64) -> Vec<String> {
    store
        .readdir(&ctx(), dir)
        .unwrap()
        .into_iter()
        .map(|entry| entry.name)
        .collect()
}

/// Like [`test_options`] but every commit reaches disk before returning.
pub fn durable_options() -> StoreOptions {
    StoreOptions {
        sync_on_commit: true,
        ..test_options()
    }
}
