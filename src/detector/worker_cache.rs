//! Lazily allocated per-worker scratch state.
//!
//! Workers receive their own handle keyed by thread identity so mutable
//! scratch never crosses threads. Allocation is guarded by a single mutex
//! over the identity map; this is the only lock the hot path can touch, and
//! only on a worker's first access.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

#[derive(Debug, Default)]
pub struct LazyWorkerMap<T> {
    map: Mutex<HashMap<ThreadId, Arc<Mutex<T>>>>,
}

impl<T: Default> LazyWorkerMap<T> {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch (or lazily create) the calling worker's scratch handle.
    pub fn local(&self) -> Arc<Mutex<T>> {
        let mut map = self.map.lock().expect("worker map poisoned");
        map.entry(std::thread::current().id())
            .or_insert_with(|| Arc::new(Mutex::new(T::default())))
            .clone()
    }
}
