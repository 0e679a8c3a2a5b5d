use std::sync::Arc;
use tokio::sync::watch;

/// Latest successfully fetched collection, replaced wholesale on refresh.
///
/// Readers get an `Arc` to an immutable vector, so aggregation never holds
/// anything that a concurrent refresh would need.
#[derive(Debug)]
pub struct SharedSnapshot<T> {
    tx: Arc<watch::Sender<Arc<Vec<T>>>>,
}

impl<T> Clone for SharedSnapshot<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> Default for SharedSnapshot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SharedSnapshot<T> {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(Vec::new()));
        Self { tx: Arc::new(tx) }
    }

    pub fn replace(&self, rows: Vec<T>) {
        self.tx.send_replace(Arc::new(rows));
    }

    pub fn current(&self) -> Arc<Vec<T>> {
        self.tx.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receiver that wakes every time a refresh lands new rows.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<T>>> {
        self.tx.subscribe()
    }
}
