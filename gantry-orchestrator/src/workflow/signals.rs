//! In-process wakeups for suspended pipelines
//!
//! Signals themselves live in the store's inbox. The hub only tells a waiting
//! driver that something new may be there. Drivers always look at the inbox
//! before waiting, so a wakeup sent while nobody listens is never needed.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct SignalHub {
    waiters: Mutex<HashMap<Uuid, Arc<Notify>>>,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wakeup handle of a pipeline, registered on first use by its driver
    pub async fn subscribe(&self, id: Uuid) -> Arc<Notify> {
        self.waiters
            .lock()
            .await
            .entry(id)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Wake the driver of a pipeline, if one is registered
    ///
    /// `notify_one` keeps a permit when the driver is between its inbox check
    /// and its wait, so the wakeup is not lost.
    pub async fn notify(&self, id: Uuid) {
        if let Some(waiter) = self.waiters.lock().await.get(&id) {
            waiter.notify_one();
        }
    }

    pub async fn release(&self, id: Uuid) {
        self.waiters.lock().await.remove(&id);
    }
}
