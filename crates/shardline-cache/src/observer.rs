//! Background task feeding the cache from the event bus

use shardline_gateway::ClientEvent;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::EntityCache;

/// Handle to a running cache observer; aborts the task when dropped
#[derive(Debug)]
pub struct CacheObserver {
    task: JoinHandle<()>,
}

impl CacheObserver {
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for CacheObserver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl EntityCache {
    /// Mirror dispatch events from `events` until the bus closes
    ///
    /// A receiver that falls behind logs the gap and keeps going; shards
    /// never wait on the cache.
    pub fn observe(self: &Arc<Self>, mut events: broadcast::Receiver<ClientEvent>) -> CacheObserver {
        let cache = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ClientEvent::Dispatch(event)) => cache.apply(&event),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Cache observer lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!("Cache observer stopped");
        });
        CacheObserver { task }
    }
}
