use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::aggregator::Aggregator;
use crate::constants::READ_BY_FIELD;
use crate::models::Event;
use crate::source::DocumentStore;

/// Per-user acknowledgements on top of the aggregator.
///
/// Marks are applied to the in-memory events first, then written back to
/// every source that currently holds the event. Write-backs are
/// fire-and-forget: a failure is logged and the local state is kept.
#[derive(Clone)]
pub struct ReadStateTracker {
    aggregator: Arc<Mutex<Aggregator>>,
    store: Arc<dyn DocumentStore>,
}

impl ReadStateTracker {
    pub fn new(aggregator: Arc<Mutex<Aggregator>>, store: Arc<dyn DocumentStore>) -> Self {
        Self { aggregator, store }
    }

    /// Acknowledge one event. Returns `false` when there was nothing to do:
    /// `user_id` is not the signed-in viewer, unknown or invisible id, or
    /// already read.
    pub fn mark_read(&self, user_id: &str, event_id: &str) -> bool {
        let targets = {
            let mut aggregator = self.aggregator.lock();
            let changed = aggregator.mark_read_local(&[event_id.to_string()], user_id);
            if changed.is_empty() {
                return false;
            }
            aggregator.sources_of(event_id)
        };

        self.write_back(user_id, vec![(event_id.to_string(), targets)]);
        true
    }

    /// Acknowledge the first `limit` visible events (in feed order) that
    /// satisfy `filter`. Only what the user could have seen is marked;
    /// `None` means no limit. Returns how many events changed.
    pub fn mark_all_visible<F>(&self, user_id: &str, filter: F, limit: Option<usize>) -> usize
    where
        F: Fn(&Event) -> bool,
    {
        let acks = {
            let mut aggregator = self.aggregator.lock();
            if aggregator.user().is_none() {
                return 0;
            }

            let candidates: Vec<String> = aggregator
                .snapshot()
                .into_iter()
                .filter(|event| filter(event))
                .take(limit.unwrap_or(usize::MAX))
                .filter(|event| !event.is_read_by(user_id))
                .map(|event| event.id)
                .collect();

            let changed = aggregator.mark_read_local(&candidates, user_id);
            changed
                .into_iter()
                .map(|id| {
                    let targets = aggregator.sources_of(&id);
                    (id, targets)
                })
                .collect::<Vec<_>>()
        };

        let count = acks.len();
        if count > 0 {
            tracing::debug!("read_state: marked {} events read for {}", count, user_id);
            self.write_back(user_id, acks);
        }
        count
    }

    /// Visible events `user_id` has not acknowledged. Recomputed every call.
    pub fn unread_count(&self, user_id: &str) -> usize {
        self.aggregator
            .lock()
            .snapshot()
            .iter()
            .filter(|event| !event.is_read_by(user_id))
            .count()
    }

    fn write_back(&self, user_id: &str, acks: Vec<(String, Vec<String>)>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                "read_state: no async runtime; skipping write-back of {} acknowledgements",
                acks.len()
            );
            return;
        };

        for (event_id, sources) in acks {
            for source in sources {
                let path = format!("{}/{}/{}/{}", source, event_id, READ_BY_FIELD, user_id);
                let store = self.store.clone();
                runtime.spawn(async move {
                    if let Err(err) = store.set(&path, Value::Bool(true)).await {
                        tracing::warn!("read_state: write-back to {} failed: {}", path, err);
                    }
                });
            }
        }
    }
}
