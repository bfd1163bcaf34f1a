//! Event Source Adapter: the boundary to the realtime document store.
//!
//! Stores are path addressed (`activity_table/{id}/readBy/{uid}`) and push
//! changes to subscribers. Reads and writes return boxed futures so network
//! backed implementations can suspend; subscriptions hand back a
//! [`Subscription`] that releases its listener when unsubscribed or dropped.

pub mod memory;

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::Stream;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{PortalError, Result};
use crate::events::{ChildEvent, Snapshot};
use crate::models::Record;

pub use memory::MemoryStore;

pub trait DocumentStore: Send + Sync {
    /// Deliver the node's children now, then again after every change under it.
    fn subscribe_snapshot(&self, path: &str) -> Result<Subscription<Snapshot>>;

    /// Deliver an `Added` per existing child now, then child-level diffs.
    fn subscribe_children(&self, path: &str) -> Result<Subscription<ChildEvent>>;

    fn get<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Option<Value>>>;

    /// Replace the node at `path`. Setting `null` removes it.
    fn set<'a>(&'a self, path: &'a str, value: Value) -> BoxFuture<'a, Result<()>>;

    /// Shallow merge `fields` into the node at `path`. Keys may themselves be
    /// relative paths (`"schedules/abc"`), which makes this a multi-path write.
    fn update<'a>(&'a self, path: &'a str, fields: Record) -> BoxFuture<'a, Result<()>>;

    fn remove<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Store `value` under a freshly generated child key of `path` and return the key.
    fn push<'a>(&'a self, path: &'a str, value: Value) -> BoxFuture<'a, Result<String>>;

    /// Atomically add `delta` to a numeric node (missing counts as 0) and
    /// return the new value. Concurrent increments are never lost.
    fn increment<'a>(&'a self, path: &'a str, delta: i64) -> BoxFuture<'a, Result<i64>>;

    /// Children of `path` ordered ascending by `field`, keeping only the last `limit`.
    fn query_last_by<'a>(
        &'a self,
        path: &'a str,
        field: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<(String, Value)>>>;
}

type CancelFn = Box<dyn FnOnce() + Send>;

/// Live subscription to one store path.
///
/// Unsubscribing (explicitly or by drop) deregisters the listener and
/// discards anything still buffered. Calling it more than once is a no-op.
pub struct Subscription<T> {
    path: String,
    rx: mpsc::UnboundedReceiver<T>,
    cancel: Option<CancelFn>,
}

impl<T> Subscription<T> {
    pub fn new(
        path: impl Into<String>,
        rx: mpsc::UnboundedReceiver<T>,
        cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            rx,
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Next buffered item without waiting.
    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .field("active", &self.is_active())
            .finish()
    }
}

// ===== Paths =====

/// Split a store path into segments. Empty segments are ignored, so the root is
/// `""` or `"/"`. Segments may not contain `.`, `#`, `$`, `[` or `]`.
pub fn split_path(path: &str) -> Result<Vec<String>> {
    let mut segments = Vec::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if segment.contains(&['.', '#', '$', '[', ']'][..]) {
            return Err(PortalError::InvalidPath {
                path: path.to_string(),
            });
        }
        segments.push(segment.to_string());
    }
    Ok(segments)
}

pub fn join_path(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}/{}", parent, child)
    }
}
