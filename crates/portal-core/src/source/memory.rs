//! In-process realtime store.
//!
//! Holds the whole database as one JSON tree behind a single lock. Every write
//! runs to completion under that lock and fans out to the listeners whose path
//! overlaps the written path, so subscribers observe writes in commit order and
//! increments cannot lose updates.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{split_path, DocumentStore, Subscription};
use crate::error::{PortalError, Result};
use crate::events::{ChildEvent, Snapshot};
use crate::models::Record;

struct SnapshotListener {
    path: Vec<String>,
    tx: mpsc::UnboundedSender<Snapshot>,
}

struct ChildListener {
    path: Vec<String>,
    tx: mpsc::UnboundedSender<ChildEvent>,
    /// Children as of the last delivery, for diffing.
    last: Record,
}

struct Inner {
    root: Value,
    next_listener_id: u64,
    snapshot_listeners: HashMap<u64, SnapshotListener>,
    child_listeners: HashMap<u64, ChildListener>,
    read_only: bool,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.next_listener_id += 1;
        self.next_listener_id
    }

    fn notify(&mut self, touched: &[Vec<String>]) {
        let root = &self.root;

        self.snapshot_listeners.retain(|_, listener| {
            if !touched.iter().any(|t| overlaps(&listener.path, t)) {
                return true;
            }
            listener.tx.send(children_of(root, &listener.path)).is_ok()
        });

        self.child_listeners.retain(|_, listener| {
            if !touched.iter().any(|t| overlaps(&listener.path, t)) {
                return true;
            }
            let current = children_of(root, &listener.path);
            for event in diff_children(&listener.last, &current) {
                if listener.tx.send(event).is_err() {
                    return false;
                }
            }
            listener.last = current;
            true
        });
    }
}

/// Shared handle; clones see the same data and listeners.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::from_value(Value::Object(Record::new()))
    }

    /// Seed the store with an exported database tree.
    pub fn from_value(root: Value) -> Self {
        let root = match root {
            Value::Object(_) => root,
            _ => Value::Object(Record::new()),
        };
        Self {
            inner: Arc::new(Mutex::new(Inner {
                root,
                next_listener_id: 0,
                snapshot_listeners: HashMap::new(),
                child_listeners: HashMap::new(),
                read_only: false,
            })),
        }
    }

    /// The whole tree, e.g. for saving a dump.
    pub fn export(&self) -> Value {
        self.inner.lock().root.clone()
    }

    /// Reject every write until switched back. Subscriptions keep working.
    pub fn set_read_only(&self, read_only: bool) {
        self.inner.lock().read_only = read_only;
    }

    pub fn listener_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.snapshot_listeners.len() + inner.child_listeners.len()
    }

    fn write(&self, path: &str, writes: Vec<(Vec<String>, Value)>) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.read_only {
            return Err(PortalError::WriteRejected {
                path: path.to_string(),
            });
        }

        let mut touched = Vec::with_capacity(writes.len());
        for (segments, value) in writes {
            if value.is_null() {
                remove_at(&mut inner.root, &segments);
            } else {
                set_at(&mut inner.root, &segments, value);
            }
            touched.push(segments);
        }
        inner.notify(&touched);
        Ok(())
    }

    fn do_update(&self, path: &str, fields: Record) -> Result<()> {
        let base = split_path(path)?;
        let mut writes = Vec::with_capacity(fields.len());
        for (key, value) in fields {
            let mut segments = base.clone();
            segments.extend(split_path(&key)?);
            writes.push((segments, value));
        }
        if writes.is_empty() {
            return Ok(());
        }
        self.write(path, writes)
    }

    fn do_increment(&self, path: &str, delta: i64) -> Result<i64> {
        let segments = split_path(path)?;
        let mut inner = self.inner.lock();
        if inner.read_only {
            return Err(PortalError::WriteRejected {
                path: path.to_string(),
            });
        }

        let current = match node_at(&inner.root, &segments) {
            None | Some(Value::Null) => 0,
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(0),
            Some(_) => {
                return Err(PortalError::NotANumber {
                    path: path.to_string(),
                })
            }
        };
        let next = current.saturating_add(delta);
        set_at(&mut inner.root, &segments, Value::from(next));
        inner.notify(&[segments]);
        Ok(next)
    }

    fn do_query_last_by(&self, path: &str, field: &str, limit: usize) -> Result<Vec<(String, Value)>> {
        let segments = split_path(path)?;
        let inner = self.inner.lock();
        let mut children: Vec<(String, Value)> =
            children_of(&inner.root, &segments).into_iter().collect();
        drop(inner);

        children.sort_by(|(ka, a), (kb, b)| {
            compare_field(a.get(field), b.get(field)).then_with(|| ka.cmp(kb))
        });
        let skip = children.len().saturating_sub(limit);
        Ok(children.into_iter().skip(skip).collect())
    }
}

impl DocumentStore for MemoryStore {
    fn subscribe_snapshot(&self, path: &str) -> Result<Subscription<Snapshot>> {
        let segments = split_path(path)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let id = {
            let mut inner = self.inner.lock();
            let _ = tx.send(children_of(&inner.root, &segments));
            let id = inner.next_id();
            inner
                .snapshot_listeners
                .insert(id, SnapshotListener { path: segments, tx });
            id
        };

        let weak = Arc::downgrade(&self.inner);
        Ok(Subscription::new(path, rx, move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().snapshot_listeners.remove(&id);
            }
        }))
    }

    fn subscribe_children(&self, path: &str) -> Result<Subscription<ChildEvent>> {
        let segments = split_path(path)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let id = {
            let mut inner = self.inner.lock();
            let current = children_of(&inner.root, &segments);
            for (key, value) in &current {
                let _ = tx.send(ChildEvent::added(key.clone(), value.clone()));
            }
            let id = inner.next_id();
            inner.child_listeners.insert(
                id,
                ChildListener {
                    path: segments,
                    tx,
                    last: current,
                },
            );
            id
        };

        let weak = Arc::downgrade(&self.inner);
        Ok(Subscription::new(path, rx, move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().child_listeners.remove(&id);
            }
        }))
    }

    fn get<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Option<Value>>> {
        let result = split_path(path).map(|segments| {
            let inner = self.inner.lock();
            node_at(&inner.root, &segments).cloned()
        });
        Box::pin(future::ready(result))
    }

    fn set<'a>(&'a self, path: &'a str, value: Value) -> BoxFuture<'a, Result<()>> {
        let result = split_path(path).and_then(|segments| self.write(path, vec![(segments, value)]));
        Box::pin(future::ready(result))
    }

    fn update<'a>(&'a self, path: &'a str, fields: Record) -> BoxFuture<'a, Result<()>> {
        Box::pin(future::ready(self.do_update(path, fields)))
    }

    fn remove<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<()>> {
        let result =
            split_path(path).and_then(|segments| self.write(path, vec![(segments, Value::Null)]));
        Box::pin(future::ready(result))
    }

    fn push<'a>(&'a self, path: &'a str, value: Value) -> BoxFuture<'a, Result<String>> {
        let key = uuid::Uuid::new_v4().simple().to_string();
        let result = split_path(path).and_then(|mut segments| {
            segments.push(key.clone());
            self.write(path, vec![(segments, value)])?;
            Ok(key)
        });
        Box::pin(future::ready(result))
    }

    fn increment<'a>(&'a self, path: &'a str, delta: i64) -> BoxFuture<'a, Result<i64>> {
        Box::pin(future::ready(self.do_increment(path, delta)))
    }

    fn query_last_by<'a>(
        &'a self,
        path: &'a str,
        field: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<(String, Value)>>> {
        Box::pin(future::ready(self.do_query_last_by(path, field, limit)))
    }
}

// ===== Tree helpers =====

fn node_at<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root, |node, segment| node.get(segment.as_str()))
}

fn children_of(root: &Value, segments: &[String]) -> Record {
    node_at(root, segments)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn set_at(node: &mut Value, segments: &[String], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Record::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(first.clone()).or_insert(Value::Null);
        set_at(child, rest, value);
    }
}

/// Remove the node and prune parents left empty by the removal.
fn remove_at(node: &mut Value, segments: &[String]) {
    let Some((first, rest)) = segments.split_first() else {
        *node = Value::Object(Record::new());
        return;
    };
    let Value::Object(map) = node else {
        return;
    };
    if rest.is_empty() {
        map.remove(first);
        return;
    }
    let now_empty = match map.get_mut(first) {
        Some(child) => {
            remove_at(child, rest);
            child.as_object().is_some_and(|m| m.is_empty())
        }
        None => false,
    };
    if now_empty {
        map.remove(first);
    }
}

fn overlaps(a: &[String], b: &[String]) -> bool {
    let n = a.len().min(b.len());
    a[..n] == b[..n]
}

fn diff_children(old: &Record, new: &Record) -> Vec<ChildEvent> {
    let mut events = Vec::new();
    for (key, value) in new {
        match old.get(key) {
            None => events.push(ChildEvent::added(key.clone(), value.clone())),
            Some(previous) if previous != value => {
                events.push(ChildEvent::changed(key.clone(), value.clone()))
            }
            Some(_) => {}
        }
    }
    for (key, value) in old {
        if !new.contains_key(key) {
            let mut removed = ChildEvent::removed(key.clone());
            removed.value = value.clone();
            events.push(removed);
        }
    }
    events
}

/// Null < booleans < numbers < strings < objects/arrays.
fn compare_field(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.total_cmp(&y)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
