//! Multi-source reconciliation of notification records.
//!
//! One canonical log plus any number of supplementary channels feed a single
//! working set keyed by event id. Each source contributes a *layer* per id;
//! the materialized event is the layers merged in write order, so the latest
//! write wins field by field. `readBy` flags are unioned instead, since a read
//! never becomes unread again.
//!
//! Removal is source scoped: a channel dropping an id only removes that
//! channel's layer, and the event survives while any other source still has
//! it. The canonical log is authoritative for existence: when it drops an id
//! the event is evicted whatever the channels say.
//!
//! Every mutating call issues exactly one render request and never renders
//! inline.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::Value;

use crate::constants::READ_BY_FIELD;
use crate::events::{ChildChange, ChildEvent, Snapshot, SourceUpdate};
use crate::models::{Event, Record, UserContext};
use crate::render::RenderRequest;
use crate::visibility::VisibilityRules;

struct Layer {
    record: Record,
    write: u64,
}

struct Entry {
    /// Order in which the id first entered the working set; breaks timestamp ties.
    seq: u64,
    layers: HashMap<String, Layer>,
    /// Optimistic acknowledgements not yet echoed back by any source.
    local_reads: BTreeSet<String>,
    event: Event,
}

impl Entry {
    fn new(id: &str, seq: u64) -> Self {
        Self {
            seq,
            layers: HashMap::new(),
            local_reads: BTreeSet::new(),
            event: Event::from_record(id, Record::new()),
        }
    }

    fn rematerialize(&mut self, id: &str) {
        let mut layers: Vec<&Layer> = self.layers.values().collect();
        layers.sort_by_key(|layer| layer.write);

        let mut merged = Record::new();
        let mut read_by = Record::new();
        for layer in layers {
            for (key, value) in &layer.record {
                if key == READ_BY_FIELD {
                    if let Value::Object(flags) = value {
                        for (user_id, flag) in flags {
                            if flag.as_bool() == Some(true) {
                                read_by.insert(user_id.clone(), Value::Bool(true));
                            }
                        }
                    }
                } else {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        for user_id in &self.local_reads {
            read_by.insert(user_id.clone(), Value::Bool(true));
        }
        if !read_by.is_empty() {
            merged.insert(READ_BY_FIELD.to_string(), Value::Object(read_by));
        }

        self.event = Event::from_record(id, merged);
    }
}

pub struct Aggregator {
    canonical: String,
    rules: VisibilityRules,
    user: Option<UserContext>,
    entries: HashMap<String, Entry>,
    next_seq: u64,
    next_write: u64,
    render: Arc<dyn RenderRequest>,
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("canonical", &self.canonical)
            .field("user", &self.user.as_ref().map(|u| u.id.as_str()))
            .field("entries", &self.entries.len())
            .finish()
    }
}

fn source_key(path: &str) -> &str {
    path.trim_matches('/')
}

impl Aggregator {
    pub fn new(canonical_path: &str, render: Arc<dyn RenderRequest>) -> Self {
        Self {
            canonical: source_key(canonical_path).to_string(),
            rules: VisibilityRules::default(),
            user: None,
            entries: HashMap::new(),
            next_seq: 0,
            next_write: 0,
            render,
        }
    }

    pub fn with_rules(mut self, rules: VisibilityRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn user(&self) -> Option<&UserContext> {
        self.user.as_ref()
    }

    /// Swap the viewer. Visibility is evaluated lazily, so the working set
    /// is simply re-filtered on the next snapshot.
    pub fn set_user(&mut self, user: Option<UserContext>) {
        self.user = user;
        self.render.request_render();
    }

    // ===== Source updates =====

    pub fn apply(&mut self, update: SourceUpdate) {
        match update {
            SourceUpdate::Snapshot { path, children } => self.on_snapshot(&path, children),
            SourceUpdate::Child { path, event } => self.on_child_event(&path, event),
            SourceUpdate::Closed { path } => self.on_source_closed(&path),
        }
    }

    /// Replace everything `source` asserts with `children`.
    pub fn on_snapshot(&mut self, source: &str, children: Snapshot) {
        let source = source_key(source);
        let canonical = source == self.canonical;

        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(id, entry)| entry.layers.contains_key(source) && !children.contains_key(*id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            if canonical {
                self.entries.remove(&id);
            } else {
                self.drop_layer(&id, source);
            }
        }

        let count = children.len();
        for (id, value) in children {
            match value {
                Value::Object(record) => self.upsert_layer(&id, source, record, false),
                _ => tracing::debug!("aggregator: skipping non-object child {} from {}", id, source),
            }
        }

        tracing::debug!(
            "aggregator: snapshot from {} ({} children), working set {}",
            source,
            count,
            self.entries.len()
        );
        self.render.request_render();
    }

    pub fn on_child_event(&mut self, source: &str, event: ChildEvent) {
        let source = source_key(source);
        let ChildEvent { change, id, value } = event;

        match change {
            ChildChange::Added | ChildChange::Changed => match value {
                Value::Object(record) => self.upsert_layer(&id, source, record, true),
                _ => tracing::debug!("aggregator: skipping non-object child {} from {}", id, source),
            },
            ChildChange::Removed => {
                if source == self.canonical {
                    self.entries.remove(&id);
                } else {
                    self.drop_layer(&id, source);
                }
            }
        }

        tracing::debug!(
            "aggregator: {:?} {} from {}, working set {}",
            change,
            id,
            source,
            self.entries.len()
        );
        self.render.request_render();
    }

    /// A stalled source keeps its last known layers in place.
    pub fn on_source_closed(&mut self, source: &str) {
        tracing::warn!(
            "aggregator: source {} stopped delivering; keeping last known entries",
            source_key(source)
        );
    }

    /// Drop every layer `source` contributed, e.g. after unsubscribing from
    /// a channel the viewer's role no longer includes.
    pub fn forget_source(&mut self, source: &str) {
        let source = source_key(source);
        let ids: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.layers.contains_key(source))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            self.drop_layer(id, source);
        }
        tracing::debug!("aggregator: forgot {} layers from {}", ids.len(), source);
        self.render.request_render();
    }

    fn upsert_layer(&mut self, id: &str, source: &str, record: Record, merge: bool) {
        self.next_write += 1;
        let write = self.next_write;

        let next_seq = &mut self.next_seq;
        let entry = self.entries.entry(id.to_string()).or_insert_with(|| {
            *next_seq += 1;
            Entry::new(id, *next_seq)
        });

        let existing = if merge {
            entry.layers.get_mut(source)
        } else {
            None
        };
        match existing {
            Some(layer) => {
                layer.record.extend(record);
                layer.write = write;
            }
            None => {
                entry
                    .layers
                    .insert(source.to_string(), Layer { record, write });
            }
        }
        entry.rematerialize(id);
    }

    fn drop_layer(&mut self, id: &str, source: &str) {
        let Some(entry) = self.entries.get_mut(id) else {
            return;
        };
        if entry.layers.remove(source).is_none() {
            return;
        }
        if entry.layers.is_empty() {
            self.entries.remove(id);
        } else {
            entry.rematerialize(id);
        }
    }

    // ===== Read state =====

    /// Record `user_id` as having read each visible, still-unread id.
    /// Only the signed-in viewer can acknowledge; any other id changes nothing.
    /// Returns the ids that actually changed; requests one render if any did.
    pub fn mark_read_local(&mut self, ids: &[String], user_id: &str) -> Vec<String> {
        let Some(user) = self.user.as_ref().filter(|user| user.id == user_id) else {
            return Vec::new();
        };

        let mut changed = Vec::new();
        for id in ids {
            let Some(entry) = self.entries.get_mut(id) else {
                continue;
            };
            if !self.rules.is_visible(&entry.event, user) || entry.event.is_read_by(user_id) {
                continue;
            }
            entry.local_reads.insert(user_id.to_string());
            entry.rematerialize(id);
            changed.push(id.clone());
        }

        if !changed.is_empty() {
            self.render.request_render();
        }
        changed
    }

    // ===== Queries =====

    /// Visible events, newest first; equal timestamps keep arrival order.
    /// Empty when nobody is signed in.
    pub fn snapshot(&self) -> Vec<Event> {
        let Some(user) = self.user.as_ref() else {
            return Vec::new();
        };

        let mut visible: Vec<&Entry> = self
            .entries
            .values()
            .filter(|entry| self.rules.is_visible(&entry.event, user))
            .collect();
        visible.sort_by(|a, b| {
            b.event
                .timestamp
                .cmp(&a.event.timestamp)
                .then(a.seq.cmp(&b.seq))
        });
        visible.into_iter().map(|entry| entry.event.clone()).collect()
    }

    pub fn is_visible(&self, event: &Event) -> bool {
        self.user
            .as_ref()
            .is_some_and(|user| self.rules.is_visible(event, user))
    }

    /// Any event in the working set, visible or not.
    pub fn get(&self, id: &str) -> Option<&Event> {
        self.entries.get(id).map(|entry| &entry.event)
    }

    /// Source paths currently asserting `id`, canonical first.
    pub fn sources_of(&self, id: &str) -> Vec<String> {
        let Some(entry) = self.entries.get(id) else {
            return Vec::new();
        };
        let mut sources: Vec<String> = entry.layers.keys().cloned().collect();
        sources.sort_by(|a, b| {
            (b == &self.canonical)
                .cmp(&(a == &self.canonical))
                .then_with(|| a.cmp(b))
        });
        sources
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every entry (used on sign-out).
    pub fn clear(&mut self) {
        self.entries.clear();
        self.render.request_render();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Capability, Role};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CANON: &str = "activity_table";
    const PUBLIC: &str = "notifications/public";

    #[derive(Default)]
    struct CountingRender(AtomicUsize);

    impl RenderRequest for CountingRender {
        fn request_render(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CountingRender {
        fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn aggregator_for(user: UserContext) -> (Aggregator, Arc<CountingRender>) {
        let render = Arc::new(CountingRender::default());
        let mut agg = Aggregator::new(CANON, render.clone());
        agg.set_user(Some(user));
        (agg, render)
    }

    fn member() -> UserContext {
        UserContext::new("u1", Role::Member)
    }

    fn snap(value: serde_json::Value) -> Snapshot {
        value.as_object().cloned().unwrap()
    }

    fn ids(events: &[Event]) -> Vec<&str> {
        events.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn test_changed_event_replaces_not_duplicates() {
        let (mut agg, _) = aggregator_for(member());
        agg.on_child_event(
            PUBLIC,
            ChildEvent::added(
                "a1",
                json!({"type": "announcement", "audience": "public", "timestamp": 100}),
            ),
        );
        agg.on_child_event(
            PUBLIC,
            ChildEvent::changed(
                "a1",
                json!({"type": "announcement", "audience": "public", "timestamp": 100, "readBy": {"u1": true}}),
            ),
        );

        let events = agg.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(agg.len(), 1);
        assert!(events[0].is_read_by("u1"));
    }

    #[test]
    fn test_member_cannot_see_staff_resource() {
        let (mut agg, _) = aggregator_for(member());
        agg.on_snapshot(
            CANON,
            snap(json!({"r1": {"type": "resource_upload", "audience": "staff", "timestamp": 5}})),
        );
        assert_eq!(agg.len(), 1);
        assert!(agg.snapshot().is_empty());
    }

    #[test]
    fn test_descending_order_with_stable_ties() {
        let (mut agg, _) = aggregator_for(member());
        for (id, ts) in [("e1", 50), ("e2", 200), ("e3", 200)] {
            agg.on_child_event(
                PUBLIC,
                ChildEvent::added(id, json!({"type": "meeting", "timestamp": ts})),
            );
        }
        assert_eq!(ids(&agg.snapshot()), vec!["e2", "e3", "e1"]);
    }

    #[test]
    fn test_identical_sequences_give_identical_order() {
        let feed = |agg: &mut Aggregator| {
            for (id, ts) in [("x", 10), ("y", 10), ("z", 30), ("w", 10)] {
                agg.on_child_event(
                    PUBLIC,
                    ChildEvent::added(id, json!({"type": "announcement", "timestamp": ts})),
                );
            }
        };
        let (mut first, _) = aggregator_for(member());
        let (mut second, _) = aggregator_for(member());
        feed(&mut first);
        feed(&mut second);

        let a = first.snapshot();
        assert_eq!(ids(&a), ids(&second.snapshot()));
        assert_eq!(ids(&a), vec!["z", "x", "y", "w"]);
    }

    #[test]
    fn test_channel_removal_does_not_override_canonical() {
        let (mut agg, _) = aggregator_for(member());
        agg.on_snapshot(CANON, snap(json!({"x": {"type": "schedule", "timestamp": 1}})));
        agg.on_child_event(
            PUBLIC,
            ChildEvent::added("x", json!({"type": "schedule", "timestamp": 1})),
        );

        agg.on_child_event(PUBLIC, ChildEvent::removed("x"));
        assert!(agg.get("x").is_some());
        assert_eq!(agg.sources_of("x"), vec![CANON.to_string()]);
    }

    #[test]
    fn test_channel_only_event_evicted_by_its_channel() {
        let (mut agg, _) = aggregator_for(member());
        agg.on_child_event(PUBLIC, ChildEvent::added("c", json!({"type": "meeting"})));
        agg.on_child_event(PUBLIC, ChildEvent::removed("c"));
        assert!(agg.is_empty());
    }

    #[test]
    fn test_canonical_removal_evicts_despite_channels() {
        let (mut agg, _) = aggregator_for(member());
        agg.on_snapshot(CANON, snap(json!({"x": {"type": "meeting"}})));
        agg.on_child_event(PUBLIC, ChildEvent::added("x", json!({"type": "meeting"})));

        agg.on_snapshot(CANON, snap(json!({})));
        assert!(agg.get("x").is_none());
    }

    #[test]
    fn test_canonical_snapshot_keeps_channel_only_ids() {
        let (mut agg, _) = aggregator_for(member());
        agg.on_child_event(PUBLIC, ChildEvent::added("c", json!({"type": "meeting"})));
        agg.on_snapshot(CANON, snap(json!({"x": {"type": "meeting"}})));
        agg.on_snapshot(CANON, snap(json!({})));

        assert!(agg.get("c").is_some());
        assert!(agg.get("x").is_none());
    }

    #[test]
    fn test_channel_snapshot_drops_only_its_layer() {
        let (mut agg, _) = aggregator_for(member());
        agg.on_snapshot(CANON, snap(json!({"x": {"type": "meeting"}})));
        agg.on_snapshot(PUBLIC, snap(json!({"x": {"type": "meeting"}, "y": {"type": "meeting"}})));
        agg.on_snapshot(PUBLIC, snap(json!({})));

        assert!(agg.get("x").is_some());
        assert!(agg.get("y").is_none());
    }

    #[test]
    fn test_last_writer_wins_per_field() {
        let (mut agg, _) = aggregator_for(member());
        agg.on_snapshot(
            CANON,
            snap(json!({"a": {"type": "announcement", "title": "old", "timestamp": 1}})),
        );
        agg.on_child_event(PUBLIC, ChildEvent::changed("a", json!({"title": "new"})));
        assert_eq!(agg.get("a").unwrap().title(), Some("new"));
        assert_eq!(agg.get("a").unwrap().timestamp, 1);

        agg.on_snapshot(
            CANON,
            snap(json!({"a": {"type": "announcement", "title": "newest", "timestamp": 1}})),
        );
        assert_eq!(agg.get("a").unwrap().title(), Some("newest"));
    }

    #[test]
    fn test_child_changes_merge_into_layer() {
        let (mut agg, _) = aggregator_for(member());
        agg.on_child_event(
            PUBLIC,
            ChildEvent::added("a", json!({"type": "announcement", "title": "t", "timestamp": 9})),
        );
        agg.on_child_event(PUBLIC, ChildEvent::changed("a", json!({"title": "t2"})));
        let event = agg.get("a").unwrap();
        assert_eq!(event.title(), Some("t2"));
        assert_eq!(event.timestamp, 9);
    }

    #[test]
    fn test_read_flags_union_across_sources() {
        let (mut agg, _) = aggregator_for(member());
        agg.on_snapshot(
            CANON,
            snap(json!({"a": {"type": "meeting", "readBy": {"u1": true}}})),
        );
        agg.on_child_event(
            PUBLIC,
            ChildEvent::added("a", json!({"type": "meeting", "readBy": {"u2": true}})),
        );
        let event = agg.get("a").unwrap();
        assert!(event.is_read_by("u1"));
        assert!(event.is_read_by("u2"));
    }

    #[test]
    fn test_refilters_when_user_changes() {
        let (mut agg, _) = aggregator_for(member());
        agg.on_snapshot(
            CANON,
            snap(json!({
                "reg": {"type": "registration", "timestamp": 2},
                "ann": {"type": "announcement", "audience": "admin", "timestamp": 1}
            })),
        );
        assert!(agg.snapshot().is_empty());

        agg.set_user(Some(
            UserContext::new("boss", Role::Admin).with_capability(Capability::VerifyUsers),
        ));
        assert_eq!(ids(&agg.snapshot()), vec!["reg", "ann"]);

        agg.set_user(None);
        assert!(agg.snapshot().is_empty());
        assert_eq!(agg.len(), 2);
    }

    #[test]
    fn test_every_mutation_requests_one_render() {
        let (mut agg, render) = aggregator_for(member());
        let base = render.count();

        agg.on_snapshot(CANON, snap(json!({"a": {"type": "meeting"}, "b": {"type": "meeting"}})));
        assert_eq!(render.count(), base + 1);

        agg.on_child_event(PUBLIC, ChildEvent::added("c", json!({"type": "meeting"})));
        agg.on_child_event(PUBLIC, ChildEvent::removed("c"));
        assert_eq!(render.count(), base + 3);

        agg.mark_read_local(&["a".to_string(), "b".to_string()], "u1");
        assert_eq!(render.count(), base + 4);

        // nothing left to mark
        agg.mark_read_local(&["a".to_string()], "u1");
        assert_eq!(render.count(), base + 4);
    }

    #[test]
    fn test_malformed_children_are_skipped() {
        let (mut agg, _) = aggregator_for(member());
        agg.on_snapshot(CANON, snap(json!({"bad": 5, "good": {"type": "meeting"}})));
        agg.on_child_event(PUBLIC, ChildEvent::added("worse", json!("text")));
        assert_eq!(agg.len(), 1);
        assert!(agg.get("good").is_some());
    }

    #[test]
    fn test_local_reads_survive_stale_snapshots() {
        let (mut agg, _) = aggregator_for(member());
        agg.on_snapshot(CANON, snap(json!({"a": {"type": "meeting"}})));
        let changed = agg.mark_read_local(&["a".to_string()], "u1");
        assert_eq!(changed, vec!["a".to_string()]);

        agg.on_snapshot(CANON, snap(json!({"a": {"type": "meeting", "title": "x"}})));
        assert!(agg.get("a").unwrap().is_read_by("u1"));
    }

    #[test]
    fn test_mark_read_skips_invisible_events() {
        let (mut agg, _) = aggregator_for(member());
        agg.on_snapshot(CANON, snap(json!({"adm": {"type": "meeting", "audience": "admin"}})));
        assert!(agg.mark_read_local(&["adm".to_string()], "u1").is_empty());
        assert!(!agg.get("adm").unwrap().is_read_by("u1"));
    }

    #[test]
    fn test_sources_listed_canonical_first() {
        let (mut agg, _) = aggregator_for(member());
        agg.on_child_event("notifications/staff", ChildEvent::added("a", json!({})));
        agg.on_child_event(PUBLIC, ChildEvent::added("a", json!({})));
        agg.on_snapshot("/activity_table/", snap(json!({"a": {}})));
        assert_eq!(
            agg.sources_of("a"),
            vec![
                CANON.to_string(),
                "notifications/public".to_string(),
                "notifications/staff".to_string(),
            ]
        );
    }

    #[test]
    fn test_closed_source_keeps_entries() {
        let (mut agg, _) = aggregator_for(member());
        agg.on_snapshot(CANON, snap(json!({"a": {"type": "meeting"}})));
        agg.apply(SourceUpdate::Closed {
            path: CANON.to_string(),
        });
        assert_eq!(agg.snapshot().len(), 1);
    }

    #[test]
    fn test_forget_source_keeps_other_layers() {
        let (mut agg, _) = aggregator_for(member());
        agg.on_snapshot(CANON, snap(json!({"a": {"type": "meeting", "timestamp": 1}})));
        agg.on_child_event(PUBLIC, ChildEvent::added("a", json!({"title": "Shared"})));
        agg.on_child_event(PUBLIC, ChildEvent::added("b", json!({"type": "meeting"})));

        agg.forget_source(PUBLIC);

        assert_eq!(agg.len(), 1);
        assert_eq!(agg.sources_of("a"), vec![CANON.to_string()]);
        assert_eq!(agg.get("a").unwrap().title(), None);
    }

    #[test]
    fn test_mark_read_rejects_other_users() {
        let (mut agg, render) = aggregator_for(member());
        agg.on_snapshot(CANON, snap(json!({"a": {"type": "meeting"}})));
        let before = render.count();

        assert!(agg.mark_read_local(&["a".to_string()], "someone-else").is_empty());
        assert!(!agg.get("a").unwrap().is_read_by("someone-else"));
        assert_eq!(render.count(), before);
    }
}
