//! Producer side of the canonical activity log.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::config::FeedConfig;
use crate::constants::RESOURCES_PATH;
use crate::error::Result;
use crate::models::{Audience, Event, EventKind, Record};
use crate::source::{join_path, DocumentStore};

const PREFIX_LEADS: [&str; 2] = ["new", "updated"];
const PREFIX_NOUN: &str = "announcement";
const PREFIX_SEPARATORS: [char; 4] = [':', '-', '–', '—'];

/// One line of the "recent activity" digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySummary {
    pub id: String,
    pub title: String,
    pub category: String,
    pub timestamp: i64,
}

#[derive(Clone)]
pub struct ActivityLog {
    store: Arc<dyn DocumentStore>,
    config: FeedConfig,
}

impl ActivityLog {
    pub fn new(store: Arc<dyn DocumentStore>, config: FeedConfig) -> Self {
        Self { store, config }
    }

    /// Append a record to the canonical log and return its generated id.
    pub async fn publish(&self, kind: EventKind, audience: Audience, payload: Record) -> Result<String> {
        let record = stamp(kind, Some(audience), payload);
        let id = self
            .store
            .push(&self.config.canonical_path, Value::Object(record))
            .await?;
        tracing::info!("activity: published {} {}", kind.as_str(), id);
        Ok(id)
    }

    /// Write `payload` to `mirror_path/{id}` and the stamped record to the
    /// canonical log under the same id, in one multi-path update.
    pub async fn publish_mirrored(
        &self,
        mirror_path: &str,
        id: Option<&str>,
        kind: EventKind,
        payload: Record,
    ) -> Result<String> {
        let id = match id {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().simple().to_string(),
        };

        let mut updates = Record::new();
        updates.insert(join_path(mirror_path, &id), Value::Object(payload.clone()));
        updates.insert(
            join_path(&self.config.canonical_path, &id),
            Value::Object(stamp(kind, None, payload)),
        );
        self.store.update("", updates).await?;

        tracing::info!("activity: published {} {} mirrored to {}", kind.as_str(), id, mirror_path);
        Ok(id)
    }

    /// Remove a mirrored record from both places.
    pub async fn retract_mirrored(&self, mirror_path: &str, id: &str) -> Result<()> {
        let mut updates = Record::new();
        updates.insert(join_path(mirror_path, id), Value::Null);
        updates.insert(join_path(&self.config.canonical_path, id), Value::Null);
        self.store.update("", updates).await
    }

    /// The last `limit` canonical records by `timestamp`, newest first.
    pub async fn recent_activity(&self, limit: usize) -> Result<Vec<ActivitySummary>> {
        let rows = self
            .store
            .query_last_by(&self.config.canonical_path, "timestamp", limit)
            .await?;

        let mut summaries: Vec<ActivitySummary> = rows
            .into_iter()
            .rev()
            .filter_map(|(id, value)| match value {
                Value::Object(record) => Some(summarize(&id, record)),
                _ => None,
            })
            .collect();
        // stable: ties keep newest-first query order
        summaries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(summaries)
    }

    /// Bump `resources/{id}/views` and return the new count.
    pub async fn record_view(&self, resource_id: &str) -> Result<i64> {
        let path = format!("{}/{}/views", RESOURCES_PATH, resource_id);
        let views = self.store.increment(&path, 1).await?;
        tracing::debug!("activity: {} now has {} views", resource_id, views);
        Ok(views)
    }
}

fn stamp(kind: EventKind, audience: Option<Audience>, mut record: Record) -> Record {
    record.insert("type".to_string(), Value::from(kind.as_str()));
    if let Some(audience) = audience {
        record.insert("audience".to_string(), Value::from(audience.as_str()));
    }
    if kind == EventKind::Announcement {
        if let Some(Value::String(title)) = record.get("title") {
            let title = normalize_title(title);
            record.insert("title".to_string(), Value::String(title));
        }
    }
    record.insert(
        "timestamp".to_string(),
        Value::from(chrono::Utc::now().timestamp_millis()),
    );
    record
}

fn summarize(id: &str, record: Record) -> ActivitySummary {
    let text = |key: &str| match record.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    let title = text("title")
        .or_else(|| text("name"))
        .or_else(|| text("meetingId"))
        .or_else(|| text("message"))
        .unwrap_or_else(|| "Untitled".to_string());
    let category = text("category")
        .or_else(|| text("type"))
        .unwrap_or_else(|| "activity".to_string());

    let event = Event::from_record(id, record);
    let title = if event.kind == Some(EventKind::Announcement) {
        normalize_title(&title)
    } else {
        title
    };

    ActivitySummary {
        id: id.to_string(),
        title,
        category,
        timestamp: event.timestamp,
    }
}

/// Strip leading "New announcement:" / "Updated announcement -" style
/// prefixes, however many were stacked up by repeated edits.
pub fn normalize_title(title: &str) -> String {
    let mut rest = title.trim();
    while let Some(stripped) = strip_announcement_prefix(rest) {
        rest = stripped;
    }
    rest.trim().to_string()
}

fn strip_announcement_prefix(text: &str) -> Option<&str> {
    let text = text.trim_start();
    for lead in PREFIX_LEADS {
        let Some(rest) = strip_prefix_ignore_case(text, lead) else {
            continue;
        };
        let Some(rest) = strip_prefix_ignore_case(rest.trim_start(), PREFIX_NOUN) else {
            continue;
        };
        let rest = rest.trim_start();
        let rest = rest.strip_prefix(&PREFIX_SEPARATORS[..]).unwrap_or(rest);
        return Some(rest.trim_start());
    }
    None
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &text[prefix.len()..])
}
