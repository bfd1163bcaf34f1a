use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::READ_BY_FIELD;
use crate::timestamp;

/// JSON object as delivered by the store.
pub type Record = serde_json::Map<String, Value>;

/// Closed set of notification kinds. Records carrying any other `type`
/// materialize with `kind: None` and are never visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// New account waiting for verification
    Registration,
    ResourceUpload,
    Announcement,
    Schedule,
    Meeting,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        Self::Registration,
        Self::ResourceUpload,
        Self::Announcement,
        Self::Schedule,
        Self::Meeting,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "registration" => Some(Self::Registration),
            "resource_upload" => Some(Self::ResourceUpload),
            "announcement" => Some(Self::Announcement),
            "schedule" => Some(Self::Schedule),
            "meeting" => Some(Self::Meeting),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::ResourceUpload => "resource_upload",
            Self::Announcement => "announcement",
            Self::Schedule => "schedule",
            Self::Meeting => "meeting",
        }
    }
}

/// Who an event is addressed to. Ordered from least to most restricted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Public,
    Members,
    Staff,
    Admin,
}

impl Audience {
    /// Interpret the `audience` field. Absent or null means public; the
    /// announcement editor's `all_users`/`members_only`/`staff_only` codes are
    /// accepted. Unrecognized values are treated as admin-only.
    pub fn from_field(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Self::Public,
            Some(Value::String(s)) => match s.as_str() {
                "" | "public" | "all_users" => Self::Public,
                "members" | "members_only" => Self::Members,
                "staff" | "staff_only" => Self::Staff,
                "admin" | "admin_only" => Self::Admin,
                _ => Self::Admin,
            },
            Some(_) => Self::Admin,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Members => "members",
            Self::Staff => "staff",
            Self::Admin => "admin",
        }
    }
}

/// Declared access level of an uploaded resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Public,
    Members,
    Staff,
    AdminOnly,
}

impl AccessLevel {
    /// Absent means public; anything unrecognized is admin-only.
    pub fn from_field(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str) {
            None => match value {
                None | Some(Value::Null) => Self::Public,
                Some(_) => Self::AdminOnly,
            },
            Some("" | "public") => Self::Public,
            Some("members" | "members_only") => Self::Members,
            Some("staff" | "staff_only") => Self::Staff,
            Some(_) => Self::AdminOnly,
        }
    }
}

/// A notification as materialized by the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub kind: Option<EventKind>,
    pub audience: Audience,
    /// Normalized epoch milliseconds; 0 when no usable time field exists.
    pub timestamp: i64,
    pub read_by: BTreeMap<String, bool>,
    /// Remaining record fields, untouched. Only renderers look at these.
    pub payload: Record,
}

impl Event {
    /// Build an event from a raw record. `readBy` is lifted out of the payload;
    /// entries that are not `true` are dropped.
    pub fn from_record(id: &str, mut record: Record) -> Self {
        let read_by = match record.remove(READ_BY_FIELD) {
            Some(Value::Object(map)) => map
                .into_iter()
                .filter(|(_, v)| v.as_bool().unwrap_or(false))
                .map(|(k, _)| (k, true))
                .collect(),
            _ => BTreeMap::new(),
        };

        let kind = record
            .get("type")
            .or_else(|| record.get("kind"))
            .and_then(Value::as_str)
            .and_then(EventKind::parse);
        let audience = Audience::from_field(record.get("audience"));
        let timestamp = timestamp::normalize(&record);

        Self {
            id: id.to_string(),
            kind,
            audience,
            timestamp,
            read_by,
            payload: record,
        }
    }

    pub fn is_read_by(&self, user_id: &str) -> bool {
        self.read_by.get(user_id).copied().unwrap_or(false)
    }

    pub fn access_level(&self) -> AccessLevel {
        AccessLevel::from_field(self.payload.get("accessLevel"))
    }

    pub fn title(&self) -> Option<&str> {
        self.payload.get("title").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_from_record_defaults() {
        let event = Event::from_record("a1", record(json!({"type": "announcement"})));
        assert_eq!(event.kind, Some(EventKind::Announcement));
        assert_eq!(event.audience, Audience::Public);
        assert_eq!(event.timestamp, 0);
        assert!(event.read_by.is_empty());
    }

    #[test]
    fn test_from_record_lifts_read_by() {
        let event = Event::from_record(
            "a1",
            record(json!({
                "type": "meeting",
                "timestamp": 100,
                "readBy": {"u1": true, "u2": false, "u3": "yes"}
            })),
        );
        assert!(event.is_read_by("u1"));
        assert!(!event.is_read_by("u2"));
        assert!(!event.is_read_by("u3"));
        assert!(!event.payload.contains_key("readBy"));
        assert_eq!(event.timestamp, 100);
    }

    #[test]
    fn test_unknown_kind_is_none() {
        let event = Event::from_record("x", record(json!({"type": "poll"})));
        assert_eq!(event.kind, None);
    }

    #[test]
    fn test_kind_field_fallback() {
        let event = Event::from_record("x", record(json!({"kind": "schedule"})));
        assert_eq!(event.kind, Some(EventKind::Schedule));
    }

    #[test]
    fn test_audience_aliases() {
        assert_eq!(Audience::from_field(Some(&json!("all_users"))), Audience::Public);
        assert_eq!(Audience::from_field(Some(&json!("members_only"))), Audience::Members);
        assert_eq!(Audience::from_field(Some(&json!("staff_only"))), Audience::Staff);
        assert_eq!(Audience::from_field(Some(&json!("board"))), Audience::Admin);
        assert_eq!(Audience::from_field(Some(&Value::Null)), Audience::Public);
    }

    #[test]
    fn test_access_level_parsing() {
        assert_eq!(AccessLevel::from_field(None), AccessLevel::Public);
        assert_eq!(AccessLevel::from_field(Some(&json!("members"))), AccessLevel::Members);
        assert_eq!(AccessLevel::from_field(Some(&json!("staff"))), AccessLevel::Staff);
        assert_eq!(AccessLevel::from_field(Some(&json!("secret"))), AccessLevel::AdminOnly);
        assert_eq!(AccessLevel::from_field(Some(&json!(3))), AccessLevel::AdminOnly);
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
    }
}
