use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::event::{AccessLevel, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    Staff,
    Admin,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "member" => Some(Self::Member),
            "staff" => Some(Self::Staff),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Staff => "staff",
            Self::Admin => "admin",
        }
    }

    /// Whether this role may open a resource with the given access level.
    /// Staff and members each see their own tier plus public; admins see everything.
    pub fn can_access(&self, level: AccessLevel) -> bool {
        match (self, level) {
            (Self::Admin, _) => true,
            (_, AccessLevel::Public) => true,
            (Self::Staff, AccessLevel::Staff) => true,
            (Self::Member, AccessLevel::Members) => true,
            _ => false,
        }
    }
}

/// Capability flags stored under `permissions` in a user profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    VerifyUsers,
    Announce,
    ManageResources,
    ManageSchedules,
}

impl Capability {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "canVerifyUsers" => Some(Self::VerifyUsers),
            "canAnnounce" => Some(Self::Announce),
            "canManageResources" => Some(Self::ManageResources),
            "canManageSchedules" => Some(Self::ManageSchedules),
            _ => None,
        }
    }
}

/// The signed-in user as seen by the feed. Read-only from the feed's side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserContext {
    pub id: String,
    pub display_name: Option<String>,
    pub role: Role,
    pub permissions: BTreeSet<Capability>,
}

impl UserContext {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            role,
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.permissions.insert(capability);
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.permissions.contains(&capability)
    }

    /// Build a context from a `users/{uid}` profile node.
    ///
    /// The profile's `role` wins over `role_claim`; with neither present (or
    /// unrecognized) there is no context. Only permission flags set to `true`
    /// are granted.
    pub fn from_profile(user_id: &str, profile: &Record, role_claim: Option<&str>) -> Option<Self> {
        let role = profile
            .get("role")
            .and_then(Value::as_str)
            .and_then(Role::parse)
            .or_else(|| role_claim.and_then(Role::parse))?;

        let permissions = match profile.get("permissions") {
            Some(Value::Object(flags)) => flags
                .iter()
                .filter(|(_, v)| v.as_bool().unwrap_or(false))
                .filter_map(|(k, _)| Capability::from_key(k))
                .collect(),
            _ => BTreeSet::new(),
        };

        let display_name = profile
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string);

        Some(Self {
            id: user_id.to_string(),
            display_name,
            role,
            permissions,
        })
    }
}
