//! Role-based visibility of notifications.
//!
//! Audience gating runs first, then a per-kind rule looked up in
//! [`VisibilityRules`]. Kinds without a rule are hidden.

use std::collections::HashMap;

use crate::models::{Audience, Capability, Event, EventKind, Role, UserContext};

/// Per-kind predicate, evaluated after the audience check has passed.
pub type KindRule = fn(&Event, &UserContext) -> bool;

#[derive(Clone)]
pub struct VisibilityRules {
    rules: HashMap<EventKind, KindRule>,
}

impl Default for VisibilityRules {
    fn default() -> Self {
        Self::empty()
            .with_rule(EventKind::Registration, registration_rule)
            .with_rule(EventKind::ResourceUpload, resource_rule)
            .with_rule(EventKind::Announcement, open_rule)
            .with_rule(EventKind::Schedule, open_rule)
            .with_rule(EventKind::Meeting, open_rule)
    }
}

impl std::fmt::Debug for VisibilityRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.rules.keys().map(EventKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("VisibilityRules").field("kinds", &kinds).finish()
    }
}

impl VisibilityRules {
    /// A rule set that hides everything.
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    pub fn with_rule(mut self, kind: EventKind, rule: KindRule) -> Self {
        self.rules.insert(kind, rule);
        self
    }

    pub fn is_visible(&self, event: &Event, user: &UserContext) -> bool {
        if !audience_permits(event.audience, user.role) {
            return false;
        }
        let Some(kind) = event.kind else {
            return false;
        };
        self.rules
            .get(&kind)
            .map(|rule| rule(event, user))
            .unwrap_or(false)
    }
}

pub fn audience_permits(audience: Audience, role: Role) -> bool {
    match audience {
        Audience::Public => true,
        Audience::Members => matches!(role, Role::Member | Role::Staff | Role::Admin),
        Audience::Staff => matches!(role, Role::Staff | Role::Admin),
        Audience::Admin => role == Role::Admin,
    }
}

/// Registrations are actionable only by staff/admins who can verify accounts.
fn registration_rule(_event: &Event, user: &UserContext) -> bool {
    matches!(user.role, Role::Admin | Role::Staff) && user.has(Capability::VerifyUsers)
}

fn resource_rule(event: &Event, user: &UserContext) -> bool {
    user.role.can_access(event.access_level())
}

fn open_rule(_event: &Event, _user: &UserContext) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: serde_json::Value) -> Event {
        Event::from_record("e", value.as_object().cloned().unwrap())
    }

    fn member() -> UserContext {
        UserContext::new("m", Role::Member)
    }

    fn staff() -> UserContext {
        UserContext::new("s", Role::Staff)
    }

    fn admin() -> UserContext {
        UserContext::new("a", Role::Admin)
    }

    #[test]
    fn test_admin_audience_hidden_from_member_and_staff() {
        let rules = VisibilityRules::default();
        let ev = event(json!({"type": "announcement", "audience": "admin"}));
        assert!(!rules.is_visible(&ev, &member()));
        assert!(!rules.is_visible(&ev, &staff()));
        assert!(rules.is_visible(&ev, &admin()));
    }

    #[test]
    fn test_staff_audience() {
        let rules = VisibilityRules::default();
        let ev = event(json!({"type": "schedule", "audience": "staff"}));
        assert!(!rules.is_visible(&ev, &member()));
        assert!(rules.is_visible(&ev, &staff()));
        assert!(rules.is_visible(&ev, &admin()));
    }

    #[test]
    fn test_missing_audience_is_public() {
        let rules = VisibilityRules::default();
        let ev = event(json!({"type": "meeting"}));
        assert!(rules.is_visible(&ev, &member()));
    }

    #[test]
    fn test_registration_requires_capability_and_role() {
        let rules = VisibilityRules::default();
        let ev = event(json!({"type": "registration"}));
        assert!(!rules.is_visible(&ev, &admin()));
        assert!(rules.is_visible(&ev, &admin().with_capability(Capability::VerifyUsers)));
        assert!(rules.is_visible(&ev, &staff().with_capability(Capability::VerifyUsers)));
        assert!(!rules.is_visible(&ev, &member().with_capability(Capability::VerifyUsers)));
    }

    #[test]
    fn test_staff_resource_hidden_from_member() {
        let rules = VisibilityRules::default();
        let ev = event(json!({"type": "resource_upload", "audience": "staff"}));
        assert!(!rules.is_visible(&ev, &member()));

        let ev = event(json!({"type": "resource_upload", "accessLevel": "staff"}));
        assert!(!rules.is_visible(&ev, &member()));
        assert!(rules.is_visible(&ev, &staff()));
    }

    #[test]
    fn test_resource_access_levels() {
        let rules = VisibilityRules::default();
        let members_only = event(json!({"type": "resource_upload", "accessLevel": "members"}));
        assert!(rules.is_visible(&members_only, &member()));
        assert!(!rules.is_visible(&members_only, &staff()));
        assert!(rules.is_visible(&members_only, &admin()));

        let public = event(json!({"type": "resource_upload"}));
        assert!(rules.is_visible(&public, &member()));
    }

    #[test]
    fn test_unknown_kind_fails_closed() {
        let rules = VisibilityRules::default();
        assert!(!rules.is_visible(&event(json!({"type": "poll"})), &admin()));
        assert!(!rules.is_visible(&event(json!({})), &admin()));
    }

    #[test]
    fn test_custom_rule_registration() {
        fn never(_: &Event, _: &UserContext) -> bool {
            false
        }
        let rules = VisibilityRules::default().with_rule(EventKind::Meeting, never);
        assert!(!rules.is_visible(&event(json!({"type": "meeting"})), &admin()));
        assert!(!VisibilityRules::empty().is_visible(&event(json!({"type": "meeting"})), &admin()));
    }
}
