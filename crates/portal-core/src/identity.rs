use serde_json::Value;

use crate::config::FeedConfig;
use crate::error::{PortalError, Result};
use crate::models::UserContext;
use crate::source::DocumentStore;

/// Sign-in state changes reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEvent {
    SignedIn {
        user_id: String,
        display_name: Option<String>,
        role_claim: Option<String>,
    },
    SignedOut,
}

impl IdentityEvent {
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self::SignedIn {
            user_id: user_id.into(),
            display_name: None,
            role_claim: None,
        }
    }
}

/// Resolve a signed-in identity into a [`UserContext`] by reading its profile.
///
/// The stored profile decides role and permissions; the identity's role claim
/// is only used when the profile has no role. The provider's display name
/// fills in for a profile without one.
pub async fn load_user_context(
    store: &dyn DocumentStore,
    config: &FeedConfig,
    user_id: &str,
    display_name: Option<&str>,
    role_claim: Option<&str>,
) -> Result<UserContext> {
    let path = config.user_path(user_id);
    let profile = match store.get(&path).await? {
        Some(Value::Object(profile)) => profile,
        _ => serde_json::Map::new(),
    };

    let mut user = UserContext::from_profile(user_id, &profile, role_claim).ok_or_else(|| {
        PortalError::ProfileMissing {
            user_id: user_id.to_string(),
        }
    })?;
    if user.display_name.is_none() {
        user.display_name = display_name.map(str::to_string);
    }
    Ok(user)
}
