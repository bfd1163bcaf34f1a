//! Application-wide constants
//!
//! Store paths and tuning values shared by the feed, the activity log and the CLI.

/// Canonical activity log; authoritative for event existence.
pub const ACTIVITY_PATH: &str = "activity_table";

/// Root under which the per-audience notification channels live.
pub const CHANNEL_ROOT: &str = "notifications";

/// User profiles, keyed by user id.
pub const USERS_PATH: &str = "users";

/// Resource records (view counters live at `resources/{id}/views`).
pub const RESOURCES_PATH: &str = "resources";

/// Field holding the per-user acknowledgement map on every event.
pub const READ_BY_FIELD: &str = "readBy";

/// Quiet window before a burst of feed updates is rendered.
pub const RENDER_DEBOUNCE_MS: u64 = 120;

/// Number of notifications shown before "show more".
pub const RENDER_LIMIT: usize = 8;

/// Unread counts above this are shown as "99+".
pub const BADGE_CAP: usize = 99;

/// How many canonical records the recent-activity digest reads.
pub const RECENT_ACTIVITY_LIMIT: usize = 50;

// Supplementary channel names under CHANNEL_ROOT
pub mod channels {
    pub const PUBLIC: &str = "public";
    pub const STAFF: &str = "staff";
    pub const ADMIN: &str = "admin";
}
