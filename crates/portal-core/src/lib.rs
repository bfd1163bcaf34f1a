pub mod activity;
pub mod aggregator;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod feed;
pub mod identity;
pub mod models;
pub mod read_state;
pub mod render;
pub mod source;
pub mod timestamp;
pub mod view;
pub mod visibility;

pub use activity::{normalize_title, ActivityLog, ActivitySummary};
pub use aggregator::Aggregator;
pub use config::FeedConfig;
pub use error::{PortalError, Result};
pub use events::{ChildChange, ChildEvent, Snapshot, SourceUpdate};
pub use feed::NotificationFeed;
pub use identity::IdentityEvent;
pub use models::{Audience, Capability, Event, EventKind, Record, Role, UserContext};
pub use read_state::ReadStateTracker;
pub use render::{render_channel, RenderHandle, RenderRequest, RenderScheduler};
pub use source::{DocumentStore, MemoryStore, Subscription};
pub use view::{FeedTab, FeedView, RenderFrame, RenderSink};
pub use visibility::VisibilityRules;
