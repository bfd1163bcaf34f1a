use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use portal_core::{
    ActivityLog, Audience, EventKind, FeedConfig, FeedTab, IdentityEvent, MemoryStore,
    NotificationFeed, Record, RenderFrame, RenderSink,
};
use serde_json::{json, Value};
use tokio::sync::watch;

/// How long a one-shot command waits for the feed to produce a frame.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    Feed {
        user_id: String,
        tab: FeedTab,
        show_all: bool,
    },
    Watch {
        user_id: String,
    },
    Unread {
        user_id: String,
    },
    MarkRead {
        user_id: String,
        event_id: String,
    },
    MarkAllRead {
        user_id: String,
        tab: FeedTab,
        show_all: bool,
    },
    Recent {
        limit: Option<usize>,
    },
    Publish {
        kind: EventKind,
        audience: Audience,
        title: String,
        message: Option<String>,
    },
    ViewResource {
        resource_id: String,
    },
}

impl CliCommand {
    /// Whether running the command changes the store.
    pub fn writes(&self) -> bool {
        matches!(
            self,
            Self::MarkRead { .. }
                | Self::MarkAllRead { .. }
                | Self::Publish { .. }
                | Self::ViewResource { .. }
        )
    }
}

/// Store and feed settings a command runs against.
pub struct CommandContext {
    pub store: MemoryStore,
    pub feed: FeedConfig,
}

impl CommandContext {
    pub fn new(store: MemoryStore, feed: FeedConfig) -> Self {
        Self { store, feed }
    }

    /// Open a JSON store dump; `None` starts from an empty store.
    pub fn load(dump: Option<&Path>, feed: FeedConfig) -> Result<Self> {
        let store = match dump {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read store dump: {}", path.display()))?;
                let root: Value = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse store dump: {}", path.display()))?;
                MemoryStore::from_value(root)
            }
            None => MemoryStore::new(),
        };
        Ok(Self::new(store, feed))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.store.export())
            .context("Failed to serialize store")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write store dump: {}", path.display()))
    }
}

// ===== Sinks =====

/// Prints every frame as one JSON document on stdout.
pub struct StdoutSink {
    pretty: bool,
}

impl StdoutSink {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }
}

impl RenderSink for StdoutSink {
    fn render(&self, frame: RenderFrame) {
        match format_output(&json!(frame), self.pretty) {
            Ok(text) => println!("{}", text),
            Err(e) => tracing::warn!("cli: cannot print frame: {}", e),
        }
    }
}

/// Publishes each frame to a watch channel so one-shot commands can wait
/// for the next render.
struct FrameWaiter {
    tx: watch::Sender<Option<RenderFrame>>,
}

impl FrameWaiter {
    fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }
}

impl RenderSink for FrameWaiter {
    fn render(&self, frame: RenderFrame) {
        self.tx.send_replace(Some(frame));
    }
}

type Frames = watch::Receiver<Option<RenderFrame>>;

async fn next_frame(frames: &mut Frames) -> Result<RenderFrame> {
    tokio::time::timeout(SETTLE_TIMEOUT, frames.changed())
        .await
        .context("Timed out waiting for the feed to render")?
        .context("Feed stopped rendering")?;
    frames
        .borrow_and_update()
        .clone()
        .ok_or_else(|| anyhow!("Feed rendered no frame"))
}

// ===== Commands =====

pub fn format_output(value: &Value, pretty: bool) -> Result<String> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(text)
}

pub async fn run_command(ctx: &CommandContext, command: CliCommand, pretty: bool) -> Result<Value> {
    tracing::debug!("cli: running {:?}", command);
    match command {
        CliCommand::Feed {
            user_id,
            tab,
            show_all,
        } => {
            let (_feed, frame, _frames) = open_feed(ctx, &user_id, tab, show_all).await?;
            Ok(json!(frame))
        }
        CliCommand::Watch { user_id } => {
            let mut feed = NotificationFeed::new(
                ctx.feed.clone(),
                Arc::new(ctx.store.clone()),
                Arc::new(StdoutSink::new(pretty)),
            );
            feed.handle_identity(IdentityEvent::signed_in(user_id.as_str()))
                .await
                .with_context(|| format!("Cannot sign in {}", user_id))?;
            tokio::signal::ctrl_c()
                .await
                .context("Failed to wait for Ctrl-C")?;
            feed.shutdown();
            Ok(json!({ "stopped": true }))
        }
        CliCommand::Unread { user_id } => {
            let (feed, frame, _frames) = open_feed(ctx, &user_id, FeedTab::All, false).await?;
            Ok(json!({
                "unreadCount": feed.unread_count(),
                "badge": frame.badge,
            }))
        }
        CliCommand::MarkRead { user_id, event_id } => {
            let (feed, _frame, mut frames) = open_feed(ctx, &user_id, FeedTab::All, false).await?;
            frames.borrow_and_update();
            let marked = feed.mark_read(&event_id);
            if marked {
                // the repaint comes after the write-back tasks have run
                next_frame(&mut frames).await?;
            }
            Ok(json!({ "marked": marked, "unreadCount": feed.unread_count() }))
        }
        CliCommand::MarkAllRead {
            user_id,
            tab,
            show_all,
        } => {
            let (feed, _frame, mut frames) = open_feed(ctx, &user_id, tab, show_all).await?;
            frames.borrow_and_update();
            let marked = feed.mark_all_read();
            if marked > 0 {
                next_frame(&mut frames).await?;
            }
            Ok(json!({ "marked": marked, "unreadCount": feed.unread_count() }))
        }
        CliCommand::Recent { limit } => {
            let log = ActivityLog::new(Arc::new(ctx.store.clone()), ctx.feed.clone());
            let limit = limit.unwrap_or(ctx.feed.recent_activity_limit);
            Ok(json!(log.recent_activity(limit).await?))
        }
        CliCommand::Publish {
            kind,
            audience,
            title,
            message,
        } => {
            let log = ActivityLog::new(Arc::new(ctx.store.clone()), ctx.feed.clone());
            let mut payload = Record::new();
            payload.insert("title".to_string(), Value::String(title));
            if let Some(message) = message {
                payload.insert("message".to_string(), Value::String(message));
            }
            let id = log.publish(kind, audience, payload).await?;
            Ok(json!({ "id": id }))
        }
        CliCommand::ViewResource { resource_id } => {
            let log = ActivityLog::new(Arc::new(ctx.store.clone()), ctx.feed.clone());
            let views = log.record_view(&resource_id).await?;
            Ok(json!({ "resourceId": resource_id, "views": views }))
        }
    }
}

/// Sign `user_id` in and wait for the first settled frame.
async fn open_feed(
    ctx: &CommandContext,
    user_id: &str,
    tab: FeedTab,
    show_all: bool,
) -> Result<(NotificationFeed, RenderFrame, Frames)> {
    let waiter = Arc::new(FrameWaiter::new());
    let mut frames = waiter.tx.subscribe();
    let mut feed = NotificationFeed::new(ctx.feed.clone(), Arc::new(ctx.store.clone()), waiter);
    feed.set_tab(tab);
    if show_all {
        feed.toggle_show_all();
    }
    feed.handle_identity(IdentityEvent::signed_in(user_id))
        .await
        .with_context(|| format!("Cannot sign in {}", user_id))?;

    let frame = next_frame(&mut frames).await?;
    Ok((feed, frame, frames))
}
