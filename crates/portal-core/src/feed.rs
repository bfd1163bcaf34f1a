use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::aggregator::Aggregator;
use crate::config::FeedConfig;
use crate::error::Result;
use crate::events::{ChildEvent, Snapshot, SourceUpdate};
use crate::identity::{load_user_context, IdentityEvent};
use crate::models::{Event, EventKind, Record, UserContext};
use crate::read_state::ReadStateTracker;
use crate::render::{render_channel, RenderHandle, RenderRequest, RenderScheduler};
use crate::source::{join_path, DocumentStore, Subscription};
use crate::view::{build_frame, FeedTab, FeedView, RenderFrame, RenderSink};
use crate::visibility::VisibilityRules;

/// The notification feed of one signed-in user.
///
/// Owns the subscriptions to the canonical log and to the role's channels,
/// pumps their updates into the [`Aggregator`], and repaints the
/// [`RenderSink`] through the debounced scheduler. Must be created inside a
/// tokio runtime.
pub struct NotificationFeed {
    config: FeedConfig,
    store: Arc<dyn DocumentStore>,
    aggregator: Arc<Mutex<Aggregator>>,
    view: Arc<Mutex<FeedView>>,
    tracker: ReadStateTracker,
    render: RenderHandle,
    scheduler: RenderScheduler,
    /// One pump task per subscribed source path, canonical log included.
    pumps: HashMap<String, JoinHandle<()>>,
    channels: Vec<String>,
}

impl NotificationFeed {
    pub fn new(config: FeedConfig, store: Arc<dyn DocumentStore>, sink: Arc<dyn RenderSink>) -> Self {
        Self::with_rules(config, store, sink, VisibilityRules::default())
    }

    pub fn with_rules(
        config: FeedConfig,
        store: Arc<dyn DocumentStore>,
        sink: Arc<dyn RenderSink>,
        rules: VisibilityRules,
    ) -> Self {
        let (render, pending) = render_channel();
        let aggregator = Arc::new(Mutex::new(
            Aggregator::new(&config.canonical_path, Arc::new(render.clone())).with_rules(rules),
        ));
        let view = Arc::new(Mutex::new(FeedView::new(config.render_limit)));

        let scheduler = {
            let aggregator = aggregator.clone();
            let view = view.clone();
            let badge_cap = config.badge_cap;
            RenderScheduler::start(pending, config.render_debounce(), move || {
                let view = *view.lock();
                let frame = build_frame(&aggregator.lock(), view, badge_cap);
                sink.render(frame);
            })
        };

        let tracker = ReadStateTracker::new(aggregator.clone(), store.clone());

        Self {
            config,
            store,
            aggregator,
            view,
            tracker,
            render,
            scheduler,
            pumps: HashMap::new(),
            channels: Vec::new(),
        }
    }

    // ===== Identity =====

    pub async fn handle_identity(&mut self, event: IdentityEvent) -> Result<()> {
        match event {
            IdentityEvent::SignedIn {
                user_id,
                display_name,
                role_claim,
            } => {
                let loaded = load_user_context(
                    self.store.as_ref(),
                    &self.config,
                    &user_id,
                    display_name.as_deref(),
                    role_claim.as_deref(),
                )
                .await;
                match loaded {
                    Ok(user) => self.sign_in(user),
                    Err(err) => {
                        tracing::warn!("feed: cannot sign in {}: {}", user_id, err);
                        self.sign_out();
                        Err(err)
                    }
                }
            }
            IdentityEvent::SignedOut => {
                self.sign_out();
                Ok(())
            }
        }
    }

    /// Start (or adjust) the feed for `user`. Calling it again for the same
    /// user with a new role or permissions re-filters in place; channels kept
    /// by the new role stay subscribed and keep their entries.
    pub fn sign_in(&mut self, user: UserContext) -> Result<()> {
        let same_user = self
            .aggregator
            .lock()
            .user()
            .is_some_and(|current| current.id == user.id);
        if !same_user {
            self.stop_pumps();
            self.channels.clear();
            self.aggregator.lock().clear();
        }

        tracing::info!("feed: signed in as {} ({})", user.id, user.role.as_str());
        let channels = self.config.channel_paths_for(user.role);
        self.aggregator.lock().set_user(Some(user));

        self.resubscribe(channels)
    }

    pub fn sign_out(&mut self) {
        self.stop_pumps();
        self.channels.clear();
        let mut aggregator = self.aggregator.lock();
        if aggregator.user().is_some() {
            tracing::info!("feed: signed out");
        }
        aggregator.set_user(None);
        aggregator.clear();
    }

    pub fn current_user(&self) -> Option<UserContext> {
        self.aggregator.lock().user().cloned()
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    // ===== Subscriptions =====

    /// Bring the subscriptions in line with `channels`: drop the channels
    /// that left (and their layers), add the new ones, leave the rest alone.
    fn resubscribe(&mut self, channels: Vec<String>) -> Result<()> {
        let canonical = self.config.canonical_path.clone();
        let dropped: Vec<String> = self
            .pumps
            .keys()
            .filter(|path| **path != canonical && !channels.contains(*path))
            .cloned()
            .collect();
        if !dropped.is_empty() {
            let mut aggregator = self.aggregator.lock();
            for path in &dropped {
                if let Some(pump) = self.pumps.remove(path) {
                    pump.abort();
                }
                aggregator.forget_source(path);
            }
        }
        self.channels = channels;

        if !self.pumps.contains_key(&canonical) {
            let updates = snapshot_updates(self.store.subscribe_snapshot(&canonical)?);
            self.spawn_pump(canonical.clone(), updates);
        }
        let mut added = 0;
        for path in self.channels.clone() {
            if self.pumps.contains_key(&path) {
                continue;
            }
            let updates = child_updates(self.store.subscribe_children(&path)?);
            self.spawn_pump(path, updates);
            added += 1;
        }

        if added > 0 || !dropped.is_empty() {
            tracing::info!(
                "feed: subscribed to {} and {} channels (+{} -{})",
                canonical,
                self.channels.len(),
                added,
                dropped.len()
            );
        }
        Ok(())
    }

    fn spawn_pump(&mut self, path: String, mut updates: BoxStream<'static, SourceUpdate>) {
        let aggregator = self.aggregator.clone();
        let pump = tokio::spawn(async move {
            while let Some(update) = updates.next().await {
                aggregator.lock().apply(update);
            }
        });
        self.pumps.insert(path, pump);
    }

    fn stop_pumps(&mut self) {
        for (_, pump) in self.pumps.drain() {
            pump.abort();
        }
    }

    // ===== Read state =====

    pub fn mark_read(&self, event_id: &str) -> bool {
        let Some(user) = self.current_user() else {
            return false;
        };
        self.tracker.mark_read(&user.id, event_id)
    }

    /// Mark what the dropdown currently shows: the active tab, cut at the
    /// render limit unless everything is expanded.
    pub fn mark_all_read(&self) -> usize {
        let Some(user) = self.current_user() else {
            return 0;
        };
        let view = *self.view.lock();
        self.tracker
            .mark_all_visible(&user.id, |event| view.matches(event, &user.id), view.limit())
    }

    pub fn unread_count(&self) -> usize {
        match self.current_user() {
            Some(user) => self.tracker.unread_count(&user.id),
            None => 0,
        }
    }

    // ===== Status changes =====

    /// Approve the registration behind `event_id`: the applicant's profile and
    /// every record of the event are flagged verified in one multi-path
    /// update, and the notification is acknowledged. Only viewers who can see
    /// registrations may approve.
    ///
    /// Returns `false` when there is nothing to approve. A failed write is
    /// logged; the local read state is kept.
    pub async fn verify_registration(&self, event_id: &str) -> bool {
        let (verifier, applicant, sources) = {
            let aggregator = self.aggregator.lock();
            let Some(verifier) = aggregator.user().cloned() else {
                return false;
            };
            let Some(event) = aggregator.get(event_id) else {
                return false;
            };
            if event.kind != Some(EventKind::Registration) || !aggregator.is_visible(event) {
                return false;
            }
            if event.payload.get("solved").and_then(Value::as_bool) == Some(true) {
                return false;
            }
            let Some(applicant) = event.payload.get("userId").and_then(Value::as_str) else {
                tracing::warn!("feed: registration {} names no user", event_id);
                return false;
            };
            (verifier, applicant.to_string(), aggregator.sources_of(event_id))
        };

        let verified_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let verified_by = verifier
            .display_name
            .clone()
            .unwrap_or_else(|| "Unknown".to_string());

        let mut updates = Record::new();
        let profile = self.config.user_path(&applicant);
        updates.insert(join_path(&profile, "isVerified"), Value::Bool(true));
        updates.insert(join_path(&profile, "verificationDate"), Value::from(verified_at.as_str()));
        for source in &sources {
            let record = join_path(source, event_id);
            updates.insert(join_path(&record, "isVerified"), Value::Bool(true));
            updates.insert(join_path(&record, "verifiedBy"), Value::from(verified_by.as_str()));
            updates.insert(join_path(&record, "verificationDate"), Value::from(verified_at.as_str()));
            updates.insert(join_path(&record, "solved"), Value::Bool(true));
        }

        self.tracker.mark_read(&verifier.id, event_id);

        match self.store.update("", updates).await {
            Ok(()) => tracing::info!("feed: {} verified {} ({})", verifier.id, applicant, event_id),
            Err(err) => tracing::warn!("feed: verifying {} ({}) failed: {}", applicant, event_id, err),
        }
        true
    }

    // ===== View =====

    pub fn set_tab(&self, tab: FeedTab) {
        self.view.lock().tab = tab;
        self.render.request_render();
    }

    /// Flip between the limited list and everything. Returns the new state.
    pub fn toggle_show_all(&self) -> bool {
        let showing_all = {
            let mut view = self.view.lock();
            view.showing_all = !view.showing_all;
            view.showing_all
        };
        self.render.request_render();
        showing_all
    }

    pub fn view(&self) -> FeedView {
        *self.view.lock()
    }

    /// The frame a render would produce right now.
    pub fn frame(&self) -> RenderFrame {
        let view = *self.view.lock();
        build_frame(&self.aggregator.lock(), view, self.config.badge_cap)
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.aggregator.lock().snapshot()
    }

    pub fn aggregator(&self) -> Arc<Mutex<Aggregator>> {
        self.aggregator.clone()
    }

    pub fn shutdown(&mut self) {
        self.stop_pumps();
        self.scheduler.cancel();
    }
}

impl Drop for NotificationFeed {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn snapshot_updates(subscription: Subscription<Snapshot>) -> BoxStream<'static, SourceUpdate> {
    let path = subscription.path().to_string();
    let closed = SourceUpdate::Closed { path: path.clone() };
    subscription
        .map(move |children| SourceUpdate::Snapshot {
            path: path.clone(),
            children,
        })
        .chain(stream::once(async move { closed }))
        .boxed()
}

fn child_updates(subscription: Subscription<ChildEvent>) -> BoxStream<'static, SourceUpdate> {
    let path = subscription.path().to_string();
    let closed = SourceUpdate::Closed { path: path.clone() };
    subscription
        .map(move |event| SourceUpdate::Child {
            path: path.clone(),
            event,
        })
        .chain(stream::once(async move { closed }))
        .boxed()
}
