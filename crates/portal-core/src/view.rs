//! What a repaint receives: the rendered slice of the feed plus badge state.

use serde::{Deserialize, Serialize};

use crate::aggregator::Aggregator;
use crate::models::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedTab {
    #[default]
    All,
    Unread,
}

impl FeedTab {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "all" => Some(Self::All),
            "unread" => Some(Self::Unread),
            _ => None,
        }
    }
}

/// Dropdown state: active tab and how much of the list is expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedView {
    pub tab: FeedTab,
    pub render_limit: usize,
    pub showing_all: bool,
}

impl FeedView {
    pub fn new(render_limit: usize) -> Self {
        Self {
            tab: FeedTab::All,
            render_limit,
            showing_all: false,
        }
    }

    /// `None` when everything is shown.
    pub fn limit(&self) -> Option<usize> {
        (!self.showing_all).then_some(self.render_limit)
    }

    pub fn matches(&self, event: &Event, user_id: &str) -> bool {
        match self.tab {
            FeedTab::All => true,
            FeedTab::Unread => !event.is_read_by(user_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderFrame {
    pub signed_in: bool,
    pub tab: FeedTab,
    /// Events to draw, newest first.
    pub events: Vec<Event>,
    /// Events matching the tab, including the ones cut off by the limit.
    pub total: usize,
    /// How many more "show more" would reveal.
    pub hidden: usize,
    pub unread_count: usize,
    pub badge: String,
}

/// Consumer of scheduled renders.
pub trait RenderSink: Send + Sync {
    fn render(&self, frame: RenderFrame);
}

pub fn badge_label(unread: usize, cap: usize) -> String {
    match unread {
        0 => String::new(),
        n if n > cap => format!("{}+", cap),
        n => n.to_string(),
    }
}

pub fn build_frame(aggregator: &Aggregator, view: FeedView, badge_cap: usize) -> RenderFrame {
    let Some(user) = aggregator.user() else {
        return RenderFrame {
            signed_in: false,
            tab: view.tab,
            events: Vec::new(),
            total: 0,
            hidden: 0,
            unread_count: 0,
            badge: String::new(),
        };
    };

    let all = aggregator.snapshot();
    let unread_count = all.iter().filter(|e| !e.is_read_by(&user.id)).count();
    let matching: Vec<Event> = all
        .into_iter()
        .filter(|e| view.matches(e, &user.id))
        .collect();

    let total = matching.len();
    let events: Vec<Event> = match view.limit() {
        Some(limit) => matching.into_iter().take(limit).collect(),
        None => matching,
    };
    let hidden = total.saturating_sub(view.render_limit);

    RenderFrame {
        signed_in: true,
        tab: view.tab,
        events,
        total,
        hidden: if view.showing_all { 0 } else { hidden },
        unread_count,
        badge: badge_label(unread_count, badge_cap),
    }
}
