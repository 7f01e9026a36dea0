use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::storage::{read_best_effort, remove_best_effort, write_best_effort, SessionStore};

pub const ACT_STATE_KEY: &str = "mimsy.act";
pub const LANDING_COMPLETE_STATE_KEY: &str = "mimsy.landing_complete";
pub const VIDEO_OPENS_STATE_KEY: &str = "mimsy.video_opens";

/// Narrative stage. Variant order is the progression order, so `Ord` gives
/// `None < One < Two < All`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Act {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
    #[serde(rename = "all")]
    All,
}

impl Act {
    pub fn as_str(self) -> &'static str {
        match self {
            Act::None => "none",
            Act::One => "1",
            Act::Two => "2",
            Act::All => "all",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Some(Act::None),
            "1" => Some(Act::One),
            "2" => Some(Act::Two),
            "all" => Some(Act::All),
            _ => None,
        }
    }
}

/// Act progression plus the per-tab video-open counter.
///
/// Never fails: unreadable storage reads as the defaults and writes are
/// dropped.
#[derive(Clone)]
pub struct SessionProgress {
    durable: Arc<dyn SessionStore>,
    tab: Arc<dyn SessionStore>,
}

impl SessionProgress {
    pub fn new(durable: Arc<dyn SessionStore>, tab: Arc<dyn SessionStore>) -> Self {
        Self { durable, tab }
    }

    pub fn get(&self) -> Act {
        read_best_effort(self.durable.as_ref(), ACT_STATE_KEY)
            .and_then(|raw| Act::parse(&raw))
            .unwrap_or_default()
    }

    /// Moves to `max(current, target)` and returns the stored act.
    pub fn advance(&self, target: Act) -> Act {
        let current = self.get();
        if target <= current {
            return current;
        }
        write_best_effort(self.durable.as_ref(), ACT_STATE_KEY, target.as_str());
        tracing::info!("Act advanced {} -> {}", current.as_str(), target.as_str());
        target
    }

    pub fn reset(&self) {
        remove_best_effort(self.durable.as_ref(), ACT_STATE_KEY);
        remove_best_effort(self.durable.as_ref(), LANDING_COMPLETE_STATE_KEY);
        remove_best_effort(self.tab.as_ref(), VIDEO_OPENS_STATE_KEY);
    }

    pub fn video_opens(&self) -> u32 {
        read_best_effort(self.tab.as_ref(), VIDEO_OPENS_STATE_KEY)
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn bump_video_opens(&self) -> u32 {
        let next = self.video_opens().saturating_add(1);
        write_best_effort(self.tab.as_ref(), VIDEO_OPENS_STATE_KEY, &next.to_string());
        next
    }

    pub fn landing_complete(&self) -> bool {
        read_best_effort(self.durable.as_ref(), LANDING_COMPLETE_STATE_KEY)
            .map(|raw| raw == "1")
            .unwrap_or(false)
    }

    pub fn mark_landing_complete(&self) {
        write_best_effort(self.durable.as_ref(), LANDING_COMPLETE_STATE_KEY, "1");
    }
}
