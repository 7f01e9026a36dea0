//! Synthetic steering instructions.
//!
//! Two independent machines live here:
//! - [`NudgePolicy`]: act-scoped action counters that periodically steer the
//!   conversation toward the next narrative beat.
//! - [`video::VideoNudges`]: one-shot reactions to how the visitor handles the
//!   video player.

pub mod video;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::progress::Act;
use crate::storage::{read_best_effort, remove_best_effort, write_best_effort, SessionStore};

pub const NUDGE_ACT_STATE_KEY: &str = "mimsy.nudge.act";
pub const NUDGE_COUNT_STATE_KEY: &str = "mimsy.nudge.count";
pub const NUDGE_STAGE_STATE_KEY: &str = "mimsy.nudge.stage";
pub const NUDGE_ACT2_DONE_STATE_KEY: &str = "mimsy.nudge.act2_done";

pub const ACT1_FIRST_THRESHOLD: u32 = 8;
pub const ACT1_REMINDER_THRESHOLD: u32 = 3;
pub const ACT2_THRESHOLD: u32 = 3;

/// What the visitor did to earn the action count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Chat,
    Video,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NudgeStage {
    #[default]
    None,
    Act1First,
    Act1Reminder,
    Act2Done,
}

impl NudgeStage {
    pub fn as_str(self) -> &'static str {
        match self {
            NudgeStage::None => "none",
            NudgeStage::Act1First => "act1_first",
            NudgeStage::Act1Reminder => "act1_reminder",
            NudgeStage::Act2Done => "act2_done",
        }
    }

    pub fn from_store(raw: &str) -> Self {
        match raw.trim() {
            "act1_first" => NudgeStage::Act1First,
            "act1_reminder" => NudgeStage::Act1Reminder,
            "act2_done" => NudgeStage::Act2Done,
            _ => NudgeStage::None,
        }
    }
}

/// Canned instruction selected when a stage threshold is crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NudgeTemplate {
    Act1FirstChat,
    Act1FirstVideo,
    Act1ReminderChat,
    Act1ReminderVideo,
    Act2Chat,
    Act2Video,
}

impl NudgeTemplate {
    pub fn key(self) -> &'static str {
        match self {
            NudgeTemplate::Act1FirstChat => "act1_first_chat",
            NudgeTemplate::Act1FirstVideo => "act1_first_video",
            NudgeTemplate::Act1ReminderChat => "act1_reminder_chat",
            NudgeTemplate::Act1ReminderVideo => "act1_reminder_video",
            NudgeTemplate::Act2Chat => "act2_chat",
            NudgeTemplate::Act2Video => "act2_video",
        }
    }

    pub fn instruction(self) -> &'static str {
        match self {
            NudgeTemplate::Act1FirstChat => {
                "[steer] Answer the visitor, then in one short extra line mention that all of \
                 these videos were made by Michael, a real human, and ask if they want to meet him."
            }
            NudgeTemplate::Act1FirstVideo => {
                "[steer] React to the video in one line, then point out that Michael made it \
                 (not you, you are a hamster) and ask if they want to know who he is."
            }
            NudgeTemplate::Act1ReminderChat => {
                "[steer] Answer briefly. Remind the visitor, gently and in character, that \
                 Michael is the one who actually makes videos and offer to introduce him."
            }
            NudgeTemplate::Act1ReminderVideo => {
                "[steer] Keep the reaction short and nudge the visitor once more toward meeting \
                 Michael, the human behind the videos."
            }
            NudgeTemplate::Act2Chat => {
                "[steer] Answer, then suggest that if the visitor likes what they see they \
                 could get in touch with Michael. Offer to show his contact card."
            }
            NudgeTemplate::Act2Video => {
                "[steer] After reacting to the video, suggest working with Michael on \
                 something like it and offer his contact card."
            }
        }
    }

    fn first(kind: ActionKind) -> Self {
        match kind {
            ActionKind::Chat => NudgeTemplate::Act1FirstChat,
            ActionKind::Video => NudgeTemplate::Act1FirstVideo,
        }
    }

    fn reminder(kind: ActionKind) -> Self {
        match kind {
            ActionKind::Chat => NudgeTemplate::Act1ReminderChat,
            ActionKind::Video => NudgeTemplate::Act1ReminderVideo,
        }
    }

    fn act2(kind: ActionKind) -> Self {
        match kind {
            ActionKind::Chat => NudgeTemplate::Act2Chat,
            ActionKind::Video => NudgeTemplate::Act2Video,
        }
    }
}

/// Counter/stage pair for the act the policy last observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedNudgeState {
    pub act: Act,
    pub count: u32,
    pub stage: NudgeStage,
    pub act2_done: bool,
}

/// Act-scoped nudge counter persisted in per-tab storage.
#[derive(Clone)]
pub struct NudgePolicy {
    store: Arc<dyn SessionStore>,
}

impl NudgePolicy {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Counts one qualifying action under `act` and returns a template when a
    /// stage threshold is crossed.
    pub fn register_action(&self, act: Act, kind: ActionKind) -> Option<NudgeTemplate> {
        let mut state = self.load(act);

        let template = match act {
            Act::None | Act::All => None,
            Act::One => match state.stage {
                NudgeStage::None => {
                    state.count += 1;
                    if state.count >= ACT1_FIRST_THRESHOLD {
                        state.count = 0;
                        state.stage = NudgeStage::Act1First;
                        Some(NudgeTemplate::first(kind))
                    } else {
                        None
                    }
                }
                NudgeStage::Act1First => {
                    state.count += 1;
                    if state.count >= ACT1_REMINDER_THRESHOLD {
                        state.count = 0;
                        state.stage = NudgeStage::Act1Reminder;
                        Some(NudgeTemplate::reminder(kind))
                    } else {
                        None
                    }
                }
                NudgeStage::Act1Reminder | NudgeStage::Act2Done => None,
            },
            Act::Two => {
                if state.act2_done {
                    None
                } else {
                    state.count += 1;
                    if state.count >= ACT2_THRESHOLD {
                        state.count = 0;
                        state.stage = NudgeStage::Act2Done;
                        state.act2_done = true;
                        Some(NudgeTemplate::act2(kind))
                    } else {
                        None
                    }
                }
            }
        };

        if let Some(template) = template {
            tracing::debug!(
                "Nudge '{}' fired in act {} ({:?} action)",
                template.key(),
                act.as_str(),
                kind
            );
        }

        self.save(&state);
        template
    }

    /// Current persisted state, as seen from `act`.
    pub fn state(&self, act: Act) -> StagedNudgeState {
        self.load(act)
    }

    pub fn reset(&self) {
        for key in [
            NUDGE_ACT_STATE_KEY,
            NUDGE_COUNT_STATE_KEY,
            NUDGE_STAGE_STATE_KEY,
            NUDGE_ACT2_DONE_STATE_KEY,
        ] {
            remove_best_effort(self.store.as_ref(), key);
        }
    }

    fn load(&self, act: Act) -> StagedNudgeState {
        let store = self.store.as_ref();
        let snapshot = read_best_effort(store, NUDGE_ACT_STATE_KEY).and_then(|raw| Act::parse(&raw));

        if snapshot != Some(act) {
            if snapshot.is_some() {
                tracing::debug!("Act changed to {}; nudge counters reset", act.as_str());
            }
            return StagedNudgeState {
                act,
                ..StagedNudgeState::default()
            };
        }

        StagedNudgeState {
            act,
            count: read_best_effort(store, NUDGE_COUNT_STATE_KEY)
                .and_then(|raw| raw.trim().parse().ok())
                .unwrap_or(0),
            stage: read_best_effort(store, NUDGE_STAGE_STATE_KEY)
                .map(|raw| NudgeStage::from_store(&raw))
                .unwrap_or_default(),
            act2_done: read_best_effort(store, NUDGE_ACT2_DONE_STATE_KEY)
                .map(|raw| raw == "1")
                .unwrap_or(false),
        }
    }

    fn save(&self, state: &StagedNudgeState) {
        let store = self.store.as_ref();
        write_best_effort(store, NUDGE_ACT_STATE_KEY, state.act.as_str());
        write_best_effort(store, NUDGE_COUNT_STATE_KEY, &state.count.to_string());
        write_best_effort(store, NUDGE_STAGE_STATE_KEY, state.stage.as_str());
        write_best_effort(
            store,
            NUDGE_ACT2_DONE_STATE_KEY,
            if state.act2_done { "1" } else { "0" },
        );
    }
}
