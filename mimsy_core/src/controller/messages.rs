use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::progress::Act;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Landing,
    Chat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "widget", rename_all = "snake_case")]
pub enum Widget {
    HeroPlayer {
        video_id: String,
    },
    VideoGallery {
        video_ids: Vec<String>,
    },
    MegaCard {
        video_ids: Vec<String>,
    },
    ContactCard,
    ProfileCard,
    /// The scripted Act-1 "failed video". `script` is `None` until the
    /// generation call answers.
    Act1Fail {
        idea: String,
        title: Option<String>,
        script: Option<Vec<String>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    User { text: String },
    Assistant { text: String, chips: Vec<String> },
    SystemLog { text: String },
    Widget { widget: Widget },
}

/// One visible chat entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub body: MessageBody,
}

impl Message {
    pub fn new(body: MessageBody) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            body,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageBody::User { text: text.into() })
    }

    pub fn assistant(text: impl Into<String>, chips: Vec<String>) -> Self {
        Self::new(MessageBody::Assistant {
            text: text.into(),
            chips,
        })
    }

    pub fn system_log(text: impl Into<String>) -> Self {
        Self::new(MessageBody::SystemLog { text: text.into() })
    }

    pub fn widget(widget: Widget) -> Self {
        Self::new(MessageBody::Widget { widget })
    }

    pub fn text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::User { text }
            | MessageBody::Assistant { text, .. }
            | MessageBody::SystemLog { text } => Some(text),
            MessageBody::Widget { .. } => None,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self.body, MessageBody::User { .. })
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self.body, MessageBody::Assistant { .. })
    }

    pub fn as_widget(&self) -> Option<&Widget> {
        match &self.body {
            MessageBody::Widget { widget } => Some(widget),
            _ => None,
        }
    }
}

/// Published on the controller's event channel for the render layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    MessageAdded(Message),
    /// Only emitted for the Act-1 widget once its script arrives.
    MessageUpdated(Message),
    ScriptLineRevealed { message_id: String, index: usize },
    TypingChanged(bool),
    PhaseChanged(Phase),
    ChipsChanged(Vec<String>),
    DarkModeChanged(bool),
    VideoOpened { video_id: String },
    ActChanged(Act),
}

/// Read-only view of the controller for rendering and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSnapshot {
    pub phase: Phase,
    pub messages: Vec<Message>,
    pub chips: Vec<String>,
    pub typing: bool,
    pub running_act1: bool,
    pub dark_mode: bool,
    pub video_playing: bool,
    pub act: Act,
    pub actions_used: u32,
    pub log_len: usize,
}

impl ControllerSnapshot {
    pub fn assistant_texts(&self) -> Vec<&str> {
        self.messages
            .iter()
            .filter(|m| m.is_assistant())
            .filter_map(Message::text)
            .collect()
    }

    pub fn widgets(&self) -> Vec<&Widget> {
        self.messages.iter().filter_map(Message::as_widget).collect()
    }
}
