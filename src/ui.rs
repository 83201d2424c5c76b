//! Notification interface between the engine/reader and the view layer.
//!
//! Everything outward-facing goes through [`UiNotifier`]: a fire-and-forget
//! event channel. Sends never block and never fail — a view that has gone
//! away just means the events are dropped.

use std::collections::BTreeMap;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::emotion::Emotion;

/// Avatar visual state. Derived from playback/listening state, never set
/// directly by the view layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AvatarState {
    Idle,
    Listening,
    Speaking,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// Avatar visual should switch media (idle loop vs speaking loop).
    Avatar(AvatarState),
    /// Status indicator text, e.g. "말하고 있습니다".
    Status { text: String, kind: AvatarState },
    /// One incremental assistant sentence to append to the transcript.
    Sentence(String),
    /// Emotion badge for the latest sentence.
    Emotion(Emotion),
    /// YouTube search affordance extracted by the server.
    Youtube { query: String, url: String },
    /// Memory keyword tags, grouped by category.
    MemoryKeywords(BTreeMap<String, Vec<String>>),
}

/// Cheap cloneable sender half of the notification channel.
#[derive(Clone)]
pub struct UiNotifier {
    tx: mpsc::UnboundedSender<UiEvent>,
}

pub fn channel() -> (UiNotifier, mpsc::UnboundedReceiver<UiEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (UiNotifier { tx }, rx)
}

impl UiNotifier {
    pub fn send(&self, event: UiEvent) {
        let _ = self.tx.send(event);
    }

    pub fn avatar(&self, state: AvatarState) {
        self.send(UiEvent::Avatar(state));
    }

    pub fn status(&self, text: impl Into<String>, kind: AvatarState) {
        self.send(UiEvent::Status {
            text: text.into(),
            kind,
        });
    }

    /// Avatar and status back to the resting state.
    pub fn idle(&self) {
        self.avatar(AvatarState::Idle);
        self.status("대기 중", AvatarState::Idle);
    }

    pub fn speaking(&self) {
        self.avatar(AvatarState::Speaking);
        self.status("말하고 있습니다", AvatarState::Speaking);
    }

    pub fn listening(&self) {
        self.avatar(AvatarState::Listening);
        self.status("듣고 있습니다", AvatarState::Listening);
    }

    pub fn sentence(&self, text: impl Into<String>) {
        self.send(UiEvent::Sentence(text.into()));
    }

    pub fn emotion(&self, emotion: Emotion) {
        self.send(UiEvent::Emotion(emotion));
    }

    pub fn youtube(&self, query: impl Into<String>, url: impl Into<String>) {
        self.send(UiEvent::Youtube {
            query: query.into(),
            url: url.into(),
        });
    }

    pub fn memory_keywords(&self, keywords: BTreeMap<String, Vec<String>>) {
        self.send(UiEvent::MemoryKeywords(keywords));
    }
}
