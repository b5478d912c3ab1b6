use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::emotion::EmotionSet;

/// Position in the fixed conversation sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    AwaitingCards,
    AwaitingT1,
    AwaitingT2,
    AwaitingT3,
    Done,
}

impl Stage {
    /// The only stage this one may advance to.
    pub fn next(self) -> Option<Stage> {
        match self {
            Self::AwaitingCards => Some(Self::AwaitingT1),
            Self::AwaitingT1 => Some(Self::AwaitingT2),
            Self::AwaitingT2 => Some(Self::AwaitingT3),
            Self::AwaitingT3 => Some(Self::Done),
            Self::Done => None,
        }
    }

    /// Whether a user reflection is expected in this stage.
    pub fn awaits_reflection(self) -> bool {
        matches!(self, Self::AwaitingT1 | Self::AwaitingT2 | Self::AwaitingT3)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingCards => "AWAITING_CARDS",
            Self::AwaitingT1 => "AWAITING_T1",
            Self::AwaitingT2 => "AWAITING_T2",
            Self::AwaitingT3 => "AWAITING_T3",
            Self::Done => "DONE",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an inbound event left the session untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejected {
    #[error("event not valid in stage {0}")]
    WrongStage(Stage),
    #[error("card event carried no usable labels")]
    NoCards,
    #[error("reflection text is blank")]
    BlankText,
}

/// Conversation progress for one session. Owned by the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    id: Uuid,
    started_at: DateTime<Utc>,
    stage: Stage,
    emotions: EmotionSet,
    reflections: Vec<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            stage: Stage::AwaitingCards,
            emotions: EmotionSet::new(),
            reflections: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn emotions(&self) -> &EmotionSet {
        &self.emotions
    }

    pub fn reflections(&self) -> &[String] {
        &self.reflections
    }

    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    /// Store the session's emotions and move to `AwaitingT1`.
    /// Only the first card event of a session is accepted.
    pub fn accept_cards(&mut self, emotions: EmotionSet) -> Result<(), Rejected> {
        if self.stage != Stage::AwaitingCards {
            return Err(Rejected::WrongStage(self.stage));
        }
        if emotions.is_empty() {
            return Err(Rejected::NoCards);
        }
        self.emotions = emotions;
        self.advance();
        Ok(())
    }

    /// Record a reflection and advance. Returns the stage the reflection completed.
    pub fn accept_reflection(&mut self, text: &str) -> Result<Stage, Rejected> {
        if !self.stage.awaits_reflection() {
            return Err(Rejected::WrongStage(self.stage));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(Rejected::BlankText);
        }
        let completed = self.stage;
        self.reflections.push(text.to_owned());
        self.advance();
        Ok(completed)
    }

    fn advance(&mut self) {
        if let Some(next) = self.stage.next() {
            tracing::debug!(session = %self.id, from = %self.stage, to = %next, "stage advanced");
            self.stage = next;
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
