use std::sync::Arc;
use std::time::Duration;

use super::prompt::{CLOSING_MESSAGE, PromptGenerator, PromptRequest, PromptStage, generate_or_fallback, opening_prompt};
use super::state::{Rejected, SessionState, Stage};
use crate::bus::BusMessage;
use crate::emotion::{EmotionSet, MAX_EMOTIONS};

/// A message the orchestrator wants published, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Prompt(String),
    SessionEnd,
}

impl Outbound {
    pub fn into_message(self) -> BusMessage {
        match self {
            Self::Prompt(text) => BusMessage::prompt(text),
            Self::SessionEnd => BusMessage::session_end(),
        }
    }
}

/// Drives one survey session. Handlers run to completion one at a time; events
/// that do not fit the current stage leave the session untouched.
pub struct Orchestrator {
    state: SessionState,
    generator: Arc<dyn PromptGenerator>,
    prompt_timeout: Duration,
}

impl Orchestrator {
    pub fn new(generator: Arc<dyn PromptGenerator>, prompt_timeout: Duration) -> Self {
        let state = SessionState::new();
        tracing::info!(session = %state.id(), generator = generator.name(), "session opened");
        Self { state, generator, prompt_timeout }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn stage(&self) -> Stage {
        self.state.stage()
    }

    pub fn is_done(&self) -> bool {
        self.state.is_done()
    }

    /// Dispatch one inbound bus message.
    pub async fn handle(&mut self, msg: BusMessage) -> Vec<Outbound> {
        match msg {
            BusMessage::CardInput(p) => self.on_card_input(&p.cards).await,
            BusMessage::UserInput(p) => self.on_user_input(&p.text).await,
            other => {
                tracing::debug!(topic = other.topic(), "ignoring message not addressed to the prompter");
                Vec::new()
            }
        }
    }

    pub async fn on_card_input(&mut self, cards: &[String]) -> Vec<Outbound> {
        let emotions = EmotionSet::from_labels(cards);
        if cards.len() > MAX_EMOTIONS {
            tracing::warn!(received = cards.len(), kept = emotions.len(), "extra cards dropped");
        }

        match self.state.accept_cards(emotions) {
            Ok(()) => {
                tracing::info!(session = %self.state.id(), emotions = %self.state.emotions(), "cards received");
                vec![Outbound::Prompt(opening_prompt(self.state.emotions()))]
            }
            Err(Rejected::NoCards) => {
                tracing::warn!(?cards, "card input has no usable labels, dropped");
                Vec::new()
            }
            Err(e) => {
                tracing::debug!(error = %e, "card input ignored");
                Vec::new()
            }
        }
    }

    pub async fn on_user_input(&mut self, text: &str) -> Vec<Outbound> {
        let completed = match self.state.accept_reflection(text) {
            Ok(stage) => stage,
            Err(Rejected::BlankText) => {
                tracing::warn!(stage = %self.state.stage(), "blank reflection rejected");
                return Vec::new();
            }
            Err(e) => {
                tracing::debug!(error = %e, "user input ignored");
                return Vec::new();
            }
        };
        tracing::info!(
            session = %self.state.id(),
            reflections = self.state.reflections().len(),
            stage = %self.state.stage(),
            "reflection recorded"
        );

        let next = match completed {
            Stage::AwaitingT1 => PromptStage::FollowUp,
            Stage::AwaitingT2 => PromptStage::Summary,
            _ => {
                tracing::info!(session = %self.state.id(), "session complete");
                return vec![Outbound::Prompt(CLOSING_MESSAGE.to_owned()), Outbound::SessionEnd];
            }
        };
        let request = PromptRequest {
            stage: next,
            emotions: self.state.emotions(),
            reflections: self.state.reflections(),
        };
        let text = generate_or_fallback(self.generator.as_ref(), request, self.prompt_timeout).await;
        vec![Outbound::Prompt(text)]
    }
}
