use serde::{Deserialize, Serialize};

pub const CARD_INPUT_TOPIC: &str = "survey/card_input";
pub const PROMPT_TOPIC: &str = "survey/ai_prompt";
pub const USER_INPUT_TOPIC: &str = "survey/user_input";
pub const SESSION_END_TOPIC: &str = "survey/session_end";

/// Topics the prompter consumes.
pub const PROMPTER_TOPICS: [&str; 2] = [CARD_INPUT_TOPIC, USER_INPUT_TOPIC];
/// Topics the detector consumes.
pub const DETECTOR_TOPICS: [&str; 2] = [PROMPT_TOPIC, SESSION_END_TOPIC];

pub const STATUS_DONE: &str = "done";

/// Inbound payload that could not be turned into a [`BusMessage`].
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("unknown topic '{0}'")]
    UnknownTopic(String),
    #[error("malformed payload on {topic}: {source}")]
    Malformed {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardInput {
    pub cards: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiPrompt {
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInput {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEnd {
    pub status: String,
}

impl SessionEnd {
    pub fn done() -> Self {
        Self { status: STATUS_DONE.into() }
    }
}

/// One survey event, tagged by the topic it travels on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    CardInput(CardInput),
    Prompt(AiPrompt),
    UserInput(UserInput),
    SessionEnd(SessionEnd),
}

impl BusMessage {
    pub fn cards<I, S>(cards: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::CardInput(CardInput { cards: cards.into_iter().map(Into::into).collect() })
    }

    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self::Prompt(AiPrompt { prompt: prompt.into() })
    }

    pub fn user_input(text: impl Into<String>) -> Self {
        Self::UserInput(UserInput { text: text.into() })
    }

    pub fn session_end() -> Self {
        Self::SessionEnd(SessionEnd::done())
    }

    pub fn topic(&self) -> &'static str {
        match self {
            Self::CardInput(_) => CARD_INPUT_TOPIC,
            Self::Prompt(_) => PROMPT_TOPIC,
            Self::UserInput(_) => USER_INPUT_TOPIC,
            Self::SessionEnd(_) => SESSION_END_TOPIC,
        }
    }

    /// JSON payload for the message's topic.
    pub fn encode(&self) -> Vec<u8> {
        let encoded = match self {
            Self::CardInput(p) => serde_json::to_vec(p),
            Self::Prompt(p) => serde_json::to_vec(p),
            Self::UserInput(p) => serde_json::to_vec(p),
            Self::SessionEnd(p) => serde_json::to_vec(p),
        };
        // Plain string fields always serialize.
        encoded.unwrap_or_default()
    }

    /// Parse a payload received on `topic`. Unknown extra fields are ignored.
    pub fn decode(topic: &str, payload: &[u8]) -> Result<Self, WireError> {
        let malformed = |source| WireError::Malformed { topic: topic.to_owned(), source };
        match topic {
            CARD_INPUT_TOPIC => serde_json::from_slice(payload).map(Self::CardInput).map_err(malformed),
            PROMPT_TOPIC => serde_json::from_slice(payload).map(Self::Prompt).map_err(malformed),
            USER_INPUT_TOPIC => serde_json::from_slice(payload).map(Self::UserInput).map_err(malformed),
            SESSION_END_TOPIC => serde_json::from_slice(payload).map(Self::SessionEnd).map_err(malformed),
            other => Err(WireError::UnknownTopic(other.to_owned())),
        }
    }
}
