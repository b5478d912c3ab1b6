use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tray_llm::provider::{ChatMessage, CompletionRequest, LlmError, LlmProvider, StopReason};

use crate::emotion::EmotionSet;

pub const FOLLOW_UP_FALLBACK: &str = "Thanks for sharing. How did that shape your overall impression?";
pub const SUMMARY_FALLBACK: &str = "What would you want a friend to know about your experience?";
pub const CLOSING_MESSAGE: &str = "Thank you for reflecting! Your session is complete.";

const LLM_MAX_TOKENS: u32 = 160;
const LLM_TEMPERATURE: f32 = 0.7;

const SYSTEM_PROMPT: &str = "You are a warm, concise interviewer running a short reflective survey \
at a physical kiosk. The participant picked emotion cards describing their experience. \
Reply with exactly one open-ended question of at most two sentences. \
No preamble, no lists, no quotation marks.";

/// Generated prompts after the fixed opening question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStage {
    /// Asked after the first reflection.
    FollowUp,
    /// Asked after the second reflection; invites a closing summary.
    Summary,
}

impl PromptStage {
    pub fn fallback(self) -> &'static str {
        match self {
            Self::FollowUp => FOLLOW_UP_FALLBACK,
            Self::Summary => SUMMARY_FALLBACK,
        }
    }

    fn instruction(self) -> &'static str {
        match self {
            Self::FollowUp => "Ask one follow-up question that digs into what they just shared.",
            Self::Summary => {
                "Ask one final question inviting them to sum up their experience as a whole."
            }
        }
    }
}

/// Everything a generator may look at.
#[derive(Debug, Clone, Copy)]
pub struct PromptRequest<'a> {
    pub stage: PromptStage,
    pub emotions: &'a EmotionSet,
    pub reflections: &'a [String],
}

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("generator timed out after {0:?}")]
    Timeout(Duration),
    #[error("generator returned an empty prompt")]
    Empty,
    #[error("generator reply was cut off at the token limit")]
    Truncated,
}

pub type PromptFuture<'a> = Pin<Box<dyn Future<Output = Result<String, PromptError>> + Send + 'a>>;

/// Produces the text of the next survey question.
pub trait PromptGenerator: Send + Sync {
    fn name(&self) -> &str;

    fn generate<'a>(&'a self, request: PromptRequest<'a>) -> PromptFuture<'a>;
}

/// The fixed opening question for a set of detected emotions.
pub fn opening_prompt(emotions: &EmotionSet) -> String {
    format!("What made you feel {} during your experience?", emotions.joined())
}

/// Run `generator` under `timeout`. Any failure, timeout, or blank reply yields
/// the stage's fallback text.
pub async fn generate_or_fallback(
    generator: &dyn PromptGenerator,
    request: PromptRequest<'_>,
    timeout: Duration,
) -> String {
    let result = match tokio::time::timeout(timeout, generator.generate(request)).await {
        Ok(Ok(text)) if !text.trim().is_empty() => Ok(text.trim().to_owned()),
        Ok(Ok(_)) => Err(PromptError::Empty),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(PromptError::Timeout(timeout)),
    };
    match result {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(
                generator = generator.name(),
                stage = ?request.stage,
                error = %e,
                "prompt generation failed, using fallback"
            );
            request.stage.fallback().to_owned()
        }
    }
}

/// Local templates. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplatePrompts;

impl PromptGenerator for TemplatePrompts {
    fn name(&self) -> &str {
        "template"
    }

    fn generate<'a>(&'a self, request: PromptRequest<'a>) -> PromptFuture<'a> {
        let text = request.stage.fallback().to_owned();
        Box::pin(async move { Ok(text) })
    }
}

/// Prompts written by a language model.
pub struct LlmPrompts {
    provider: Arc<dyn LlmProvider>,
    max_tokens: u32,
    temperature: f32,
}

impl LlmPrompts {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            max_tokens: LLM_MAX_TOKENS,
            temperature: LLM_TEMPERATURE,
        }
    }

    fn build_messages(request: &PromptRequest<'_>) -> Vec<ChatMessage> {
        let mut body = format!("Emotion cards chosen: {}.\n", request.emotions);
        if request.reflections.is_empty() {
            body.push_str("They have not shared anything yet.\n");
        } else {
            body.push_str("What they have shared so far:\n");
            for (i, reflection) in request.reflections.iter().enumerate() {
                body.push_str(&format!("{}. {}\n", i + 1, reflection));
            }
        }
        body.push_str(request.stage.instruction());
        vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(body)]
    }
}

impl PromptGenerator for LlmPrompts {
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn generate<'a>(&'a self, request: PromptRequest<'a>) -> PromptFuture<'a> {
        let completion = CompletionRequest {
            messages: Self::build_messages(&request),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        Box::pin(async move {
            let response = self.provider.complete(completion).await?;
            tracing::debug!(
                provider = self.provider.name(),
                input_tokens = response.input_tokens,
                output_tokens = response.output_tokens,
                "prompt generated"
            );
            if response.stop_reason == StopReason::MaxTokens {
                return Err(PromptError::Truncated);
            }
            let text = clean_reply(&response.content);
            if text.is_empty() {
                return Err(PromptError::Empty);
            }
            Ok(text)
        })
    }
}

fn clean_reply(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '\u{201c}' | '\u{201d}'))
        .trim()
        .to_owned()
}
