use std::fmt;

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// A survey question for the participant.
    Prompt,
    /// Status text: detected emotions, session end, shutdown.
    Notice,
}

/// Something to show on the station console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputMessage {
    pub kind: OutputKind,
    pub content: String,
}

impl OutputMessage {
    pub fn prompt(content: impl Into<String>) -> Self {
        Self { kind: OutputKind::Prompt, content: content.into() }
    }

    pub fn notice(content: impl Into<String>) -> Self {
        Self { kind: OutputKind::Notice, content: content.into() }
    }
}

impl fmt::Display for OutputMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            OutputKind::Prompt => write!(f, "AI> {}", self.content),
            OutputKind::Notice => write!(f, "-- {}", self.content),
        }
    }
}

/// The runtime pushes console text here.
pub type OutputSender = mpsc::UnboundedSender<OutputMessage>;
/// The binary prints from here.
pub type OutputReceiver = mpsc::UnboundedReceiver<OutputMessage>;

pub fn channel() -> (OutputSender, OutputReceiver) {
    mpsc::unbounded_channel()
}

/// Send `msg`, ignoring a console that is already gone.
pub fn emit(tx: &OutputSender, msg: OutputMessage) {
    if tx.send(msg).is_err() {
        tracing::debug!("console output closed");
    }
}
