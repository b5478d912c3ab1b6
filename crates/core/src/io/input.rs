use tokio::sync::mpsc;

/// Commands that end the session from the console.
pub const QUIT_COMMANDS: [&str; 4] = ["q", "/q", "/quit", "/exit"];

/// One result from the console reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Line(String),
    Interrupted,
    Eof,
    Error(String),
}

/// Async side of the console: asks for a line, then receives what the reader saw.
/// The reader only blocks on the terminal after a request, so the owner can keep
/// servicing other events while nobody is typing.
#[derive(Debug)]
pub struct Console {
    events: mpsc::UnboundedReceiver<InputEvent>,
    ready: std::sync::mpsc::Sender<()>,
}

/// Blocking side of the console, moved into the reader thread.
#[derive(Debug)]
pub struct ConsoleFeed {
    events: mpsc::UnboundedSender<InputEvent>,
    ready: std::sync::mpsc::Receiver<()>,
}

/// Create a connected console pair.
pub fn console() -> (Console, ConsoleFeed) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();
    (
        Console { events: event_rx, ready: ready_tx },
        ConsoleFeed { events: event_tx, ready: ready_rx },
    )
}

impl Console {
    /// Ask the reader for one more line. Returns false if the reader is gone.
    pub fn request_line(&self) -> bool {
        self.ready.send(()).is_ok()
    }

    /// Next reader event; `None` once the reader has exited.
    pub async fn recv(&mut self) -> Option<InputEvent> {
        self.events.recv().await
    }
}

impl ConsoleFeed {
    /// Block until a line is requested. Returns false once the console is dropped.
    pub fn wait_for_request(&self) -> bool {
        self.ready.recv().is_ok()
    }

    /// Hand an event to the console. Returns false once the console is dropped.
    pub fn send(&self, event: InputEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

pub fn is_quit_command(line: &str) -> bool {
    let line = line.trim();
    QUIT_COMMANDS.iter().any(|c| line.eq_ignore_ascii_case(c))
}
