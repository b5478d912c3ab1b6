use std::io::{self, Write};

use rustyline::error::ReadlineError;
use tokio::task::JoinHandle;
use tray_core::io::input::{ConsoleFeed, InputEvent};
use tray_core::io::output::OutputReceiver;

const INPUT_PROMPT: &str = "You> ";

/// Spawn the rustyline reader on a dedicated thread. It reads one line per
/// request and exits when the console side is dropped or the terminal closes.
pub fn spawn_reader(feed: ConsoleFeed) {
    std::thread::spawn(move || {
        let mut editor = match rustyline::DefaultEditor::new() {
            Ok(editor) => editor,
            Err(e) => {
                feed.send(InputEvent::Error(e.to_string()));
                return;
            }
        };

        while feed.wait_for_request() {
            let event = match editor.readline(INPUT_PROMPT) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        let _ = editor.add_history_entry(line.as_str());
                    }
                    InputEvent::Line(line)
                }
                Err(ReadlineError::Interrupted) => InputEvent::Interrupted,
                Err(ReadlineError::Eof) => InputEvent::Eof,
                Err(e) => InputEvent::Error(e.to_string()),
            };
            let last = !matches!(event, InputEvent::Line(_));
            if !feed.send(event) || last {
                break;
            }
        }
    });
}

/// Print console output until every sender is gone.
pub fn spawn_printer(mut output: OutputReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = output.recv().await {
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "{msg}");
            let _ = stdout.flush();
        }
    })
}
