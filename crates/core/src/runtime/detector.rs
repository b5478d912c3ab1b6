use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::bus::{Bus, BusError, BusMessage, Inbound};
use crate::config::TrayCfg;
use crate::emotion::{EmotionSet, palette_hex};
use crate::io::input::{Console, InputEvent, is_quit_command};
use crate::io::output::{self, OutputMessage, OutputSender};
use crate::vision::{CaptureError, CardDetector, FrameSource};

/// Reflections the relay forwards before it stops asking for input.
pub const MAX_REFLECTIONS: usize = 3;
pub const SESSION_END_NOTICE: &str = "Session complete. Thank you for reflecting!";

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("detection task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Pacing for the detection phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseCfg {
    /// Pause between frames.
    pub frame_interval: Duration,
    /// Frames without a new confirmation that end a non-empty, non-full phase.
    pub settle_frames: u32,
}

impl From<&TrayCfg> for PhaseCfg {
    fn from(cfg: &TrayCfg) -> Self {
        Self {
            frame_interval: cfg.frame_interval(),
            settle_frames: cfg.settle_frames.max(1),
        }
    }
}

/// Pull frames until the emotion set is full or has settled. `Ok(None)` means
/// shutdown was requested first.
pub fn detection_phase(
    source: &mut dyn FrameSource,
    detector: &mut CardDetector,
    cfg: PhaseCfg,
    token: &CancellationToken,
) -> Result<Option<EmotionSet>, CaptureError> {
    tracing::info!(source = source.name(), "detection phase started");
    let mut quiet = 0u32;
    loop {
        if token.is_cancelled() {
            tracing::info!(frames = detector.frames_seen(), "detection cancelled");
            return Ok(None);
        }
        let frame = source.next_frame()?;
        let report = detector.observe(&frame);

        if detector.is_full() {
            break;
        }
        if !report.newly_confirmed.is_empty() {
            quiet = 0;
        } else if !detector.emotions().is_empty() {
            quiet += 1;
            if quiet >= cfg.settle_frames {
                tracing::debug!(quiet, "emotion set settled");
                break;
            }
        }
        if !cfg.frame_interval.is_zero() {
            std::thread::sleep(cfg.frame_interval);
        }
    }
    let emotions = detector.emotions().clone();
    tracing::info!(emotions = %emotions, frames = detector.frames_seen(), "detection phase finished");
    Ok(Some(emotions))
}

/// Run [`detection_phase`] on a blocking thread. The source is dropped, and so
/// released, when the phase ends by any path.
pub async fn run_detection_phase(
    mut source: Box<dyn FrameSource>,
    mut detector: CardDetector,
    cfg: PhaseCfg,
    token: CancellationToken,
) -> Result<Option<EmotionSet>, DetectorError> {
    let result = tokio::task::spawn_blocking(move || {
        let result = detection_phase(source.as_mut(), &mut detector, cfg, &token);
        drop(source);
        result
    })
    .await?;
    Ok(result?)
}

/// How the relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayExit {
    SessionEnded,
    /// The participant quit from the console (command, EOF, or reader failure).
    Quit,
    Cancelled,
    InboundClosed,
}

/// Shows prompts and forwards console lines as `user_input`, never blocking on
/// the console so `session_end` is always seen.
pub struct Relay<'a> {
    bus: &'a dyn Bus,
    console: &'a mut Console,
    output: &'a OutputSender,
    /// Questions shown; each one owes at most one answer.
    prompts: usize,
    sent: usize,
    line_requested: bool,
    console_open: bool,
}

impl<'a> Relay<'a> {
    pub fn new(bus: &'a dyn Bus, console: &'a mut Console, output: &'a OutputSender) -> Self {
        Self {
            bus,
            console,
            output,
            prompts: 0,
            sent: 0,
            line_requested: false,
            console_open: true,
        }
    }

    pub fn sent(&self) -> usize {
        self.sent
    }

    pub async fn run(&mut self, inbound: &mut Inbound, token: &CancellationToken) -> Result<RelayExit, BusError> {
        loop {
            // Bus traffic before console input, so a pending session_end wins.
            tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(RelayExit::Cancelled),
                msg = inbound.recv() => {
                    let Some(msg) = msg else {
                        tracing::warn!("inbound queue closed");
                        return Ok(RelayExit::InboundClosed);
                    };
                    if let Some(exit) = self.on_message(msg) {
                        return Ok(exit);
                    }
                }
                event = self.console.recv(), if self.console_open => {
                    if let Some(exit) = self.on_console(event, token).await? {
                        return Ok(exit);
                    }
                }
            }
        }
    }

    fn on_message(&mut self, msg: BusMessage) -> Option<RelayExit> {
        match msg {
            BusMessage::Prompt(p) => {
                // The prompter only asks again after an answer, so a prompt
                // arriving while one is unanswered is a second copy.
                if self.line_requested {
                    tracing::debug!("prompt while awaiting an answer ignored");
                    return None;
                }
                tracing::info!(prompt = %p.prompt, "prompt received");
                output::emit(self.output, OutputMessage::prompt(p.prompt));
                self.prompts += 1;
                if self.sent < MAX_REFLECTIONS && self.prompts > self.sent {
                    self.request_line();
                }
                None
            }
            BusMessage::SessionEnd(end) => {
                tracing::info!(status = %end.status, "session ended by prompter");
                output::emit(self.output, OutputMessage::notice(SESSION_END_NOTICE));
                Some(RelayExit::SessionEnded)
            }
            other => {
                tracing::debug!(topic = other.topic(), "ignoring message not addressed to the detector");
                None
            }
        }
    }

    async fn on_console(
        &mut self,
        event: Option<InputEvent>,
        token: &CancellationToken,
    ) -> Result<Option<RelayExit>, BusError> {
        self.line_requested = false;
        match event {
            Some(InputEvent::Line(line)) => {
                let text = line.trim();
                if is_quit_command(text) {
                    tracing::info!("quit requested from console");
                    token.cancel();
                    return Ok(Some(RelayExit::Quit));
                }
                if text.is_empty() {
                    self.request_line();
                    return Ok(None);
                }
                self.bus.publish(&BusMessage::user_input(text)).await?;
                self.sent += 1;
                tracing::info!(sent = self.sent, "reflection forwarded");
                Ok(None)
            }
            Some(InputEvent::Interrupted) => {
                tracing::info!("console interrupted");
                token.cancel();
                Ok(Some(RelayExit::Cancelled))
            }
            Some(InputEvent::Eof) => {
                tracing::info!("console closed");
                token.cancel();
                Ok(Some(RelayExit::Quit))
            }
            Some(InputEvent::Error(e)) => {
                tracing::warn!(error = %e, "console read failed");
                token.cancel();
                Ok(Some(RelayExit::Quit))
            }
            None => {
                self.console_open = false;
                tracing::warn!("console reader exited");
                Ok(None)
            }
        }
    }

    fn request_line(&mut self) {
        if self.console.request_line() {
            self.line_requested = true;
        } else {
            tracing::warn!("console reader gone, cannot request input");
        }
    }
}

/// How the detector process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorExit {
    /// Shutdown arrived during detection; nothing was published.
    CancelledBeforeCards,
    Relay(RelayExit),
}

/// Detector process: detection phase, one `card_input`, then the console relay.
pub struct DetectorRuntime {
    detector: CardDetector,
    source: Box<dyn FrameSource>,
    phase: PhaseCfg,
    bus: Arc<dyn Bus>,
    inbound: Inbound,
    console: Console,
    output: OutputSender,
    token: CancellationToken,
}

impl DetectorRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        detector: CardDetector,
        source: Box<dyn FrameSource>,
        phase: PhaseCfg,
        bus: Arc<dyn Bus>,
        inbound: Inbound,
        console: Console,
        output: OutputSender,
        token: CancellationToken,
    ) -> Self {
        Self { detector, source, phase, bus, inbound, console, output, token }
    }

    /// Run to completion. The bus is disconnected on every exit path.
    pub async fn run(self) -> Result<DetectorExit, DetectorError> {
        let Self { detector, source, phase, bus, mut inbound, mut console, output, token } = self;
        let result = Self::drive(detector, source, phase, bus.as_ref(), &mut inbound, &mut console, &output, &token).await;
        if let Err(e) = bus.disconnect().await {
            tracing::warn!(error = %e, "bus disconnect failed");
        }
        match &result {
            Ok(exit) => tracing::info!(?exit, "detector stopped"),
            Err(e) => tracing::error!(error = %e, "detector failed"),
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive(
        detector: CardDetector,
        source: Box<dyn FrameSource>,
        phase: PhaseCfg,
        bus: &dyn Bus,
        inbound: &mut Inbound,
        console: &mut Console,
        output: &OutputSender,
        token: &CancellationToken,
    ) -> Result<DetectorExit, DetectorError> {
        let Some(emotions) = run_detection_phase(source, detector, phase, token.clone()).await? else {
            return Ok(DetectorExit::CancelledBeforeCards);
        };
        output::emit(output, OutputMessage::notice(describe(&emotions)));
        bus.publish(&BusMessage::cards(emotions.labels().iter().cloned())).await?;

        let exit = Relay::new(bus, console, output).run(inbound, token).await?;
        Ok(DetectorExit::Relay(exit))
    }
}

/// "Detected: Relieved (#6EC1E4), Confident (#FFD700)".
pub fn describe(emotions: &EmotionSet) -> String {
    let parts: Vec<String> = emotions
        .labels()
        .iter()
        .map(|e| match palette_hex(e) {
            Some(hex) => format!("{e} ({hex})"),
            None => e.clone(),
        })
        .collect();
    format!("Detected: {}", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::bus::message::{DETECTOR_TOPICS, PROMPTER_TOPICS};
    use crate::emotion::EmotionMap;
    use crate::io::input::{ConsoleFeed, console};
    use crate::io::output::OutputKind;
    use crate::vision::color::{ColorRange, HsvBand};
    use crate::vision::{DetectorCfg, Frame, FrameQueue, Roi};

    const BLUE: [u8; 3] = [0, 0, 255];
    const YELLOW: [u8; 3] = [255, 255, 0];
    const GRAY: [u8; 3] = [40, 40, 40];

    fn detector() -> CardDetector {
        let ranges = vec![
            ColorRange::single("blue", HsvBand::new([100, 100, 50], [130, 255, 255])),
            ColorRange::single("yellow", HsvBand::new([20, 100, 100], [35, 255, 255])),
        ];
        let cfg = DetectorCfg {
            roi: Roi::new(10, 10, 90, 90),
            min_region_area: 50,
            debounce_frames: 4,
            max_emotions: 3,
        };
        CardDetector::new(ranges, EmotionMap::default(), cfg)
    }

    fn tray(cards: &[[u8; 3]]) -> Frame {
        let mut frame = Frame::solid(100, 100, GRAY);
        for (i, rgb) in cards.iter().enumerate() {
            frame.fill_rect(15 + 25 * i as u32, 20, 15, 15, *rgb);
        }
        frame
    }

    fn phase(settle_frames: u32) -> PhaseCfg {
        PhaseCfg { frame_interval: Duration::ZERO, settle_frames }
    }

    #[test]
    fn settles_after_quiet_frames() {
        let mut source = FrameQueue::repeat(tray(&[BLUE]), 100);
        let mut d = detector();
        let set = detection_phase(&mut source, &mut d, phase(8), &CancellationToken::new())
            .unwrap()
            .unwrap();
        assert_eq!(set.labels(), ["Relieved"]);
        // 4 frames to confirm, 8 quiet frames to settle.
        assert_eq!(d.frames_seen(), 12);
    }

    #[test]
    fn empty_tray_runs_until_source_fails() {
        let mut source = FrameQueue::repeat(tray(&[]), 20);
        let mut d = detector();
        let err = detection_phase(&mut source, &mut d, phase(8), &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, CaptureError::Exhausted));
        assert_eq!(d.frames_seen(), 20);
    }

    #[test]
    fn later_card_extends_the_phase() {
        let mut frames: Vec<Frame> = std::iter::repeat_n(tray(&[BLUE]), 6).collect();
        frames.extend(std::iter::repeat_n(tray(&[BLUE, YELLOW]), 30));
        let mut source = FrameQueue::new(frames);
        let mut d = detector();
        let set = detection_phase(&mut source, &mut d, phase(8), &CancellationToken::new())
            .unwrap()
            .unwrap();
        assert_eq!(set.labels(), ["Relieved", "Confident"]);
    }

    #[test]
    fn cancelled_phase_returns_none() {
        let mut source = FrameQueue::repeat(tray(&[BLUE]), 10);
        let mut d = detector();
        let token = CancellationToken::new();
        token.cancel();
        assert!(detection_phase(&mut source, &mut d, phase(8), &token).unwrap().is_none());
        assert_eq!(d.frames_seen(), 0);
    }

    #[tokio::test]
    async fn blocking_phase_reports_capture_errors() {
        let source = Box::new(FrameQueue::default());
        let err = run_detection_phase(source, detector(), phase(8), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DetectorError::Capture(CaptureError::Exhausted)));
    }

    #[test]
    fn describe_includes_palette() {
        let set = EmotionSet::from_labels(["Relieved", "Unknown"]);
        let text = describe(&set);
        assert!(text.starts_with("Detected: Relieved (#"));
        assert!(text.ends_with(", Unknown"));
    }

    /// Answers every line request from a script, then reports EOF.
    fn scripted_reader(feed: ConsoleFeed, lines: Vec<&'static str>) -> std::thread::JoinHandle<usize> {
        std::thread::spawn(move || {
            let mut requests = 0;
            let mut lines = lines.into_iter();
            while feed.wait_for_request() {
                requests += 1;
                let event = match lines.next() {
                    Some(l) => InputEvent::Line(l.to_owned()),
                    None => InputEvent::Eof,
                };
                if !feed.send(event) {
                    break;
                }
            }
            requests
        })
    }

    #[tokio::test]
    async fn relay_forwards_lines_and_stops_on_session_end() {
        let bus = LocalBus::new();
        let mut prompter_rx = bus.subscribe(&PROMPTER_TOPICS, 16);
        let mut inbound = bus.subscribe(&DETECTOR_TOPICS, 16);
        let (mut console, feed) = console();
        let reader = scripted_reader(feed, vec!["", "it was great"]);
        let (out_tx, mut out_rx) = output::channel();
        let token = CancellationToken::new();

        bus.publish(&BusMessage::prompt("What made you feel Relieved?")).await.unwrap();
        // Duplicate delivery must not queue a second read.
        bus.publish(&BusMessage::prompt("What made you feel Relieved?")).await.unwrap();

        let mut relay = Relay::new(&bus, &mut console, &out_tx);
        let forwarded = async {
            let msg = prompter_rx.recv().await.unwrap();
            bus.publish(&BusMessage::session_end()).await.unwrap();
            msg
        };
        let (exit, msg) = tokio::join!(relay.run(&mut inbound, &token), forwarded);
        assert_eq!(exit.unwrap(), RelayExit::SessionEnded);
        assert_eq!(msg, BusMessage::user_input("it was great"));
        assert_eq!(relay.sent(), 1);
        assert!(!token.is_cancelled());

        let shown: Vec<OutputMessage> = std::iter::from_fn(|| out_rx.try_recv().ok()).collect();
        assert_eq!(
            shown,
            vec![
                OutputMessage::prompt("What made you feel Relieved?"),
                OutputMessage::notice(SESSION_END_NOTICE),
            ]
        );

        drop(relay);
        drop(console);
        // One request for the blank line, one for the re-ask.
        assert_eq!(reader.join().unwrap(), 2);
    }

    #[tokio::test]
    async fn same_question_twice_is_asked_twice() {
        let bus = LocalBus::new();
        let mut prompter_rx = bus.subscribe(&PROMPTER_TOPICS, 16);
        let mut inbound = bus.subscribe(&DETECTOR_TOPICS, 16);
        let (mut console, feed) = console();
        let reader = scripted_reader(feed, vec!["a", "b"]);
        let (out_tx, mut out_rx) = output::channel();
        let token = CancellationToken::new();

        bus.publish(&BusMessage::prompt("Tell me more?")).await.unwrap();
        let mut relay = Relay::new(&bus, &mut console, &out_tx);
        let prompter = async {
            let first = prompter_rx.recv().await.unwrap();
            bus.publish(&BusMessage::prompt("Tell me more?")).await.unwrap();
            let second = prompter_rx.recv().await.unwrap();
            bus.publish(&BusMessage::session_end()).await.unwrap();
            (first, second)
        };
        let (exit, (first, second)) = tokio::join!(relay.run(&mut inbound, &token), prompter);
        assert_eq!(exit.unwrap(), RelayExit::SessionEnded);
        assert_eq!(first, BusMessage::user_input("a"));
        assert_eq!(second, BusMessage::user_input("b"));
        assert_eq!(relay.sent(), 2);

        let shown = std::iter::from_fn(|| out_rx.try_recv().ok())
            .filter(|m| m.kind == OutputKind::Prompt)
            .count();
        assert_eq!(shown, 2);

        drop(relay);
        drop(console);
        assert_eq!(reader.join().unwrap(), 2);
    }

    #[tokio::test]
    async fn quit_command_cancels() {
        let bus = LocalBus::new();
        let mut inbound = bus.subscribe(&DETECTOR_TOPICS, 16);
        let (mut console, feed) = console();
        let _reader = scripted_reader(feed, vec!["/quit"]);
        let (out_tx, _out_rx) = output::channel();
        let token = CancellationToken::new();

        bus.publish(&BusMessage::prompt("Why?")).await.unwrap();
        let exit = Relay::new(&bus, &mut console, &out_tx).run(&mut inbound, &token).await.unwrap();
        assert_eq!(exit, RelayExit::Quit);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn runtime_publishes_cards_then_relays() {
        let bus = LocalBus::new();
        let mut prompter_rx = bus.subscribe(&PROMPTER_TOPICS, 16);
        let inbound = bus.subscribe(&DETECTOR_TOPICS, 16);
        let (console, feed) = console();
        let _reader = scripted_reader(feed, vec![]);
        let (out_tx, mut out_rx) = output::channel();

        let runtime = DetectorRuntime::new(
            detector(),
            Box::new(FrameQueue::repeat(tray(&[BLUE, YELLOW]), 40)),
            phase(8),
            Arc::new(bus.clone()),
            inbound,
            console,
            out_tx,
            CancellationToken::new(),
        );
        let handle = tokio::spawn(runtime.run());

        assert_eq!(prompter_rx.recv().await.unwrap(), BusMessage::cards(["Relieved", "Confident"]));
        bus.publish(&BusMessage::session_end()).await.unwrap();

        let exit = handle.await.unwrap().unwrap();
        assert_eq!(exit, DetectorExit::Relay(RelayExit::SessionEnded));
        let first = out_rx.recv().await.unwrap();
        assert_eq!(first.kind, OutputKind::Notice);
        assert!(first.content.contains("Relieved"));
    }
}
