//! End-to-end survey sessions: detector and prompter runtimes talking over the
//! in-process bus, with a scripted participant at the console.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tray_core::bus::message::{DETECTOR_TOPICS, PROMPTER_TOPICS};
use tray_core::bus::{Bus, BusMessage, LocalBus};
use tray_core::emotion::EmotionMap;
use tray_core::io::input::{self, ConsoleFeed, InputEvent};
use tray_core::io::output::{self, OutputKind, OutputMessage};
use tray_core::runtime::{
    DetectorExit, DetectorRuntime, PhaseCfg, PrompterExit, PrompterRuntime, RelayExit, SESSION_END_NOTICE,
};
use tray_core::session::prompt::{CLOSING_MESSAGE, FOLLOW_UP_FALLBACK, SUMMARY_FALLBACK};
use tray_core::session::{LlmPrompts, Orchestrator, PromptGenerator, Stage, TemplatePrompts};
use tray_core::vision::color::{ColorRange, HsvBand};
use tray_core::vision::{CardDetector, DetectorCfg, Frame, FrameQueue, Roi};
use tray_llm::provider::MockProvider;

const BLUE: [u8; 3] = [0, 0, 255];
const YELLOW: [u8; 3] = [255, 255, 0];
const BACKGROUND: [u8; 3] = [30, 30, 30];

fn detector() -> CardDetector {
    let ranges = vec![
        ColorRange::single("blue", HsvBand::new([100, 100, 50], [130, 255, 255])),
        ColorRange::single("yellow", HsvBand::new([20, 100, 100], [35, 255, 255])),
    ];
    let cfg = DetectorCfg {
        roi: Roi::new(10, 10, 110, 90),
        min_region_area: 100,
        debounce_frames: 4,
        max_emotions: 3,
    };
    CardDetector::new(ranges, EmotionMap::default(), cfg)
}

fn tray_with_cards() -> Frame {
    let mut frame = Frame::solid(120, 100, BACKGROUND);
    frame.fill_rect(20, 30, 20, 20, BLUE);
    frame.fill_rect(60, 30, 20, 20, YELLOW);
    frame
}

/// Answers each line request from `lines`, then reports EOF.
fn participant(feed: ConsoleFeed, lines: Vec<&'static str>) -> JoinHandle<usize> {
    std::thread::spawn(move || {
        let mut lines = lines.into_iter();
        let mut answered = 0;
        while feed.wait_for_request() {
            let event = match lines.next() {
                Some(line) => InputEvent::Line(line.to_owned()),
                None => InputEvent::Eof,
            };
            answered += 1;
            if !feed.send(event) {
                break;
            }
        }
        answered
    })
}

struct Outcome {
    prompter: PrompterExit,
    stage: Stage,
    reflections: Vec<String>,
    detector: DetectorExit,
    shown: Vec<OutputMessage>,
    answered: usize,
}

async fn run_session(bus: LocalBus, lines: Vec<&'static str>) -> Outcome {
    run_session_with(bus, lines, Arc::new(TemplatePrompts)).await
}

async fn run_session_with(bus: LocalBus, lines: Vec<&'static str>, generator: Arc<dyn PromptGenerator>) -> Outcome {
    let token = CancellationToken::new();
    let prompter_inbound = bus.subscribe(&PROMPTER_TOPICS, 32);
    let detector_inbound = bus.subscribe(&DETECTOR_TOPICS, 32);
    let shared: Arc<dyn Bus> = Arc::new(bus);

    let orchestrator = Orchestrator::new(generator, Duration::from_secs(1));
    let mut prompter = PrompterRuntime::new(orchestrator, shared.clone(), prompter_inbound, token.clone());
    let prompter_task = tokio::spawn(async move {
        let exit = prompter.run().await;
        (exit, prompter)
    });

    let (console, feed) = input::console();
    let reader = participant(feed, lines);
    let (out_tx, mut out_rx) = output::channel();
    let runtime = DetectorRuntime::new(
        detector(),
        Box::new(FrameQueue::repeat(tray_with_cards(), 50)),
        PhaseCfg { frame_interval: Duration::ZERO, settle_frames: 8 },
        shared,
        detector_inbound,
        console,
        out_tx,
        token,
    );

    let detector_exit = tokio::time::timeout(Duration::from_secs(10), runtime.run())
        .await
        .expect("detector finished in time")
        .expect("detector succeeded");
    let (prompter_exit, prompter) = tokio::time::timeout(Duration::from_secs(10), prompter_task)
        .await
        .expect("prompter finished in time")
        .unwrap();

    let mut shown = Vec::new();
    while let Some(msg) = out_rx.recv().await {
        shown.push(msg);
    }
    let answered = reader.join().unwrap();
    Outcome {
        prompter: prompter_exit,
        stage: prompter.stage(),
        reflections: prompter.orchestrator().state().reflections().to_vec(),
        detector: detector_exit,
        shown,
        answered,
    }
}

impl Outcome {
    fn prompts(&self) -> Vec<&str> {
        self.shown
            .iter()
            .filter(|m| m.kind == OutputKind::Prompt)
            .map(|m| m.content.as_str())
            .collect()
    }
}

#[tokio::test]
async fn full_session_over_local_bus() {
    let out = run_session(LocalBus::new(), vec!["it was great", "the staff", "fast checkout"]).await;

    assert_eq!(out.prompter, PrompterExit::Completed);
    assert_eq!(out.stage, Stage::Done);
    assert_eq!(out.reflections, ["it was great", "the staff", "fast checkout"]);
    assert_eq!(out.detector, DetectorExit::Relay(RelayExit::SessionEnded));
    assert_eq!(
        out.prompts(),
        [
            "What made you feel Relieved and Confident during your experience?",
            FOLLOW_UP_FALLBACK,
            SUMMARY_FALLBACK,
            CLOSING_MESSAGE,
        ]
    );
    assert_eq!(out.shown.first().map(|m| m.kind), Some(OutputKind::Notice));
    assert_eq!(out.shown.last(), Some(&OutputMessage::notice(SESSION_END_NOTICE)));
    // No read is requested after the third reflection.
    assert_eq!(out.answered, 3);
}

#[tokio::test]
async fn blank_lines_are_asked_again_locally() {
    let out = run_session(LocalBus::new(), vec!["", "it was great", "   ", "the staff", "fast checkout"]).await;
    assert_eq!(out.stage, Stage::Done);
    assert_eq!(out.reflections, ["it was great", "the staff", "fast checkout"]);
    assert_eq!(out.answered, 5);
}

fn same_question_every_time() -> Arc<dyn PromptGenerator> {
    Arc::new(LlmPrompts::new(Arc::new(MockProvider::new("Can you tell me more?"))))
}

#[tokio::test]
async fn redelivered_messages_do_not_disturb_the_session() {
    let out = run_session(LocalBus::with_redelivery(), vec!["it was great", "the staff", "fast checkout"]).await;

    assert_eq!(out.prompter, PrompterExit::Completed);
    assert_eq!(out.reflections, ["it was great", "the staff", "fast checkout"]);
    assert_eq!(out.detector, DetectorExit::Relay(RelayExit::SessionEnded));
    assert_eq!(out.prompts().len(), 4);
    assert_eq!(out.answered, 3);
}

#[tokio::test]
async fn identical_answers_complete_the_session() {
    for bus in [LocalBus::new(), LocalBus::with_redelivery()] {
        let out = run_session(bus, vec!["yes", "yes", "fine"]).await;

        assert_eq!(out.prompter, PrompterExit::Completed);
        assert_eq!(out.stage, Stage::Done);
        assert_eq!(out.reflections, ["yes", "yes", "fine"]);
        assert_eq!(out.detector, DetectorExit::Relay(RelayExit::SessionEnded));
        assert_eq!(out.answered, 3);
    }
}

#[tokio::test]
async fn repeated_question_text_is_still_answered() {
    for bus in [LocalBus::new(), LocalBus::with_redelivery()] {
        let out = run_session_with(bus, vec!["it was great", "the staff", "fast checkout"], same_question_every_time()).await;

        assert_eq!(out.prompter, PrompterExit::Completed);
        assert_eq!(out.reflections, ["it was great", "the staff", "fast checkout"]);
        assert_eq!(out.detector, DetectorExit::Relay(RelayExit::SessionEnded));
        assert_eq!(&out.prompts()[1..3], ["Can you tell me more?", "Can you tell me more?"]);
        assert_eq!(out.answered, 3);
    }
}

#[tokio::test]
async fn repeated_answers_to_a_repeated_question() {
    for bus in [LocalBus::new(), LocalBus::with_redelivery()] {
        let out = run_session_with(bus, vec!["yes", "yes", "yes"], same_question_every_time()).await;

        assert_eq!(out.stage, Stage::Done);
        assert_eq!(out.reflections, ["yes", "yes", "yes"]);
        assert_eq!(out.prompts().len(), 4);
    }
}

#[tokio::test]
async fn participant_quitting_stops_both_sides() {
    let out = run_session(LocalBus::new(), vec!["it was great", "q"]).await;

    assert_eq!(out.detector, DetectorExit::Relay(RelayExit::Quit));
    assert_eq!(out.prompter, PrompterExit::Cancelled);
    assert_eq!(out.stage, Stage::AwaitingT2);
    assert_eq!(out.reflections, ["it was great"]);
}

#[tokio::test]
async fn stray_events_before_cards_are_ignored() {
    let bus = LocalBus::new();
    let mut detector_rx = bus.subscribe(&DETECTOR_TOPICS, 8);
    let inbound = bus.subscribe(&PROMPTER_TOPICS, 8);
    let orchestrator = Orchestrator::new(Arc::new(TemplatePrompts), Duration::from_secs(1));
    let token = CancellationToken::new();
    let mut prompter = PrompterRuntime::new(orchestrator, Arc::new(bus.clone()), inbound, token.clone());

    bus.publish(&BusMessage::user_input("too early")).await.unwrap();
    bus.publish_raw(tray_core::bus::message::CARD_INPUT_TOPIC, b"{\"cards\": 3}").await.unwrap();
    bus.publish(&BusMessage::cards(["Skeptical"])).await.unwrap();

    let handle = tokio::spawn(async move {
        let exit = prompter.run().await;
        (exit, prompter.stage())
    });
    assert_eq!(
        detector_rx.recv().await.unwrap(),
        BusMessage::prompt("What made you feel Skeptical during your experience?")
    );
    token.cancel();
    let (exit, stage) = handle.await.unwrap();
    assert_eq!(exit, PrompterExit::Cancelled);
    assert_eq!(stage, Stage::AwaitingT1);
}
