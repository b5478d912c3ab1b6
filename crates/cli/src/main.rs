mod console;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use tray_core::bus::message::{DETECTOR_TOPICS, PROMPTER_TOPICS};
use tray_core::bus::{Bus, LocalBus, MqttBus};
use tray_core::config::TrayCfg;
use tray_core::io::{input, output};
use tray_core::runtime::{DetectorExit, DetectorRuntime, PhaseCfg, PrompterRuntime, ShutdownGuard};
use tray_core::session::{LlmPrompts, Orchestrator, PromptGenerator, TemplatePrompts};
use tray_core::vision::{CardDetector, ImageSequence};
use tray_llm::provider::LlmProvider;

/// Tray reflection station: card detection and the guided survey.
#[derive(Parser, Debug)]
#[command(name = "tray", version)]
struct Args {
    /// More log output (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Color range table, overrides TRAY_HSV_RANGES_PATH.
    #[arg(long, global = true)]
    ranges: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the tray, publish the detected cards, then relay the conversation.
    Detect {
        /// Directory of frames to replay as the camera.
        #[arg(long)]
        frames: PathBuf,
        /// Replay the frames forever instead of failing at the end.
        #[arg(long = "loop")]
        looping: bool,
    },
    /// Run the survey orchestrator for one session.
    Prompt,
    /// Run both roles in one process over an in-memory bus.
    Demo {
        #[arg(long)]
        frames: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut cfg = TrayCfg::from_env();
    if let Some(path) = args.ranges {
        cfg.hsv_ranges_path = path;
    }
    cfg.log_summary();

    let shutdown = ShutdownGuard::new();
    shutdown.spawn_signal_listener();

    match args.command {
        Command::Detect { frames, looping } => run_detect(&cfg, frames, looping, shutdown).await,
        Command::Prompt => run_prompt(&cfg, shutdown).await,
        Command::Demo { frames } => run_demo(&cfg, frames, shutdown).await,
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let json = std::env::var("TRAY_LOG_JSON").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_target(false).with_writer(std::io::stderr)).init();
    }
}

fn prompt_generator() -> Arc<dyn PromptGenerator> {
    match tray_llm::http::from_env() {
        Some(provider) => {
            tracing::info!(provider = provider.name(), model = provider.model(), "LLM prompts enabled");
            Arc::new(LlmPrompts::new(Arc::new(provider)))
        }
        None => {
            tracing::info!("no LLM configured, using template prompts");
            Arc::new(TemplatePrompts)
        }
    }
}

fn detector_parts(cfg: &TrayCfg, frames: PathBuf, looping: bool) -> anyhow::Result<(CardDetector, ImageSequence)> {
    let detector = CardDetector::from_config(cfg).context("loading detector configuration")?;
    let source = ImageSequence::open(&frames, looping)
        .with_context(|| format!("opening frames in {}", frames.display()))?;
    Ok((detector, source))
}

fn check_exit(exit: DetectorExit) {
    if exit == DetectorExit::CancelledBeforeCards {
        tracing::info!("stopped before any cards were detected");
    }
}

async fn run_detect(cfg: &TrayCfg, frames: PathBuf, looping: bool, shutdown: ShutdownGuard) -> anyhow::Result<()> {
    let (detector, source) = detector_parts(cfg, frames, looping)?;
    let (bus, inbound) = MqttBus::connect(cfg, "detector", &DETECTOR_TOPICS)?;

    let (console, feed) = input::console();
    console::spawn_reader(feed);
    let (out_tx, out_rx) = output::channel();
    let printer = console::spawn_printer(out_rx);

    let runtime = DetectorRuntime::new(
        detector,
        Box::new(source),
        PhaseCfg::from(cfg),
        Arc::new(bus),
        inbound,
        console,
        out_tx,
        shutdown.token(),
    );
    let exit = runtime.run().await?;
    check_exit(exit);
    let _ = printer.await;
    Ok(())
}

async fn run_prompt(cfg: &TrayCfg, shutdown: ShutdownGuard) -> anyhow::Result<()> {
    let (bus, inbound) = MqttBus::connect(cfg, "prompter", &PROMPTER_TOPICS)?;
    let orchestrator = Orchestrator::new(prompt_generator(), cfg.prompt_timeout());
    let mut runtime = PrompterRuntime::new(orchestrator, Arc::new(bus), inbound, shutdown.token());
    runtime.run().await;
    Ok(())
}

async fn run_demo(cfg: &TrayCfg, frames: PathBuf, shutdown: ShutdownGuard) -> anyhow::Result<()> {
    let (detector, source) = detector_parts(cfg, frames, true)?;
    let bus = LocalBus::new();
    let prompter_inbound = bus.subscribe(&PROMPTER_TOPICS, cfg.bus_buffer);
    let detector_inbound = bus.subscribe(&DETECTOR_TOPICS, cfg.bus_buffer);
    let shared: Arc<dyn Bus> = Arc::new(bus);

    let orchestrator = Orchestrator::new(prompt_generator(), cfg.prompt_timeout());
    let mut prompter = PrompterRuntime::new(orchestrator, shared.clone(), prompter_inbound, shutdown.token());

    let (console, feed) = input::console();
    console::spawn_reader(feed);
    let (out_tx, out_rx) = output::channel();
    let printer = console::spawn_printer(out_rx);

    let detector = DetectorRuntime::new(
        detector,
        Box::new(source),
        PhaseCfg::from(cfg),
        shared,
        detector_inbound,
        console,
        out_tx,
        shutdown.token(),
    );

    let detector_fut = async {
        let result = detector.run().await;
        // The prompter cannot finish without the detector.
        shutdown.cancel();
        result
    };
    let (prompter_exit, detector_result) = tokio::join!(prompter.run(), detector_fut);
    tracing::info!(?prompter_exit, "demo finished");
    check_exit(detector_result?);
    let _ = printer.await;
    Ok(())
}
