mod detector;
mod prompter;
mod shutdown;

pub use detector::{
    DetectorError, DetectorExit, DetectorRuntime, MAX_REFLECTIONS, PhaseCfg, Relay, RelayExit,
    SESSION_END_NOTICE, describe, detection_phase, run_detection_phase,
};
pub use prompter::{PrompterExit, PrompterRuntime};
pub use shutdown::ShutdownGuard;
