use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::bus::{Bus, Inbound};
use crate::session::{Orchestrator, Stage};

/// How the prompter loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrompterExit {
    /// The session reached DONE and `session_end` went out.
    Completed,
    Cancelled,
    /// The transport stopped delivering before the session finished.
    InboundClosed,
}

/// Prompter process: consumes `card_input`/`user_input` one at a time and
/// publishes whatever the orchestrator emits, in order.
pub struct PrompterRuntime {
    orchestrator: Orchestrator,
    bus: Arc<dyn Bus>,
    inbound: Inbound,
    token: CancellationToken,
}

impl PrompterRuntime {
    pub fn new(orchestrator: Orchestrator, bus: Arc<dyn Bus>, inbound: Inbound, token: CancellationToken) -> Self {
        Self { orchestrator, bus, inbound, token }
    }

    pub fn stage(&self) -> Stage {
        self.orchestrator.stage()
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Run until the session completes, shutdown is requested, or the inbound
    /// queue closes. Always disconnects the bus before returning.
    pub async fn run(&mut self) -> PrompterExit {
        let session = self.orchestrator.state().id();
        tracing::info!(%session, "prompter started, waiting for cards");

        let exit = loop {
            let msg = tokio::select! {
                _ = self.token.cancelled() => {
                    tracing::info!(stage = %self.orchestrator.stage(), "shutdown requested, leaving prompter loop");
                    break PrompterExit::Cancelled;
                }
                msg = self.inbound.recv() => msg,
            };
            let Some(msg) = msg else {
                tracing::warn!(stage = %self.orchestrator.stage(), "inbound queue closed");
                break PrompterExit::InboundClosed;
            };

            for out in self.orchestrator.handle(msg).await {
                let msg = out.into_message();
                if let Err(e) = self.bus.publish(&msg).await {
                    tracing::error!(topic = msg.topic(), error = %e, "publish failed");
                }
            }
            if self.orchestrator.is_done() {
                break PrompterExit::Completed;
            }
        };

        if let Err(e) = self.bus.disconnect().await {
            tracing::warn!(error = %e, "bus disconnect failed");
        }
        tracing::info!(%session, ?exit, reflections = self.orchestrator.state().reflections().len(), "prompter stopped");
        exit
    }
}
