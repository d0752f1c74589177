use tokio::sync::{mpsc, oneshot};

use crate::domain::HaltState;
use crate::error::{Result, WardenError};

/// Operator commands, applied between cycles
#[derive(Debug)]
pub enum OrchestratorCommand {
    /// Leave HALTED if health and daily loss allow it
    Resume {
        reply: oneshot::Sender<Result<HaltState>>,
    },
    /// Emergency stop
    Halt {
        reason: String,
        reply: oneshot::Sender<Result<HaltState>>,
    },
}

/// Cloneable control surface for a running orchestrator
#[derive(Clone)]
pub struct OrchestratorHandle {
    control_tx: mpsc::Sender<OrchestratorCommand>,
}

impl OrchestratorHandle {
    pub(crate) fn new(control_tx: mpsc::Sender<OrchestratorCommand>) -> Self {
        Self { control_tx }
    }

    /// Request a resume. The returned state is HALTED if the re-check failed.
    pub async fn resume(&self) -> Result<HaltState> {
        let (reply, rx) = oneshot::channel();
        self.send(OrchestratorCommand::Resume { reply }).await?;
        rx.await
            .map_err(|_| WardenError::Internal("orchestrator dropped resume reply".into()))?
    }

    pub async fn halt(&self, reason: impl Into<String>) -> Result<HaltState> {
        let (reply, rx) = oneshot::channel();
        self.send(OrchestratorCommand::Halt {
            reason: reason.into(),
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| WardenError::Internal("orchestrator dropped halt reply".into()))?
    }

    async fn send(&self, cmd: OrchestratorCommand) -> Result<()> {
        self.control_tx
            .send(cmd)
            .await
            .map_err(|_| WardenError::Internal("orchestrator control channel closed".into()))
    }
}
