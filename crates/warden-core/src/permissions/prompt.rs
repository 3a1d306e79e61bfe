//! Interactive prompt plumbing
//!
//! The manager never renders anything. It sends a [`PromptEnvelope`] over an
//! mpsc channel and waits on the enclosed oneshot for the UI's answer.

use super::types::{DenialReason, PermissionRequest, PromptDecision};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// One pending question for the UI
#[derive(Debug)]
pub struct PromptEnvelope {
    /// What is being asked
    pub request: PermissionRequest,
    /// Where the answer goes
    pub respond_to: oneshot::Sender<PromptDecision>,
}

impl PromptEnvelope {
    /// Answer the prompt. Returns `false` if the asker already gave up.
    pub fn respond(self, decision: PromptDecision) -> bool {
        self.respond_to.send(decision).is_ok()
    }
}

/// Sending half of the prompt channel, held by the manager
#[derive(Debug, Clone)]
pub struct PromptChannel {
    sender: mpsc::Sender<PromptEnvelope>,
}

/// Create a prompt channel; the receiver goes to the UI
#[must_use]
pub fn prompt_channel(buffer: usize) -> (PromptChannel, mpsc::Receiver<PromptEnvelope>) {
    let (sender, receiver) = mpsc::channel(buffer.max(1));
    (PromptChannel { sender }, receiver)
}

impl PromptChannel {
    /// Ask the UI and wait for its answer.
    ///
    /// Cancellation, timeout and a dropped receiver or responder all end the
    /// wait with the matching [`DenialReason`].
    pub async fn ask(
        &self,
        request: PermissionRequest,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> std::result::Result<PromptDecision, DenialReason> {
        let (tx, rx) = oneshot::channel();
        let envelope = PromptEnvelope {
            request,
            respond_to: tx,
        };

        let exchange = async {
            self.sender
                .send(envelope)
                .await
                .map_err(|_| DenialReason::PromptClosed)?;
            rx.await.map_err(|_| DenialReason::PromptClosed)
        };

        let deadline = async {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = exchange => result,
            _ = cancel.cancelled() => Err(DenialReason::Cancelled),
            _ = deadline => Err(DenialReason::TimedOut),
        }
    }
}
