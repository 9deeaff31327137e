//! Forward-mode consumer: one paced forward per message id.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    domain::{MessageId, Peer},
    errors::Error,
    pacing::Pacer,
    port::TransferClient,
    report::StageReport,
};

pub struct ForwardDispatcher {
    client: Arc<dyn TransferClient>,
    from: Peer,
    to: Peer,
    pacer: Pacer,
}

impl ForwardDispatcher {
    pub fn new(client: Arc<dyn TransferClient>, from: Peer, to: Peer, pacer: Pacer) -> Self {
        Self {
            client,
            from,
            to,
            pacer,
        }
    }

    /// Forward every id from `rx`, author dropped, until the queue ends or `cancel` fires.
    ///
    /// A failed forward is logged and the next id is tried; nothing is retried.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<MessageId>,
        cancel: CancellationToken,
    ) -> StageReport {
        let mut report = StageReport::default();

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let id = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                next = rx.recv() => match next {
                    Some(id) => id,
                    None => break,
                },
            };
            report.received += 1;

            if !self.pacer.wait(&cancel).await {
                report.cancelled = true;
                break;
            }

            debug!(message_id = %id, "forwarding");
            match self
                .client
                .forward_messages(self.from, &[id], self.to, true)
                .await
            {
                Ok(()) => {
                    report.delivered += 1;
                    info!(message_id = %id, "forwarded");
                }
                Err(e) => {
                    report.failed += 1;
                    let err = Error::Forward {
                        message_id: id,
                        reason: e.to_string(),
                    };
                    warn!("{err}");
                }
            }
        }

        if report.cancelled {
            info!(delivered = report.delivered, "cancelled, stopping forwards");
        }
        report
    }
}
