//! Copy-mode consumer: recreate each message in the destination.
//!
//! Used when the source forbids forwarding. Text is resent with its formatting;
//! media goes through the scratch store (download, re-upload, delete) first.

use std::{path::Path, sync::Arc};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    domain::{Attachment, MessageRecord, Peer},
    errors::Error,
    media::MediaStore,
    pacing::Pacer,
    port::TransferClient,
    report::StageReport,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ItemOutcome {
    Delivered,
    Skipped,
    Failed,
    Cancelled,
}

pub struct CopyProcessor {
    client: Arc<dyn TransferClient>,
    to: Peer,
    media: MediaStore,
    keep_files: bool,
    pacer: Pacer,
}

impl CopyProcessor {
    pub fn new(
        client: Arc<dyn TransferClient>,
        to: Peer,
        media: MediaStore,
        keep_files: bool,
        pacer: Pacer,
    ) -> Self {
        Self {
            client,
            to,
            media,
            keep_files,
            pacer,
        }
    }

    /// Recreate every record from `rx` in order until the queue ends or `cancel` fires.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<MessageRecord>,
        cancel: CancellationToken,
    ) -> StageReport {
        let mut report = StageReport::default();

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let record = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                next = rx.recv() => match next {
                    Some(record) => record,
                    None => break,
                },
            };
            report.received += 1;

            let outcome = match &record.attachment {
                Some(attachment) => self.copy_media(&record, attachment, &cancel).await,
                None if !record.text.is_empty() => self.copy_text(&record, &cancel).await,
                None => {
                    debug!(message_id = %record.id, "empty message, skipping");
                    ItemOutcome::Skipped
                }
            };

            match outcome {
                ItemOutcome::Delivered => report.delivered += 1,
                ItemOutcome::Skipped => report.skipped += 1,
                ItemOutcome::Failed => report.failed += 1,
                ItemOutcome::Cancelled => {
                    report.cancelled = true;
                    break;
                }
            }
        }

        if report.cancelled {
            info!(delivered = report.delivered, "cancelled, stopping copy");
        }
        report
    }

    async fn copy_text(&mut self, record: &MessageRecord, cancel: &CancellationToken) -> ItemOutcome {
        if !self.pacer.wait(cancel).await {
            return ItemOutcome::Cancelled;
        }
        debug!(message_id = %record.id, "copying text");
        let sent = self
            .client
            .send_message(self.to, &record.text, &record.entities)
            .await;
        self.sent_outcome(record, sent)
    }

    async fn copy_media(
        &mut self,
        record: &MessageRecord,
        attachment: &Attachment,
        cancel: &CancellationToken,
    ) -> ItemOutcome {
        let path = match self.media.download(attachment, cancel).await {
            Ok(p) => p,
            Err(e) if cancel.is_cancelled() => {
                debug!(message_id = %record.id, "download interrupted: {e}");
                return ItemOutcome::Cancelled;
            }
            Err(e) => {
                warn!(message_id = %record.id, "{e}, skipping");
                return ItemOutcome::Skipped;
            }
        };
        debug!(message_id = %record.id, path = %path.display(), "media downloaded");

        let media = match self.media.upload(&path).await {
            Ok(m) => m,
            Err(e) => {
                warn!(message_id = %record.id, "{e}, skipping");
                self.release(&path).await;
                return ItemOutcome::Skipped;
            }
        };

        if !self.pacer.wait(cancel).await {
            self.release(&path).await;
            return ItemOutcome::Cancelled;
        }

        let sent = self
            .client
            .send_media(self.to, &media, &record.text, &record.entities)
            .await;
        self.release(&path).await;
        self.sent_outcome(record, sent)
    }

    fn sent_outcome(&self, record: &MessageRecord, sent: crate::Result<()>) -> ItemOutcome {
        match sent {
            Ok(()) => {
                info!(message_id = %record.id, "copied");
                ItemOutcome::Delivered
            }
            Err(e) => {
                let err = Error::Send {
                    message_id: record.id,
                    reason: e.to_string(),
                };
                warn!("{err}");
                ItemOutcome::Failed
            }
        }
    }

    /// Drop a scratch file once its item is done, unless files are being kept.
    async fn release(&self, path: &Path) {
        if self.keep_files {
            debug!(path = %path.display(), "keeping scratch file");
            return;
        }
        if let Err(e) = self.media.cleanup(path).await {
            warn!("{e}");
        }
    }
}
