//! Producer stage: walk a channel's history backwards, emit it oldest-first.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    domain::{HistoryEntry, MessageId, MessageRecord, Peer},
    errors::Error,
    port::TransferClient,
};

/// Largest page the history API hands out.
pub const MAX_PAGE_SIZE: usize = 100;

/// What the fetcher emits. Forward mode only needs ids; copy mode needs whole records.
pub trait HistoryItem: Send + 'static {
    fn from_record(record: MessageRecord) -> Self;
}

impl HistoryItem for MessageId {
    fn from_record(record: MessageRecord) -> Self {
        record.id
    }
}

impl HistoryItem for MessageRecord {
    fn from_record(record: MessageRecord) -> Self {
        record
    }
}

#[derive(Debug)]
pub enum FetchOutcome {
    /// An empty page came back: the whole history was emitted.
    Exhausted,
    Cancelled,
    /// A page request failed; pages scanned before it were still emitted.
    Failed(Error),
}

#[derive(Debug)]
pub struct FetchSummary {
    pub outcome: FetchOutcome,
    pub pages: usize,
    pub emitted: usize,
    pub skipped: usize,
}

/// One page reordered for emission.
#[derive(Debug, PartialEq, Eq)]
struct OrderedPage {
    records: Vec<MessageRecord>,
    /// Smallest id seen in the page, service entries included.
    oldest: Option<MessageId>,
    skipped: usize,
}

/// Reverse a newest-first page into emission order and pick the next cursor.
///
/// Entries at or above `cursor` are dropped so a misbehaving page can never
/// re-emit something already sent.
fn order_page(page: Vec<HistoryEntry>, cursor: MessageId) -> OrderedPage {
    let mut oldest: Option<MessageId> = None;
    let mut skipped = 0usize;
    let mut records = Vec::with_capacity(page.len());

    for entry in page {
        let id = entry.id();
        if cursor != MessageId::NEWEST && id >= cursor {
            skipped += 1;
            continue;
        }
        oldest = Some(oldest.map_or(id, |o| o.min(id)));
        match entry {
            HistoryEntry::Message(m) => records.push(m),
            HistoryEntry::Service { .. } | HistoryEntry::Empty { .. } => skipped += 1,
        }
    }

    records.reverse();
    // The API promises newest-first; don't rely on it for the output order.
    if !records.windows(2).all(|w| w[0].id < w[1].id) {
        records.sort_by_key(|m| m.id);
        records.dedup_by_key(|m| m.id);
    }

    OrderedPage {
        records,
        oldest,
        skipped,
    }
}

pub struct HistoryFetcher {
    client: Arc<dyn TransferClient>,
    peer: Peer,
    page_size: usize,
}

impl HistoryFetcher {
    pub fn new(client: Arc<dyn TransferClient>, peer: Peer, page_size: usize) -> Self {
        Self {
            client,
            peer,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Page through history, then push every item into `tx` oldest-first.
    ///
    /// Pages arrive newest page first, so nothing is emitted until the scan reaches
    /// the beginning of the channel (or fails, in which case what was scanned is
    /// still emitted). `tx` is dropped on return, which is how the consumer learns
    /// the stream ended.
    pub async fn run<T: HistoryItem>(
        self,
        tx: mpsc::Sender<T>,
        cancel: CancellationToken,
    ) -> FetchSummary {
        let mut summary = FetchSummary {
            outcome: FetchOutcome::Exhausted,
            pages: 0,
            emitted: 0,
            skipped: 0,
        };

        let pages = match self.scan::<T>(&cancel, &mut summary).await {
            Some(pages) => pages,
            None => return summary,
        };

        let total: usize = pages.iter().map(Vec::len).sum();
        info!(pages = pages.len(), total, "history scanned, emitting oldest first");

        for item in pages.into_iter().rev().flatten() {
            if cancel.is_cancelled() {
                info!("cancelled, stopping history emission");
                summary.outcome = FetchOutcome::Cancelled;
                return summary;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("cancelled while queue was full, stopping history emission");
                    summary.outcome = FetchOutcome::Cancelled;
                    return summary;
                }
                sent = tx.send(item) => {
                    if sent.is_err() {
                        debug!("consumer dropped the queue");
                        summary.outcome = FetchOutcome::Cancelled;
                        return summary;
                    }
                }
            }
            summary.emitted += 1;
        }

        summary
    }

    /// Walk pages backwards from the newest message. Each returned page is already
    /// ascending; the list itself is newest page first.
    ///
    /// Returns `None` when cancelled, in which case nothing should be emitted.
    async fn scan<T: HistoryItem>(
        &self,
        cancel: &CancellationToken,
        summary: &mut FetchSummary,
    ) -> Option<Vec<Vec<T>>> {
        let mut pages: Vec<Vec<T>> = Vec::new();
        let mut cursor = MessageId::NEWEST;

        info!(channel = %self.peer.channel_id, "fetching history");
        loop {
            if cancel.is_cancelled() {
                info!("cancelled, stopping history fetch");
                summary.outcome = FetchOutcome::Cancelled;
                return None;
            }

            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("cancelled during page request, stopping history fetch");
                    summary.outcome = FetchOutcome::Cancelled;
                    return None;
                }
                r = self.client.fetch_history(self.peer, cursor, self.page_size) => r,
            };

            let page = match page {
                Ok(p) => p,
                Err(e) => {
                    warn!(before = %cursor, "history fetch failed: {e}");
                    summary.outcome = FetchOutcome::Failed(Error::Fetch {
                        before: cursor,
                        reason: e.to_string(),
                    });
                    return Some(pages);
                }
            };

            if page.is_empty() {
                info!(pages = summary.pages, "reached the beginning of the channel");
                return Some(pages);
            }

            summary.pages += 1;
            let ordered = order_page(page, cursor);
            summary.skipped += ordered.skipped;
            let batch = ordered.records.len();
            pages.push(ordered.records.into_iter().map(T::from_record).collect());

            match ordered.oldest {
                Some(oldest) if cursor == MessageId::NEWEST || oldest < cursor => {
                    cursor = oldest;
                }
                _ => {
                    warn!(before = %cursor, "page did not move the cursor, treating as end of history");
                    return Some(pages);
                }
            }
            debug!(batch, cursor = %cursor, "page fetched");
        }
    }
}
