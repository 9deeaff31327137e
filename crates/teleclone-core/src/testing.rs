//! In-memory `TransferClient` used by the pipeline tests.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::*,
    errors::Error,
    port::TransferClient,
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Resolve(ChannelId),
    Fetch { before: MessageId },
    Forward { ids: Vec<MessageId>, drop_author: bool },
    SendMessage { text: String },
    SendMedia { file_name: String, text: String },
    Download(FileLocation),
    Upload { name: String, size: u64 },
}

impl Call {
    pub fn is_outbound(&self) -> bool {
        matches!(
            self,
            Call::Forward { .. } | Call::SendMessage { .. } | Call::SendMedia { .. }
        )
    }
}

#[derive(Default)]
pub struct FakeClient {
    pub chats: Mutex<HashMap<i64, Vec<ChatEntry>>>,
    /// Whole source history, any order; served newest-first per page.
    pub history: Mutex<Vec<HistoryEntry>>,
    /// Fail every fetch once this many pages were served.
    pub fail_fetch_after_pages: Mutex<Option<usize>>,
    pub fail_forward: Mutex<HashSet<MessageId>>,
    pub fail_send: Mutex<HashSet<String>>,
    pub fail_download: Mutex<HashSet<i64>>,
    pub fail_upload: Mutex<bool>,
    /// Cancel this token once the given number of outbound calls happened.
    pub cancel_after_outbound: Mutex<Option<(usize, CancellationToken)>>,
    pub fetch_delay: Mutex<Duration>,
    pages_served: Mutex<usize>,
    calls: Mutex<Vec<(Instant, Call)>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(self, id: i64, title: &str, no_forwards: bool) -> Self {
        self.chats.lock().unwrap().insert(
            id,
            vec![ChatEntry::Channel(ChannelRef {
                id: ChannelId(id),
                access_hash: id * 7,
                title: title.to_string(),
                no_forwards,
            })],
        );
        self
    }

    pub fn with_history(self, entries: Vec<HistoryEntry>) -> Self {
        *self.history.lock().unwrap() = entries;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn timed_calls(&self) -> Vec<(Instant, Call)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn outbound(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_outbound).collect()
    }

    fn record(&self, call: Call) {
        let outbound = call.is_outbound();
        let mut calls = self.calls.lock().unwrap();
        calls.push((Instant::now(), call));
        if !outbound {
            return;
        }
        let count = calls.iter().filter(|(_, c)| c.is_outbound()).count();
        if let Some((limit, token)) = self.cancel_after_outbound.lock().unwrap().as_ref() {
            if count >= *limit {
                token.cancel();
            }
        }
    }
}

pub fn text(id: i32, body: &str) -> HistoryEntry {
    HistoryEntry::Message(MessageRecord {
        id: MessageId(id),
        text: body.to_string(),
        entities: vec![MessageEntity {
            offset: 0,
            length: 1,
            kind: EntityKind::Bold,
        }],
        attachment: None,
    })
}

pub fn photo(id: i32, caption: &str) -> HistoryEntry {
    HistoryEntry::Message(MessageRecord {
        id: MessageId(id),
        text: caption.to_string(),
        entities: vec![],
        attachment: Some(Attachment::Photo(PhotoRef {
            id: 1000 + id as i64,
            access_hash: 5,
            file_reference: vec![1, 2, 3],
        })),
    })
}

pub fn document(id: i32, file_name: Option<&str>) -> HistoryEntry {
    HistoryEntry::Message(MessageRecord {
        id: MessageId(id),
        text: String::new(),
        entities: vec![],
        attachment: Some(Attachment::Document(DocumentRef {
            id: 2000 + id as i64,
            access_hash: 9,
            file_reference: vec![4, 5],
            file_name: file_name.map(str::to_string),
            mime_type: Some("application/pdf".to_string()),
        })),
    })
}

/// `count` plain text messages with ids `1..=count`.
pub fn text_history(count: i32) -> Vec<HistoryEntry> {
    (1..=count).map(|id| text(id, &format!("msg {id}"))).collect()
}

pub fn scratch_dir(prefix: &str) -> std::path::PathBuf {
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_nanos();
    let pid = std::process::id();
    std::path::PathBuf::from(format!("/tmp/teleclone-{prefix}-{pid}-{ts}"))
}

fn location_object_id(location: &FileLocation) -> i64 {
    match location {
        FileLocation::Photo { id, .. } | FileLocation::Document { id, .. } => *id,
    }
}

#[async_trait]
impl TransferClient for FakeClient {
    async fn resolve_channel(&self, id: ChannelId) -> Result<Vec<ChatEntry>> {
        self.record(Call::Resolve(id));
        self.chats
            .lock()
            .unwrap()
            .get(&id.0)
            .cloned()
            .ok_or_else(|| Error::External(format!("CHANNEL_INVALID: {id}")))
    }

    async fn fetch_history(
        &self,
        _peer: Peer,
        before: MessageId,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        self.record(Call::Fetch { before });
        let delay = *self.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        {
            let mut served = self.pages_served.lock().unwrap();
            if let Some(limit) = *self.fail_fetch_after_pages.lock().unwrap() {
                if *served >= limit {
                    return Err(Error::External("FLOOD_WAIT_X".to_string()));
                }
            }
            *served += 1;
        }

        let mut page: Vec<HistoryEntry> = self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|e| before == MessageId::NEWEST || e.id() < before)
            .cloned()
            .collect();
        page.sort_by(|a, b| b.id().cmp(&a.id()));
        page.truncate(limit);
        Ok(page)
    }

    async fn forward_messages(
        &self,
        _from: Peer,
        ids: &[MessageId],
        _to: Peer,
        drop_author: bool,
    ) -> Result<()> {
        self.record(Call::Forward {
            ids: ids.to_vec(),
            drop_author,
        });
        if ids.iter().any(|id| self.fail_forward.lock().unwrap().contains(id)) {
            return Err(Error::External("MESSAGE_ID_INVALID".to_string()));
        }
        Ok(())
    }

    async fn send_message(
        &self,
        _peer: Peer,
        text: &str,
        _entities: &[MessageEntity],
    ) -> Result<()> {
        self.record(Call::SendMessage {
            text: text.to_string(),
        });
        if self.fail_send.lock().unwrap().contains(text) {
            return Err(Error::External("CHAT_WRITE_FORBIDDEN".to_string()));
        }
        Ok(())
    }

    async fn send_media(
        &self,
        _peer: Peer,
        media: &UploadedDocument,
        text: &str,
        _entities: &[MessageEntity],
    ) -> Result<()> {
        self.record(Call::SendMedia {
            file_name: media.file_name.clone(),
            text: text.to_string(),
        });
        if self.fail_send.lock().unwrap().contains(text) {
            return Err(Error::External("MEDIA_EMPTY".to_string()));
        }
        Ok(())
    }

    async fn download_file(
        &self,
        location: &FileLocation,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64> {
        self.record(Call::Download(location.clone()));
        let id = location_object_id(location);
        if self.fail_download.lock().unwrap().contains(&id) {
            // Some bytes reach the file before the transport dies.
            sink.write_all(b"partial").await?;
            return Err(Error::External("FILE_REFERENCE_EXPIRED".to_string()));
        }
        let bytes = format!("bytes-of-{id}");
        sink.write_all(bytes.as_bytes()).await?;
        sink.flush().await?;
        Ok(bytes.len() as u64)
    }

    async fn upload_file(
        &self,
        name: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
        size: u64,
    ) -> Result<UploadedFile> {
        self.record(Call::Upload {
            name: name.to_string(),
            size,
        });
        if *self.fail_upload.lock().unwrap() {
            return Err(Error::External("FILE_PARTS_INVALID".to_string()));
        }
        let mut buf = Vec::new();
        source.read_to_end(&mut buf).await?;
        Ok(UploadedFile {
            id: buf.len() as i64,
            parts: 1,
            name: name.to_string(),
        })
    }
}
