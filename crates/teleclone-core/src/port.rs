use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    domain::{
        ChannelId, ChatEntry, FileLocation, HistoryEntry, MessageEntity, MessageId, Peer,
        UploadedDocument, UploadedFile,
    },
    Result,
};

/// Pre-authenticated messaging-service client.
///
/// Session handshake and the wire protocol live behind this trait in adapter crates
/// (see `teleclone-gateway`). Calls are stateless, so one handle is shared by both
/// pipeline stages.
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Look up a channel by id. The first entry is the one the caller asked for.
    async fn resolve_channel(&self, id: ChannelId) -> Result<Vec<ChatEntry>>;

    /// Up to `limit` entries strictly older than `before`, newest first.
    /// `MessageId::NEWEST` starts from the latest message.
    async fn fetch_history(
        &self,
        peer: Peer,
        before: MessageId,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>>;

    async fn forward_messages(
        &self,
        from: Peer,
        ids: &[MessageId],
        to: Peer,
        drop_author: bool,
    ) -> Result<()>;

    async fn send_message(&self, peer: Peer, text: &str, entities: &[MessageEntity])
        -> Result<()>;

    async fn send_media(
        &self,
        peer: Peer,
        media: &UploadedDocument,
        text: &str,
        entities: &[MessageEntity],
    ) -> Result<()>;

    /// Stream the file at `location` into `sink`, returning the number of bytes written.
    async fn download_file(
        &self,
        location: &FileLocation,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64>;

    /// Stream `size` bytes from `source` to the upload facility under `name`.
    async fn upload_file(
        &self,
        name: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
        size: u64,
    ) -> Result<UploadedFile>;
}
