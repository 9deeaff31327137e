//! Session gateway adapter.
//!
//! Implements the `teleclone-core` `TransferClient` port over the JSON/HTTP API of a
//! user-session gateway. The gateway owns the authenticated session and the wire
//! protocol; this crate only maps calls and errors.

use std::{
    sync::atomic::{AtomicI64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use teleclone_core::{
    domain::{
        ChannelId, ChatEntry, FileLocation, HistoryEntry, MessageEntity, MessageId, Peer,
        UploadedDocument, UploadedFile,
    },
    errors::Error,
    port::TransferClient,
    Result,
};

/// Upload part size accepted by the service (512 KiB).
pub const UPLOAD_PART_SIZE: usize = 512 * 1024;

static RANDOM_ID_SEQ: AtomicI64 = AtomicI64::new(0);

/// Per-call idempotency key the service requires on every send.
fn random_id() -> i64 {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    nanos.wrapping_add(RANDOM_ID_SEQ.fetch_add(1, Ordering::Relaxed))
}

fn part_count(size: u64) -> u32 {
    let part = UPLOAD_PART_SIZE as u64;
    (size.div_ceil(part)).max(1) as u32
}

#[derive(Serialize)]
struct ResolveRequest {
    channel_id: ChannelId,
}

#[derive(Deserialize)]
struct ResolveResponse {
    #[serde(default)]
    chats: Vec<ChatEntry>,
}

#[derive(Serialize)]
struct HistoryRequest {
    peer: Peer,
    offset_id: MessageId,
    limit: usize,
}

#[derive(Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    messages: Vec<HistoryEntry>,
}

#[derive(Serialize)]
struct ForwardRequest<'a> {
    from_peer: Peer,
    to_peer: Peer,
    ids: &'a [MessageId],
    drop_author: bool,
    random_ids: Vec<i64>,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    peer: Peer,
    message: &'a str,
    entities: &'a [MessageEntity],
    random_id: i64,
}

#[derive(Serialize)]
struct SendMediaRequest<'a> {
    peer: Peer,
    media: &'a UploadedDocument,
    message: &'a str,
    entities: &'a [MessageEntity],
    random_id: i64,
}

#[derive(Serialize)]
struct DownloadRequest<'a> {
    location: &'a FileLocation,
}

#[derive(Deserialize)]
struct Ack {
    #[serde(default = "ack_default")]
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

fn ack_default() -> bool {
    true
}

/// HTTP client for the session gateway.
///
/// `timeout` bounds each JSON call and each upload part as a whole. Downloads
/// can run for as long as bytes keep arriving; they only fail when the gateway
/// goes quiet for `timeout`.
#[derive(Clone, Debug)]
pub struct GatewayClient {
    base_url: String,
    token: Option<String>,
    timeout: Duration,
    http: reqwest::Client,
}

impl GatewayClient {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("gateway client build error: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            timeout,
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let req = self.http.post(self.url(path));
        match &self.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }

    async fn checked(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(Error::External(format!(
            "gateway {what} failed: {status} {}",
            body.chars().take(200).collect::<String>()
        )))
    }

    async fn call<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let resp = self
            .request(path)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::External(format!("gateway {path} request error: {e}")))?;
        let resp = Self::checked(resp, path).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::External(format!("gateway {path} body error: {e}")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn ack<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let ack: Ack = self.call(path, body).await?;
        if ack.ok {
            Ok(())
        } else {
            Err(Error::External(
                ack.error.unwrap_or_else(|| format!("gateway {path} rejected")),
            ))
        }
    }

    fn stalled(&self, what: &str) -> Error {
        Error::External(format!(
            "gateway {what} stalled: no data for {}ms",
            self.timeout.as_millis()
        ))
    }
}

#[async_trait]
impl TransferClient for GatewayClient {
    async fn resolve_channel(&self, id: ChannelId) -> Result<Vec<ChatEntry>> {
        let resp: ResolveResponse = self
            .call("channels/resolve", &ResolveRequest { channel_id: id })
            .await?;
        Ok(resp.chats)
    }

    async fn fetch_history(
        &self,
        peer: Peer,
        before: MessageId,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let resp: HistoryResponse = self
            .call(
                "messages/history",
                &HistoryRequest {
                    peer,
                    offset_id: before,
                    limit,
                },
            )
            .await?;
        debug!(before = %before, count = resp.messages.len(), "history page");
        Ok(resp.messages)
    }

    async fn forward_messages(
        &self,
        from: Peer,
        ids: &[MessageId],
        to: Peer,
        drop_author: bool,
    ) -> Result<()> {
        let req = ForwardRequest {
            from_peer: from,
            to_peer: to,
            ids,
            drop_author,
            random_ids: ids.iter().map(|_| random_id()).collect(),
        };
        self.ack("messages/forward", &req).await
    }

    async fn send_message(
        &self,
        peer: Peer,
        text: &str,
        entities: &[MessageEntity],
    ) -> Result<()> {
        let req = SendMessageRequest {
            peer,
            message: text,
            entities,
            random_id: random_id(),
        };
        self.ack("messages/send", &req).await
    }

    async fn send_media(
        &self,
        peer: Peer,
        media: &UploadedDocument,
        text: &str,
        entities: &[MessageEntity],
    ) -> Result<()> {
        let req = SendMediaRequest {
            peer,
            media,
            message: text,
            entities,
            random_id: random_id(),
        };
        self.ack("messages/send_media", &req).await
    }

    async fn download_file(
        &self,
        location: &FileLocation,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64> {
        let send = self
            .request("files/download")
            .json(&DownloadRequest { location })
            .send();
        let resp = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| self.stalled("download"))?
            .map_err(|e| Error::External(format!("gateway download request error: {e}")))?;
        let mut resp = Self::checked(resp, "download").await?;

        let mut written = 0u64;
        loop {
            let chunk = tokio::time::timeout(self.timeout, resp.chunk())
                .await
                .map_err(|_| self.stalled("download"))?
                .map_err(|e| Error::External(format!("gateway download stream error: {e}")))?;
            let Some(chunk) = chunk else { break };
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        sink.flush().await?;
        Ok(written)
    }

    async fn upload_file(
        &self,
        name: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
        size: u64,
    ) -> Result<UploadedFile> {
        let file_id = random_id();
        let total_parts = part_count(size);
        let mut buf = vec![0u8; UPLOAD_PART_SIZE];

        for part in 0..total_parts {
            let n = read_part(source, &mut buf).await?;
            if n == 0 && part > 0 {
                return Err(Error::External(format!(
                    "{name} ended early: part {part} of {total_parts}"
                )));
            }

            let form = reqwest::multipart::Form::new()
                .text("file_id", file_id.to_string())
                .text("file_part", part.to_string())
                .text("file_total_parts", total_parts.to_string())
                .part(
                    "bytes",
                    reqwest::multipart::Part::bytes(buf[..n].to_vec()).file_name(name.to_string()),
                );

            let resp = self
                .request("files/upload_part")
                .timeout(self.timeout)
                .multipart(form)
                .send()
                .await
                .map_err(|e| Error::External(format!("gateway upload request error: {e}")))?;
            Self::checked(resp, "upload_part").await?;
            debug!(file = name, part, total_parts, "upload part sent");
        }

        Ok(UploadedFile {
            id: file_id,
            parts: total_parts,
            name: name.to_string(),
        })
    }
}

/// Fill `buf` as far as the source allows; a short read only happens at EOF.
async fn read_part(source: &mut (dyn AsyncRead + Unpin + Send), buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
