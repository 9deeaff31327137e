use std::path::PathBuf;

use crate::domain::{ChannelId, MessageId};

/// Core error type for the transfer pipeline.
///
/// Adapter crates map their transport errors into `External`; the pipeline
/// wraps those into the stage-specific variants so callers can tell a fatal
/// resolution failure from a per-item send failure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("could not resolve {role} channel {channel_id}: {reason}")]
    Resolution {
        role: &'static str,
        channel_id: ChannelId,
        reason: String,
    },

    #[error("history fetch failed before message {before}: {reason}")]
    Fetch { before: MessageId, reason: String },

    #[error("forward of message {message_id} failed: {reason}")]
    Forward { message_id: MessageId, reason: String },

    #[error("send of message {message_id} failed: {reason}")]
    Send { message_id: MessageId, reason: String },

    #[error("download failed: {0}")]
    Download(String),

    #[error("upload of {path} failed: {reason}")]
    Upload { path: PathBuf, reason: String },

    #[error("cleanup of {path} failed: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Only resolution failures abort a run; everything else is isolated to a stage or item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Resolution { .. } | Error::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
