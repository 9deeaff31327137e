use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric channel id, as configured by the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub i64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message id, monotonically increasing within one channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i32);

impl MessageId {
    /// Pagination sentinel: "start from the newest available message".
    pub const NEWEST: MessageId = MessageId(0);
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Addressable peer: what every history/send call needs to reach a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub channel_id: ChannelId,
    pub access_hash: i64,
}

/// A resolved channel. Created once per run and never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRef {
    pub id: ChannelId,
    pub access_hash: i64,
    pub title: String,
    /// Source-side "protected content" flag: forwarding is disallowed when set.
    pub no_forwards: bool,
}

impl ChannelRef {
    pub fn peer(&self) -> Peer {
        Peer {
            channel_id: self.id,
            access_hash: self.access_hash,
        }
    }

    pub fn allows_forwarding(&self) -> bool {
        !self.no_forwards
    }
}

/// One entry of a channel lookup response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEntry {
    Channel(ChannelRef),
    /// Basic group, user, forbidden chat... anything that is not a channel.
    Other { id: i64, kind: String },
}

/// Formatting span over a message body (offsets in UTF-16 code units).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntity {
    pub offset: u32,
    pub length: u32,
    #[serde(flatten)]
    pub kind: EntityKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityKind {
    Bold,
    Italic,
    Underline,
    Strike,
    Spoiler,
    Blockquote,
    Code,
    Pre { language: String },
    TextUrl { url: String },
    Url,
    Email,
    Mention,
    MentionName { user_id: i64 },
    Hashtag,
    CustomEmoji { document_id: i64 },
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoRef {
    pub id: i64,
    pub access_hash: i64,
    pub file_reference: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: i64,
    pub access_hash: i64,
    pub file_reference: Vec<u8>,
    /// Filename attribute, when the sender attached one.
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// The single attachment a message may carry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Attachment {
    Photo(PhotoRef),
    Document(DocumentRef),
}

/// A full message as fetched from history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub entities: Vec<MessageEntity>,
    #[serde(default)]
    pub attachment: Option<Attachment>,
}

/// One entry of a history page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEntry {
    Message(MessageRecord),
    /// Joins, pins, title changes...
    Service { id: MessageId },
    /// Deleted message placeholder.
    Empty { id: MessageId },
}

impl HistoryEntry {
    pub fn id(&self) -> MessageId {
        match self {
            HistoryEntry::Message(m) => m.id,
            HistoryEntry::Service { id } | HistoryEntry::Empty { id } => *id,
        }
    }
}

/// Remote location the download facility understands.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileLocation {
    Photo {
        id: i64,
        access_hash: i64,
        file_reference: Vec<u8>,
        thumb_size: String,
    },
    Document {
        id: i64,
        access_hash: i64,
        file_reference: Vec<u8>,
    },
}

/// Handle returned by the upload facility; only valid for a later send.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: i64,
    pub parts: u32,
    pub name: String,
}

/// A re-uploaded attachment ready to be sent as a generic document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedDocument {
    pub file: UploadedFile,
    pub mime_type: String,
    pub file_name: String,
}

/// Transfer strategy chosen once per run from the source's forwarding flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    Forward,
    Copy,
}

impl TransferMode {
    pub fn for_source(source: &ChannelRef) -> Self {
        if source.allows_forwarding() {
            TransferMode::Forward
        } else {
            TransferMode::Copy
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMode::Forward => f.write_str("forward"),
            TransferMode::Copy => f.write_str("copy"),
        }
    }
}
