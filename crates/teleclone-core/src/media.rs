//! Scratch-file store for copy mode: download an attachment, re-upload it, delete it.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    domain::{Attachment, FileLocation, UploadedDocument},
    errors::Error,
    port::TransferClient,
    Result,
};

/// Photos are fetched at this thumbnail size rather than the original upload.
pub const PHOTO_THUMB_SIZE: &str = "y";

/// Re-uploads are always sent as generic documents.
pub const UPLOAD_MIME_TYPE: &str = "application/octet-stream";

const MAX_NAME_ATTEMPTS: usize = 1000;

pub struct MediaStore {
    client: Arc<dyn TransferClient>,
    scratch_dir: PathBuf,
}

impl MediaStore {
    /// Recreate `scratch_dir` empty. Leftovers from a previous run are discarded.
    pub async fn new(client: Arc<dyn TransferClient>, scratch_dir: impl AsRef<Path>) -> Result<Self> {
        let scratch_dir = absolute(scratch_dir.as_ref())?;
        match fs::remove_dir_all(&scratch_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::Config(format!(
                    "cannot clear scratch dir {}: {e}",
                    scratch_dir.display()
                )))
            }
        }
        fs::create_dir_all(&scratch_dir).await.map_err(|e| {
            Error::Config(format!(
                "cannot create scratch dir {}: {e}",
                scratch_dir.display()
            ))
        })?;

        info!(dir = %scratch_dir.display(), "scratch directory ready");
        Ok(Self {
            client,
            scratch_dir,
        })
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Download `attachment` into a fresh scratch file and return its path.
    ///
    /// A failed or cancelled download leaves nothing behind.
    pub async fn download(
        &self,
        attachment: &Attachment,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let (location, object_id, name) = remote_location(attachment);

        let (path, mut file) = create_scratch_file(&self.scratch_dir, &name, object_id)
            .await
            .map_err(|e| Error::Download(format!("cannot create scratch file for {name}: {e}")))?;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Download("cancelled".to_string())),
            r = self.client.download_file(&location, &mut file) => {
                r.map_err(|e| Error::Download(e.to_string()))
            }
        };
        let outcome = match outcome {
            Ok(bytes) => file
                .flush()
                .await
                .map(|_| bytes)
                .map_err(|e| Error::Download(format!("flush {}: {e}", path.display()))),
            Err(e) => Err(e),
        };
        drop(file);

        match outcome {
            Ok(bytes) => {
                debug!(path = %path.display(), bytes, "media downloaded");
                Ok(path)
            }
            Err(e) => {
                if let Err(rm) = fs::remove_file(&path).await {
                    warn!(path = %path.display(), "failed to remove partial download: {rm}");
                }
                Err(e)
            }
        }
    }

    /// Upload a scratch file as a new generic document named after the file.
    pub async fn upload(&self, path: &Path) -> Result<UploadedDocument> {
        let upload_err = |reason: String| Error::Upload {
            path: path.to_path_buf(),
            reason,
        };

        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .ok_or_else(|| upload_err("path has no file name".to_string()))?;

        let mut file = File::open(path)
            .await
            .map_err(|e| upload_err(format!("open: {e}")))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| upload_err(format!("metadata: {e}")))?
            .len();

        let uploaded = self
            .client
            .upload_file(&file_name, &mut file, size)
            .await
            .map_err(|e| upload_err(e.to_string()))?;

        debug!(file = %file_name, size, parts = uploaded.parts, "media uploaded");
        Ok(UploadedDocument {
            file: uploaded,
            mime_type: UPLOAD_MIME_TYPE.to_string(),
            file_name,
        })
    }

    pub async fn cleanup(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).await.map_err(|source| Error::Cleanup {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Resolve the download location, the object id and the scratch filename.
fn remote_location(attachment: &Attachment) -> (FileLocation, i64, String) {
    match attachment {
        Attachment::Photo(photo) => (
            FileLocation::Photo {
                id: photo.id,
                access_hash: photo.access_hash,
                file_reference: photo.file_reference.clone(),
                thumb_size: PHOTO_THUMB_SIZE.to_string(),
            },
            photo.id,
            format!("{}.jpg", photo.id),
        ),
        Attachment::Document(doc) => {
            let name = doc
                .file_name
                .as_deref()
                .filter(|n| !n.trim().is_empty())
                .map(sanitize_filename)
                .unwrap_or_else(|| format!("doc_{}", doc.id));
            (
                FileLocation::Document {
                    id: doc.id,
                    access_hash: doc.access_hash,
                    file_reference: doc.file_reference.clone(),
                },
                doc.id,
                name,
            )
        }
    }
}

/// Keep remote filenames inside the scratch dir: no separators, no dot-only names.
fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_alphanumeric() || matches!(ch, '.' | '_' | '-' | ' ') {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    let out = out.trim().to_string();
    if out.is_empty() || out.chars().all(|c| c == '.') {
        "document".to_string()
    } else {
        out
    }
}

fn uniquify_filename(name: &str, object_id: i64, n: usize) -> String {
    let suffix = if n == 0 {
        format!("{object_id}")
    } else {
        format!("{object_id}_{n}")
    };
    if let Some((stem, ext)) = name.rsplit_once('.') {
        if !stem.is_empty() && !ext.is_empty() {
            return format!("{stem}_{suffix}.{ext}");
        }
    }
    format!("{name}_{suffix}")
}

/// Create a brand-new file; never truncate one that already exists.
async fn create_scratch_file(dir: &Path, name: &str, object_id: i64) -> io::Result<(PathBuf, File)> {
    let mut candidate = name.to_string();
    for attempt in 0..=MAX_NAME_ATTEMPTS {
        let path = dir.join(&candidate);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                candidate = uniquify_filename(name, object_id, attempt);
            }
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free scratch name for {name}"),
    ))
}

fn absolute(p: &Path) -> Result<PathBuf> {
    if p.is_absolute() {
        return Ok(p.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(p))
}
