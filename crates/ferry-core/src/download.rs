//! Document ingestion: classify, stream to disk, report progress.
//!
//! Every transfer streams into its own temporary file next to the
//! destination and is moved into place without replacing an existing file.
//! The first copy of a release to land is kept; later uploads of the same
//! release are told where it already lives.

use std::{
    io,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::{
    classify::{classify, RelativePath},
    domain::MessageRef,
    errors::Error,
    formatting::{escape_html, format_elapsed, format_size},
    messaging::{port::MessagingPort, types::ChatAction},
    security::resolve_within,
    Result,
};

/// Name used when the messenger does not report one.
pub const UNKNOWN_FILE: &str = "unknown_file";
pub const DOWNLOAD_FAILED: &str = "Sorry, there was an error downloading the file.";

/// Sequential chunks of a remote file.
#[async_trait]
pub trait ByteStream: Send {
    /// `Ok(None)` at end of file.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Opens remote files by messenger file id.
#[async_trait]
pub trait FileSource: Send + Sync {
    async fn open(&self, file_id: &str) -> Result<Box<dyn ByteStream>>;
}

#[derive(Clone, Debug)]
pub struct DownloadRequest {
    /// The message carrying the document; replies thread onto it.
    pub message: MessageRef,
    pub file_id: String,
    pub file_name: Option<String>,
    /// Size reported by the messenger, 0 when unknown.
    pub file_size: u64,
    pub mime_type: Option<String>,
}

#[derive(Clone, Debug)]
pub struct DownloadOutcome {
    pub relative: RelativePath,
    pub path: PathBuf,
    pub bytes: u64,
    pub elapsed: Duration,
    /// The destination already held a file, which was left untouched.
    pub already_present: bool,
}

/// How a finished transfer was committed.
enum Stored {
    Saved(u64),
    /// Another transfer created the destination first.
    Existing(u64),
}

#[derive(Clone, Debug)]
pub struct Downloader {
    root: PathBuf,
    max_file_size: u64,
}

impl Downloader {
    pub fn new(root: impl Into<PathBuf>, max_file_size: u64) -> Self {
        Self {
            root: root.into(),
            max_file_size,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Classify `file_name` and resolve it under the download root.
    pub fn plan(&self, file_name: &str) -> Result<(RelativePath, PathBuf)> {
        let relative = classify(file_name);
        let dest = resolve_within(&self.root, &relative.to_path_buf())?;
        Ok((relative, dest))
    }

    /// Download `req` and keep the user informed. Failures are reported in
    /// the chat before being returned.
    pub async fn run(
        &self,
        req: &DownloadRequest,
        source: &dyn FileSource,
        messenger: &dyn MessagingPort,
    ) -> Result<DownloadOutcome> {
        let name = req
            .file_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_FILE.to_string());
        let shown = escape_html(&name);

        if req.file_size > self.max_file_size {
            messenger
                .reply_html(
                    req.message,
                    &format!(
                        "<b>{shown}</b> is too large ({}). The limit is {}.",
                        format_size(req.file_size),
                        format_size(self.max_file_size)
                    ),
                )
                .await?;
            return Err(Error::InvalidInput(format!(
                "{name} exceeds the size limit"
            )));
        }

        let (relative, dest) = match self.plan(&name) {
            Ok(planned) => planned,
            Err(e) => {
                error!(file = %name, error = %e, "refusing download target");
                messenger.reply_html(req.message, DOWNLOAD_FAILED).await?;
                return Err(e);
            }
        };

        if fs::try_exists(&dest).await? {
            info!(file = %name, target = %relative, "destination already present");
            messenger
                .reply_html(req.message, &already_saved(&shown, &relative))
                .await?;
            let bytes = fs::metadata(&dest).await?.len();
            return Ok(DownloadOutcome {
                relative,
                path: dest,
                bytes,
                elapsed: Duration::ZERO,
                already_present: true,
            });
        }

        let status = messenger
            .reply_html(
                req.message,
                &format!(
                    "Starting download of <b>{shown}</b> ({}). Please wait.",
                    format_size(req.file_size)
                ),
            )
            .await?;
        let caps = messenger.capabilities();
        if caps.supports_chat_actions {
            let _ = messenger
                .send_chat_action(req.message.chat_id, ChatAction::UploadDocument)
                .await;
        }

        info!(file = %name, target = %relative, size = req.file_size, "download started");
        let started = Instant::now();

        let stored = match self
            .fetch(req, &shown, &dest, status, source, messenger)
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                error!(file = %name, error = %e, "download failed");
                messenger.reply_html(req.message, DOWNLOAD_FAILED).await?;
                return Err(e);
            }
        };
        let elapsed = started.elapsed();

        let bytes = match stored {
            Stored::Saved(bytes) => bytes,
            Stored::Existing(bytes) => {
                info!(file = %name, target = %relative, "lost the race for an existing destination");
                messenger
                    .reply_html(req.message, &already_saved(&shown, &relative))
                    .await?;
                return Ok(DownloadOutcome {
                    relative,
                    path: dest,
                    bytes,
                    elapsed,
                    already_present: true,
                });
            }
        };

        warn_unless_video(&dest, req.mime_type.as_deref());
        info!(
            file = %name,
            path = %dest.display(),
            bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            "download finished"
        );

        messenger
            .reply_html(
                req.message,
                &format!(
                    "Download of <b>{shown}</b> completed in {}.\nSaved as <code>{}</code>.",
                    format_elapsed(elapsed),
                    escape_html(&relative.to_string())
                ),
            )
            .await?;

        Ok(DownloadOutcome {
            relative,
            path: dest,
            bytes,
            elapsed,
            already_present: false,
        })
    }

    async fn fetch(
        &self,
        req: &DownloadRequest,
        shown: &str,
        dest: &Path,
        status: MessageRef,
        source: &dyn FileSource,
        messenger: &dyn MessagingPort,
    ) -> Result<Stored> {
        let parent = dest.parent().ok_or_else(|| Error::InvalidPath {
            path: dest.to_path_buf(),
            reason: "destination has no parent directory".to_string(),
        })?;
        fs::create_dir_all(parent).await?;

        let mut stream = source.open(&req.file_id).await?;
        // Removed on drop, so every early return below cleans up after itself.
        let (file, part) = tempfile::Builder::new()
            .prefix(".ferry-")
            .suffix(PART_SUFFIX)
            .tempfile_in(parent)?
            .into_parts();
        let mut file = fs::File::from_std(file);

        let mut received: u64 = 0;
        let report_progress = req.file_size > 0 && messenger.capabilities().supports_edit;
        let mut reported_step: u64 = 0;
        while let Some(chunk) = stream.next_chunk().await? {
            received += chunk.len() as u64;
            if received > self.max_file_size {
                return Err(Error::InvalidInput(format!(
                    "stream exceeded the {} byte limit",
                    self.max_file_size
                )));
            }
            file.write_all(&chunk).await?;

            if !report_progress {
                continue;
            }
            // Tenths of the reported size; the final 100% is the completion reply.
            let step = received.min(req.file_size) * 10 / req.file_size;
            if step > reported_step && step < 10 {
                reported_step = step;
                let text = format!(
                    "Downloading <b>{shown}</b>: {}% ({} of {})",
                    step * 10,
                    format_size(received),
                    format_size(req.file_size)
                );
                if let Err(e) = messenger.edit_html(status, &text).await {
                    debug!(error = %e, "progress edit failed");
                }
            }
        }

        file.flush().await?;
        drop(file);
        match part.persist_noclobber(dest) {
            Ok(()) => {
                set_readable(dest).await?;
                Ok(Stored::Saved(received))
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                Ok(Stored::Existing(received))
            }
            Err(e) => Err(Error::Io(e.error)),
        }
    }
}

const PART_SUFFIX: &str = ".part";

fn already_saved(shown: &str, relative: &RelativePath) -> String {
    format!(
        "<b>{shown}</b> is already saved as <code>{}</code>. Kept the existing copy.",
        escape_html(&relative.to_string())
    )
}

#[cfg(unix)]
async fn set_readable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_readable(_path: &Path) -> Result<()> {
    Ok(())
}

fn warn_unless_video(path: &Path, reported: Option<&str>) {
    let guessed = mime_guess::from_path(path).first();
    let is_video = guessed
        .as_ref()
        .map(|m| m.type_() == mime_guess::mime::VIDEO)
        .unwrap_or(false);
    if !is_video {
        warn!(
            path = %path.display(),
            guessed = guessed.as_ref().map(|m| m.essence_str()).unwrap_or("unknown"),
            reported = reported.unwrap_or("unknown"),
            "downloaded file does not look like a video"
        );
    }
}
