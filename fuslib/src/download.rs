use std::{
    error,
    io,
    path::Path,
    sync::{Arc, Mutex},
};

use bytes::Bytes;
use futures_core::Stream;
use log::{debug, trace};
use thiserror::Error;
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};
use tokio_stream::StreamExt;

use crate::fus::{BinaryInfo, FusClient, FusError};

/// Maximum number of bytes written before the progress counter is updated
pub const CHUNK_SIZE: usize = 32 * 1024;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Existing file is larger than the firmware ({on_disk} > {total} bytes)")]
    Corrupt {
        on_disk: u64,
        total: u64,
    },
    #[error("Download ended early ({on_disk} of {total} bytes)")]
    Incomplete {
        on_disk: u64,
        total: u64,
    },
    #[error("Error while receiving data: {0}")]
    Stream(Box<dyn error::Error + Send + Sync>),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("FUS error: {0}")]
    Fus(#[from] FusError),
}

/// Byte counter shared between the transfer loop (the only writer) and a
/// progress display (a reader).
#[derive(Clone, Debug, Default)]
pub struct ByteCounter(Arc<Mutex<u64>>);

impl ByteCounter {
    pub fn new(initial: u64) -> Self {
        Self(Arc::new(Mutex::new(initial)))
    }

    pub fn get(&self) -> u64 {
        // A poisoned counter still holds a usable value
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, value: u64) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = value;
    }

    pub fn add(&self, delta: u64) {
        let mut guard = self.0.lock().unwrap_or_else(|e| e.into_inner());
        *guard = guard.saturating_add(delta);
    }
}

/// What to do about a firmware file given what is already on disk.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferPlan {
    /// Nothing on disk. Create or truncate the file.
    Fresh,
    /// Partial file on disk. Append starting at the offset.
    Resume(u64),
    /// The file is complete. Only decryption remains.
    Complete,
}

impl TransferPlan {
    /// Decide based on the authoritative total size and the current on-disk
    /// size. A file larger than the total cannot be trusted.
    pub fn new(total: u64, on_disk: u64) -> Result<Self, DownloadError> {
        if on_disk > total {
            Err(DownloadError::Corrupt { on_disk, total })
        } else if on_disk == total {
            Ok(Self::Complete)
        } else if on_disk == 0 {
            Ok(Self::Fresh)
        } else {
            Ok(Self::Resume(on_disk))
        }
    }

    /// Inspect the file at `path`. A missing file counts as zero bytes.
    pub async fn for_path(path: &Path, total: u64) -> Result<Self, DownloadError> {
        let on_disk = match fs::metadata(path).await {
            Ok(m) => m.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        Self::new(total, on_disk)
    }

    /// Byte offset at which the download should start.
    pub fn start_offset(&self) -> u64 {
        match self {
            Self::Resume(offset) => *offset,
            _ => 0,
        }
    }

    /// Open the output file in the mode this plan calls for.
    pub async fn open(&self, path: &Path) -> Result<File, DownloadError> {
        let mut options = OpenOptions::new();

        match self {
            Self::Resume(_) => options.append(true),
            _ => options.write(true).create(true).truncate(true),
        };

        Ok(options.open(path).await?)
    }
}

/// Write every chunk of `stream` to `file`, adding the number of bytes written
/// to `counter` after each write. Returns the number of bytes written. On
/// error, whatever was written stays in the file.
pub async fn write_stream<S, E>(
    mut stream: S,
    file: &mut File,
    counter: &ByteCounter,
) -> Result<u64, DownloadError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: error::Error + Send + Sync + 'static,
{
    let mut written = 0u64;

    while let Some(data) = stream.next().await {
        let data = match data {
            Ok(d) => d,
            Err(e) => {
                file.flush().await?;
                return Err(DownloadError::Stream(Box::new(e)));
            }
        };
        trace!("Received {} bytes", data.len());

        for chunk in data.chunks(CHUNK_SIZE) {
            file.write_all(chunk).await?;
            written += chunk.len() as u64;
            counter.add(chunk.len() as u64);
        }
    }

    file.flush().await?;

    Ok(written)
}

/// Result of [`download_firmware`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transfer {
    pub plan: TransferPlan,
    /// Decoded `Content-MD5` of the response, if one was sent. For a resumed
    /// transfer this may describe only the requested range.
    pub content_md5: Option<Vec<u8>>,
}

/// Download the firmware described by `info` to `path`, resuming from any
/// partial file already there. If the file is already complete, no request is
/// made. The counter is set to the on-disk size before any data is received.
pub async fn download_firmware(
    client: &mut FusClient,
    info: &BinaryInfo,
    path: &Path,
    counter: &ByteCounter,
) -> Result<Transfer, DownloadError> {
    let plan = TransferPlan::for_path(path, info.size).await?;
    debug!("Transfer plan for {path:?}: {plan:?}");

    if plan == TransferPlan::Complete {
        counter.set(info.size);
        return Ok(Transfer { plan, content_md5: None });
    }

    counter.set(plan.start_offset());

    client.binary_init(&info.filename).await?;

    let download = client.download_range(&info.remote_path(), plan.start_offset()).await?;
    debug!("Response length: {:?}", download.content_length());
    let content_md5 = download.content_md5();
    let mut file = plan.open(path).await?;
    let stream = Box::pin(download.into_stream());

    write_stream(stream, &mut file, counter).await?;

    let on_disk = file.metadata().await?.len();
    if on_disk != info.size {
        return Err(DownloadError::Incomplete { on_disk, total: info.size });
    }

    Ok(Transfer { plan, content_md5 })
}
