//! Downloaded archive to unpacked temporary tree.
//!
//! The archive file and the unpack directory live inside a [`TempExtraction`]
//! guard. Both are removed when the guard is dropped, whichever way the caller
//! leaves the scope that owns it.

use futures::{Stream, StreamExt};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::{NamedTempFile, TempDir};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use crate::config::ToolCommand;
use crate::harvest::pipeline::HarvestError;

/// A materialized archive and the directory it was unpacked into.
///
/// Not `Clone`: exactly one owner decides when cleanup happens.
#[derive(Debug)]
pub struct TempExtraction {
    archive: PathBuf,
    dir: PathBuf,

    /// Bytes written to the archive file
    pub size_bytes: u64,
}

impl TempExtraction {
    /// Takes ownership of both temp resources; from here on `Drop` removes them.
    fn adopt(archive: NamedTempFile, dir: TempDir, size_bytes: u64) -> io::Result<Self> {
        let archive = archive.into_temp_path().keep().map_err(io::Error::from)?;
        Ok(Self {
            archive,
            dir: dir.keep(),
            size_bytes,
        })
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive
    }

    /// Root of the unpacked tree.
    pub fn path(&self) -> &Path {
        &self.dir
    }
}

impl Drop for TempExtraction {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            warn!(path = %self.dir.display(), error = %e, "Failed to remove temp dir");
        }
        if let Err(e) = std::fs::remove_file(&self.archive) {
            warn!(path = %self.archive.display(), error = %e, "Failed to remove temp archive");
        }
    }
}

/// Materializes archive streams and runs `<tool> -x <archive> <dir>` on them.
#[derive(Debug, Clone)]
pub struct ArchiveUnpacker {
    tool: ToolCommand,
}

impl ArchiveUnpacker {
    pub fn new(tool: ToolCommand) -> Self {
        Self { tool }
    }

    /// Writes `body` to a temp file and unpacks it into a temp directory.
    ///
    /// A non-zero exit from the tool is logged, not returned: a failed
    /// extraction leaves an empty or partial tree, which downstream sees as
    /// "no matching files".
    ///
    /// # Errors
    ///
    /// Returns `Err` if the body stream fails, the temp resources cannot be
    /// created or written, or the tool cannot be spawned. Anything created so
    /// far is removed before returning.
    #[instrument(skip(self, body), fields(tool = %self.tool.program))]
    pub async fn unpack<S, E>(&self, mut body: S) -> Result<TempExtraction, HarvestError>
    where
        S: Stream<Item = Result<bytes::Bytes, E>> + Unpin,
        HarvestError: From<E>,
    {
        let archive = NamedTempFile::new()?;
        let mut size_bytes = 0u64;
        let mut file = tokio::fs::File::from_std(archive.reopen()?);
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            size_bytes += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        let extraction = TempExtraction::adopt(archive, TempDir::new()?, size_bytes)?;

        let status = self
            .tool
            .command()
            .arg("-x")
            .arg(extraction.archive_path())
            .arg(extraction.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;

        if status.success() {
            debug!(size_bytes, "Archive unpacked");
        } else {
            warn!(%status, size_bytes, "Extraction tool failed");
        }
        Ok(extraction)
    }
}
