//! On-disk archive of mixes.
//!
//! # Layout
//!
//! ```text
//! archive_root/
//! ├── 5170/
//! │   ├── Lovefingers - Axe to Grind.mp3
//! │   ├── Lovefingers - Axe to Grind.jpg   (optional)
//! │   └── tracklist.txt                    (optional)
//! └── .staging/                            (private to the store)
//! ```
//!
//! An entry directory only ever appears at its final path through a single
//! `rename` of a fully written staging directory, so a reader never sees a
//! half-written mix. Presence of a complete directory is the only record of
//! what has been archived.

use crate::error::StoreError;
use crate::fetcher::ByteSink;
use crate::models::MixRecord;
use crate::utils::{ensure_writable_dir, sanitize_title};
use rand::{Rng, rng};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

pub const STAGING_DIR: &str = ".staging";
pub const TRACKLIST_FILE: &str = "tracklist.txt";
pub const AUDIO_EXTENSION: &str = "mp3";
pub const IMAGE_EXTENSION: &str = "jpg";

/// Which asset file of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Audio,
    Image,
}

impl AssetKind {
    fn extension(self) -> &'static str {
        match self {
            AssetKind::Audio => AUDIO_EXTENSION,
            AssetKind::Image => IMAGE_EXTENSION,
        }
    }
}

/// The archive root and the only writer to it.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    root: PathBuf,
    staging: PathBuf,
}

impl ArchiveStore {
    /// Open (creating if needed) the archive at `root`.
    ///
    /// Staging directories left behind by an interrupted run are removed.
    ///
    /// # Arguments
    ///
    /// * `root` - Archive directory; created with its parents when missing
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] when the root cannot be created or written to, or
    /// when the staging area cannot be reset.
    #[instrument(level = "info", skip_all, fields(root = %root.as_ref().display()))]
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        ensure_writable_dir(&root)
            .await
            .map_err(|e| StoreError::io(&root, e))?;

        let staging = root.join(STAGING_DIR);
        match fs::remove_dir_all(&staging).await {
            Ok(()) => info!("Removed leftover staging data"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(&staging, e)),
        }
        fs::create_dir_all(&staging)
            .await
            .map_err(|e| StoreError::io(&staging, e))?;

        Ok(Self { root, staging })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final directory of the entry for `id`.
    pub fn entry_path(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// True iff a complete entry for `id` is present: exactly one `.mp3`
    /// file and no empty files. Touches only the filesystem.
    pub async fn has_complete(&self, id: &str) -> bool {
        if check_id(id).is_err() {
            return false;
        }
        let dir = self.entry_path(id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return false,
        };

        let mut audio_files = 0usize;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "Unreadable archive entry");
                    return false;
                }
            };
            let Ok(metadata) = entry.metadata().await else {
                return false;
            };
            if !metadata.is_file() {
                continue;
            }
            if metadata.len() == 0 {
                debug!(path = %entry.path().display(), "Empty file in archive entry");
                return false;
            }
            if has_extension(&entry.path(), AUDIO_EXTENSION) {
                audio_files += 1;
            }
        }
        audio_files == 1
    }

    /// Ids of all complete entries, sorted.
    pub async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::io(&self.root, e))?;
        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.root, e))?
        {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if self.has_complete(&name).await {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Start a private staging directory for `record`.
    ///
    /// Dropping the returned [`StagedEntry`] without committing it deletes
    /// everything written into it.
    pub async fn stage(&self, record: &MixRecord) -> Result<StagedEntry, StoreError> {
        check_id(&record.id).map_err(|e| StoreError::io(self.entry_path(&record.id), e))?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}.", record.id))
            .tempdir_in(&self.staging)
            .map_err(|e| StoreError::io(&self.staging, e))?;

        debug!(id = %record.id, path = %dir.path().display(), "Staging entry");
        Ok(StagedEntry {
            id: record.id.clone(),
            stem: sanitize_title(&record.title, &record.id),
            dir,
        })
    }

    /// Make a staged entry visible at its final path in one rename.
    ///
    /// A previous entry for the same id is moved aside first and deleted
    /// once the new one is in place. On failure the previous entry is put
    /// back and the staged data is discarded.
    ///
    /// # Returns
    ///
    /// The final entry directory, `<root>/<id>`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] when either rename fails.
    #[instrument(level = "info", skip_all, fields(id = %staged.id))]
    pub async fn commit_staged(&self, staged: StagedEntry) -> Result<PathBuf, StoreError> {
        let final_dir = self.entry_path(&staged.id);

        let displaced = match fs::symlink_metadata(&final_dir).await {
            Ok(_) => {
                let suffix: u32 = rng().random();
                let aside = self
                    .staging
                    .join(format!("{}.replaced.{suffix:08x}", staged.id));
                fs::rename(&final_dir, &aside)
                    .await
                    .map_err(|e| StoreError::io(&final_dir, e))?;
                Some(aside)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(StoreError::io(&final_dir, e)),
        };

        if let Err(e) = fs::rename(staged.dir.path(), &final_dir).await {
            if let Some(aside) = &displaced
                && let Err(restore) = fs::rename(aside, &final_dir).await
            {
                warn!(error = %restore, "Failed to restore previous entry");
            }
            return Err(StoreError::io(&final_dir, e));
        }
        // Renamed away; nothing left for the guard to clean up.
        let _ = staged.dir.keep();

        if let Some(aside) = displaced {
            info!("Replaced previous entry");
            if let Err(e) = remove_any(&aside).await {
                warn!(path = %aside.display(), error = %e, "Failed to delete replaced entry");
            }
        }

        info!(path = %final_dir.display(), "Committed archive entry");
        Ok(final_dir)
    }

    /// Write all assets of `record` from memory and commit them.
    ///
    /// # Arguments
    ///
    /// * `record` - Supplies the entry id and the title used for file names
    /// * `audio` - Body of the `.mp3` file
    /// * `image` - Optional body of the `.jpg` cover
    /// * `tracklist` - Optional text for `tracklist.txt`
    ///
    /// # Returns
    ///
    /// The final entry directory, `<root>/<id>`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] for an unsafe id or any write or rename failure.
    /// Nothing becomes visible under the root in that case.
    pub async fn commit(
        &self,
        record: &MixRecord,
        audio: &[u8],
        image: Option<&[u8]>,
        tracklist: Option<&str>,
    ) -> Result<PathBuf, StoreError> {
        let staged = self.stage(record).await?;

        let mut file = staged.create(AssetKind::Audio).await?;
        file.write_all(audio).await?;
        file.finish().await?;

        if let Some(image) = image {
            let mut file = staged.create(AssetKind::Image).await?;
            file.write_all(image).await?;
            file.finish().await?;
        }
        if let Some(text) = tracklist {
            staged.write_tracklist(text).await?;
        }

        self.commit_staged(staged).await
    }
}

/// An entry being written. Invisible until [`ArchiveStore::commit_staged`].
#[derive(Debug)]
pub struct StagedEntry {
    id: String,
    stem: String,
    dir: TempDir,
}

impl StagedEntry {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// `<sanitized title>.<ext>` for the given asset.
    pub fn file_name(&self, kind: AssetKind) -> String {
        format!("{}.{}", self.stem, kind.extension())
    }

    /// Create (or truncate) the staged file for `kind`.
    pub async fn create(&self, kind: AssetKind) -> Result<StagedFile, StoreError> {
        let path = self.dir.path().join(self.file_name(kind));
        let file = fs::File::create(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        Ok(StagedFile {
            path,
            file,
            written: 0,
        })
    }

    /// Remove the staged file for `kind`, if any.
    pub async fn discard(&self, kind: AssetKind) -> Result<(), StoreError> {
        let path = self.dir.path().join(self.file_name(kind));
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    pub async fn write_tracklist(&self, text: &str) -> Result<(), StoreError> {
        let path = self.dir.path().join(TRACKLIST_FILE);
        let mut body = text.trim_end().to_string();
        body.push('\n');
        fs::write(&path, body)
            .await
            .map_err(|e| StoreError::io(&path, e))
    }
}

/// A file inside a staged entry; also a [`ByteSink`] for downloads.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    file: fs::File,
    written: u64,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        self.write_chunk(bytes)
            .await
            .map_err(|e| StoreError::io(&self.path, e))
    }

    /// Flush and sync to disk, returning the file size.
    pub async fn finish(mut self) -> Result<u64, StoreError> {
        self.file
            .flush()
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;
        self.file
            .sync_all()
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;
        Ok(self.written)
    }
}

impl ByteSink for StagedFile {
    async fn restart(&mut self) -> io::Result<()> {
        if self.written == 0 {
            return Ok(());
        }
        self.file.flush().await?;
        self.file.set_len(0).await?;
        self.file.seek(SeekFrom::Start(0)).await?;
        self.written = 0;
        Ok(())
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }
}

/// Ids name directories directly under the root, so they must be a single
/// plain path component.
fn check_id(id: &str) -> io::Result<()> {
    let ok = !id.is_empty()
        && !id.starts_with('.')
        && !id.contains(['/', '\\', '\0'])
        && !id.chars().any(char::is_control);
    if ok {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsafe mix id `{id}`"),
        ))
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

async fn remove_any(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path).await?.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    }
}
