use std::fs::{self, File};
use std::io::{self, Cursor, Seek, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::error::AppError;

#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("failed to clear staging area: {0}")]
    Reset(#[source] io::Error),

    #[error("failed to stage '{name}': {source}")]
    Stage {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to read staging area: {0}")]
    Walk(#[source] io::Error),

    #[error("failed to write archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("failed to access archive: {0}")]
    Io(#[from] io::Error),
}

impl From<PackagingError> for AppError {
    fn from(err: PackagingError) -> Self {
        AppError::Packaging(err.to_string())
    }
}

/// Describes a finalized archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveHandle {
    pub entries: Vec<String>,
    pub size_bytes: u64,
}

/// Staging area plus the archive built from it. Holds the state of the most
/// recent run only: `reset` discards everything from earlier runs.
pub trait ArtifactStore: Send {
    /// Clears staged files and any previous archive. Safe to call when empty.
    fn reset(&mut self) -> Result<(), PackagingError>;

    /// Stores one artifact under `name`, verbatim. Failure is per item.
    fn stage(&mut self, name: &str, content: &str) -> Result<(), PackagingError>;

    /// Bundles every staged file at the archive root. `None` when nothing was staged.
    fn finalize(&mut self) -> Result<Option<ArchiveHandle>, PackagingError>;

    /// Bytes of the most recently finalized archive.
    fn archive_bytes(&self) -> Result<Option<Vec<u8>>, PackagingError>;
}

fn write_zip<'a, W, I>(writer: W, entries: I) -> Result<W, PackagingError>
where
    W: Write + Seek,
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut zip = ZipWriter::new(writer);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (name, content) in entries {
        zip.start_file(name, options)?;
        zip.write_all(content)?;
    }

    Ok(zip.finish()?)
}

/// Filesystem-backed store: one staging directory, one archive file.
pub struct FsArtifactStore {
    staging_dir: PathBuf,
    archive_path: PathBuf,
}

impl FsArtifactStore {
    pub fn new(staging_dir: impl Into<PathBuf>, archive_path: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            archive_path: archive_path.into(),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    fn staged_files(&self) -> Result<Vec<(String, PathBuf)>, PackagingError> {
        let entries = match fs::read_dir(&self.staging_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PackagingError::Walk(e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(PackagingError::Walk)?;
            if !entry.file_type().map_err(PackagingError::Walk)?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            files.push((name, entry.path()));
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }

    fn partial_path(&self) -> PathBuf {
        self.archive_path.with_extension("zip.partial")
    }

    /// Writes next to the target and renames, so readers never see a torn archive.
    fn write_archive(&self, contents: &[(&str, Vec<u8>)]) -> Result<(), PackagingError> {
        let partial = self.partial_path();
        let file = File::create(&partial)?;
        let file = write_zip(
            file,
            contents.iter().map(|(name, bytes)| (*name, bytes.as_slice())),
        )?;
        file.sync_all()?;
        drop(file);
        fs::rename(&partial, &self.archive_path)?;
        Ok(())
    }
}

fn remove_if_exists(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl ArtifactStore for FsArtifactStore {
    fn reset(&mut self) -> Result<(), PackagingError> {
        remove_if_exists(fs::remove_dir_all(&self.staging_dir)).map_err(PackagingError::Reset)?;
        remove_if_exists(fs::remove_file(&self.archive_path)).map_err(PackagingError::Reset)?;
        remove_if_exists(fs::remove_file(self.partial_path())).map_err(PackagingError::Reset)?;
        fs::create_dir_all(&self.staging_dir).map_err(PackagingError::Reset)?;

        tracing::debug!(staging_dir = %self.staging_dir.display(), "staging area reset");
        Ok(())
    }

    fn stage(&mut self, name: &str, content: &str) -> Result<(), PackagingError> {
        fs::write(self.staging_dir.join(name), content).map_err(|source| PackagingError::Stage {
            name: name.to_string(),
            source,
        })
    }

    #[tracing::instrument(
        name = "pipeline_stage package",
        skip(self),
        fields(
            pipeline.stage = "package",
            archive.entries = tracing::field::Empty,
            archive.size_bytes = tracing::field::Empty,
        )
    )]
    fn finalize(&mut self) -> Result<Option<ArchiveHandle>, PackagingError> {
        let files = self.staged_files()?;
        if files.is_empty() {
            return Ok(None);
        }

        let mut contents = Vec::with_capacity(files.len());
        for (name, path) in &files {
            contents.push((name.as_str(), fs::read(path).map_err(PackagingError::Walk)?));
        }

        if let Some(parent) = self.archive_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        if let Err(e) = self.write_archive(&contents) {
            if let Err(cleanup) = remove_if_exists(fs::remove_file(self.partial_path())) {
                tracing::warn!(error = %cleanup, "could not remove partial archive");
            }
            return Err(e);
        }

        let handle = ArchiveHandle {
            entries: files.into_iter().map(|(name, _)| name).collect(),
            size_bytes: fs::metadata(&self.archive_path)?.len(),
        };

        let span = tracing::Span::current();
        span.record("archive.entries", handle.entries.len() as u64);
        span.record("archive.size_bytes", handle.size_bytes);

        Ok(Some(handle))
    }

    fn archive_bytes(&self) -> Result<Option<Vec<u8>>, PackagingError> {
        match fs::read(&self.archive_path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PackagingError::Io(e)),
        }
    }
}

/// In-memory store with the same contract, for tests and ephemeral use.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    staged: Vec<(String, String)>,
    archive: Option<Vec<u8>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn staged_names(&self) -> Vec<&str> {
        self.staged.iter().map(|(name, _)| name.as_str()).collect()
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn reset(&mut self) -> Result<(), PackagingError> {
        self.staged.clear();
        self.archive = None;
        Ok(())
    }

    fn stage(&mut self, name: &str, content: &str) -> Result<(), PackagingError> {
        match self.staged.iter_mut().find(|(staged, _)| staged == name) {
            Some(existing) => existing.1 = content.to_string(),
            None => self.staged.push((name.to_string(), content.to_string())),
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<Option<ArchiveHandle>, PackagingError> {
        if self.staged.is_empty() {
            return Ok(None);
        }

        let cursor = write_zip(
            Cursor::new(Vec::new()),
            self.staged
                .iter()
                .map(|(name, content)| (name.as_str(), content.as_bytes())),
        )?;
        let bytes = cursor.into_inner();

        let handle = ArchiveHandle {
            entries: self.staged.iter().map(|(name, _)| name.clone()).collect(),
            size_bytes: bytes.len() as u64,
        };
        self.archive = Some(bytes);
        Ok(Some(handle))
    }

    fn archive_bytes(&self) -> Result<Option<Vec<u8>>, PackagingError> {
        Ok(self.archive.clone())
    }
}
