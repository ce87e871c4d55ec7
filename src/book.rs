//! One book's state as it moves through the pipeline.

use crate::asin::Asin;
use crate::catalog::{CatalogEntry, HostMetadata};
use crate::error::StageError;
use crate::mobi::{IdentifierPatcher, MobiBook};
use crate::remote::{self, Connections};
use crate::xray::{IndexBuilder, artifact_identifier, find_index_artifact};
use std::path::{Path, PathBuf};

/// Extension of the per-book index directory next to a container.
const INDEX_DIR_EXTENSION: &str = "sdr";

/// Pipeline stages in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ResolveIdentifier,
    ResolveRemoteUrl,
    ParseRemoteData,
    ParseBookData,
    WriteIndex,
    SendToDevice,
}

impl Stage {
    /// Stages that produce a local index.
    pub const BUILD: [Stage; 5] = [
        Stage::ResolveIdentifier,
        Stage::ResolveRemoteUrl,
        Stage::ParseRemoteData,
        Stage::ParseBookData,
        Stage::WriteIndex,
    ];

    /// Position of the stage within one unit's run.
    pub fn offset(self) -> usize {
        self as usize
    }

    /// Status line shown when the stage starts.
    pub fn status(self, name: &str) -> String {
        match self {
            Stage::ResolveIdentifier => format!("Updating {} ASIN", name),
            Stage::ResolveRemoteUrl => format!("Getting {} book page URL", name),
            Stage::ParseRemoteData => format!("Parsing {} book page data", name),
            Stage::ParseBookData => format!("Parsing {} book data", name),
            Stage::WriteIndex => format!("Creating {} X-Ray", name),
            Stage::SendToDevice => format!("Sending {} X-Ray to device", name),
        }
    }
}

/// Where a book and its index live on an attached device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePaths {
    pub book: PathBuf,
    pub index_dir: PathBuf,
}

/// What a device send did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The book or its index directory is not on the device.
    NotOnDevice,
    /// The device already has an index for the book.
    AlreadyPresent,
    /// No local index and creating one was disabled.
    CreationDisabled,
    /// Building the index left no artifact behind.
    NoLocalIndex,
    /// The artifact was copied to the device.
    Sent { artifact: PathBuf },
}

/// Collaborators shared by every unit in a run.
pub struct BuildContext<'a, B: IndexBuilder> {
    pub builder: &'a B,
    pub host: &'a dyn HostMetadata,
    pub connections: &'a mut Connections,
    pub spoilers: bool,
}

/// A single book and everything derived for it so far.
pub struct BookUnit<B: IndexBuilder> {
    id: u64,
    title: String,
    title_sort: String,
    author: String,
    author_sort: String,
    local_book_path: PathBuf,
    local_index_dir: PathBuf,
    device_book_path: PathBuf,
    device_index_dir: PathBuf,
    asin: Option<Asin>,
    remote_url: Option<String>,
    remote_data: Option<B::RemoteData>,
    book_data: Option<B::BookData>,
}

impl<B: IndexBuilder> BookUnit<B> {
    /// Creates a unit from a catalog entry.
    ///
    /// The device layout is `{documents_dir}/{author_sort}/{title_sort} - {author}.mobi`.
    /// Entries without a path, title or author are rejected with the reason
    /// to report.
    pub fn from_entry(entry: &CatalogEntry, documents_dir: &Path) -> Result<Self, String> {
        let complete = !entry.title.is_empty()
            && !entry.author.is_empty()
            && !entry.title_sort.is_empty()
            && !entry.author_sort.is_empty();

        let local_book_path = match &entry.path {
            Some(path) if complete => path.clone(),
            Some(path) if entry.title.is_empty() || entry.author.is_empty() => {
                let stem = path
                    .file_name()
                    .map(|name| name.to_string_lossy())
                    .and_then(|name| name.split('.').next().map(str::to_string))
                    .unwrap_or_default();
                return Err(format!("{} missing title or author.", stem));
            }
            _ if !entry.title.is_empty() && !entry.author.is_empty() => {
                return Err(format!(
                    "{} - {} missing book path.",
                    entry.title, entry.author
                ));
            }
            _ => {
                return Err(format!(
                    "Unknown book with id {} missing book path, title and/or author.",
                    entry.id
                ));
            }
        };

        let device_book_path = documents_dir
            .join(&entry.author_sort)
            .join(format!("{} - {}.mobi", entry.title_sort, entry.author));

        let asin = entry
            .asin
            .as_deref()
            .and_then(Asin::parse)
            .or_else(|| embedded_asin(&local_book_path));

        Ok(Self {
            id: entry.id,
            title: entry.title.clone(),
            title_sort: entry.title_sort.clone(),
            author: entry.author.clone(),
            author_sort: entry.author_sort.clone(),
            local_index_dir: local_book_path.with_extension(INDEX_DIR_EXTENSION),
            local_book_path,
            device_index_dir: device_book_path.with_extension(INDEX_DIR_EXTENSION),
            device_book_path,
            asin,
            remote_url: None,
            remote_data: None,
            book_data: None,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn title_sort(&self) -> &str {
        &self.title_sort
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn author_sort(&self) -> &str {
        &self.author_sort
    }

    /// `"{title} - {author}"`, as used in status lines and skip reasons.
    pub fn display_name(&self) -> String {
        format!("{} - {}", self.title, self.author)
    }

    pub fn local_book_path(&self) -> &Path {
        &self.local_book_path
    }

    pub fn local_index_dir(&self) -> &Path {
        &self.local_index_dir
    }

    pub fn asin(&self) -> Option<&Asin> {
        self.asin.as_ref()
    }

    pub fn remote_url(&self) -> Option<&str> {
        self.remote_url.as_deref()
    }

    pub fn remote_data(&self) -> Option<&B::RemoteData> {
        self.remote_data.as_ref()
    }

    pub fn book_data(&self) -> Option<&B::BookData> {
        self.book_data.as_ref()
    }

    /// Re-roots the device layout under a discovered volume.
    pub fn device_paths(&self, volume_root: &Path) -> DevicePaths {
        DevicePaths {
            book: volume_root.join(&self.device_book_path),
            index_dir: volume_root.join(&self.device_index_dir),
        }
    }

    /// Fills in the ASIN from the host, then from a store search, and writes
    /// it into the local container.
    pub async fn resolve_identifier(&mut self, ctx: &mut BuildContext<'_, B>) -> Result<(), StageError> {
        if self.asin.is_none() {
            self.asin = ctx.host.identifier(self.id).as_deref().and_then(Asin::parse);
        }

        if self.asin.is_none() {
            self.asin =
                remote::search_identifier(&mut ctx.connections.store, &self.title, &self.author)
                    .await?
                    .found();
        }

        let asin = self.asin.clone().ok_or(StageError::IdentifierNotFound)?;
        self.patch_identifier(&self.local_book_path, asin.as_str())
    }

    /// Looks up the remote book page for the ASIN.
    ///
    /// No result leaves the URL unset rather than failing.
    pub async fn resolve_remote_url(&mut self, ctx: &mut BuildContext<'_, B>) -> Result<(), StageError> {
        let Some(asin) = &self.asin else {
            return Ok(());
        };
        self.remote_url = remote::search_book_url(&mut ctx.connections.metadata, asin)
            .await?
            .found();
        Ok(())
    }

    pub async fn parse_remote_data(&mut self, ctx: &mut BuildContext<'_, B>) -> Result<(), StageError> {
        let url = self
            .remote_url
            .as_deref()
            .ok_or(StageError::MissingPrerequisite("book page URL"))?;
        let data = ctx
            .builder
            .parse_remote_data(&mut *ctx.connections, url, ctx.spoilers)
            .await
            .map_err(|e| StageError::Collaborator(e.context("could not parse book page data")))?;
        self.remote_data = Some(data);
        Ok(())
    }

    pub fn parse_book_data(&mut self, ctx: &BuildContext<'_, B>) -> Result<(), StageError> {
        let remote = self
            .remote_data
            .as_ref()
            .ok_or(StageError::MissingPrerequisite("book page data"))?;
        let data = ctx
            .builder
            .parse_book_data(&self.local_book_path, remote)
            .map_err(|e| StageError::Collaborator(e.context("could not parse book data")))?;
        self.book_data = Some(data);
        Ok(())
    }

    /// Writes the index into the local index directory.
    pub fn write_index(&self, ctx: &BuildContext<'_, B>) -> Result<PathBuf, StageError> {
        let asin = self
            .asin
            .as_ref()
            .ok_or(StageError::MissingPrerequisite("ASIN"))?;
        let url = self
            .remote_url
            .as_deref()
            .ok_or(StageError::MissingPrerequisite("book page URL"))?;
        let book = self
            .book_data
            .as_ref()
            .ok_or(StageError::MissingPrerequisite("book data"))?;

        let path = ctx
            .builder
            .write_index(&self.local_index_dir, asin, url, book)
            .map_err(|e| StageError::Collaborator(e.context("could not write X-Ray file")))?;
        tracing::info!(book = %self.display_name(), path = %path.display(), "Wrote X-Ray");
        Ok(path)
    }

    /// Writes `value` into the ASIN records of the container at `path`.
    pub fn patch_identifier(&self, path: &Path, value: &str) -> Result<(), StageError> {
        IdentifierPatcher::patch_file(path, value)?;
        Ok(())
    }

    /// Runs one build stage.
    ///
    /// [`Stage::SendToDevice`] needs a device root and is driven through
    /// [`send_to_device`](Self::send_to_device) instead.
    pub async fn run_stage(&mut self, stage: Stage, ctx: &mut BuildContext<'_, B>) -> Result<(), StageError> {
        match stage {
            Stage::ResolveIdentifier => self.resolve_identifier(ctx).await,
            Stage::ResolveRemoteUrl => {
                self.resolve_remote_url(ctx).await?;
                if self.remote_url.is_none() {
                    return Err(StageError::RemoteUrlNotFound);
                }
                Ok(())
            }
            Stage::ParseRemoteData => self.parse_remote_data(ctx).await,
            Stage::ParseBookData => self.parse_book_data(ctx),
            Stage::WriteIndex => self.write_index(ctx).map(|_| ()),
            Stage::SendToDevice => Err(StageError::MissingPrerequisite("device root")),
        }
    }

    /// Runs every build stage in order, stopping at the first failure.
    pub async fn build_index(&mut self, ctx: &mut BuildContext<'_, B>) -> Result<(), StageError> {
        for stage in Stage::BUILD {
            self.run_stage(stage, ctx).await?;
        }
        Ok(())
    }

    /// Copies the local index to the device under `volume_root`.
    ///
    /// Never overwrites an index already on the device. A missing local
    /// index is built first unless `create_missing` is off. The device
    /// container's ASIN is patched to match the copied artifact.
    pub async fn send_to_device(
        &mut self,
        volume_root: &Path,
        ctx: &mut BuildContext<'_, B>,
        create_missing: bool,
    ) -> Result<SendOutcome, StageError> {
        let device = self.device_paths(volume_root);

        if !device.book.exists() || !device.index_dir.exists() {
            return Ok(SendOutcome::NotOnDevice);
        }

        if find_index_artifact(&device.index_dir).is_some() {
            return Ok(SendOutcome::AlreadyPresent);
        }

        let mut local = find_index_artifact(&self.local_index_dir);
        if local.is_none() {
            if !create_missing {
                return Ok(SendOutcome::CreationDisabled);
            }
            self.build_index(ctx).await?;
            local = find_index_artifact(&self.local_index_dir);
        }

        let Some(artifact) = local else {
            return Ok(SendOutcome::NoLocalIndex);
        };

        let identifier = artifact_identifier(&artifact).ok_or(StageError::IdentifierNotFound)?;
        self.patch_identifier(&device.book, &identifier)?;

        let file_name = artifact
            .file_name()
            .ok_or(StageError::MissingPrerequisite("artifact file name"))?;
        let target = device.index_dir.join(file_name);
        std::fs::copy(&artifact, &target)?;

        if let Some(asin) = Asin::parse(&identifier) {
            self.asin = Some(asin);
        }
        tracing::info!(book = %self.display_name(), path = %target.display(), "Sent X-Ray to device");
        Ok(SendOutcome::Sent { artifact: target })
    }
}

fn embedded_asin(path: &Path) -> Option<Asin> {
    MobiBook::open(path)
        .ok()?
        .embedded_identifier()
        .as_deref()
        .and_then(Asin::parse)
}
