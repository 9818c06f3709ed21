// Copyright 2024 The VArchive Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The versioned-file session: the lifecycle engine coupling an archive
//! file, a working area, and the embedded history store.

use std::collections::BTreeSet;
use std::collections::HashSet;
use std::fs;
use std::fs::File;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;
use tracing::warn;

use crate::archive_codec::ArchiveCodec;
use crate::archive_codec::CodecError;
use crate::archive_codec::ZipCodec;
use crate::archive_info::ArchiveInfo;
use crate::archive_info::ArchiveInfoError;
use crate::archive_info::ARCHIVE_INFO_FILE;
use crate::archive_info::CURRENT_FORMAT_VERSION;
use crate::file_util;
use crate::file_util::IoResultExt as _;
use crate::file_util::PathError;
use crate::git_store::GitStore;
use crate::git_store::HISTORY_DIR;
use crate::history_store::CommitId;
use crate::history_store::CommitRecord;
use crate::history_store::HistoryStore;
use crate::history_store::HistoryStoreError;
use crate::registry;
use crate::registry::SessionRegistry;
use crate::settings::SessionSettings;
use crate::working_area;
use crate::working_area::CleanupExcludes;
use crate::workspace;
use crate::workspace::SandboxBase;
use crate::workspace::WorkspaceError;

/// Description written into the control record of newly created archives.
const DEFAULT_DESCRIPTION: &str = "VArchive versioned document";

/// Commit message used when the caller provides an empty one.
const EMPTY_MESSAGE: &str = "no message";

#[derive(Debug, Error)]
pub enum VersionedFileError {
    /// The file unpacked, but no (valid) control record was found inside.
    #[error("{0} is not a valid versioned archive")]
    InvalidArchive(PathBuf),
    #[error(r#"Invalid archive format version "{0}""#)]
    InvalidFormatVersion(String),
    /// Another live session owns this archive, or a previous session left
    /// its working area behind.
    #[error("{0} is already opened by another session")]
    AlreadyOpen(PathBuf),
    #[error("No open session for {0}")]
    NotOpen(PathBuf),
    #[error("{0} already exists")]
    ArchiveExists(PathBuf),
    #[error("{0} does not exist")]
    ArchiveMissing(PathBuf),
    #[error("Version {index} is outside the valid range 1..={max}")]
    InvalidVersion { index: usize, max: usize },
    /// The working area's history does not contain the on-disk archive's
    /// history; closing would overwrite commits irrecoverably.
    #[error("Closing {0} would lose history recorded in the archive")]
    OverwriteWouldLoseHistory(PathBuf),
    #[error(transparent)]
    History(#[from] HistoryStoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error(transparent)]
    Io(#[from] PathError),
}

impl From<ArchiveInfoError> for VersionedFileError {
    fn from(err: ArchiveInfoError) -> Self {
        match err {
            ArchiveInfoError::Missing(path) | ArchiveInfoError::Malformed(path, _) => {
                VersionedFileError::InvalidArchive(path)
            }
            ArchiveInfoError::InvalidFormatVersion(version) => {
                VersionedFileError::InvalidFormatVersion(version)
            }
            ArchiveInfoError::Io(err) => VersionedFileError::Io(err),
        }
    }
}

/// Observes checkouts. `pre_checkout` fires before any destructive action on
/// the working area, `post_checkout` after successful materialization.
pub trait VersionEventListener {
    fn pre_checkout(&self, commit: &CommitRecord);
    fn post_checkout(&self, commit: &CommitRecord);
}

/// Collaborators and tunables a session is constructed with.
pub struct SessionOptions {
    pub codec: Box<dyn ArchiveCodec>,
    pub settings: SessionSettings,
    pub sandbox_base: Arc<SandboxBase>,
    pub registry: Arc<SessionRegistry>,
}

impl SessionOptions {
    /// Default collaborators: ZIP codec, default settings, the process-wide
    /// sandbox base and session registry.
    pub fn from_global() -> Result<Self, VersionedFileError> {
        Ok(SessionOptions {
            codec: Box::new(ZipCodec),
            settings: SessionSettings::default(),
            sandbox_base: workspace::global_sandbox_base()?,
            registry: registry::global_registry(),
        })
    }
}

/// A session against one archive file.
///
/// The session is *opened* iff its working area exists on disk; a session
/// constructed over a sandbox left behind by a crashed run is therefore
/// opened from the start and can be inspected or [`cleanup`](Self::cleanup)ed.
pub struct VersionedFile {
    archive: PathBuf,
    sandbox: PathBuf,
    codec: Box<dyn ArchiveCodec>,
    settings: SessionSettings,
    base: Arc<SandboxBase>,
    registry: Arc<SessionRegistry>,
    store: Option<Box<dyn HistoryStore>>,
    commits: Option<Vec<CommitRecord>>,
    current_version: usize,
    excludes: CleanupExcludes,
    listeners: Vec<Arc<dyn VersionEventListener>>,
    registered: bool,
    opened_in_process: bool,
}

impl std::fmt::Debug for VersionedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedFile")
            .field("archive", &self.archive)
            .field("sandbox", &self.sandbox)
            .field("current_version", &self.current_version)
            .finish()
    }
}

impl VersionedFile {
    /// Constructs a closed session for `archive` with the global defaults.
    pub fn new(archive: impl AsRef<Path>) -> Result<Self, VersionedFileError> {
        Self::with_options(archive, SessionOptions::from_global()?)
    }

    /// Constructs a closed session with a custom archive codec.
    pub fn with_codec(
        archive: impl AsRef<Path>,
        codec: Box<dyn ArchiveCodec>,
    ) -> Result<Self, VersionedFileError> {
        let mut options = SessionOptions::from_global()?;
        options.codec = codec;
        Self::with_options(archive, options)
    }

    pub fn with_options(
        archive: impl AsRef<Path>,
        options: SessionOptions,
    ) -> Result<Self, VersionedFileError> {
        let archive = file_util::absolutize(archive.as_ref())?;
        let sandbox = options.sandbox_base.sandbox_path_for(&archive)?;
        options.sandbox_base.claim_sandbox(&sandbox);
        Ok(VersionedFile {
            archive,
            sandbox,
            codec: options.codec,
            settings: options.settings,
            base: options.sandbox_base,
            registry: options.registry,
            store: None,
            commits: None,
            current_version: 0,
            excludes: CleanupExcludes::new(),
            listeners: Vec::new(),
            registered: false,
            opened_in_process: false,
        })
    }

    /// Whether `archive` points to an existing file.
    pub fn exists(archive: &Path) -> bool {
        archive.is_file()
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive
    }

    /// The session is opened iff its working area exists.
    pub fn is_opened(&self) -> bool {
        self.sandbox.is_dir()
    }

    /// Path of the working area. Requires an opened session.
    pub fn content(&self) -> Result<&Path, VersionedFileError> {
        self.require_open()?;
        Ok(&self.sandbox)
    }

    /// Creates the archive: an empty versioned document containing only the
    /// control record and a fresh history store. The session is closed again
    /// when this returns.
    #[instrument(skip(self))]
    pub fn create(&mut self) -> Result<&mut Self, VersionedFileError> {
        if self.archive.exists() {
            return Err(VersionedFileError::ArchiveExists(self.archive.clone()));
        }
        if self.is_opened() || self.registry.contains(&self.archive) {
            return Err(VersionedFileError::AlreadyOpen(self.archive.clone()));
        }
        self.register()?;
        let result = self.create_in_sandbox();
        if result.is_err() {
            self.deregister();
            let _ = file_util::remove_dir_forcibly(&self.sandbox);
        }
        result?;
        self.close()?;
        Ok(self)
    }

    fn create_in_sandbox(&mut self) -> Result<(), VersionedFileError> {
        fs::create_dir_all(&self.sandbox).context(&self.sandbox)?;
        ArchiveInfo::new(CURRENT_FORMAT_VERSION, DEFAULT_DESCRIPTION)?.store(&self.sandbox)?;
        let store = GitStore::init(&self.sandbox, &self.settings.author_name())?;
        self.store = Some(Box::new(store));
        self.commits = None;
        Ok(())
    }

    /// Opens the archive and checks out the latest version.
    pub fn open(&mut self) -> Result<&mut Self, VersionedFileError> {
        self.open_with_checkout(true)
    }

    /// Opens the archive: unpacks it into the sandbox, validates the control
    /// record, and optionally checks out the latest version.
    #[instrument(skip(self))]
    pub fn open_with_checkout(
        &mut self,
        checkout_latest: bool,
    ) -> Result<&mut Self, VersionedFileError> {
        if !self.archive.is_file() {
            return Err(VersionedFileError::ArchiveMissing(self.archive.clone()));
        }
        self.register()?;
        if self.is_opened() {
            // A previous run left this working area behind. On Windows the
            // leftover is routinely undeletable, so the session attaches to
            // it; elsewhere the caller must run cleanup() first.
            if cfg!(windows) {
                warn!(sandbox = ?self.sandbox, "attaching to leftover working area");
                self.opened_in_process = true;
                return Ok(self);
            }
            self.deregister();
            return Err(VersionedFileError::AlreadyOpen(self.archive.clone()));
        }
        let unpacked = self.unpack_into_sandbox();
        if unpacked.is_err() {
            let _ = file_util::remove_dir_forcibly(&self.sandbox);
            self.deregister();
        }
        unpacked?;
        self.opened_in_process = true;
        if checkout_latest {
            self.checkout_latest_version()?;
        }
        Ok(self)
    }

    fn unpack_into_sandbox(&mut self) -> Result<(), VersionedFileError> {
        fs::create_dir_all(&self.sandbox).context(&self.sandbox)?;
        self.codec.unpack(&self.archive, &self.sandbox)?;
        ArchiveInfo::load(&self.sandbox)?;
        self.commits = None;
        self.current_version = self.number_of_versions()?;
        Ok(())
    }

    /// Number of user-visible versions (the private root commit does not
    /// count).
    pub fn number_of_versions(&mut self) -> Result<usize, VersionedFileError> {
        Ok(self.commits()?.len() - 1)
    }

    /// The user-visible revision list, oldest first.
    pub fn versions(&mut self) -> Result<Vec<CommitRecord>, VersionedFileError> {
        Ok(self.commits()?[1..].to_vec())
    }

    /// The 1-based index of the currently checked-out version, or 0 when no
    /// user version exists.
    pub fn current_version(&self) -> usize {
        self.current_version
    }

    /// Commits the working area as a new version and returns its id.
    ///
    /// Staging: missing files become deletions, everything else present is
    /// added, then the store commits with the current user as author. An
    /// empty message is replaced by a placeholder.
    #[instrument(skip(self, message))]
    pub fn commit(&mut self, message: &str) -> Result<CommitId, VersionedFileError> {
        self.require_open()?;
        let author = self.settings.author_name();
        let status = self.store()?.status()?;
        if status.has_conflicts() {
            return Err(HistoryStoreError::Conflicted.into());
        }
        let missing: Vec<String> = status.missing.iter().cloned().collect();
        self.store()?.rm(&missing)?;
        self.store()?.add_all()?;
        let message = if message.trim().is_empty() {
            EMPTY_MESSAGE
        } else {
            message
        };
        let id = self.store()?.commit(message, &author)?;
        self.commits = None;
        self.current_version = self.number_of_versions()?;
        if self.settings.flush_on_commit() {
            self.flush()?;
        }
        Ok(id)
    }

    /// Uncommitted paths, optionally restricted to names with the given
    /// suffixes.
    pub fn uncommitted_changes(
        &mut self,
        endings: &[String],
    ) -> Result<BTreeSet<String>, VersionedFileError> {
        self.require_open()?;
        let mut changes = self.store()?.status()?.union();
        if !endings.is_empty() {
            changes.retain(|path| endings.iter().any(|end| path.ends_with(end)));
        }
        Ok(changes)
    }

    pub fn has_uncommitted_changes(&mut self) -> Result<bool, VersionedFileError> {
        Ok(!self.uncommitted_changes(&[])?.is_empty())
    }

    /// Replaces the working area with the snapshot of version `version`.
    /// Files in the exclusion set are left untouched.
    #[instrument(skip(self))]
    pub fn checkout_version(&mut self, version: usize) -> Result<(), VersionedFileError> {
        self.require_open()?;
        let max = self.number_of_versions()?;
        if version < 1 || version > max {
            return Err(VersionedFileError::InvalidVersion {
                index: version,
                max,
            });
        }
        let commit = self.commits()?[version].clone();
        for listener in &self.listeners {
            listener.pre_checkout(&commit);
        }
        working_area::clear_working_area(&self.sandbox, &self.excludes)?;
        let entries = self.store()?.read_tree(&commit.id)?;
        for entry in entries {
            if entry.path == ARCHIVE_INFO_FILE {
                continue;
            }
            let dest = join_entry_path(&self.sandbox, &entry.path);
            let relative = dest.strip_prefix(&self.sandbox).expect("entry under root");
            let name = entry.path.rsplit('/').next().unwrap_or(&entry.path);
            if self.excludes.is_excluded(relative, name) && dest.exists() {
                // excluded files survive checkouts untouched
                continue;
            }
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).context(parent)?;
            }
            let mut file = File::create(&dest).context(&dest)?;
            self.store()?.read_blob(&entry.blob, &mut file)?;
        }
        self.current_version = version;
        for listener in &self.listeners {
            listener.post_checkout(&commit);
        }
        Ok(())
    }

    pub fn checkout_first_version(&mut self) -> Result<(), VersionedFileError> {
        self.checkout_version(1)
    }

    /// Checks out the newest version. A no-op on an archive without user
    /// versions.
    pub fn checkout_latest_version(&mut self) -> Result<(), VersionedFileError> {
        self.require_open()?;
        let max = self.number_of_versions()?;
        if max >= 1 {
            self.checkout_version(max)?;
        }
        Ok(())
    }

    pub fn checkout_previous_version(&mut self) -> Result<(), VersionedFileError> {
        self.checkout_version(self.current_version.saturating_sub(1))
    }

    pub fn checkout_next_version(&mut self) -> Result<(), VersionedFileError> {
        self.checkout_version(self.current_version + 1)
    }

    pub fn has_previous_version(&mut self) -> Result<bool, VersionedFileError> {
        self.require_open()?;
        Ok(self.current_version > 1)
    }

    pub fn has_next_version(&mut self) -> Result<bool, VersionedFileError> {
        self.require_open()?;
        Ok(self.current_version < self.number_of_versions()?)
    }

    /// True iff this session's history is a superset of `other`'s: at least
    /// as many commits, and every commit id of `other` present here.
    pub fn contains(&mut self, other: &mut VersionedFile) -> Result<bool, VersionedFileError> {
        self.require_open()?;
        other.require_open()?;
        let theirs = other.commits()?.to_vec();
        let mine = self.commits()?;
        Ok(contains_history(mine, &theirs))
    }

    /// Repacks the working area into the archive file, keeping the previous
    /// archive as a `~` backup. A no-op when the session is closed.
    #[instrument(skip(self))]
    pub fn flush(&mut self) -> Result<(), VersionedFileError> {
        if !self.is_opened() {
            return Ok(());
        }
        if self.archive.exists() {
            let backup = backup_path(&self.archive);
            fs::copy(&self.archive, &backup).context(&backup)?;
        }
        let endings = working_area::pack_excludes(&self.excludes);
        self.codec.pack(&self.sandbox, &self.archive, &endings)?;
        Ok(())
    }

    /// Closes the session: deregisters, flushes, and removes the working
    /// area. Idempotent.
    #[instrument(skip(self))]
    pub fn close(&mut self) -> Result<(), VersionedFileError> {
        if !self.is_opened() {
            self.deregister();
            return Ok(());
        }
        self.deregister();
        self.flush()?;
        self.store = None;
        self.commits = None;
        file_util::remove_dir_forcibly(&self.sandbox)?;
        self.current_version = 0;
        self.opened_in_process = false;
        Ok(())
    }

    /// Closes a session that was left open by a previous run, provided the
    /// overwrite-safety check passes. A no-op on a closed session.
    #[instrument(skip(self))]
    pub fn cleanup(&mut self) -> Result<(), VersionedFileError> {
        if !self.is_opened() {
            return Ok(());
        }
        if self.can_close()? {
            self.close()
        } else {
            Err(VersionedFileError::OverwriteWouldLoseHistory(
                self.archive.clone(),
            ))
        }
    }

    /// Whether closing (and thereby overwriting the on-disk archive with the
    /// working area) loses no history: the working area's history must be a
    /// superset of the archive's.
    pub fn can_close(&mut self) -> Result<bool, VersionedFileError> {
        if !self.is_opened() || !self.archive.exists() {
            return Ok(true);
        }
        if cfg!(windows) && self.opened_in_process {
            // This process opened the archive itself; the working area is
            // trusted without a second unpack.
            return Ok(true);
        }
        let second = self.base.prefixed_sandbox_path_for(&self.archive)?;
        let result = self.archive_history_into(&second);
        let _ = file_util::remove_dir_forcibly(&second);
        let theirs = result?;
        let mine = self.commits()?;
        Ok(contains_history(mine, &theirs))
    }

    /// Reads the commit list of the on-disk archive by unpacking it into a
    /// scratch sandbox (read-only second open).
    fn archive_history_into(
        &mut self,
        scratch: &Path,
    ) -> Result<Vec<CommitRecord>, VersionedFileError> {
        fs::create_dir_all(scratch).context(scratch)?;
        self.codec.unpack(&self.archive, scratch)?;
        let store = GitStore::open(scratch)?;
        let commits = store.list_commits()?;
        Ok(commits)
    }

    /// Retargets the session to a new archive path. The old archive file is
    /// left in place; the working area moves under the new path and the new
    /// archive is written immediately.
    #[instrument(skip(self))]
    pub fn switch_to_new_archive(&mut self, dest: &Path) -> Result<(), VersionedFileError> {
        self.require_open()?;
        let dest = file_util::absolutize(dest)?;
        if dest == self.archive {
            return self.flush();
        }
        if !self.registry.claim(&dest) {
            return Err(VersionedFileError::AlreadyOpen(dest));
        }
        let old_archive = std::mem::replace(&mut self.archive, dest);
        let old_sandbox = self.sandbox.clone();
        let result = self.move_sandbox_for_switch(&old_sandbox);
        if result.is_err() {
            // back out the retarget; the old working area is still there
            self.registry.release(&self.archive);
            self.archive = old_archive;
            self.sandbox = old_sandbox;
            return result;
        }
        self.registry.release(&old_archive);
        self.flush()
    }

    fn move_sandbox_for_switch(&mut self, old_sandbox: &Path) -> Result<(), VersionedFileError> {
        let new_sandbox = self.base.sandbox_path_for(&self.archive)?;
        if new_sandbox != old_sandbox {
            self.store = None;
            file_util::copy_dir_recursively(old_sandbox, &new_sandbox)?;
            self.base.claim_sandbox(&new_sandbox);
            self.base.release_sandbox(old_sandbox);
            file_util::remove_dir_forcibly(old_sandbox)?;
            self.sandbox = new_sandbox;
        }
        Ok(())
    }

    /// Collapses the history to a single commit holding the latest tree.
    #[instrument(skip(self))]
    pub fn delete_history(&mut self) -> Result<(), VersionedFileError> {
        self.require_open()?;
        self.checkout_latest_version()?;
        self.store = None;
        self.commits = None;
        file_util::remove_dir_forcibly(&self.sandbox.join(HISTORY_DIR))?;
        let store = GitStore::init(&self.sandbox, &self.settings.author_name())?;
        self.store = Some(Box::new(store));
        self.current_version = 0;
        self.commit("initial commit (cleared history)")?;
        Ok(())
    }

    /// Extends the set of relative paths that survive cleanup (and are
    /// omitted from packing).
    pub fn exclude_paths_from_cleanup(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
        self.excludes.add_paths(paths);
    }

    /// Replaces the set of file-name suffixes that survive cleanup (and are
    /// omitted from packing).
    pub fn set_exclude_endings_from_cleanup(
        &mut self,
        endings: impl IntoIterator<Item = String>,
    ) {
        self.excludes.set_endings(endings);
    }

    pub fn add_version_event_listener(&mut self, listener: Arc<dyn VersionEventListener>) {
        self.listeners.push(listener);
    }

    pub fn remove_version_event_listener(&mut self, listener: &Arc<dyn VersionEventListener>) {
        self.listeners
            .retain(|existing| !Arc::ptr_eq(existing, listener));
    }

    fn require_open(&self) -> Result<(), VersionedFileError> {
        if self.is_opened() {
            Ok(())
        } else {
            Err(VersionedFileError::NotOpen(self.archive.clone()))
        }
    }

    /// The history store handle, attached lazily so that a session
    /// constructed over an existing working area works without an explicit
    /// open().
    fn store(&mut self) -> Result<&dyn HistoryStore, VersionedFileError> {
        self.require_open()?;
        if self.store.is_none() {
            self.store = Some(Box::new(GitStore::open(&self.sandbox)?));
        }
        Ok(self.store.as_deref().expect("store was just attached"))
    }

    fn commits(&mut self) -> Result<&[CommitRecord], VersionedFileError> {
        if self.commits.is_none() {
            let commits = self.store()?.list_commits()?;
            self.commits = Some(commits);
        }
        Ok(self.commits.as_deref().expect("commits were just listed"))
    }

    fn register(&mut self) -> Result<(), VersionedFileError> {
        if !self.registry.claim(&self.archive) {
            return Err(VersionedFileError::AlreadyOpen(self.archive.clone()));
        }
        self.registered = true;
        Ok(())
    }

    fn deregister(&mut self) {
        if self.registered {
            self.registry.release(&self.archive);
            self.registered = false;
        }
    }
}

impl Drop for VersionedFile {
    fn drop(&mut self) {
        self.deregister();
        self.base.release_sandbox(&self.sandbox);
    }
}

fn contains_history(mine: &[CommitRecord], theirs: &[CommitRecord]) -> bool {
    if mine.len() < theirs.len() {
        return false;
    }
    let ids: HashSet<&CommitId> = mine.iter().map(|c| &c.id).collect();
    theirs.iter().all(|commit| ids.contains(&commit.id))
}

/// `archive` -> `archive~`, next to the original.
fn backup_path(archive: &Path) -> PathBuf {
    let mut name = archive
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push("~");
    archive.with_file_name(name)
}

/// Joins a forward-slash store path onto a base directory.
fn join_entry_path(base: &Path, entry_path: &str) -> PathBuf {
    let mut path = base.to_path_buf();
    for part in entry_path.split('/') {
        path.push(part);
    }
    path
}
