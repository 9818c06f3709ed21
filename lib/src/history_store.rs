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

//! The embedded revision store interface.
//!
//! A history store is rooted at a directory and records snapshots of it as a
//! linear sequence of commits. Identifiers are content hashes; listing order
//! is topological-reverse and deterministic. [`crate::git_store::GitStore`]
//! is the provided implementation.

use std::collections::BTreeSet;
use std::io;
use std::io::Write;

use thiserror::Error;

use crate::file_util::PathError;

/// Content-hash identifier of a commit, as lowercase hex.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommitId(pub String);

impl CommitId {
    pub fn hex(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content-hash identifier of a file blob, as lowercase hex.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlobId(pub String);

impl BlobId {
    pub fn hex(&self) -> &str {
        &self.0
    }
}

/// One revision: an immutable snapshot plus metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitRecord {
    pub id: CommitId,
    pub message: String,
    pub author: String,
    pub parents: Vec<CommitId>,
    /// Seconds since the epoch, as recorded by the store.
    pub timestamp: i64,
}

/// A file reachable from a commit tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeFileEntry {
    /// Forward-slash path relative to the store root.
    pub path: String,
    pub blob: BlobId,
}

/// Working-tree status, as sets of forward-slash relative paths.
///
/// A path may appear in more than one set, e.g. a file modified in the index
/// and again in the working tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusSummary {
    pub added: BTreeSet<String>,
    pub changed: BTreeSet<String>,
    pub missing: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    pub untracked: BTreeSet<String>,
    pub conflicting: BTreeSet<String>,
}

impl StatusSummary {
    pub fn is_clean(&self) -> bool {
        self.union().is_empty()
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicting.is_empty()
    }

    /// All paths that differ from the latest commit in any way.
    pub fn union(&self) -> BTreeSet<String> {
        let mut all = BTreeSet::new();
        for set in [
            &self.added,
            &self.changed,
            &self.missing,
            &self.modified,
            &self.removed,
            &self.untracked,
            &self.conflicting,
        ] {
            all.extend(set.iter().cloned());
        }
        all
    }
}

#[derive(Debug, Error)]
pub enum HistoryStoreError {
    /// The staged tree equals the parent commit's tree.
    #[error("Nothing to commit")]
    NothingToCommit,
    /// The store has no head commit to extend. Never expected once a store
    /// was initialized; treated as corruption.
    #[error("History store has no head commit")]
    NoHead,
    /// The store reports conflicting paths. Never expected in a linear
    /// history; treated as corruption.
    #[error("History store contains conflicting paths")]
    Conflicted,
    #[error("Object {0} not found in history store")]
    NotFound(String),
    #[error("Failed to stream blob {id}")]
    Stream {
        id: String,
        #[source]
        source: io::Error,
    },
    #[error("History store operation failed")]
    Backend(#[source] git2::Error),
    #[error(transparent)]
    Io(#[from] PathError),
}

impl From<git2::Error> for HistoryStoreError {
    fn from(err: git2::Error) -> Self {
        HistoryStoreError::Backend(err)
    }
}

/// Operations the session manager invokes against the embedded store.
///
/// Opening and closing are not part of the trait: implementations attach in
/// their constructors and release on drop.
pub trait HistoryStore {
    /// The seven-way working-tree status.
    fn status(&self) -> Result<StatusSummary, HistoryStoreError>;

    /// Stages everything currently present under the root.
    fn add_all(&self) -> Result<(), HistoryStoreError>;

    /// Stages deletions. Paths that are already gone from the index are
    /// tolerated.
    fn rm(&self, paths: &[String]) -> Result<(), HistoryStoreError>;

    /// Writes the staged tree as a new commit on top of the current head.
    fn commit(&self, message: &str, author: &str) -> Result<CommitId, HistoryStoreError>;

    /// All commits, oldest first (topological reverse), including the
    /// private root commit.
    fn list_commits(&self) -> Result<Vec<CommitRecord>, HistoryStoreError>;

    /// The file blobs recorded in a commit's tree; tree-only entries are
    /// omitted.
    fn read_tree(&self, id: &CommitId) -> Result<Vec<TreeFileEntry>, HistoryStoreError>;

    /// Streams a blob's bytes to a writer.
    fn read_blob(&self, id: &BlobId, out: &mut dyn Write) -> Result<(), HistoryStoreError>;
}
