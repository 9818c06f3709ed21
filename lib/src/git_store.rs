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

//! History store backed by an embedded git repository (libgit2).

use std::io::Write;
use std::path::Path;

use git2::ErrorCode;
use git2::IndexAddOption;
use git2::ObjectType;
use git2::Oid;
use git2::Signature;
use git2::Sort;
use git2::StatusOptions;
use git2::TreeWalkMode;
use git2::TreeWalkResult;
use tracing::instrument;

use crate::history_store::BlobId;
use crate::history_store::CommitId;
use crate::history_store::CommitRecord;
use crate::history_store::HistoryStore;
use crate::history_store::HistoryStoreError;
use crate::history_store::StatusSummary;
use crate::history_store::TreeFileEntry;

/// Name of the history store directory inside a working area.
pub const HISTORY_DIR: &str = ".git";

/// Message of the private root commit; it is never exposed as a version.
const ROOT_COMMIT_MESSAGE: &str = "root";

pub struct GitStore {
    repo: git2::Repository,
}

impl GitStore {
    /// Creates a fresh store rooted at `root` with an empty root commit.
    #[instrument]
    pub fn init(root: &Path, author: &str) -> Result<Self, HistoryStoreError> {
        let repo = git2::Repository::init(root)?;
        {
            let tree_id = repo.treebuilder(None)?.write()?;
            let tree = repo.find_tree(tree_id)?;
            let sig = signature(author)?;
            repo.commit(Some("HEAD"), &sig, &sig, ROOT_COMMIT_MESSAGE, &tree, &[])?;
        }
        Ok(GitStore { repo })
    }

    /// Attaches to the existing store rooted at `root`.
    #[instrument]
    pub fn open(root: &Path) -> Result<Self, HistoryStoreError> {
        let repo = git2::Repository::open(root)?;
        Ok(GitStore { repo })
    }
}

impl std::fmt::Debug for GitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitStore")
            .field("path", &self.repo.path())
            .finish()
    }
}

fn signature(author: &str) -> Result<Signature<'static>, git2::Error> {
    Signature::now(author, &format!("{author}@local"))
}

fn head_commit(repo: &git2::Repository) -> Result<git2::Commit<'_>, HistoryStoreError> {
    let head = repo.head().map_err(|err| {
        if err.code() == ErrorCode::UnbornBranch || err.code() == ErrorCode::NotFound {
            HistoryStoreError::NoHead
        } else {
            HistoryStoreError::Backend(err)
        }
    })?;
    let commit = head
        .peel_to_commit()
        .map_err(HistoryStoreError::Backend)?;
    Ok(commit)
}

fn lossy_path(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

impl HistoryStore for GitStore {
    fn status(&self) -> Result<StatusSummary, HistoryStoreError> {
        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            .exclude_submodules(true);
        let statuses = self.repo.statuses(Some(&mut options))?;
        let mut summary = StatusSummary::default();
        for entry in statuses.iter() {
            let path = lossy_path(entry.path_bytes());
            let status = entry.status();
            if status.contains(git2::Status::INDEX_NEW) {
                summary.added.insert(path.clone());
            }
            if status.contains(git2::Status::INDEX_MODIFIED) {
                summary.changed.insert(path.clone());
            }
            if status.contains(git2::Status::INDEX_DELETED) {
                summary.removed.insert(path.clone());
            }
            if status.contains(git2::Status::WT_DELETED) {
                summary.missing.insert(path.clone());
            }
            if status.contains(git2::Status::WT_MODIFIED) {
                summary.modified.insert(path.clone());
            }
            if status.contains(git2::Status::WT_NEW) {
                summary.untracked.insert(path.clone());
            }
            if status.contains(git2::Status::CONFLICTED) {
                summary.conflicting.insert(path.clone());
            }
        }
        Ok(summary)
    }

    fn add_all(&self) -> Result<(), HistoryStoreError> {
        let mut index = self.repo.index()?;
        index.add_all(["."], IndexAddOption::DEFAULT, None)?;
        index.write()?;
        Ok(())
    }

    fn rm(&self, paths: &[String]) -> Result<(), HistoryStoreError> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut index = self.repo.index()?;
        for path in paths {
            match index.remove_path(Path::new(path)) {
                Ok(()) => {}
                Err(err) if err.code() == ErrorCode::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        index.write()?;
        Ok(())
    }

    #[instrument(skip(self, message))]
    fn commit(&self, message: &str, author: &str) -> Result<CommitId, HistoryStoreError> {
        let mut index = self.repo.index()?;
        if index.has_conflicts() {
            return Err(HistoryStoreError::Conflicted);
        }
        let tree_id = index.write_tree()?;
        let parent = head_commit(&self.repo)?;
        if parent.tree_id() == tree_id {
            return Err(HistoryStoreError::NothingToCommit);
        }
        let tree = self.repo.find_tree(tree_id)?;
        let sig = signature(author)?;
        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?;
        Ok(CommitId(oid.to_string()))
    }

    fn list_commits(&self) -> Result<Vec<CommitRecord>, HistoryStoreError> {
        let mut walk = self.repo.revwalk()?;
        walk.push_head()?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
        let mut records = Vec::new();
        for oid in walk {
            let oid = oid?;
            let commit = self.repo.find_commit(oid)?;
            records.push(CommitRecord {
                id: CommitId(oid.to_string()),
                message: commit
                    .message()
                    .map(|m| m.to_owned())
                    .unwrap_or_else(|| lossy_path(commit.message_bytes())),
                author: commit
                    .author()
                    .name()
                    .map(|n| n.to_owned())
                    .unwrap_or_default(),
                parents: commit
                    .parent_ids()
                    .map(|id| CommitId(id.to_string()))
                    .collect(),
                timestamp: commit.time().seconds(),
            });
        }
        Ok(records)
    }

    fn read_tree(&self, id: &CommitId) -> Result<Vec<TreeFileEntry>, HistoryStoreError> {
        let oid = Oid::from_str(id.hex())
            .map_err(|_| HistoryStoreError::NotFound(id.hex().to_owned()))?;
        let commit = self
            .repo
            .find_commit(oid)
            .map_err(|_| HistoryStoreError::NotFound(id.hex().to_owned()))?;
        let tree = commit.tree()?;
        let mut entries = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |dir, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                let name = entry
                    .name()
                    .map(|n| n.to_owned())
                    .unwrap_or_else(|| lossy_path(entry.name_bytes()));
                entries.push(TreeFileEntry {
                    path: format!("{dir}{name}"),
                    blob: BlobId(entry.id().to_string()),
                });
            }
            TreeWalkResult::Ok
        })?;
        Ok(entries)
    }

    fn read_blob(&self, id: &BlobId, out: &mut dyn Write) -> Result<(), HistoryStoreError> {
        let oid = Oid::from_str(id.hex())
            .map_err(|_| HistoryStoreError::NotFound(id.hex().to_owned()))?;
        let blob = self
            .repo
            .find_blob(oid)
            .map_err(|_| HistoryStoreError::NotFound(id.hex().to_owned()))?;
        out.write_all(blob.content())
            .map_err(|source| HistoryStoreError::Stream {
                id: id.hex().to_owned(),
                source,
            })?;
        Ok(())
    }
}
