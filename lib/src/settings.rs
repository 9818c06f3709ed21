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

//! Per-session configuration.

use crate::lock::RetrySchedule;

/// Tunables for a [`crate::versioned_file::VersionedFile`] session and for
/// the sandbox base it allocates from.
#[derive(Clone, Debug)]
pub struct SessionSettings {
    author: Option<String>,
    flush_on_commit: bool,
    lock_retry: RetrySchedule,
    backup_generations: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            author: None,
            flush_on_commit: false,
            lock_retry: RetrySchedule::default(),
            backup_generations: 3,
        }
    }
}

impl SessionSettings {
    /// Commit author name. Defaults to the operating-system user name.
    pub fn author_name(&self) -> String {
        self.author.clone().unwrap_or_else(whoami::username)
    }

    /// Whether every successful commit also repacks the archive.
    pub fn flush_on_commit(&self) -> bool {
        self.flush_on_commit
    }

    pub fn lock_retry(&self) -> RetrySchedule {
        self.lock_retry
    }

    /// Number of numbered crash-salvage generations kept under the sandbox
    /// base.
    pub fn backup_generations(&self) -> usize {
        self.backup_generations
    }

    pub fn with_author(self, author: impl Into<String>) -> Self {
        SessionSettings {
            author: Some(author.into()),
            ..self
        }
    }

    pub fn with_flush_on_commit(self, flush_on_commit: bool) -> Self {
        SessionSettings {
            flush_on_commit,
            ..self
        }
    }

    pub fn with_lock_retry(self, lock_retry: RetrySchedule) -> Self {
        SessionSettings { lock_retry, ..self }
    }

    pub fn with_backup_generations(self, backup_generations: usize) -> Self {
        SessionSettings {
            backup_generations,
            ..self
        }
    }
}
