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

//! Advisory file locks.
//!
//! The lock coordinates cooperating VArchive instances, not arbitrary other
//! writers: on Unix it is an OS-level `flock`, elsewhere it falls back to
//! lock-file existence. Acquisition polls with a bounded fixed-delay retry
//! schedule instead of blocking indefinitely.

#![allow(missing_docs)]

mod fallback;
#[cfg(unix)]
mod unix;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[cfg(not(unix))]
pub use self::fallback::FileLock;
#[cfg(unix)]
pub use self::unix::FileLock;

#[derive(Debug, Error)]
#[error("{message}: {path}")]
pub struct FileLockError {
    pub message: &'static str,
    pub path: PathBuf,
    #[source]
    pub err: io::Error,
}

/// Bounded polling schedule for lock acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetrySchedule {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        RetrySchedule {
            attempts: 10,
            delay: Duration::from_millis(300),
        }
    }
}

fn exhausted(path: PathBuf) -> FileLockError {
    FileLockError {
        message: "Lock is held by another process",
        path,
        err: io::Error::new(io::ErrorKind::WouldBlock, "retry attempts exhausted"),
    }
}
