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

#![allow(missing_docs)]

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::thread;

use rustix::fs::FlockOperation;
use tracing::instrument;

use super::exhausted;
use super::FileLockError;
use super::RetrySchedule;

pub struct FileLock {
    path: PathBuf,
    file: File,
}

impl FileLock {
    pub fn lock(path: PathBuf) -> Result<FileLock, FileLockError> {
        Self::lock_with(path, RetrySchedule::default())
    }

    pub fn lock_with(path: PathBuf, schedule: RetrySchedule) -> Result<FileLock, FileLockError> {
        let mut attempts_left = schedule.attempts;
        loop {
            // Create the lockfile, or open a pre-existing one
            let file = File::create(&path).map_err(|err| FileLockError {
                message: "Failed to open lock file",
                path: path.clone(),
                err,
            })?;
            match rustix::fs::flock(&file, FlockOperation::NonBlockingLockExclusive) {
                Ok(()) => {}
                Err(rustix::io::Errno::WOULDBLOCK) => {
                    if attempts_left == 0 {
                        return Err(exhausted(path));
                    }
                    attempts_left -= 1;
                    thread::sleep(schedule.delay);
                    continue;
                }
                Err(errno) => {
                    return Err(FileLockError {
                        message: "Failed to lock lock file",
                        path,
                        err: io::Error::from(errno),
                    });
                }
            }

            let stat = rustix::fs::fstat(&file).map_err(|errno| FileLockError {
                message: "Failed to stat lock file",
                path: path.clone(),
                err: io::Error::from(errno),
            })?;
            if stat.st_nlink == 0 {
                // Lockfile was deleted, probably by the previous holder's
                // `Drop` impl; create a new one so our ownership is visible,
                // rather than hidden in an unlinked file.
                continue;
            }

            return Ok(Self { path, file });
        }
    }
}

impl Drop for FileLock {
    #[instrument(skip_all)]
    fn drop(&mut self) {
        // Removing the file isn't strictly necessary, but reduces confusion.
        _ = std::fs::remove_file(&self.path);
        // Unblock any processes that tried to acquire the lock while we held
        // it. They're responsible for creating and locking a new lockfile,
        // since we just deleted this one.
        _ = rustix::fs::flock(&self.file, FlockOperation::Unlock);
    }
}
