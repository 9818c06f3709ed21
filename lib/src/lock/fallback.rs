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
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::thread;

use tracing::instrument;

use super::exhausted;
use super::FileLockError;
use super::RetrySchedule;

pub struct FileLock {
    path: PathBuf,
    _file: File,
}

impl FileLock {
    pub fn lock(path: PathBuf) -> Result<FileLock, FileLockError> {
        Self::lock_with(path, RetrySchedule::default())
    }

    pub fn lock_with(path: PathBuf, schedule: RetrySchedule) -> Result<FileLock, FileLockError> {
        let mut options = OpenOptions::new();
        options.create_new(true);
        options.write(true);
        let mut attempts_left = schedule.attempts;
        loop {
            match options.open(&path) {
                Ok(file) => {
                    return Ok(FileLock {
                        path: path.clone(),
                        _file: file,
                    });
                }
                Err(err)
                    if err.kind() == io::ErrorKind::AlreadyExists
                        || (cfg!(windows) && err.kind() == io::ErrorKind::PermissionDenied) =>
                {
                    if attempts_left == 0 {
                        return Err(exhausted(path));
                    }
                    attempts_left -= 1;
                    thread::sleep(schedule.delay);
                }
                Err(err) => {
                    return Err(FileLockError {
                        message: "Failed to create lock file",
                        path,
                        err,
                    });
                }
            }
        }
    }
}

impl Drop for FileLock {
    #[instrument(skip_all)]
    fn drop(&mut self) {
        _ = std::fs::remove_file(&self.path);
    }
}
