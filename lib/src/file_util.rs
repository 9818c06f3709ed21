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

use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
#[error("Failed to access {path}")]
pub struct PathError {
    pub path: PathBuf,
    #[source]
    pub error: io::Error,
}

pub trait IoResultExt<T> {
    fn context(self, path: impl AsRef<Path>) -> Result<T, PathError>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn context(self, path: impl AsRef<Path>) -> Result<T, PathError> {
        self.map_err(|error| PathError {
            path: path.as_ref().to_path_buf(),
            error,
        })
    }
}

/// Turns a possibly relative path into an absolute one without touching the
/// filesystem beyond resolving the current directory. Existing paths are not
/// canonicalized, so the result is stable whether or not the file exists yet.
pub fn absolutize(path: &Path) -> Result<PathBuf, PathError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().context(path)?.join(path)
    };
    Ok(dunce::simplified(&absolute).to_path_buf())
}

/// Copies a directory tree. The destination directory is created if needed;
/// existing files in it are overwritten.
pub fn copy_dir_recursively(src: &Path, dst: &Path) -> Result<(), PathError> {
    fs::create_dir_all(dst).context(dst)?;
    for entry in fs::read_dir(src).context(src)? {
        let entry = entry.context(src)?;
        let file_type = entry.file_type().context(entry.path())?;
        let target = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_recursively(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).context(&target)?;
        }
    }
    Ok(())
}

/// Removes a directory tree, tolerating mandatory file locks on Windows.
///
/// On Unix an in-process recursive delete suffices. On Windows files held by
/// other processes cannot be deleted in-process; in that case deletion is
/// handed off to a detached shell command so that the directory eventually
/// disappears after the locks are released.
pub fn remove_dir_forcibly(path: &Path) -> Result<(), PathError> {
    if !path.exists() {
        return Ok(());
    }
    #[cfg(not(windows))]
    {
        fs::remove_dir_all(path).context(path)
    }
    #[cfg(windows)]
    {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::warn!(
                    ?path,
                    ?err,
                    "in-process deletion failed, deferring to shell"
                );
                std::process::Command::new("cmd")
                    .args(["/C", "rmdir", "/S", "/Q"])
                    .arg(path)
                    .spawn()
                    .context(path)?;
                Ok(())
            }
        }
    }
}
