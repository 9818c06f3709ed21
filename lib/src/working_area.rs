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

//! What survives a checkout and what gets packed.
//!
//! Files produced on top of the versioned content (build output, caches)
//! must survive checkout cycles, so cleanup honors an exclusion set. The
//! history store and the control record always survive cleanup and are
//! always packed; transient build artefacts are packed never.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use crate::archive_info::ARCHIVE_INFO_FILE;
use crate::file_util::IoResultExt as _;
use crate::file_util::PathError;
use crate::git_store::HISTORY_DIR;

/// Path suffixes never written into a packed archive: the ignore file,
/// compiled classes, manifest files, a legacy project descriptor, and backup
/// files.
pub const PACK_EXCLUDE_ENDINGS: &[&str] =
    &[".gitignore", ".class", "MANIFEST.MF", ".project", "~"];

/// Paths and file-name suffixes that survive working-area cleanup.
///
/// The history store directory and the control record are always excluded;
/// callers extend the set with relative paths and suffixes of their own.
#[derive(Clone, Debug, Default)]
pub struct CleanupExcludes {
    paths: Vec<PathBuf>,
    endings: Vec<String>,
}

impl CleanupExcludes {
    pub fn new() -> Self {
        CleanupExcludes::default()
    }

    /// Extends the set with paths relative to the working area.
    pub fn add_paths(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
        self.paths.extend(paths);
    }

    /// Replaces the caller-supplied suffix set.
    pub fn set_endings(&mut self, endings: impl IntoIterator<Item = String>) {
        self.endings = endings.into_iter().collect();
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn endings(&self) -> &[String] {
        &self.endings
    }

    /// Whether the entry at `relative` (with file name `name`) survives
    /// cleanup.
    pub fn is_excluded(&self, relative: &Path, name: &str) -> bool {
        if relative.starts_with(HISTORY_DIR) || relative == Path::new(ARCHIVE_INFO_FILE) {
            return true;
        }
        self.paths.iter().any(|p| relative.starts_with(p))
            || self.endings.iter().any(|end| name.ends_with(end))
    }
}

/// The suffix set handed to the codec at pack time: the fixed base set plus
/// the caller-supplied exclusions. The history store and the control record
/// are deliberately not in it.
pub fn pack_excludes(excludes: &CleanupExcludes) -> Vec<String> {
    let mut endings: Vec<String> = PACK_EXCLUDE_ENDINGS
        .iter()
        .map(|s| s.to_string())
        .collect();
    endings.extend(excludes.endings().iter().cloned());
    for path in excludes.paths() {
        let components: Vec<_> = path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        endings.push(components.join("/"));
    }
    endings
}

/// Deletes everything under `root` except excluded entries. Directories left
/// empty are removed; excluded subtrees are kept whole.
pub fn clear_working_area(root: &Path, excludes: &CleanupExcludes) -> Result<(), PathError> {
    clear_dir(root, root, excludes)?;
    Ok(())
}

fn clear_dir(root: &Path, dir: &Path, excludes: &CleanupExcludes) -> Result<bool, PathError> {
    let mut kept_any = false;
    for entry in fs::read_dir(dir).context(dir)? {
        let entry = entry.context(dir)?;
        let path = entry.path();
        let relative = path.strip_prefix(root).expect("entry must be under root");
        let name = entry.file_name().to_string_lossy().into_owned();
        if excludes.is_excluded(relative, &name) {
            kept_any = true;
            continue;
        }
        let file_type = entry.file_type().context(&path)?;
        if file_type.is_dir() {
            if clear_dir(root, &path, excludes)? {
                kept_any = true;
            } else {
                fs::remove_dir(&path).context(&path)?;
            }
        } else {
            fs::remove_file(&path).context(&path)?;
        }
    }
    Ok(kept_any)
}
