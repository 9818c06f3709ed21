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

//! The control record identifying a valid versioned archive.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::file_util::IoResultExt as _;
use crate::file_util::PathError;

/// Relative path of the control record inside a working area (and inside the
/// packed archive).
pub const ARCHIVE_INFO_FILE: &str = ".versioned-file-info.json";

/// Format version written into newly created archives.
pub const CURRENT_FORMAT_VERSION: &str = "0.2";

/// `N(.N)*` with an optional trailing `.x` wildcard; a bare `x` matches any
/// format version.
static VERSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+(\.\d+)*(\.x)?|x)$").unwrap());

#[derive(Debug, Error)]
pub enum ArchiveInfoError {
    /// No control record; whatever was unpacked is not a versioned archive.
    #[error("Missing archive descriptor at {0}")]
    Missing(PathBuf),
    #[error("Malformed archive descriptor at {0}")]
    Malformed(PathBuf, #[source] serde_json::Error),
    #[error(r#"Invalid format version "{0}""#)]
    InvalidFormatVersion(String),
    #[error(transparent)]
    Io(#[from] PathError),
}

/// Small descriptor pinned at [`ARCHIVE_INFO_FILE`]. Its absence means the
/// file is not a valid versioned archive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveInfo {
    version: String,
    description: String,
}

impl ArchiveInfo {
    pub fn new(
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self, ArchiveInfoError> {
        let version = version.into();
        if !Self::is_valid_version(&version) {
            return Err(ArchiveInfoError::InvalidFormatVersion(version));
        }
        Ok(ArchiveInfo {
            version,
            description: description.into(),
        })
    }

    pub fn is_valid_version(version: &str) -> bool {
        VERSION_PATTERN.is_match(version)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Reads the control record from a working area.
    pub fn load(working_area: &Path) -> Result<Self, ArchiveInfoError> {
        let path = working_area.join(ARCHIVE_INFO_FILE);
        if !path.is_file() {
            return Err(ArchiveInfoError::Missing(path));
        }
        let content = fs::read_to_string(&path).context(&path)?;
        let info: ArchiveInfo = serde_json::from_str(&content)
            .map_err(|err| ArchiveInfoError::Malformed(path.clone(), err))?;
        if !Self::is_valid_version(&info.version) {
            return Err(ArchiveInfoError::InvalidFormatVersion(info.version));
        }
        Ok(info)
    }

    /// Writes the control record into a working area.
    pub fn store(&self, working_area: &Path) -> Result<(), ArchiveInfoError> {
        let path = working_area.join(ARCHIVE_INFO_FILE);
        let content =
            serde_json::to_string_pretty(self).expect("descriptor serialization is infallible");
        fs::write(&path, content).context(&path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use test_case::test_case;

    use super::*;

    #[test_case("0.1", true)]
    #[test_case("1.2.3", true)]
    #[test_case("3.x", true)]
    #[test_case("x", true)]
    #[test_case("42", true)]
    #[test_case("1..2", false)]
    #[test_case("1.a", false)]
    #[test_case("", false)]
    #[test_case(".1", false)]
    #[test_case("1.x.2", false)]
    fn test_version_grammar(version: &str, valid: bool) {
        assert_eq!(ArchiveInfo::is_valid_version(version), valid);
    }

    #[test]
    fn test_store_load_round_trip() {
        let temp_dir = testutils::new_temp_dir();
        let info = ArchiveInfo::new("0.2", "some document").unwrap();
        info.store(temp_dir.path()).unwrap();
        let loaded = ArchiveInfo::load(temp_dir.path()).unwrap();
        assert_eq!(loaded, info);
    }

    #[test]
    fn test_load_missing() {
        let temp_dir = testutils::new_temp_dir();
        assert_matches!(
            ArchiveInfo::load(temp_dir.path()),
            Err(ArchiveInfoError::Missing(_))
        );
    }

    #[test]
    fn test_load_rejects_bad_version() {
        let temp_dir = testutils::new_temp_dir();
        let path = temp_dir.path().join(ARCHIVE_INFO_FILE);
        std::fs::write(&path, r#"{"version": "1..2", "description": ""}"#).unwrap();
        assert_matches!(
            ArchiveInfo::load(temp_dir.path()),
            Err(ArchiveInfoError::InvalidFormatVersion(_))
        );
    }

    #[test]
    fn test_new_rejects_bad_version() {
        assert_matches!(
            ArchiveInfo::new("1.a", ""),
            Err(ArchiveInfoError::InvalidFormatVersion(_))
        );
    }
}
