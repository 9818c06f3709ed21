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
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use varchive_lib::archive_codec::ZipCodec;
use varchive_lib::registry::SessionRegistry;
use varchive_lib::settings::SessionSettings;
use varchive_lib::versioned_file::SessionOptions;
use varchive_lib::versioned_file::VersionedFile;
use varchive_lib::workspace::SandboxBase;

pub fn new_temp_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("varchive-test-")
        .tempdir()
        .unwrap()
}

pub fn user_settings() -> SessionSettings {
    SessionSettings::default().with_author("Test User")
}

/// A self-contained environment for one test: its own sandbox base (so the
/// process-global tmp folder stays untouched), its own session registry, and
/// a directory for archive files.
pub struct TestEnv {
    _temp_dir: TempDir,
    pub base: Arc<SandboxBase>,
    pub registry: Arc<SessionRegistry>,
    archive_dir: PathBuf,
}

impl TestEnv {
    pub fn init() -> Self {
        Self::init_with_settings(&user_settings())
    }

    pub fn init_with_settings(settings: &SessionSettings) -> Self {
        let temp_dir = new_temp_dir();
        let base = SandboxBase::init(temp_dir.path().join("tmpbase"), settings).unwrap();
        let archive_dir = temp_dir.path().join("archives");
        fs::create_dir(&archive_dir).unwrap();
        TestEnv {
            _temp_dir: temp_dir,
            base,
            registry: Arc::new(SessionRegistry::new()),
            archive_dir,
        }
    }

    pub fn archive_path(&self, name: &str) -> PathBuf {
        self.archive_dir.join(name)
    }

    pub fn options(&self) -> SessionOptions {
        self.options_with_settings(user_settings())
    }

    pub fn options_with_settings(&self, settings: SessionSettings) -> SessionOptions {
        SessionOptions {
            codec: Box::new(ZipCodec),
            settings,
            sandbox_base: self.base.clone(),
            registry: self.registry.clone(),
        }
    }

    /// A closed session for `<archives>/<name>`.
    pub fn new_session(&self, name: &str) -> VersionedFile {
        VersionedFile::with_options(self.archive_path(name), self.options()).unwrap()
    }
}

pub fn write_file(dir: &Path, relative: &str, content: &str) {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
}

pub fn append_file(dir: &Path, relative: &str, content: &str) {
    let path = dir.join(relative);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
}

pub fn read_file(dir: &Path, relative: &str) -> String {
    fs::read_to_string(dir.join(relative)).unwrap()
}

/// Appends `count` numbered lines to `relative`, committing after each one.
/// Returns the line written for each version, 1-based.
pub fn commit_numbered_lines(
    session: &mut VersionedFile,
    relative: &str,
    count: usize,
) -> Vec<String> {
    let mut lines = Vec::new();
    for i in 1..=count {
        let line = format!("NanoTime {i}: {}\n", i * 1000);
        let content_dir = session.content().unwrap().to_path_buf();
        append_file(&content_dir, relative, &line);
        session.commit(&format!("ts{i}")).unwrap();
        lines.push(line);
    }
    lines
}

/// Checks that all test files in `test_dir` are declared as modules of the
/// test runner binary.
pub fn assert_no_forgotten_test_files(test_dir: &Path) {
    let runner = fs::read_to_string(test_dir.join("runner.rs")).unwrap();
    for entry in fs::read_dir(test_dir).unwrap() {
        let entry = entry.unwrap();
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(module) = name.strip_suffix(".rs") {
            if module != "runner" {
                assert!(
                    runner.contains(&format!("mod {module};")),
                    "test file {name} is not declared in runner.rs"
                );
            }
        }
    }
}
