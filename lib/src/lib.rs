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

//! Versioned single-file document archives.
//!
//! A VArchive is a single file on disk (a ZIP archive by default) that
//! internally stores the full revision history of a directory tree. A
//! [`versioned_file::VersionedFile`] session materializes the archive into a
//! locked temporary working area, accepts commits and checkouts against the
//! embedded history store, and repacks the archive on flush/close.

#![deny(unused_must_use)]

pub mod archive_codec;
pub mod archive_info;
pub mod file_util;
pub mod git_store;
pub mod history_store;
pub mod lock;
pub mod registry;
pub mod settings;
pub mod versioned_file;
pub mod working_area;
pub mod workspace;
