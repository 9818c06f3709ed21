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

//! Packing a folder into a single archive file and back.

use std::fs;
use std::fs::File;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;
use tracing::instrument;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;
use zip::ZipArchive;
use zip::ZipWriter;

use crate::file_util::IoResultExt as _;
use crate::file_util::PathError;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Archive format error in {path}")]
    Format {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error(transparent)]
    Io(#[from] PathError),
}

/// Turns a folder into a single archive file and back.
///
/// Implementations must preserve directory structure, store entry names with
/// forward slashes and UTF-8 encoding, and replace an existing destination
/// file on `pack`. Symbolic links are not required to survive.
pub trait ArchiveCodec {
    /// Writes the folder's content (recursively) as an archive file. Paths
    /// whose forward-slash relative form ends in any of `excluded_endings`
    /// are omitted.
    fn pack(
        &self,
        folder: &Path,
        dest_file: &Path,
        excluded_endings: &[String],
    ) -> Result<(), CodecError>;

    /// Materializes archive contents into `dest_folder`, creating
    /// intermediate directories.
    fn unpack(&self, archive: &Path, dest_folder: &Path) -> Result<(), CodecError>;

    /// Short format tag, e.g. `"ZIP"`.
    fn identifier(&self) -> &'static str;
}

/// The default codec: a plain deflate ZIP file.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZipCodec;

impl ZipCodec {
    fn pack_dir(
        &self,
        zip: &mut ZipWriter<File>,
        root: &Path,
        dir: &Path,
        excluded_endings: &[String],
        dest_file: &Path,
    ) -> Result<(), CodecError> {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut entries: Vec<_> = fs::read_dir(dir)
            .context(dir)?
            .collect::<io::Result<_>>()
            .context(dir)?;
        // Deterministic entry order keeps repeated packs comparable.
        entries.sort_by_key(|entry| entry.file_name());
        let mut wrote_any = false;
        for entry in entries {
            let path = entry.path();
            let name = entry_name(root, &path);
            if excluded_endings.iter().any(|end| name.ends_with(end)) {
                continue;
            }
            wrote_any = true;
            let file_type = entry.file_type().context(&path)?;
            if file_type.is_dir() {
                self.pack_dir(zip, root, &path, excluded_endings, dest_file)?;
            } else {
                zip.start_file(name, options).map_err(|source| {
                    CodecError::Format {
                        path: dest_file.to_path_buf(),
                        source,
                    }
                })?;
                let mut file = File::open(&path).context(&path)?;
                io::copy(&mut file, zip).context(&path)?;
            }
        }
        if !wrote_any && dir != root {
            // Keep empty directories as explicit entries.
            let options = SimpleFileOptions::default();
            zip.add_directory(format!("{}/", entry_name(root, dir)), options)
                .map_err(|source| CodecError::Format {
                    path: dest_file.to_path_buf(),
                    source,
                })?;
        }
        Ok(())
    }
}

fn entry_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).expect("entry must be under root");
    let components: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    components.join("/")
}

impl ArchiveCodec for ZipCodec {
    #[instrument(skip(self, excluded_endings))]
    fn pack(
        &self,
        folder: &Path,
        dest_file: &Path,
        excluded_endings: &[String],
    ) -> Result<(), CodecError> {
        let file = File::create(dest_file).context(dest_file)?;
        let mut zip = ZipWriter::new(file);
        self.pack_dir(&mut zip, folder, folder, excluded_endings, dest_file)?;
        zip.finish().map_err(|source| CodecError::Format {
            path: dest_file.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn unpack(&self, archive: &Path, dest_folder: &Path) -> Result<(), CodecError> {
        fs::create_dir_all(dest_folder).context(dest_folder)?;
        let file = File::open(archive).context(archive)?;
        let mut zip = ZipArchive::new(file).map_err(|source| CodecError::Format {
            path: archive.to_path_buf(),
            source,
        })?;
        zip.extract(dest_folder).map_err(|source| CodecError::Format {
            path: archive.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    fn identifier(&self) -> &'static str {
        "ZIP"
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn string_vec(endings: &[&str]) -> Vec<String> {
        endings.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_pack_unpack_round_trip() {
        let temp_dir = testutils::new_temp_dir();
        let src = temp_dir.path().join("src");
        fs::create_dir_all(src.join("a/b")).unwrap();
        fs::create_dir_all(src.join("empty")).unwrap();
        fs::write(src.join("top.txt"), b"top").unwrap();
        fs::write(src.join("a/b/deep.txt"), b"deep").unwrap();

        let archive = temp_dir.path().join("packed.vfile");
        let codec = ZipCodec;
        codec.pack(&src, &archive, &[]).unwrap();

        let out = temp_dir.path().join("out");
        codec.unpack(&archive, &out).unwrap();
        assert_eq!(fs::read(out.join("top.txt")).unwrap(), b"top");
        assert_eq!(fs::read(out.join("a/b/deep.txt")).unwrap(), b"deep");
        assert!(out.join("empty").is_dir());
    }

    #[test]
    fn test_pack_replaces_existing_destination() {
        let temp_dir = testutils::new_temp_dir();
        let src = temp_dir.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("file.txt"), b"new content").unwrap();

        let archive = temp_dir.path().join("packed.vfile");
        fs::write(&archive, b"stale bytes").unwrap();
        let codec = ZipCodec;
        codec.pack(&src, &archive, &[]).unwrap();

        let out = temp_dir.path().join("out");
        codec.unpack(&archive, &out).unwrap();
        assert_eq!(fs::read(out.join("file.txt")).unwrap(), b"new content");
    }

    #[test]
    fn test_pack_excluded_endings() {
        let temp_dir = testutils::new_temp_dir();
        let src = temp_dir.path().join("src");
        fs::create_dir_all(src.join("build")).unwrap();
        fs::write(src.join("keep.txt"), b"keep").unwrap();
        fs::write(src.join("drop.class"), b"drop").unwrap();
        fs::write(src.join("build/App.class"), b"drop").unwrap();
        fs::write(src.join("build/notes.txt"), b"keep").unwrap();

        let archive = temp_dir.path().join("packed.vfile");
        let codec = ZipCodec;
        codec
            .pack(&src, &archive, &string_vec(&[".class"]))
            .unwrap();

        let out = temp_dir.path().join("out");
        codec.unpack(&archive, &out).unwrap();
        assert!(out.join("keep.txt").is_file());
        assert!(out.join("build/notes.txt").is_file());
        assert!(!out.join("drop.class").exists());
        assert!(!out.join("build/App.class").exists());
    }

    #[test]
    fn test_unpack_rejects_non_archive() {
        let temp_dir = testutils::new_temp_dir();
        let archive = temp_dir.path().join("garbage.vfile");
        fs::write(&archive, b"not a zip").unwrap();
        let codec = ZipCodec;
        let result = codec.unpack(&archive, &temp_dir.path().join("out"));
        assert!(matches!(result, Err(CodecError::Format { .. })));
    }

    #[test]
    fn test_identifier() {
        assert_eq!(ZipCodec.identifier(), "ZIP");
    }
}
