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

//! Sandbox allocation: per-archive temporary working areas under a locked,
//! generation-rotated base directory.

use std::env;
use std::fs;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use rand::distributions::Alphanumeric;
use rand::Rng as _;
use thiserror::Error;
use tracing::instrument;

use crate::file_util::IoResultExt as _;
use crate::file_util::PathError;
use crate::lock::FileLock;
use crate::lock::FileLockError;
use crate::registry::SessionRegistry;
use crate::settings::SessionSettings;

/// Lock file marking the sandbox base as owned by a running process.
pub const LOCK_FILE: &str = ".lock";

const SANDBOX_SUFFIX: &str = ".vtmp";
const MAX_SANDBOX_SLOTS: usize = 10_000;
const MAX_PREFIX_ATTEMPTS: usize = 10;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The process-wide temporary folder was already configured.
    #[error("Temporary folder already initialized")]
    TmpAlreadyInitialized,
    #[error("No free sandbox name under {0}")]
    SandboxExhausted(PathBuf),
    #[error("Archive path {0} has no parent directory")]
    NoParent(PathBuf),
    #[error(transparent)]
    Lock(#[from] FileLockError),
    #[error(transparent)]
    Io(#[from] PathError),
}

/// The root directory under which all per-archive sandboxes are created.
///
/// Initialization rotates the numbered crash-salvage generations, then takes
/// an advisory lock on `<root>/.lock`. The lock coordinates cooperating
/// VArchive processes only (it is advisory, not mandatory) and is held until
/// the base is dropped; for the process-global base that means process exit.
pub struct SandboxBase {
    root: PathBuf,
    current: PathBuf,
    claims: SessionRegistry,
    _lock: FileLock,
}

impl std::fmt::Debug for SandboxBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxBase")
            .field("root", &self.root)
            .finish()
    }
}

impl SandboxBase {
    /// Creates (or re-enters) a sandbox base at `root`.
    #[instrument(skip(settings))]
    pub fn init(
        root: impl Into<PathBuf> + std::fmt::Debug,
        settings: &SessionSettings,
    ) -> Result<Arc<SandboxBase>, WorkspaceError> {
        let root = root.into();
        fs::create_dir_all(&root).context(&root)?;
        let lock = FileLock::lock_with(root.join(LOCK_FILE), settings.lock_retry())?;
        rotate_generations(&root, settings.backup_generations())?;
        let current = root.join("0");
        Ok(Arc::new(SandboxBase {
            root,
            current,
            claims: SessionRegistry::new(),
            _lock: lock,
        }))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The generation directory current sandboxes are allocated under.
    pub fn current_generation(&self) -> &Path {
        &self.current
    }

    /// The sandbox directory for `archive`: the archive's absolute path
    /// mirrored under the current generation, with a `.vtmp<k>` suffix.
    ///
    /// `k` is the smallest index whose directory either does not exist or is
    /// not claimed by a live session of this process. Re-using an unclaimed
    /// existing directory is what lets a new session attach to (and clean
    /// up) a sandbox left behind by a crashed run.
    pub fn sandbox_path_for(&self, archive: &Path) -> Result<PathBuf, WorkspaceError> {
        let (parent, name) = self.mirrored_location(archive)?;
        for k in 0..MAX_SANDBOX_SLOTS {
            let candidate = parent.join(format!("{name}{SANDBOX_SUFFIX}{k}"));
            if !candidate.exists() || !self.claims.contains(&candidate) {
                return Ok(candidate);
            }
        }
        Err(WorkspaceError::SandboxExhausted(parent))
    }

    /// A randomly prefixed sandbox path for `archive` that does not exist
    /// yet. Used for the read-only second open during the overwrite-safety
    /// check, so it never collides with the primary sandbox.
    pub fn prefixed_sandbox_path_for(&self, archive: &Path) -> Result<PathBuf, WorkspaceError> {
        let (parent, name) = self.mirrored_location(archive)?;
        for _ in 0..MAX_PREFIX_ATTEMPTS {
            let token: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(8)
                .map(char::from)
                .collect();
            let candidate = parent.join(format!("{token}-{name}{SANDBOX_SUFFIX}0"));
            if !candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(WorkspaceError::SandboxExhausted(parent))
    }

    /// Marks a sandbox as in use by a live session of this process.
    pub fn claim_sandbox(&self, sandbox: &Path) -> bool {
        self.claims.claim(sandbox)
    }

    pub fn release_sandbox(&self, sandbox: &Path) {
        self.claims.release(sandbox);
    }

    fn mirrored_location(&self, archive: &Path) -> Result<(PathBuf, String), WorkspaceError> {
        let parent = archive
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| WorkspaceError::NoParent(archive.to_path_buf()))?;
        let name = archive
            .file_name()
            .ok_or_else(|| WorkspaceError::NoParent(archive.to_path_buf()))?
            .to_string_lossy()
            .into_owned();
        Ok((self.current.join(mirror_path(parent)), name))
    }
}

/// Mirrors an absolute path into a relative one: the leading `/` is stripped
/// on POSIX, and `C:\...` becomes `Drive_C\...` on Windows.
pub fn mirror_path(absolute: &Path) -> PathBuf {
    let mut mirrored = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Prefix(prefix) => {
                let text = prefix.as_os_str().to_string_lossy();
                let drive = text.trim_end_matches(':').trim_start_matches(r"\\?\");
                mirrored.push(format!("Drive_{drive}"));
            }
            Component::ParentDir => mirrored.push("__parent__"),
            Component::Normal(part) => mirrored.push(part),
        }
    }
    mirrored
}

/// Shallow rotation of the numbered generations under `root`: entries that
/// are not pure decimals or fall outside `max` generations are deleted, the
/// oldest generation is dropped, the rest shift one up, and a fresh `0` is
/// created.
fn rotate_generations(root: &Path, max: usize) -> Result<(), PathError> {
    let max = max.max(1);
    for entry in fs::read_dir(root).context(root)? {
        let entry = entry.context(root)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == LOCK_FILE {
            continue;
        }
        let generation = name.parse::<usize>().ok();
        let in_range = generation.is_some_and(|g| g < max);
        if !in_range {
            let path = entry.path();
            if entry.file_type().context(&path)?.is_dir() {
                crate::file_util::remove_dir_forcibly(&path)?;
            } else {
                fs::remove_file(&path).context(&path)?;
            }
        }
    }
    for k in (0..max).rev() {
        let from = root.join(k.to_string());
        if !from.exists() {
            continue;
        }
        if k + 1 == max {
            crate::file_util::remove_dir_forcibly(&from)?;
        } else {
            let to = root.join((k + 1).to_string());
            fs::rename(&from, &to).context(&to)?;
        }
    }
    let current = root.join("0");
    fs::create_dir(&current).context(&current)?;
    Ok(())
}

static GLOBAL_BASE: OnceCell<Arc<SandboxBase>> = OnceCell::new();

/// Sets the process-wide sandbox base. May be called at most once, before
/// any session is created with the default options; a second call (or a call
/// after the default base was already brought up) fails with
/// [`WorkspaceError::TmpAlreadyInitialized`].
pub fn set_tmp_folder(path: impl Into<PathBuf> + std::fmt::Debug) -> Result<(), WorkspaceError> {
    if GLOBAL_BASE.get().is_some() {
        return Err(WorkspaceError::TmpAlreadyInitialized);
    }
    let base = SandboxBase::init(path, &SessionSettings::default())?;
    GLOBAL_BASE
        .set(base)
        .map_err(|_| WorkspaceError::TmpAlreadyInitialized)
}

/// The process-wide sandbox base, brought up under the operating-system temp
/// directory if [`set_tmp_folder`] was never called.
pub fn global_sandbox_base() -> Result<Arc<SandboxBase>, WorkspaceError> {
    let base = GLOBAL_BASE.get_or_try_init(|| {
        SandboxBase::init(env::temp_dir().join("varchive"), &SessionSettings::default())
    })?;
    Ok(base.clone())
}
