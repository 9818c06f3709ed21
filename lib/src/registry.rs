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

//! The session registry: the set of absolute archive paths currently owned
//! by a live session. It enforces the one-live-session-per-archive invariant
//! within a process.

use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use once_cell::sync::Lazy;

/// An atomic set of claimed paths. Sessions claim their archive path here;
/// the workspace allocator reuses the same type to track claimed sandboxes.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: Mutex<HashSet<PathBuf>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry::default()
    }

    /// Claims `path`. Returns false if it was already claimed.
    pub fn claim(&self, path: &Path) -> bool {
        self.inner.lock().unwrap().insert(path.to_path_buf())
    }

    pub fn release(&self, path: &Path) {
        self.inner.lock().unwrap().remove(path);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.inner.lock().unwrap().contains(path)
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}

static GLOBAL_REGISTRY: Lazy<Arc<SessionRegistry>> =
    Lazy::new(|| Arc::new(SessionRegistry::new()));

/// The process-wide registry used by sessions constructed without explicit
/// options.
pub fn global_registry() -> Arc<SessionRegistry> {
    GLOBAL_REGISTRY.clone()
}

/// Escape hatch: forgets every registered archive path. Sessions that are
/// still live afterwards lose their exclusivity guarantee; only use this to
/// recover from a session that was leaked without being closed.
pub fn clear_session_registry() {
    GLOBAL_REGISTRY.clear();
}
