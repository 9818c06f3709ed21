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

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use testutils::append_file;
use testutils::commit_numbered_lines;
use testutils::read_file;
use testutils::write_file;
use testutils::TestEnv;
use varchive_lib::archive_codec::ArchiveCodec as _;
use varchive_lib::archive_codec::ZipCodec;
use varchive_lib::history_store::CommitRecord;
use varchive_lib::versioned_file::VersionEventListener;
use varchive_lib::versioned_file::VersionedFile;
use varchive_lib::versioned_file::VersionedFileError;

#[test]
fn test_create_commit_navigate() {
    let env = TestEnv::init();
    let mut vf = env.new_session("project.vfile");
    vf.create().unwrap().open().unwrap();

    let content = vf.content().unwrap().to_path_buf();
    write_file(&content, "file1.txt", "");
    vf.commit("empty").unwrap();
    append_file(&content, "file1.txt", "NanoTime 1: 1000\n");
    vf.commit("ts1").unwrap();
    append_file(&content, "file1.txt", "NanoTime 2: 2000\n");
    vf.commit("ts2").unwrap();
    assert_eq!(vf.number_of_versions().unwrap(), 3);

    vf.checkout_latest_version().unwrap();
    assert_eq!(read_file(&content, "file1.txt").lines().count(), 2);
    vf.checkout_previous_version().unwrap();
    assert_eq!(read_file(&content, "file1.txt").lines().count(), 1);
    vf.checkout_previous_version().unwrap();
    assert_eq!(read_file(&content, "file1.txt").lines().count(), 0);
    assert!(!vf.has_previous_version().unwrap());
    assert!(vf.has_next_version().unwrap());

    vf.checkout_next_version().unwrap();
    assert_eq!(vf.current_version(), 2);
    vf.close().unwrap();
}

#[test]
fn test_per_version_consistency() {
    let num_commits = 20;
    let env = TestEnv::init();
    let mut vf = env.new_session("project.vfile");
    vf.create().unwrap().open().unwrap();
    let lines = commit_numbered_lines(&mut vf, "timestamps.txt", num_commits);

    let content = vf.content().unwrap().to_path_buf();
    for version in 1..=num_commits {
        vf.checkout_version(version).unwrap();
        let text = read_file(&content, "timestamps.txt");
        let file_lines: Vec<_> = text.lines().collect();
        assert_eq!(file_lines.len(), version);
        assert_eq!(
            format!("{}\n", file_lines[version - 1]),
            lines[version - 1]
        );
    }
    vf.close().unwrap();
}

#[test]
fn test_commit_round_trip_leaves_tree_clean() {
    let env = TestEnv::init();
    let mut vf = env.new_session("project.vfile");
    vf.create().unwrap().open().unwrap();
    let content = vf.content().unwrap().to_path_buf();

    write_file(&content, "dir/data.txt", "payload");
    vf.commit("add data").unwrap();
    vf.checkout_latest_version().unwrap();
    assert_eq!(read_file(&content, "dir/data.txt"), "payload");
    assert!(!vf.has_uncommitted_changes().unwrap());
    vf.close().unwrap();
}

#[test]
fn test_reopen_preserves_versions() {
    let env = TestEnv::init();
    let archive = env.archive_path("project.vfile");
    let mut snapshots = Vec::new();
    {
        let mut vf = env.new_session("project.vfile");
        vf.create().unwrap().open().unwrap();
        let content = vf.content().unwrap().to_path_buf();
        for i in 1..=3 {
            write_file(&content, "doc.txt", &format!("revision {i}"));
            vf.commit(&format!("commit {i}")).unwrap();
            snapshots.push(format!("revision {i}"));
        }
        vf.close().unwrap();
        assert!(!vf.is_opened());
    }
    assert!(VersionedFile::exists(&archive));

    let mut vf = env.new_session("project.vfile");
    vf.open().unwrap();
    assert_eq!(vf.number_of_versions().unwrap(), 3);
    let content = vf.content().unwrap().to_path_buf();
    for (i, expected) in snapshots.iter().enumerate() {
        vf.checkout_version(i + 1).unwrap();
        assert_eq!(&read_file(&content, "doc.txt"), expected);
    }
    vf.close().unwrap();
}

#[test]
fn test_versions_are_ordered_oldest_first() {
    let env = TestEnv::init();
    let mut vf = env.new_session("project.vfile");
    vf.create().unwrap().open().unwrap();
    let content = vf.content().unwrap().to_path_buf();
    for i in 1..=4 {
        write_file(&content, "doc.txt", &format!("revision {i}"));
        vf.commit(&format!("commit {i}")).unwrap();
    }
    let versions = vf.versions().unwrap();
    assert_eq!(versions.len(), 4);
    let messages: Vec<_> = versions.iter().map(|v| v.message.as_str()).collect();
    assert_eq!(
        messages,
        vec!["commit 1", "commit 2", "commit 3", "commit 4"]
    );
    for window in versions.windows(2) {
        assert_eq!(window[1].parents, vec![window[0].id.clone()]);
    }
    assert_eq!(versions[0].author, "Test User");
    vf.close().unwrap();
}

#[test]
fn test_second_open_fails() {
    let env = TestEnv::init();
    let mut first = env.new_session("project.vfile");
    first.create().unwrap().open().unwrap();

    let mut second = env.new_session("project.vfile");
    assert_matches!(
        second.open(),
        Err(VersionedFileError::AlreadyOpen(_))
    );
    first.close().unwrap();

    // after the first session closed, the archive can be opened again
    second.open().unwrap();
    second.close().unwrap();
}

#[test]
fn test_operations_require_open_session() {
    let env = TestEnv::init();
    let mut vf = env.new_session("project.vfile");
    vf.create().unwrap();
    assert_matches!(vf.content(), Err(VersionedFileError::NotOpen(_)));
    assert_matches!(vf.commit("nope"), Err(VersionedFileError::NotOpen(_)));
    assert_matches!(
        vf.checkout_version(1),
        Err(VersionedFileError::NotOpen(_))
    );
    // flush is a no-op on a closed session
    vf.flush().unwrap();
}

#[test]
fn test_checkout_version_out_of_range() {
    let env = TestEnv::init();
    let mut vf = env.new_session("project.vfile");
    vf.create().unwrap().open().unwrap();
    let content = vf.content().unwrap().to_path_buf();
    write_file(&content, "doc.txt", "v1");
    vf.commit("commit 1").unwrap();

    assert_matches!(
        vf.checkout_version(0),
        Err(VersionedFileError::InvalidVersion { index: 0, max: 1 })
    );
    assert_matches!(
        vf.checkout_version(2),
        Err(VersionedFileError::InvalidVersion { index: 2, max: 1 })
    );
    vf.close().unwrap();
}

#[test]
fn test_create_twice_fails() {
    let env = TestEnv::init();
    let mut vf = env.new_session("project.vfile");
    vf.create().unwrap();
    assert_matches!(vf.create(), Err(VersionedFileError::ArchiveExists(_)));
}

#[test]
fn test_open_missing_archive_fails() {
    let env = TestEnv::init();
    let mut vf = env.new_session("missing.vfile");
    assert_matches!(vf.open(), Err(VersionedFileError::ArchiveMissing(_)));
}

#[test]
fn test_excluded_files_survive_checkout() {
    let env = TestEnv::init();
    let mut vf = env.new_session("project.vfile");
    vf.create().unwrap().open().unwrap();
    vf.set_exclude_endings_from_cleanup([".bin".to_string()]);
    vf.exclude_paths_from_cleanup([PathBuf::from("cache")]);
    let content = vf.content().unwrap().to_path_buf();

    write_file(&content, "doc.txt", "v1");
    vf.commit("commit 1").unwrap();
    write_file(&content, "doc.txt", "v2");
    vf.commit("commit 2").unwrap();

    // application state created on top of the versioned content
    write_file(&content, "state.bin", "runtime state");
    write_file(&content, "cache/entry", "cached");

    vf.checkout_version(1).unwrap();
    assert_eq!(read_file(&content, "doc.txt"), "v1");
    assert_eq!(read_file(&content, "state.bin"), "runtime state");
    assert_eq!(read_file(&content, "cache/entry"), "cached");
    vf.close().unwrap();
}

#[test]
fn test_uncommitted_changes_with_endings_filter() {
    let env = TestEnv::init();
    let mut vf = env.new_session("project.vfile");
    vf.create().unwrap().open().unwrap();
    let content = vf.content().unwrap().to_path_buf();
    write_file(&content, "doc.txt", "v1");
    write_file(&content, "notes.md", "n");
    vf.commit("commit 1").unwrap();
    assert!(!vf.has_uncommitted_changes().unwrap());

    write_file(&content, "doc.txt", "v2");
    write_file(&content, "extra.md", "m");
    let all = vf.uncommitted_changes(&[]).unwrap();
    assert!(all.contains("doc.txt"));
    assert!(all.contains("extra.md"));
    let md_only = vf.uncommitted_changes(&[".md".to_string()]).unwrap();
    assert!(md_only.contains("extra.md"));
    assert!(!md_only.contains("doc.txt"));
    vf.close().unwrap();
}

#[derive(Default)]
struct RecordingListener {
    pre: Mutex<Vec<CommitRecord>>,
    post: Mutex<Vec<CommitRecord>>,
}

impl VersionEventListener for RecordingListener {
    fn pre_checkout(&self, commit: &CommitRecord) {
        self.pre.lock().unwrap().push(commit.clone());
    }

    fn post_checkout(&self, commit: &CommitRecord) {
        self.post.lock().unwrap().push(commit.clone());
    }
}

#[test]
fn test_checkout_listeners() {
    let env = TestEnv::init();
    let mut vf = env.new_session("project.vfile");
    vf.create().unwrap().open().unwrap();
    let content = vf.content().unwrap().to_path_buf();
    write_file(&content, "doc.txt", "v1");
    vf.commit("commit 1").unwrap();
    write_file(&content, "doc.txt", "v2");
    vf.commit("commit 2").unwrap();

    let listener = Arc::new(RecordingListener::default());
    let as_dyn: Arc<dyn VersionEventListener> = listener.clone();
    vf.add_version_event_listener(as_dyn.clone());

    vf.checkout_version(1).unwrap();
    {
        let pre = listener.pre.lock().unwrap();
        let post = listener.post.lock().unwrap();
        assert_eq!(pre.len(), 1);
        assert_eq!(post.len(), 1);
        assert_eq!(pre[0].message, "commit 1");
        assert_eq!(pre[0].id, post[0].id);
    }

    vf.remove_version_event_listener(&as_dyn);
    vf.checkout_version(2).unwrap();
    assert_eq!(listener.pre.lock().unwrap().len(), 1);
    vf.close().unwrap();
}

#[test]
fn test_delete_history_collapses_to_single_version() {
    let env = TestEnv::init();
    let mut vf = env.new_session("project.vfile");
    vf.create().unwrap().open().unwrap();
    let content = vf.content().unwrap().to_path_buf();
    for i in 1..=3 {
        write_file(&content, "doc.txt", &format!("revision {i}"));
        vf.commit(&format!("commit {i}")).unwrap();
    }

    vf.delete_history().unwrap();
    assert_eq!(vf.number_of_versions().unwrap(), 1);
    let versions = vf.versions().unwrap();
    assert_eq!(versions[0].message, "initial commit (cleared history)");
    assert_eq!(read_file(&content, "doc.txt"), "revision 3");
    vf.checkout_version(1).unwrap();
    assert_eq!(read_file(&content, "doc.txt"), "revision 3");
    vf.close().unwrap();
}

#[test]
fn test_switch_to_new_archive() {
    let env = TestEnv::init();
    let mut vf = env.new_session("project.vfile");
    vf.create().unwrap().open().unwrap();
    let old_content = vf.content().unwrap().to_path_buf();
    write_file(&old_content, "doc.txt", "v1");
    vf.commit("commit 1").unwrap();

    let dest = env.archive_path("moved.vfile");
    vf.switch_to_new_archive(&dest).unwrap();
    assert!(env.archive_path("project.vfile").exists());
    assert!(dest.exists());
    let new_content = vf.content().unwrap().to_path_buf();
    assert_ne!(old_content, new_content);
    assert!(!old_content.exists());
    assert_eq!(read_file(&new_content, "doc.txt"), "v1");

    write_file(&new_content, "doc.txt", "v2");
    vf.commit("commit 2").unwrap();
    vf.close().unwrap();

    let mut reopened =
        VersionedFile::with_options(&dest, env.options()).unwrap();
    reopened.open().unwrap();
    assert_eq!(reopened.number_of_versions().unwrap(), 2);
    reopened.close().unwrap();
}

#[test]
fn test_flush_keeps_backup() {
    let env = TestEnv::init();
    let archive = env.archive_path("project.vfile");
    let mut vf = env.new_session("project.vfile");
    vf.create().unwrap().open().unwrap();
    let content = vf.content().unwrap().to_path_buf();
    write_file(&content, "doc.txt", "v1");
    vf.commit("commit 1").unwrap();
    vf.flush().unwrap();

    let backup = archive.with_file_name("project.vfile~");
    assert!(backup.exists());
    // the backup is the pre-flush archive: the freshly created, empty one
    let unpacked = testutils::new_temp_dir();
    ZipCodec.unpack(&backup, unpacked.path()).unwrap();
    assert!(!unpacked.path().join("doc.txt").exists());
    vf.close().unwrap();
}

#[test]
fn test_cleanup_is_idempotent_on_closed_session() {
    let env = TestEnv::init();
    let mut vf = env.new_session("project.vfile");
    vf.create().unwrap();
    vf.cleanup().unwrap();
    vf.cleanup().unwrap();
    assert!(!vf.is_opened());
}

#[test]
fn test_flush_on_commit_setting() {
    let env = TestEnv::init();
    let archive = env.archive_path("project.vfile");
    let settings = testutils::user_settings().with_flush_on_commit(true);
    let mut vf = VersionedFile::with_options(
        &archive,
        env.options_with_settings(settings),
    )
    .unwrap();
    vf.create().unwrap().open().unwrap();
    let content = vf.content().unwrap().to_path_buf();
    let before = fs::metadata(&archive).unwrap().len();
    write_file(&content, "doc.txt", "enough bytes to change the archive size");
    vf.commit("commit 1").unwrap();
    let after = fs::metadata(&archive).unwrap().len();
    assert_ne!(before, after);
    vf.close().unwrap();
}
