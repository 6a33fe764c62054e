use std::{
    collections::BTreeSet,
    io::{BufRead, Write},
};

use anyhow::{Context, Result};
use indicatif::ProgressBar;

use crate::{
    git::{
        fast_export::FastExportParser,
        stream::{Blob, Commit, InterchangeObject, Reset, Tag},
    },
    marks::MarkTable,
    progress,
    remote::Remote,
    storage::{
        objects::{StoredCommit, StoredObject, StoredTag},
        StorageBackend,
    },
};

/// Writes the objects of a `git fast-export` stream into the store.
///
/// All bookkeeping happens on a private copy of the mark table; the caller
/// installs it only once the whole stream has been stored.
pub struct ExportEngine<'a, S> {
    storage: &'a S,
    marks: MarkTable,
    updated: BTreeSet<String>,
    progress: ProgressBar,
}

impl<'a, S: StorageBackend> ExportEngine<'a, S> {
    pub fn new(storage: &'a S, marks: MarkTable, progress: ProgressBar) -> Self {
        Self {
            storage,
            marks,
            updated: BTreeSet::new(),
            progress,
        }
    }

    /// Store one record. Returns false once the stream is finished.
    pub fn apply(&mut self, object: InterchangeObject) -> Result<bool> {
        match object {
            InterchangeObject::Blob(blob) => self.store_blob(blob)?,
            InterchangeObject::Commit(commit) => self.store_commit(commit)?,
            InterchangeObject::Reset(reset) => self.store_reset(reset)?,
            InterchangeObject::Tag(tag) => self.store_tag(tag)?,
            InterchangeObject::Feature(name) => {
                tracing::debug!("ignoring feature {}", name);
            }
            InterchangeObject::Done => return Ok(false),
        }
        Ok(true)
    }

    fn store_blob(&mut self, blob: Blob) -> Result<()> {
        let address = self.storage.put(&blob.data).context("Failed to store blob")?;
        match blob.mark {
            Some(mark) => {
                tracing::debug!("added blob {} as {}", mark, address);
                self.marks.bind_mark(mark, &address)?;
            }
            None => tracing::debug!("added unmarked blob as {}", address),
        }
        self.progress.inc(1);
        Ok(())
    }

    fn store_commit(&mut self, commit: Commit) -> Result<()> {
        let mark = commit.mark;
        let stored = StoredCommit::resolve(commit, &self.marks)?;
        let ref_name = stored.ref_name.clone();

        let address = self
            .storage
            .put_json(&StoredObject::Commit(stored))
            .context("Failed to store commit")?;
        if let Some(mark) = mark {
            tracing::debug!("added commit {} as {}", mark, address);
            self.marks.bind_mark(mark, &address)?;
        }
        self.set_ref(&ref_name, Some(address));
        self.progress.inc(1);
        Ok(())
    }

    fn store_reset(&mut self, reset: Reset) -> Result<()> {
        let address = reset
            .from
            .map(|mark| self.marks.address_of(mark).cloned())
            .transpose()?;
        self.set_ref(&reset.ref_name, address);
        Ok(())
    }

    fn store_tag(&mut self, tag: Tag) -> Result<()> {
        let mark = tag.mark;
        let stored = StoredTag::resolve(tag, &self.marks)?;
        let ref_name = format!("refs/tags/{}", stored.name);

        let address = self
            .storage
            .put_json(&StoredObject::Tag(stored))
            .context("Failed to store tag")?;
        if let Some(mark) = mark {
            self.marks.bind_mark(mark, &address)?;
        }
        tracing::debug!("added tag {} as {}", ref_name, address);
        self.set_ref(&ref_name, Some(address));
        self.progress.inc(1);
        Ok(())
    }

    fn set_ref(&mut self, ref_name: &str, address: Option<String>) {
        tracing::debug!("set ref {} = {:?}", ref_name, address);
        self.marks.set_ref(ref_name, address);
        self.updated.insert(ref_name.to_string());
    }

    /// The updated mark table and every ref the stream touched
    pub fn finish(self) -> (MarkTable, BTreeSet<String>) {
        self.progress.finish_and_clear();
        (self.marks, self.updated)
    }
}

/// Handle the export command (push)
///
/// Consumes the fast-export stream git writes after the `export` line, then
/// reports `ok <ref>` for every ref that was updated.
pub fn handle<S: StorageBackend, R: BufRead, W: Write>(
    storage: &S,
    remote: &mut Remote,
    input: R,
    output: &mut W,
    show_progress: bool,
) -> Result<()> {
    let spinner = progress::object_spinner(show_progress, "Storing objects");
    let mut engine = ExportEngine::new(storage, remote.marks().clone(), spinner);

    for object in FastExportParser::new(input) {
        if !engine.apply(object?)? {
            break;
        }
    }

    let (marks, updated) = engine.finish();
    remote.install_marks(marks);
    remote.persist_marks()?;
    remote.publish(storage)?;

    for ref_name in &updated {
        tracing::debug!("confirming {}", ref_name);
        writeln!(output, "ok {}", ref_name)?;
    }
    writeln!(output)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::{
        error::Error,
        git::stream::Mark,
        storage::{testing::CountingStorage, ImmutableStore, NameService},
    };

    const HELLO_STREAM: &[u8] = b"blob\n\
mark :1\n\
data 6\n\
hello\n\
\n\
commit refs/heads/master\n\
mark :2\n\
author A U Thor <author@example.com> 1700000000 +0000\n\
committer A U Thor <author@example.com> 1700000000 +0000\n\
data 5\n\
init\n\
M 100644 :1 hello.txt\n\
\n\
done\n";

    fn owned_remote(storage: &CountingStorage, git_dir: &std::path::Path) -> Remote {
        let identity = storage.identity().unwrap();
        Remote::open(git_dir, "origin", &format!("cas://{}", identity)).unwrap()
    }

    #[test]
    fn test_export_single_commit() {
        let storage = CountingStorage::new().unwrap();
        let git_dir = tempdir().unwrap();
        let mut remote = owned_remote(&storage, git_dir.path());

        let mut output = Vec::new();
        handle(&storage, &mut remote, HELLO_STREAM, &mut output, false).unwrap();

        assert_eq!(String::from_utf8(output).unwrap(), "ok refs/heads/master\n\n");
        // blob, commit, root metadata
        assert_eq!(storage.puts(), 3);
        assert_eq!(storage.publishes(), 1);

        let blob_address = remote.marks().address_of(Mark(1)).unwrap().clone();
        assert_eq!(storage.get(&blob_address).unwrap(), b"hello\n");

        let commit_address = remote.marks().address_of(Mark(2)).unwrap().clone();
        assert_eq!(
            remote.marks().get_ref("refs/heads/master").unwrap(),
            Some(&commit_address)
        );
        let stored: StoredObject = storage.get_json(&commit_address).unwrap();
        match stored {
            StoredObject::Commit(commit) => {
                assert_eq!(commit.message, b"init\n");
                assert_eq!(commit.parent, None);
                assert_eq!(commit.files[0].content(), Some(&blob_address));
            }
            other => panic!("expected a commit, got {:?}", other),
        }

        // The state survives a restart
        let reopened = owned_remote(&storage, git_dir.path());
        assert_eq!(reopened.marks().refs(), remote.marks().refs());
    }

    #[test]
    fn test_export_reset_and_tag() {
        let storage = CountingStorage::new().unwrap();
        let git_dir = tempdir().unwrap();
        let mut remote = owned_remote(&storage, git_dir.path());

        let mut stream = HELLO_STREAM[..HELLO_STREAM.len() - b"done\n".len()].to_vec();
        stream.extend_from_slice(
            b"reset refs/heads/topic\n\
from :2\n\
\n\
reset refs/heads/gone\n\
tag v1.0\n\
mark :3\n\
from :2\n\
tagger A U Thor <author@example.com> 1700000000 +0000\n\
data 8\n\
release\n\
done\n",
        );

        let mut output = Vec::new();
        handle(&storage, &mut remote, &stream[..], &mut output, false).unwrap();
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "ok refs/heads/gone\nok refs/heads/master\nok refs/heads/topic\nok refs/tags/v1.0\n\n"
        );

        let marks = remote.marks();
        let commit = marks.address_of(Mark(2)).unwrap();
        assert_eq!(marks.get_ref("refs/heads/topic").unwrap(), Some(commit));
        assert_eq!(marks.get_ref("refs/heads/gone").unwrap(), None);

        let tag_address = marks.get_ref("refs/tags/v1.0").unwrap().unwrap();
        assert_eq!(marks.address_of(Mark(3)).unwrap(), tag_address);
        let stored: StoredObject = storage.get_json(tag_address).unwrap();
        assert!(matches!(stored, StoredObject::Tag(StoredTag { target: Some(ref t), .. }) if t == commit));
    }

    #[test]
    fn test_export_unresolved_mark_writes_no_state() {
        let storage = CountingStorage::new().unwrap();
        let git_dir = tempdir().unwrap();
        let mut remote = owned_remote(&storage, git_dir.path());

        let stream = b"commit refs/heads/master\n\
mark :2\n\
committer A U Thor <author@example.com> 1700000000 +0000\n\
data 5\n\
init\n\
M 100644 :1 hello.txt\n\
\n\
blob\n\
mark :1\n\
data 6\n\
hello\n\
done\n";

        let mut output = Vec::new();
        let err = handle(&storage, &mut remote, &stream[..], &mut output, false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::UnresolvedMark(Mark(1)))
        ));

        assert!(output.is_empty());
        assert_eq!(storage.publishes(), 0);
        assert!(!remote.marks().has_refs());
        assert!(!git_dir.path().join("cas/origin/state.json").exists());
        assert!(!remote.repo_path().exists());
    }

    #[test]
    fn test_second_push_extends_history() {
        let storage = CountingStorage::new().unwrap();
        let git_dir = tempdir().unwrap();
        let mut remote = owned_remote(&storage, git_dir.path());
        handle(&storage, &mut remote, HELLO_STREAM, &mut Vec::new(), false).unwrap();

        // git re-uses marks from its marks file on the next push
        let stream = b"blob\n\
mark :3\n\
data 4\n\
bye\n\
commit refs/heads/master\n\
mark :4\n\
committer A U Thor <author@example.com> 1700000001 +0000\n\
data 7\n\
second\n\
from :2\n\
M 100644 :3 bye.txt\n\
D hello.txt\n\
\n\
done\n";
        handle(&storage, &mut remote, &stream[..], &mut Vec::new(), false).unwrap();

        let marks = remote.marks();
        let first = marks.address_of(Mark(2)).unwrap();
        let second = marks.address_of(Mark(4)).unwrap();
        assert_eq!(marks.get_ref("refs/heads/master").unwrap(), Some(second));
        let stored: StoredObject = storage.get_json(second).unwrap();
        match stored {
            StoredObject::Commit(commit) => assert_eq!(commit.parent.as_ref(), Some(first)),
            other => panic!("expected a commit, got {:?}", other),
        }
        assert_eq!(storage.publishes(), 2);
    }
}
