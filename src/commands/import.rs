use std::{collections::HashSet, io::Write};

use anyhow::{Context, Result};
use indicatif::ProgressBar;

use crate::{
    git::{
        fast_import::StreamEncoder,
        stream::{Blob, InterchangeObject, Mark, Reset},
    },
    progress,
    remote::Remote,
    storage::{
        objects::{StoredCommit, StoredObject},
        StorageBackend, StoreAddress,
    },
};

/// Pending work on the import stack
enum Step {
    /// Make sure the commit and its ancestry are emitted
    Visit(StoreAddress),
    /// Every ancestor is out; emit this commit
    Emit(StoreAddress, StoredCommit),
}

/// Replays store history as a `git fast-import` stream.
///
/// Ancestors are always written before their descendants, and an object is
/// only read from the store if the mark table has never seen its address.
pub struct ImportEngine<'a, S, W: Write> {
    storage: &'a S,
    remote: &'a mut Remote,
    encoder: StreamEncoder<W>,
    reset_refs: HashSet<String>,
    progress: ProgressBar,
}

impl<'a, S: StorageBackend, W: Write> ImportEngine<'a, S, W> {
    pub fn new(storage: &'a S, remote: &'a mut Remote, output: W, progress: ProgressBar) -> Self {
        Self {
            storage,
            remote,
            encoder: StreamEncoder::new(output),
            reset_refs: HashSet::new(),
            progress,
        }
    }

    /// Emit everything git is missing for `ref_name`, then point the ref at
    /// its tip
    pub fn import_ref(&mut self, ref_name: &str) -> Result<()> {
        let Some(tip) = self.remote.marks().get_ref(ref_name)?.cloned() else {
            tracing::debug!("{} is unborn, nothing to import", ref_name);
            return Ok(());
        };

        tracing::debug!("importing {} from {}", ref_name, tip);
        let tip_mark = self.sync_tip(ref_name, &tip)?;

        self.encoder.write(&InterchangeObject::Reset(Reset {
            ref_name: self.remote.adjust_ref(ref_name),
            from: Some(tip_mark),
        }))?;
        self.encoder.flush()?;
        Ok(())
    }

    /// Mark of the commit (or previously exported tag) the ref should point at
    fn sync_tip(&mut self, ref_name: &str, tip: &StoreAddress) -> Result<Mark> {
        if let Some(mark) = self.remote.marks().existing_mark(tip) {
            return Ok(mark);
        }

        let commit_address = match self.read_object(tip)? {
            StoredObject::Commit(commit) => {
                self.walk(ref_name, Step::Emit(tip.clone(), commit))?;
                tip.clone()
            }
            StoredObject::Tag(tag) => {
                let target = tag
                    .target
                    .with_context(|| format!("Tag {} has no target", tag.name))?;
                tracing::debug!("{} is tag {} of {}", ref_name, tag.name, target);
                self.walk(ref_name, Step::Visit(target.clone()))?;
                target
            }
        };

        self.remote
            .marks()
            .existing_mark(&commit_address)
            .with_context(|| format!("Commit {} was not imported", commit_address))
    }

    /// Depth-first walk over the commit graph with an explicit stack
    fn walk(&mut self, ref_name: &str, start: Step) -> Result<()> {
        let mut stack = Vec::new();
        let mut read = HashSet::new();

        match start {
            Step::Emit(address, commit) => {
                read.insert(address.clone());
                Self::push_parents(&mut stack, address, commit);
            }
            visit => stack.push(visit),
        }

        while let Some(step) = stack.pop() {
            match step {
                Step::Visit(address) => {
                    if self.remote.marks().has_address(&address) || read.contains(&address) {
                        continue;
                    }
                    let commit = match self.read_object(&address)? {
                        StoredObject::Commit(commit) => commit,
                        StoredObject::Tag(tag) => {
                            anyhow::bail!("Object {} is tag {}, expected a commit", address, tag.name)
                        }
                    };
                    read.insert(address.clone());
                    Self::push_parents(&mut stack, address, commit);
                }
                Step::Emit(address, commit) => self.emit_commit(ref_name, &address, &commit)?,
            }
        }
        Ok(())
    }

    /// Queue `commit` behind its parents; the first parent is visited first
    fn push_parents(stack: &mut Vec<Step>, address: StoreAddress, commit: StoredCommit) {
        let parents: Vec<StoreAddress> = commit.parents().cloned().collect();
        stack.push(Step::Emit(address, commit));
        for parent in parents.into_iter().rev() {
            stack.push(Step::Visit(parent));
        }
    }

    fn emit_commit(&mut self, ref_name: &str, address: &str, commit: &StoredCommit) -> Result<()> {
        for content in commit.files.iter().filter_map(|op| op.content()) {
            self.emit_blob(content)?;
        }

        let adjusted = self.remote.adjust_ref(ref_name);
        if self.reset_refs.insert(adjusted.clone()) {
            self.encoder.write(&InterchangeObject::Reset(Reset {
                ref_name: adjusted.clone(),
                from: None,
            }))?;
        }

        let mark = self.remote.marks_mut().mark_of(address).mark();
        tracing::debug!("exporting commit {} as {}", address, mark);
        let interchange = commit.to_interchange(&adjusted, mark, self.remote.marks())?;
        self.encoder.write(&InterchangeObject::Commit(interchange))?;
        self.progress.inc(1);
        Ok(())
    }

    fn emit_blob(&mut self, address: &str) -> Result<()> {
        if self.remote.marks().has_address(address) {
            return Ok(());
        }

        let data = self
            .storage
            .get(address)
            .with_context(|| format!("Failed to read blob {}", address))?;
        let mark = self.remote.marks_mut().mark_of(address).mark();
        tracing::debug!("exporting blob {} as {}", address, mark);
        self.encoder.write(&InterchangeObject::Blob(Blob {
            mark: Some(mark),
            data,
        }))?;
        self.progress.inc(1);
        Ok(())
    }

    fn read_object(&self, address: &str) -> Result<StoredObject> {
        self.storage
            .get_json(address)
            .with_context(|| format!("Failed to read stored object {}", address))
    }

    pub fn finish(self) {
        self.progress.finish_and_clear();
    }
}

/// Handle one `import <ref>` line
pub fn handle<S: StorageBackend, W: Write>(
    storage: &S,
    remote: &mut Remote,
    ref_name: &str,
    default_branch: &str,
    output: &mut W,
    show_progress: bool,
) -> Result<()> {
    let ref_name = if ref_name == "HEAD" {
        default_branch
    } else {
        ref_name
    };

    let spinner = progress::object_spinner(show_progress, "Fetching objects");
    let mut engine = ImportEngine::new(storage, remote, output, spinner);
    engine.import_ref(ref_name)?;
    engine.finish();

    remote.persist_marks()
}

#[cfg(test)]
mod tests {
    use tempfile::{tempdir, TempDir};

    use super::*;
    use crate::{
        error::Error,
        git::{fast_export::parse_all, stream::FileOp},
        storage::{objects::StoredTag, testing::CountingStorage, ImmutableStore},
    };

    const COMMITTER: &str = "A U Thor <author@example.com> 1700000000 +0000";

    fn store_commit(
        storage: &CountingStorage,
        parent: Option<&str>,
        merges: &[&str],
        files: &[(&str, &str)],
        message: &str,
    ) -> StoreAddress {
        let commit = StoredCommit {
            ref_name: "refs/heads/master".to_string(),
            author: None,
            committer: COMMITTER.to_string(),
            message: message.as_bytes().to_vec(),
            parent: parent.map(str::to_string),
            merges: merges.iter().map(|m| m.to_string()).collect(),
            files: files
                .iter()
                .map(|(path, content)| FileOp::Modify {
                    mode: "100644".to_string(),
                    content: content.to_string(),
                    path: path.to_string(),
                })
                .collect(),
        };
        storage.put_json(&StoredObject::Commit(commit)).unwrap()
    }

    fn remote_with_ref(tip: Option<&str>) -> (TempDir, Remote) {
        let git_dir = tempdir().unwrap();
        let mut remote = Remote::open(git_dir.path(), "origin", "cas://node-a").unwrap();
        remote
            .marks_mut()
            .set_ref("refs/heads/master", tip.map(str::to_string));
        (git_dir, remote)
    }

    fn import(storage: &CountingStorage, remote: &mut Remote, ref_name: &str) -> Vec<u8> {
        let mut output = Vec::new();
        handle(
            storage,
            remote,
            ref_name,
            "refs/heads/master",
            &mut output,
            false,
        )
        .unwrap();
        output
    }

    fn commit_messages(objects: &[InterchangeObject]) -> Vec<String> {
        objects
            .iter()
            .filter_map(|object| match object {
                InterchangeObject::Commit(commit) => {
                    Some(String::from_utf8(commit.message.clone()).unwrap())
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_linear_history_in_order() {
        let storage = CountingStorage::new().unwrap();
        let blob = storage.put(b"content\n").unwrap();
        let a = store_commit(&storage, None, &[], &[("f.txt", blob.as_str())], "A");
        let b = store_commit(&storage, Some(a.as_str()), &[], &[], "B");
        let c = store_commit(&storage, Some(b.as_str()), &[], &[], "C");
        let (_git_dir, mut remote) = remote_with_ref(Some(c.as_str()));

        let output = import(&storage, &mut remote, "refs/heads/master");
        let objects = parse_all(&output).unwrap();

        assert_eq!(commit_messages(&objects), ["A", "B", "C"]);
        assert!(matches!(&objects[0], InterchangeObject::Blob(b) if b.data == b"content\n"));
        match objects.last().unwrap() {
            InterchangeObject::Reset(reset) => {
                assert_eq!(reset.ref_name, "refs/cas/origin/heads/master");
                assert_eq!(reset.from, remote.marks().existing_mark(&c));
            }
            other => panic!("expected a trailing reset, got {:?}", other),
        }

        // Each commit points at the mark of its parent
        let commits: Vec<_> = objects
            .iter()
            .filter_map(|o| match o {
                InterchangeObject::Commit(commit) => Some(commit),
                _ => None,
            })
            .collect();
        assert_eq!(commits[0].from, None);
        assert_eq!(commits[1].from, commits[0].mark);
        assert_eq!(commits[2].from, commits[1].mark);
        assert_eq!(commits[0].ref_name, "refs/cas/origin/heads/master");
    }

    #[test]
    fn test_reimport_reads_nothing() {
        let storage = CountingStorage::new().unwrap();
        let a = store_commit(&storage, None, &[], &[], "A");
        let (_git_dir, mut remote) = remote_with_ref(Some(a.as_str()));
        import(&storage, &mut remote, "refs/heads/master");

        storage.reset_counts();
        let output = import(&storage, &mut remote, "refs/heads/master");
        let mark = remote.marks().existing_mark(&a).unwrap();

        assert_eq!(storage.gets(), 0);
        assert_eq!(
            String::from_utf8(output).unwrap(),
            format!("reset refs/cas/origin/heads/master\nfrom {}\n\n", mark)
        );
    }

    #[test]
    fn test_merge_parents_come_first() {
        let storage = CountingStorage::new().unwrap();
        let shared = storage.put(b"shared\n").unwrap();
        let base = store_commit(&storage, None, &[], &[("s.txt", shared.as_str())], "base");
        let left = store_commit(&storage, Some(base.as_str()), &[], &[("s.txt", shared.as_str())], "left");
        let right = store_commit(&storage, Some(base.as_str()), &[], &[], "right");
        let merge = store_commit(&storage, Some(left.as_str()), &[right.as_str()], &[], "merge");
        let (_git_dir, mut remote) = remote_with_ref(Some(merge.as_str()));

        let output = import(&storage, &mut remote, "HEAD");
        let objects = parse_all(&output).unwrap();

        assert_eq!(commit_messages(&objects), ["base", "left", "right", "merge"]);
        let blobs = objects
            .iter()
            .filter(|o| matches!(o, InterchangeObject::Blob(_)))
            .count();
        assert_eq!(blobs, 1);
        // base is read once even though two children reach it
        assert_eq!(storage.gets(), 5);

        let merge_commit = objects
            .iter()
            .find_map(|o| match o {
                InterchangeObject::Commit(c) if c.message == b"merge" => Some(c),
                _ => None,
            })
            .unwrap();
        assert_eq!(merge_commit.merges, vec![remote.marks().existing_mark(&right).unwrap()]);
    }

    #[test]
    fn test_tag_is_imported_as_lightweight_ref() {
        let storage = CountingStorage::new().unwrap();
        let a = store_commit(&storage, None, &[], &[], "A");
        let tag = storage
            .put_json(&StoredObject::Tag(StoredTag {
                name: "v1".to_string(),
                target: Some(a.clone()),
                tagger: Some(COMMITTER.to_string()),
                message: b"release\n".to_vec(),
            }))
            .unwrap();
        let (_git_dir, mut remote) = remote_with_ref(None);
        remote.marks_mut().set_ref("refs/tags/v1", Some(tag));

        let output = import(&storage, &mut remote, "refs/tags/v1");
        let objects = parse_all(&output).unwrap();
        assert_eq!(commit_messages(&objects), ["A"]);
        match objects.last().unwrap() {
            InterchangeObject::Reset(reset) => {
                assert_eq!(reset.ref_name, "refs/cas/origin/tags/v1");
                assert_eq!(reset.from, remote.marks().existing_mark(&a));
            }
            other => panic!("expected a trailing reset, got {:?}", other),
        }
    }

    #[test]
    fn test_unborn_and_unknown_refs() {
        let storage = CountingStorage::new().unwrap();
        let (_git_dir, mut remote) = remote_with_ref(None);

        assert!(import(&storage, &mut remote, "refs/heads/master").is_empty());

        let err = handle(
            &storage,
            &mut remote,
            "refs/heads/nope",
            "refs/heads/master",
            &mut Vec::new(),
            false,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::UnknownReference(r)) if r == "refs/heads/nope"
        ));
    }

    #[test]
    fn test_marks_persisted_after_import() {
        let storage = CountingStorage::new().unwrap();
        let a = store_commit(&storage, None, &[], &[], "A");
        let (git_dir, mut remote) = remote_with_ref(Some(a.as_str()));
        import(&storage, &mut remote, "refs/heads/master");

        let reopened = Remote::open(git_dir.path(), "origin", "cas://node-a").unwrap();
        assert!(reopened.marks().has_address(&a));
    }
}
