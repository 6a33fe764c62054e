//! Generation of the stream consumed by `git fast-import`

use std::io::{self, Write};

use super::{
    quoting::quote_path,
    stream::{Blob, Commit, FileOp, InterchangeObject, Mark, Reset, Tag},
};

/// Writes interchange records in the layout `git fast-export` produces
pub struct StreamEncoder<W: Write> {
    writer: W,
}

impl<W: Write> StreamEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write(&mut self, object: &InterchangeObject) -> io::Result<()> {
        match object {
            InterchangeObject::Blob(blob) => self.write_blob(blob),
            InterchangeObject::Commit(commit) => self.write_commit(commit),
            InterchangeObject::Reset(reset) => self.write_reset(reset),
            InterchangeObject::Tag(tag) => self.write_tag(tag),
            InterchangeObject::Feature(name) => writeln!(self.writer, "feature {}", name),
            InterchangeObject::Done => writeln!(self.writer, "done"),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_mark(&mut self, mark: Option<Mark>) -> io::Result<()> {
        if let Some(mark) = mark {
            writeln!(self.writer, "mark {}", mark)?;
        }
        Ok(())
    }

    /// `data <len>` header followed by exactly `len` bytes
    fn write_data(&mut self, data: &[u8]) -> io::Result<()> {
        writeln!(self.writer, "data {}", data.len())?;
        self.writer.write_all(data)
    }

    fn write_blob(&mut self, blob: &Blob) -> io::Result<()> {
        writeln!(self.writer, "blob")?;
        self.write_mark(blob.mark)?;
        self.write_data(&blob.data)?;
        writeln!(self.writer)
    }

    fn write_commit(&mut self, commit: &Commit) -> io::Result<()> {
        writeln!(self.writer, "commit {}", commit.ref_name)?;
        self.write_mark(commit.mark)?;
        if let Some(author) = &commit.author {
            writeln!(self.writer, "author {}", author)?;
        }
        writeln!(self.writer, "committer {}", commit.committer)?;
        self.write_data(&commit.message)?;
        if let Some(from) = commit.from {
            writeln!(self.writer, "from {}", from)?;
        }
        for merge in &commit.merges {
            writeln!(self.writer, "merge {}", merge)?;
        }
        for op in &commit.file_ops {
            self.write_file_op(op)?;
        }
        writeln!(self.writer)
    }

    fn write_file_op(&mut self, op: &FileOp<Mark>) -> io::Result<()> {
        match op {
            FileOp::Modify {
                mode,
                content,
                path,
            } => writeln!(self.writer, "M {} {} {}", mode, content, quote_path(path)),
            FileOp::Delete { path } => writeln!(self.writer, "D {}", quote_path(path)),
            FileOp::Copy { src, dst } => {
                writeln!(self.writer, "C {} {}", quote_path(src), quote_path(dst))
            }
            FileOp::Rename { src, dst } => {
                writeln!(self.writer, "R {} {}", quote_path(src), quote_path(dst))
            }
        }
    }

    /// A reset that moves the ref also ends its record with a blank line
    fn write_reset(&mut self, reset: &Reset) -> io::Result<()> {
        writeln!(self.writer, "reset {}", reset.ref_name)?;
        if let Some(from) = reset.from {
            writeln!(self.writer, "from {}", from)?;
            writeln!(self.writer)?;
        }
        Ok(())
    }

    fn write_tag(&mut self, tag: &Tag) -> io::Result<()> {
        writeln!(self.writer, "tag {}", tag.name)?;
        self.write_mark(tag.mark)?;
        if let Some(from) = tag.from {
            writeln!(self.writer, "from {}", from)?;
        }
        if let Some(tagger) = &tag.tagger {
            writeln!(self.writer, "tagger {}", tagger)?;
        }
        self.write_data(&tag.message)?;
        writeln!(self.writer)
    }
}
