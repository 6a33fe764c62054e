//! Pull parser for the stream produced by `git fast-export`

use std::{
    collections::VecDeque,
    io::{BufRead, Read},
};

use anyhow::{Context, Result};

use super::{
    quoting::{parse_leading_path, parse_trailing_path},
    stream::{Blob, Commit, FileOp, InterchangeObject, Mark, Reset, Tag},
};
use crate::error::Error;

/// The only `feature` the bridge negotiates
pub const SUPPORTED_FEATURE: &str = "done";

/// Commit fields accumulated line by line until the record is complete
struct CommitBuilder {
    line: String,
    ref_name: String,
    mark: Option<Mark>,
    author: Option<String>,
    committer: Option<String>,
    message: Vec<u8>,
    from: Option<Mark>,
    merges: Vec<Mark>,
    file_ops: Vec<FileOp<Mark>>,
}

impl CommitBuilder {
    fn new(line: &str, ref_name: &str) -> Self {
        Self {
            line: line.to_string(),
            ref_name: ref_name.to_string(),
            mark: None,
            author: None,
            committer: None,
            message: Vec::new(),
            from: None,
            merges: Vec::new(),
            file_ops: Vec::new(),
        }
    }

    fn build(self) -> Result<Commit> {
        let committer = self
            .committer
            .ok_or_else(|| Error::protocol(&self.line, "commit has no committer"))?;
        Ok(Commit {
            mark: self.mark,
            ref_name: self.ref_name,
            author: self.author,
            committer,
            message: self.message,
            from: self.from,
            merges: self.merges,
            file_ops: self.file_ops,
        })
    }
}

/// The record currently being filled in
enum Pending {
    Blob(Blob),
    Commit(Box<CommitBuilder>),
    Reset(Reset),
    Tag(Tag),
}

impl Pending {
    fn finish(self) -> Result<InterchangeObject> {
        Ok(match self {
            Pending::Blob(blob) => InterchangeObject::Blob(blob),
            Pending::Commit(builder) => InterchangeObject::Commit(builder.build()?),
            Pending::Reset(reset) => InterchangeObject::Reset(reset),
            Pending::Tag(tag) => InterchangeObject::Tag(tag),
        })
    }
}

/// Lazily decodes interchange records from a byte stream.
///
/// The parser reads only as far as it needs to complete the next record, so
/// it can share a reader with the remote-helper command loop. Once it has
/// returned an error or seen `done` it yields nothing more.
pub struct FastExportParser<R> {
    reader: R,
    pending: Option<Pending>,
    ready: VecDeque<InterchangeObject>,
    finished: bool,
}

impl<R: BufRead> FastExportParser<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: None,
            ready: VecDeque::new(),
            finished: false,
        }
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let read = self
            .reader
            .read_until(b'\n', &mut buf)
            .context("Failed to read interchange stream")?;
        if read == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        let line = String::from_utf8(buf).map_err(|e| {
            Error::protocol(
                String::from_utf8_lossy(e.as_bytes()),
                "line is not valid UTF-8",
            )
        })?;
        Ok(Some(line))
    }

    fn read_data(&mut self, line: &str, len: &str) -> Result<Vec<u8>> {
        let len: u64 = len
            .parse()
            .map_err(|_| Error::protocol(line, "invalid data length"))?;
        // Grow with the bytes actually read, never with the claimed length
        let mut data = Vec::new();
        (&mut self.reader)
            .take(len)
            .read_to_end(&mut data)
            .context("Failed to read data payload")?;
        if data.len() as u64 != len {
            return Err(Error::protocol(line, "stream ended inside data payload").into());
        }
        Ok(data)
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(pending) = self.pending.take() {
            self.ready.push_back(pending.finish()?);
        }
        Ok(())
    }

    fn open(&mut self, record: Pending) -> Result<()> {
        self.flush()?;
        self.pending = Some(record);
        Ok(())
    }

    fn commit_mut(&mut self, line: &str, command: &str) -> Result<&mut CommitBuilder> {
        match self.pending.as_mut() {
            Some(Pending::Commit(builder)) => Ok(&mut **builder),
            _ => Err(Error::protocol(line, format!("`{}` outside of a commit", command)).into()),
        }
    }

    /// Consume one line and apply it to the parser state
    fn step(&mut self) -> Result<()> {
        let Some(line) = self.read_line()? else {
            self.flush()?;
            self.finished = true;
            return Ok(());
        };
        tracing::trace!("fast-export line: {}", line);

        if line.is_empty() {
            if matches!(self.pending, Some(Pending::Commit(_))) {
                self.flush()?;
            }
            return Ok(());
        }

        let (command, args) = line.split_once(' ').unwrap_or((line.as_str(), ""));
        match command {
            "blob" => self.open(Pending::Blob(Blob {
                mark: None,
                data: Vec::new(),
            }))?,
            "commit" => {
                if args.is_empty() {
                    return Err(Error::protocol(&line, "commit without a ref name").into());
                }
                self.open(Pending::Commit(Box::new(CommitBuilder::new(&line, args))))?
            }
            "reset" => {
                if args.is_empty() {
                    return Err(Error::protocol(&line, "reset without a ref name").into());
                }
                self.open(Pending::Reset(Reset {
                    ref_name: args.to_string(),
                    from: None,
                }))?
            }
            "tag" => {
                if args.is_empty() {
                    return Err(Error::protocol(&line, "tag without a name").into());
                }
                self.open(Pending::Tag(Tag {
                    name: args.to_string(),
                    mark: None,
                    from: None,
                    tagger: None,
                    message: Vec::new(),
                }))?
            }
            "feature" => {
                self.flush()?;
                if args != SUPPORTED_FEATURE {
                    return Err(Error::UnsupportedFeature(args.to_string()).into());
                }
                self.ready.push_back(InterchangeObject::Feature(args.to_string()));
            }
            "done" => {
                self.flush()?;
                self.ready.push_back(InterchangeObject::Done);
                self.finished = true;
            }
            "mark" => {
                let mark = parse_mark(&line, args)?;
                match self.pending.as_mut() {
                    Some(Pending::Blob(blob)) => blob.mark = Some(mark),
                    Some(Pending::Commit(builder)) => builder.mark = Some(mark),
                    Some(Pending::Tag(tag)) => tag.mark = Some(mark),
                    _ => {
                        return Err(
                            Error::protocol(&line, "`mark` outside of a blob, commit or tag")
                                .into(),
                        )
                    }
                }
            }
            "data" => {
                if !matches!(
                    self.pending,
                    Some(Pending::Blob(_) | Pending::Commit(_) | Pending::Tag(_))
                ) {
                    return Err(
                        Error::protocol(&line, "`data` outside of a blob, commit or tag").into(),
                    );
                }
                let data = self.read_data(&line, args)?;
                match self.pending.as_mut() {
                    Some(Pending::Blob(blob)) => blob.data = data,
                    Some(Pending::Commit(builder)) => builder.message = data,
                    Some(Pending::Tag(tag)) => tag.message = data,
                    _ => {}
                }
            }
            "author" => self.commit_mut(&line, command)?.author = Some(args.to_string()),
            "committer" => self.commit_mut(&line, command)?.committer = Some(args.to_string()),
            "from" => {
                let mark = parse_mark(&line, args)?;
                match self.pending.as_mut() {
                    Some(Pending::Commit(builder)) => builder.from = Some(mark),
                    Some(Pending::Reset(reset)) => reset.from = Some(mark),
                    Some(Pending::Tag(tag)) => tag.from = Some(mark),
                    _ => {
                        return Err(Error::protocol(
                            &line,
                            "`from` outside of a commit, reset or tag",
                        )
                        .into())
                    }
                }
            }
            "merge" => {
                let mark = parse_mark(&line, args)?;
                self.commit_mut(&line, command)?.merges.push(mark);
            }
            "M" | "D" | "C" | "R" => {
                let op = parse_file_op(&line, command, args)?;
                self.commit_mut(&line, command)?.file_ops.push(op);
            }
            "tagger" => match self.pending.as_mut() {
                Some(Pending::Tag(tag)) => tag.tagger = Some(args.to_string()),
                _ => return Err(Error::protocol(&line, "`tagger` outside of a tag").into()),
            },
            other => return Err(Error::UnsupportedCommand(other.to_string()).into()),
        }

        Ok(())
    }
}

impl<R: BufRead> Iterator for FastExportParser<R> {
    type Item = Result<InterchangeObject>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(object) = self.ready.pop_front() {
                return Some(Ok(object));
            }
            if self.finished {
                return None;
            }
            if let Err(e) = self.step() {
                self.finished = true;
                self.pending = None;
                self.ready.clear();
                return Some(Err(e));
            }
        }
    }
}

fn parse_mark(line: &str, reference: &str) -> Result<Mark> {
    reference
        .parse::<Mark>()
        .map_err(|reason| Error::protocol(line, reason).into())
}

fn parse_file_op(line: &str, command: &str, args: &str) -> Result<FileOp<Mark>> {
    let op = match command {
        "M" => {
            let (mode, rest) = args
                .split_once(' ')
                .ok_or_else(|| Error::protocol(line, "incomplete filemodify"))?;
            let (dataref, path) = rest
                .split_once(' ')
                .ok_or_else(|| Error::protocol(line, "incomplete filemodify"))?;
            FileOp::Modify {
                mode: mode.to_string(),
                content: parse_mark(line, dataref)?,
                path: parse_trailing_path(path).map_err(|reason| Error::protocol(line, reason))?,
            }
        }
        "D" => FileOp::Delete {
            path: parse_trailing_path(args).map_err(|reason| Error::protocol(line, reason))?,
        },
        _ => {
            let (src, rest) =
                parse_leading_path(args).map_err(|reason| Error::protocol(line, reason))?;
            let dst = parse_trailing_path(rest).map_err(|reason| Error::protocol(line, reason))?;
            if command == "C" {
                FileOp::Copy { src, dst }
            } else {
                FileOp::Rename { src, dst }
            }
        }
    };
    Ok(op)
}

/// Parse a whole in-memory stream, stopping at the first error
#[cfg(test)]
pub fn parse_all(input: &[u8]) -> Result<Vec<InterchangeObject>> {
    FastExportParser::new(input).collect()
}
